// Language profile table
// Maps a language id to its execution strategy and toolchain commands

use crate::error::ConfigError;
use crate::types::LanguageId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const DEFAULT_ENTRY_POINT: &str = "solve";

/// Harness flavour used when the driver is injected around user code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Harness {
    Python,
    #[serde(rename = "javascript")]
    JavaScript,
}

/// How a batch job is executed for a language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// Wrap user code in a generated harness; all cases run in one process
    DriverInjection {
        harness: Harness,
        #[serde(default = "default_entry_point")]
        entry_point: String,
    },
    /// Run the unmodified program once per case
    PerCaseLoop,
}

fn default_entry_point() -> String {
    DEFAULT_ENTRY_POINT.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageProfile {
    pub id: LanguageId,
    pub name: String,
    pub file_extension: String,
    /// File name the source is written to (Java needs `Main.java`)
    pub source_file: String,
    pub strategy: Strategy,
    /// Local compile command; `{file}` and `{dir}` are substituted
    #[serde(default)]
    pub compile: Option<Vec<String>>,
    /// Local run command; `{file}` and `{dir}` are substituted
    pub run: Vec<String>,
}

impl LanguageProfile {
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageProfile>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Registry of configured languages
///
/// Static for the lifetime of a process; loaded once at startup.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: BTreeMap<LanguageId, LanguageProfile>,
}

impl LanguageRegistry {
    /// Built-in table: Python and JavaScript use an injected driver,
    /// Java and C++ are run once per case
    pub fn builtin() -> Self {
        let profiles = vec![
            LanguageProfile {
                id: LanguageId(71),
                name: "python".to_string(),
                file_extension: ".py".to_string(),
                source_file: "main.py".to_string(),
                strategy: Strategy::DriverInjection {
                    harness: Harness::Python,
                    entry_point: default_entry_point(),
                },
                compile: None,
                run: strings(&["python3", "-u", "{file}"]),
            },
            LanguageProfile {
                id: LanguageId(63),
                name: "javascript".to_string(),
                file_extension: ".js".to_string(),
                source_file: "main.js".to_string(),
                strategy: Strategy::DriverInjection {
                    harness: Harness::JavaScript,
                    entry_point: default_entry_point(),
                },
                compile: None,
                run: strings(&["node", "{file}"]),
            },
            LanguageProfile {
                id: LanguageId(62),
                name: "java".to_string(),
                file_extension: ".java".to_string(),
                source_file: "Main.java".to_string(),
                strategy: Strategy::PerCaseLoop,
                compile: Some(strings(&["javac", "-d", "{dir}", "{file}"])),
                run: strings(&["java", "-cp", "{dir}", "Main"]),
            },
            LanguageProfile {
                id: LanguageId(54),
                name: "cpp".to_string(),
                file_extension: ".cpp".to_string(),
                source_file: "main.cpp".to_string(),
                strategy: Strategy::PerCaseLoop,
                compile: Some(strings(&["g++", "-O2", "-std=c++17", "-o", "{dir}/main", "{file}"])),
                run: strings(&["{dir}/main"]),
            },
        ];
        Self::from_profiles(profiles)
    }

    fn from_profiles(profiles: Vec<LanguageProfile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    /// Load language profiles from a languages.json file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let parsed: LanguagesJson = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: display.clone(),
            source,
        })?;

        if parsed.languages.is_empty() {
            return Err(ConfigError::Invalid(format!("no languages configured in {}", display)));
        }
        for profile in &parsed.languages {
            if profile.run.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{}' has an empty run command",
                    profile.name
                )));
            }
            if profile.source_file.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{}' has no source file name",
                    profile.name
                )));
            }
        }

        Ok(Self::from_profiles(parsed.languages))
    }

    /// Load from `path` when given, otherwise use the built-in table
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::builtin()),
        }
    }

    pub fn get(&self, id: LanguageId) -> Option<&LanguageProfile> {
        self.profiles.get(&id)
    }

    /// Resolve a language by numeric id or by name
    pub fn resolve(&self, key: &str) -> Option<&LanguageProfile> {
        let key = key.trim();
        if let Ok(id) = key.parse::<u32>() {
            return self.get(LanguageId(id));
        }
        self.profiles
            .values()
            .find(|p| p.name.eq_ignore_ascii_case(key))
    }

    pub fn ids(&self) -> Vec<LanguageId> {
        self.profiles.keys().copied().collect()
    }

    pub fn profiles(&self) -> impl Iterator<Item = &LanguageProfile> {
        self.profiles.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_strategies() {
        let registry = LanguageRegistry::builtin();

        let python = registry.get(LanguageId(71)).unwrap();
        assert_eq!(
            python.strategy,
            Strategy::DriverInjection {
                harness: Harness::Python,
                entry_point: "solve".to_string()
            }
        );
        assert!(!python.is_compiled());

        let java = registry.get(LanguageId(62)).unwrap();
        assert_eq!(java.strategy, Strategy::PerCaseLoop);
        assert_eq!(java.source_file, "Main.java");
        assert!(java.is_compiled());

        assert!(registry.get(LanguageId(9999)).is_none());
    }

    #[test]
    fn test_resolve_by_name_or_id() {
        let registry = LanguageRegistry::builtin();
        assert_eq!(registry.resolve("cpp").unwrap().id, LanguageId(54));
        assert_eq!(registry.resolve("JavaScript").unwrap().id, LanguageId(63));
        assert_eq!(registry.resolve(" 62 ").unwrap().name, "java");
        assert!(registry.resolve("cobol").is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "languages": [
                    {{
                        "id": 71,
                        "name": "python",
                        "file_extension": ".py",
                        "source_file": "main.py",
                        "strategy": {{"kind": "driver_injection", "harness": "python"}},
                        "run": ["python3", "{{file}}"]
                    }}
                ]
            }}"#
        )
        .unwrap();

        let registry = LanguageRegistry::load(file.path()).unwrap();
        assert_eq!(registry.ids(), vec![LanguageId(71)]);
        match &registry.get(LanguageId(71)).unwrap().strategy {
            Strategy::DriverInjection { entry_point, .. } => assert_eq!(entry_point, "solve"),
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn test_shipped_table_matches_builtin() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/languages.json");
        let shipped = LanguageRegistry::load(&path).unwrap();
        let builtin = LanguageRegistry::builtin();
        assert_eq!(
            shipped.profiles().collect::<Vec<_>>(),
            builtin.profiles().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_load_rejects_empty_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"languages": []}}"#).unwrap();
        let err = LanguageRegistry::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = LanguageRegistry::load(Path::new("/nonexistent/languages.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
