/// Driver Generator - Execution Plans for Batch Jobs
///
/// **Core Responsibility:**
/// Turn a batch job and its language profile into something an engine can run.
///
/// - `DriverInjection`: renders a harness around the user's source. The harness
///   loads the code, looks up the entry point by name, calls it once per case,
///   and prints one JSON report between two nonce-tagged marker lines.
/// - `PerCaseLoop`: the unmodified program plus one stdin per case.
///
/// User text never becomes harness syntax: source and cases are embedded as
/// base64 literals and every other value is a JSON string literal.
use crate::config::Timeouts;
use crate::engine::ProgramArtifact;
use anyhow::{bail, Context, Result};
use arena_common::languages::{Harness, LanguageProfile, Strategy};
use arena_common::types::{Job, TestCase, TestInput};
use base64::{engine::general_purpose, Engine as _};
use handlebars::Handlebars;
use serde::Serialize;
use std::time::Duration;

const PYTHON_TEMPLATE: &str = "python_driver";
const JAVASCRIPT_TEMPLATE: &str = "javascript_driver";

/// Sentinel lines framing the harness report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportMarkers {
    pub begin: String,
    pub end: String,
}

impl ReportMarkers {
    pub fn new(nonce: &str) -> Self {
        Self {
            begin: format!("<<<ARENA_REPORT_BEGIN {}>>>", nonce),
            end: format!("<<<ARENA_REPORT_END {}>>>", nonce),
        }
    }

    /// Fresh markers that user output cannot predict
    pub fn generate() -> Self {
        Self::new(&uuid::Uuid::new_v4().simple().to_string())
    }
}

#[derive(Debug, Clone)]
pub enum ExecutionPlan {
    /// One run of the generated harness covering every case
    Driver {
        artifact: ProgramArtifact,
        markers: ReportMarkers,
        budget: Duration,
    },
    /// One run of the user program per case input
    PerCase {
        artifact: ProgramArtifact,
        inputs: Vec<String>,
        per_case: Duration,
        budget: Duration,
    },
}

impl ExecutionPlan {
    /// Wall-clock budget for the whole plan
    pub fn budget(&self) -> Duration {
        match self {
            ExecutionPlan::Driver { budget, .. } | ExecutionPlan::PerCase { budget, .. } => *budget,
        }
    }
}

#[derive(Serialize)]
struct HarnessCase<'a> {
    input: &'a TestInput,
    expected: &'a str,
}

#[derive(Serialize)]
struct HarnessData {
    source_b64: String,
    cases_b64: String,
    entry_point: String,
    begin_marker: String,
    end_marker: String,
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn json_literal(text: &str) -> Result<String> {
    Ok(serde_json::to_string(text)?)
}

pub struct DriverGenerator {
    templates: Handlebars<'static>,
}

impl DriverGenerator {
    pub fn new() -> Result<Self> {
        let mut templates = Handlebars::new();
        templates.set_strict_mode(true);
        // output is source code, not HTML
        templates.register_escape_fn(handlebars::no_escape);
        templates
            .register_template_string(PYTHON_TEMPLATE, include_str!("../templates/python_driver.py.hbs"))
            .context("Failed to register Python driver template")?;
        templates
            .register_template_string(JAVASCRIPT_TEMPLATE, include_str!("../templates/javascript_driver.js.hbs"))
            .context("Failed to register JavaScript driver template")?;
        Ok(Self { templates })
    }

    /// Render the harness source for `cases`
    pub fn render_driver(
        &self,
        harness: Harness,
        entry_point: &str,
        source: &str,
        cases: &[TestCase],
        markers: &ReportMarkers,
    ) -> Result<String> {
        if !is_identifier(entry_point) {
            bail!("entry point '{}' is not a valid identifier", entry_point);
        }

        let harness_cases: Vec<HarnessCase<'_>> = cases
            .iter()
            .map(|case| HarnessCase {
                input: &case.input,
                expected: &case.expected_output,
            })
            .collect();
        let cases_json = serde_json::to_string(&harness_cases)?;

        let data = HarnessData {
            source_b64: general_purpose::STANDARD.encode(source.as_bytes()),
            cases_b64: general_purpose::STANDARD.encode(cases_json.as_bytes()),
            entry_point: json_literal(entry_point)?,
            begin_marker: json_literal(&markers.begin)?,
            end_marker: json_literal(&markers.end)?,
        };

        let template = match harness {
            Harness::Python => PYTHON_TEMPLATE,
            Harness::JavaScript => JAVASCRIPT_TEMPLATE,
        };
        self.templates
            .render(template, &data)
            .with_context(|| format!("Failed to render {} template", template))
    }

    /// Build the execution plan for a batch job
    pub fn plan(&self, job: &Job, profile: &LanguageProfile, timeouts: &Timeouts) -> Result<ExecutionPlan> {
        let cases = job.test_cases();
        let compile_allowance = if profile.is_compiled() {
            timeouts.compile
        } else {
            Duration::ZERO
        };

        match &profile.strategy {
            Strategy::DriverInjection { harness, entry_point } => {
                let markers = ReportMarkers::generate();
                let driver = self.render_driver(*harness, entry_point, &job.source_code, cases, &markers)?;
                Ok(ExecutionPlan::Driver {
                    artifact: ProgramArtifact::new(profile, driver),
                    markers,
                    budget: timeouts.driver + compile_allowance,
                })
            }
            Strategy::PerCaseLoop => Ok(ExecutionPlan::PerCase {
                artifact: ProgramArtifact::new(profile, job.source_code.clone()),
                inputs: cases.iter().map(|case| case.input.as_stdin()).collect(),
                per_case: timeouts.per_case,
                budget: timeouts.per_case * cases.len() as u32 + compile_allowance,
            }),
        }
    }
}
