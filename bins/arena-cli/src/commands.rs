// CLI commands for talking to the Arena API
use anyhow::{bail, Context, Result};
use arena_common::languages::{LanguageRegistry, Strategy};
use arena_common::submission::SubmitRequest;
use arena_common::types::{JobId, JobMode, JobResult, PollStatus, Verdict};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::client::ApiClient;

/// What to send as the job payload
pub enum PayloadSource<'a> {
    Stdin(Option<&'a str>),
    StdinFile(&'a Path),
    CasesFile(&'a Path),
}

/// Build the request body for `submit`
pub fn build_request(
    source_file: &Path,
    language_id: u32,
    payload: PayloadSource<'_>,
) -> Result<SubmitRequest> {
    let source_code = fs::read_to_string(source_file)
        .with_context(|| format!("Failed to read {}", source_file.display()))?;

    let (mode, payload) = match payload {
        PayloadSource::Stdin(text) => (
            JobMode::Single,
            Value::String(text.unwrap_or_default().to_string()),
        ),
        PayloadSource::StdinFile(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            (JobMode::Single, Value::String(text))
        }
        PayloadSource::CasesFile(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let cases: Value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", path.display()))?;
            if !cases.is_array() {
                bail!("{} must contain a JSON array of test cases", path.display());
            }
            (JobMode::Batch, cases)
        }
    };

    Ok(SubmitRequest {
        source_code,
        language_id,
        mode,
        payload,
    })
}

/// Map a `--language` argument (id or name) to a numeric id
pub async fn resolve_language(client: &ApiClient, language: &str) -> Result<u32> {
    if let Ok(id) = language.trim().parse::<u32>() {
        return Ok(id);
    }
    let languages = client.languages().await?;
    languages
        .iter()
        .find(|l| l.name.eq_ignore_ascii_case(language.trim()))
        .map(|l| l.id)
        .with_context(|| format!("Unknown language '{}'", language))
}

pub async fn submit(client: &ApiClient, request: SubmitRequest) -> Result<JobId> {
    println!(
        "🚀 Submitting {} job ({} bytes of source)...",
        request.mode,
        request.source_code.len()
    );
    let job_id = client.submit(&request).await?;
    println!("✅ Job queued: {}", job_id);
    Ok(job_id)
}

pub async fn poll(client: &ApiClient, job_id: JobId) -> Result<()> {
    let status = client.poll(job_id).await?;
    print_status(&status);
    Ok(())
}

/// Poll until the job reaches a terminal status or `timeout` passes
pub async fn wait(
    client: &ApiClient,
    job_id: JobId,
    interval: Duration,
    timeout: Duration,
) -> Result<PollStatus> {
    let start = Instant::now();
    println!("⏳ Waiting for job {}...", job_id);
    loop {
        let status = client.poll(job_id).await?;
        match status {
            PollStatus::Pending | PollStatus::Running => {}
            _ => {
                print_status(&status);
                return Ok(status);
            }
        }
        if start.elapsed() >= timeout {
            bail!("Job {} still {} after {:?}", job_id, status.label(), timeout);
        }
        tokio::time::sleep(interval).await;
    }
}

pub async fn list_languages(client: &ApiClient) -> Result<()> {
    let languages = client.languages().await?;
    if languages.is_empty() {
        println!("No languages configured.");
        return Ok(());
    }

    println!("📋 Configured Languages:\n");
    println!("{:<6} {:<12} {:<8} {:<18}", "ID", "NAME", "EXT", "STRATEGY");
    println!("{}", "─".repeat(46));
    for lang in &languages {
        println!(
            "{:<6} {:<12} {:<8} {:<18}",
            lang.id, lang.name, lang.file_extension, lang.strategy
        );
    }
    println!("\n✅ Total: {} language(s)", languages.len());
    Ok(())
}

/// Parse a languages.json file and print what it configures
pub fn check_languages_file(path: &Path) -> Result<()> {
    let registry = LanguageRegistry::load(path)
        .with_context(|| format!("Invalid language table {}", path.display()))?;

    println!("📝 {} is valid\n", path.display());
    for profile in registry.profiles() {
        let strategy = match &profile.strategy {
            Strategy::DriverInjection { entry_point, .. } => format!("driver ({})", entry_point),
            Strategy::PerCaseLoop => "per-case".to_string(),
        };
        let compiled = if profile.is_compiled() { "compiled" } else { "interpreted" };
        println!(
            "  {:<6} {:<12} {:<18} {}",
            profile.id.0, profile.name, strategy, compiled
        );
    }
    Ok(())
}

pub fn print_status(status: &PollStatus) {
    match status {
        PollStatus::Pending => println!("🕒 pending"),
        PollStatus::Running => println!("⚙️  running"),
        PollStatus::NotFound => println!("❓ not found (unknown or expired)"),
        PollStatus::Succeeded { result } => {
            println!("✅ succeeded");
            print_result(result);
        }
        PollStatus::Failed { result } => {
            println!("❌ failed");
            print_result(result);
        }
    }
}

fn print_result(result: &JobResult) {
    println!("Status: {:?} ({} ms)", result.status, result.wall_time_ms);
    if let Some(output) = &result.output {
        println!("\n{}", output);
    }
    if let Some(log) = result.compile_log.as_deref().filter(|l| !l.is_empty()) {
        println!("\nCompiler output:\n{}", log);
    }
    if result.mode == JobMode::Batch {
        if let Some(error) = &result.error {
            println!("Error: {}", error);
        }
    }

    let Some(report) = &result.report else {
        return;
    };
    println!("\nPassed {}/{} ({} ms)", report.passed, report.total, report.runtime_ms);
    for case in &report.cases {
        let mark = match case.verdict {
            Verdict::Passed => "✅",
            Verdict::Failed => "❌",
            Verdict::RuntimeError => "💥",
        };
        if case.hidden {
            println!("  {} case {} (hidden)", mark, case.index);
            continue;
        }
        println!("  {} case {}: input={:?}", mark, case.index, case.input_echo);
        if case.verdict != Verdict::Passed {
            println!("       expected={:?} actual={:?}", case.expected, case.actual);
        }
        if let Some(error) = &case.error {
            println!("       {}", error.lines().next().unwrap_or_default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_build_single_request() {
        let source = temp_file("print(input())");
        let request = build_request(source.path(), 71, PayloadSource::Stdin(Some("hi"))).unwrap();
        assert_eq!(request.mode, JobMode::Single);
        assert_eq!(request.payload, Value::String("hi".to_string()));
        assert_eq!(request.source_code, "print(input())");

        let request = build_request(source.path(), 71, PayloadSource::Stdin(None)).unwrap();
        assert_eq!(request.payload, Value::String(String::new()));
    }

    #[test]
    fn test_build_batch_request() {
        let source = temp_file("def solve(x):\n    return x\n");
        let cases = temp_file(r#"[{"input": "1", "expected_output": "1"}]"#);
        let request = build_request(source.path(), 71, PayloadSource::CasesFile(cases.path())).unwrap();
        assert_eq!(request.mode, JobMode::Batch);
        assert_eq!(request.payload.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_cases_file_must_be_array() {
        let source = temp_file("x");
        let cases = temp_file(r#"{"input": "1"}"#);
        let err = build_request(source.path(), 71, PayloadSource::CasesFile(cases.path())).unwrap_err();
        assert!(err.to_string().contains("JSON array"));
    }

    #[test]
    fn test_missing_source_file() {
        let err = build_request(Path::new("/nonexistent/main.py"), 71, PayloadSource::Stdin(None)).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
