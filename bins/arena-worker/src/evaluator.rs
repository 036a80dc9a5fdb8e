/// Result Normalizer - Language-Agnostic Scoring Logic
///
/// **Core Responsibility:**
/// Turn raw execution outcomes into the terminal [`JobResult`] of a job.
///
/// **Critical Properties:**
/// - Knows nothing about processes, HTTP, or Redis
/// - Pure functions: (job, outcomes) → result
/// - Never returns an error: anything it cannot interpret becomes a
///   classified failure result
///
/// **Normalization Rules (Applied to All Languages):**
/// - Leading and trailing whitespace is ignored
/// - `True`/`False` compare equal to `true`/`false`
/// - Everything else is an exact, case-sensitive match
use crate::driver::ReportMarkers;
use arena_common::types::{
    BatchReport, CaseResult, ExecutionOutcome, ExitClass, Job, JobMode, JobResult, ResultStatus, TestCase,
    Verdict,
};
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;

pub const NO_OUTPUT_MESSAGE: &str = "Execution finished with no output.";

/// Normalize a value for comparison
pub fn normalize_output(output: &str) -> String {
    let trimmed = output.trim();
    match trimmed {
        "True" => "true".to_string(),
        "False" => "false".to_string(),
        other => other.to_string(),
    }
}

fn base_result(job: &Job, status: ResultStatus, wall_time_ms: u64) -> JobResult {
    JobResult {
        job_id: job.id,
        mode: job.mode(),
        status,
        output: None,
        stdout: None,
        compile_log: None,
        error: None,
        report: None,
        wall_time_ms,
        finished_at: Utc::now(),
    }
}

fn first_non_empty<'a>(candidates: &[&'a str]) -> Option<&'a str> {
    candidates.iter().copied().find(|s| !s.trim().is_empty())
}

/// Result of a single-mode run; the outcome is reported as-is, without scoring
pub fn single_result(job: &Job, outcome: ExecutionOutcome) -> JobResult {
    let status = ResultStatus::from(outcome.exit_class);
    let mut result = base_result(job, status, outcome.wall_time_ms);

    let output = match outcome.exit_class {
        ExitClass::Accepted => {
            let trimmed = outcome.stdout.trim_end_matches(&['\n', '\r'][..]);
            if trimmed.is_empty() {
                NO_OUTPUT_MESSAGE.to_string()
            } else {
                trimmed.to_string()
            }
        }
        ExitClass::CompileError => format!("Compilation Error:\n{}", outcome.compile_log),
        ExitClass::RuntimeError => {
            let detail = first_non_empty(&[outcome.stderr.as_str()]).unwrap_or("the program exited abnormally");
            result.error = Some(detail.to_string());
            format!("Runtime Error:\n{}", detail)
        }
        ExitClass::Timeout => {
            let detail = "the program exceeded its time limit";
            result.error = Some(detail.to_string());
            format!("Time Limit Exceeded:\n{}", detail)
        }
        ExitClass::InfrastructureError => {
            result.error = Some(outcome.stderr.clone());
            format!("System Error: {}", outcome.stderr)
        }
    };

    if outcome.exit_class == ExitClass::CompileError {
        result.compile_log = Some(outcome.compile_log);
    }
    result.output = Some(output);
    result.stdout = Some(outcome.stdout);
    result
}

/// Batch result carrying no scored cases
fn unscored(job: &Job, status: ResultStatus, runtime_ms: u64) -> JobResult {
    let mut result = base_result(job, status, runtime_ms);
    result.report = Some(BatchReport::unscored(job.test_cases().len(), runtime_ms));
    result
}

#[derive(Debug, Deserialize)]
struct HarnessCase {
    index: usize,
    verdict: Verdict,
    #[serde(default)]
    input_echo: String,
    #[serde(default)]
    expected: String,
    #[serde(default)]
    actual: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HarnessReport {
    #[serde(default)]
    compile_error: Option<String>,
    total: usize,
    passed: usize,
    #[serde(default)]
    cases: Vec<HarnessCase>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReportError {
    /// No begin marker in the output
    Missing,
    /// Markers present but the framed report is unusable
    Malformed(String),
}

/// Locate the last framed report in `stdout`
fn extract_report<'a>(stdout: &'a str, markers: &ReportMarkers) -> Result<&'a str, ReportError> {
    let begin = stdout.rfind(&markers.begin).ok_or(ReportError::Missing)?;
    let body_start = begin + markers.begin.len();
    let body_len = stdout[body_start..]
        .find(&markers.end)
        .ok_or_else(|| ReportError::Malformed("report end marker missing".to_string()))?;
    Ok(stdout[body_start..body_start + body_len].trim())
}

fn parse_report(stdout: &str, markers: &ReportMarkers) -> Result<HarnessReport, ReportError> {
    let body = extract_report(stdout, markers)?;
    serde_json::from_str(body).map_err(|e| ReportError::Malformed(format!("report is not valid JSON: {}", e)))
}

fn check_report(report: &HarnessReport, cases: &[TestCase]) -> Result<(), ReportError> {
    if report.total != cases.len() {
        return Err(ReportError::Malformed(format!(
            "report covers {} cases, {} were submitted",
            report.total,
            cases.len()
        )));
    }
    if report.compile_error.is_some() {
        return Ok(());
    }
    if report.cases.len() != cases.len() {
        return Err(ReportError::Malformed(format!(
            "report lists {} cases, {} were submitted",
            report.cases.len(),
            cases.len()
        )));
    }
    if let Some((position, case)) = report.cases.iter().enumerate().find(|(i, c)| c.index != *i) {
        return Err(ReportError::Malformed(format!(
            "case at position {} has index {}",
            position, case.index
        )));
    }
    let counted = report.cases.iter().filter(|c| c.verdict == Verdict::Passed).count();
    if report.passed != counted {
        return Err(ReportError::Malformed(format!(
            "report claims {} passed, {} cases passed",
            report.passed, counted
        )));
    }
    Ok(())
}

/// Score the outcome of an injected driver run
pub fn score_driver(job: &Job, outcome: ExecutionOutcome, markers: &ReportMarkers) -> JobResult {
    let runtime_ms = outcome.wall_time_ms;
    match outcome.exit_class {
        ExitClass::Timeout => {
            let mut result = unscored(job, ResultStatus::Timeout, runtime_ms);
            result.error = Some("the driver exceeded its time limit".to_string());
            return result;
        }
        ExitClass::InfrastructureError => {
            let mut result = unscored(job, ResultStatus::InfrastructureError, runtime_ms);
            result.error = Some(outcome.stderr);
            return result;
        }
        ExitClass::CompileError => {
            let mut result = unscored(job, ResultStatus::CompileError, runtime_ms);
            result.compile_log = Some(outcome.compile_log);
            return result;
        }
        ExitClass::Accepted | ExitClass::RuntimeError => {}
    }

    let cases = job.test_cases();
    let report = match parse_report(&outcome.stdout, markers).and_then(|r| check_report(&r, cases).map(|_| r)) {
        Ok(report) => report,
        Err(ReportError::Missing) => {
            // the harness died before reporting; surface everything it printed
            let mut result = unscored(job, ResultStatus::RuntimeError, runtime_ms);
            let raw = [outcome.stderr.trim(), outcome.stdout.trim()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            result.error = Some(if raw.is_empty() {
                "the driver produced no report".to_string()
            } else {
                raw
            });
            return result;
        }
        Err(ReportError::Malformed(reason)) => {
            let mut result = unscored(job, ResultStatus::ParseError, runtime_ms);
            result.error = Some(reason);
            return result;
        }
    };

    if let Some(log) = report.compile_error {
        let mut result = unscored(job, ResultStatus::CompileError, runtime_ms);
        result.compile_log = Some(log);
        return result;
    }

    let scored: Vec<CaseResult> = report
        .cases
        .into_iter()
        .zip(cases)
        .map(|(case, submitted)| CaseResult {
            index: case.index,
            verdict: case.verdict,
            input_echo: case.input_echo,
            expected: case.expected,
            actual: case.actual,
            error: case.error,
            hidden: submitted.hidden,
        })
        .collect();

    let mut result = base_result(job, ResultStatus::Accepted, runtime_ms);
    result.report = Some(BatchReport {
        total: cases.len(),
        passed: report.passed,
        runtime_ms,
        cases: scored,
    });
    result
}

/// Score per-case outcomes, in case order.
///
/// `outcomes` may be shorter than the case list when a case aborted the batch.
pub fn score_per_case(job: &Job, outcomes: Vec<ExecutionOutcome>, elapsed: Duration) -> JobResult {
    let cases = job.test_cases();
    let runtime_ms = elapsed.as_millis() as u64;

    // whole-batch failures: nothing is scored
    if let Some(first) = outcomes.first() {
        match first.exit_class {
            ExitClass::CompileError => {
                let mut result = unscored(job, ResultStatus::CompileError, runtime_ms);
                result.compile_log = Some(first.compile_log.clone());
                return result;
            }
            ExitClass::InfrastructureError => {
                let mut result = unscored(job, ResultStatus::InfrastructureError, runtime_ms);
                result.error = Some(first.stderr.clone());
                return result;
            }
            _ => {}
        }
    }
    if let Some(infra) = outcomes.iter().find(|o| o.exit_class == ExitClass::InfrastructureError) {
        let mut result = unscored(job, ResultStatus::InfrastructureError, runtime_ms);
        result.error = Some(infra.stderr.clone());
        return result;
    }

    let mut status = ResultStatus::Accepted;
    let mut aborted_at: Option<usize> = None;
    let mut scored = Vec::with_capacity(cases.len());

    for (index, case) in cases.iter().enumerate() {
        let expected = normalize_output(&case.expected_output);
        let mut entry = CaseResult {
            index,
            verdict: Verdict::Failed,
            input_echo: case.input.echo(),
            expected,
            actual: String::new(),
            error: None,
            hidden: case.hidden,
        };

        match (outcomes.get(index), aborted_at) {
            (Some(outcome), None) => {
                entry.actual = normalize_output(&outcome.stdout);
                match outcome.exit_class {
                    ExitClass::Accepted => {
                        if entry.actual == entry.expected {
                            entry.verdict = Verdict::Passed;
                        }
                    }
                    ExitClass::Timeout => {
                        entry.verdict = Verdict::RuntimeError;
                        entry.error = Some("time limit exceeded".to_string());
                        status = ResultStatus::Timeout;
                        aborted_at = Some(index);
                    }
                    // a compile failure after the first case cannot happen locally; treat it as a crash
                    ExitClass::RuntimeError | ExitClass::CompileError | ExitClass::InfrastructureError => {
                        entry.verdict = Verdict::RuntimeError;
                        entry.error = first_non_empty(&[outcome.stderr.as_str(), outcome.compile_log.as_str()])
                            .map(str::to_string)
                            .or_else(|| Some("the program exited abnormally".to_string()));
                        status = ResultStatus::RuntimeError;
                        aborted_at = Some(index);
                    }
                }
            }
            (_, Some(aborted)) => {
                entry.error = Some(format!("not executed: case {} aborted the batch", aborted));
            }
            (None, None) => {
                entry.error = Some("not executed: no outcome was produced".to_string());
            }
        }
        scored.push(entry);
    }

    let passed = scored.iter().filter(|c| c.verdict == Verdict::Passed).count();
    let mut result = base_result(job, status, runtime_ms);
    if let Some(index) = aborted_at {
        result.error = scored[index].error.clone();
    }
    result.report = Some(BatchReport {
        total: cases.len(),
        passed,
        runtime_ms,
        cases: scored,
    });
    result
}

/// Terminal result for a job whose whole-job budget ran out
pub fn budget_exceeded(job: &Job, budget: Duration) -> JobResult {
    let runtime_ms = budget.as_millis() as u64;
    let mut result = match job.mode() {
        JobMode::Single => {
            let mut result = base_result(job, ResultStatus::Timeout, runtime_ms);
            result.output = Some("Time Limit Exceeded:\nthe job exceeded its time budget".to_string());
            result
        }
        JobMode::Batch => unscored(job, ResultStatus::Timeout, runtime_ms),
    };
    result.error = Some(format!("job exceeded its {}ms budget", runtime_ms));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_common::types::{JobPayload, LanguageId, TestInput};
    use uuid::Uuid;

    fn make_test_case(input: &str, expected: &str) -> TestCase {
        TestCase {
            input: TestInput::Scalar(input.to_string()),
            expected_output: expected.to_string(),
            hidden: false,
        }
    }

    fn batch_job(cases: Vec<TestCase>) -> Job {
        Job {
            id: Uuid::new_v4(),
            language: LanguageId(71),
            source_code: String::new(),
            payload: JobPayload::Batch(cases),
            submitted_at: Utc::now(),
        }
    }

    fn single_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            language: LanguageId(71),
            source_code: String::new(),
            payload: JobPayload::Single(String::new()),
            submitted_at: Utc::now(),
        }
    }

    fn framed(markers: &ReportMarkers, body: &str) -> String {
        format!("noise\n{}\n{}\n{}\n", markers.begin, body, markers.end)
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_output("  hello  \n"), "hello");
        assert_eq!(normalize_output("True"), "true");
        assert_eq!(normalize_output("False\n"), "false");
        assert_eq!(normalize_output("TRUE"), "TRUE");
        assert_eq!(normalize_output("line1\nline2\n"), "line1\nline2");
    }

    #[test]
    fn test_single_accepted_strips_trailing_newlines() {
        let job = single_job();
        let result = single_result(&job, ExecutionOutcome::accepted("hello\n", "", 3));
        assert_eq!(result.status, ResultStatus::Accepted);
        assert_eq!(result.output.as_deref(), Some("hello"));
        assert_eq!(result.stdout.as_deref(), Some("hello\n"));
        assert!(result.report.is_none());
    }

    #[test]
    fn test_single_empty_output() {
        let result = single_result(&single_job(), ExecutionOutcome::accepted("\n", "", 1));
        assert_eq!(result.output.as_deref(), Some(NO_OUTPUT_MESSAGE));
    }

    #[test]
    fn test_single_failures() {
        let job = single_job();

        let compile = single_result(&job, ExecutionOutcome::compile_error("line 1: bad", 5));
        assert_eq!(compile.status, ResultStatus::CompileError);
        assert_eq!(compile.output.as_deref(), Some("Compilation Error:\nline 1: bad"));
        assert_eq!(compile.compile_log.as_deref(), Some("line 1: bad"));

        let runtime = single_result(&job, ExecutionOutcome::runtime_error("", "ZeroDivisionError", 5));
        assert_eq!(runtime.output.as_deref(), Some("Runtime Error:\nZeroDivisionError"));
        assert_eq!(runtime.job_status(), arena_common::types::JobStatus::Failed);

        let timeout = single_result(&job, ExecutionOutcome::timeout("", 5000));
        assert_eq!(timeout.status, ResultStatus::Timeout);
        assert!(timeout.output.unwrap().starts_with("Time Limit Exceeded:"));

        let infra = single_result(&job, ExecutionOutcome::infrastructure("service down"));
        assert_eq!(infra.output.as_deref(), Some("System Error: service down"));
    }

    #[test]
    fn test_driver_report_is_used() {
        let markers = ReportMarkers::new("n");
        let mut cases = vec![make_test_case("1", "2"), make_test_case("2", "4")];
        cases[1].hidden = true;
        let job = batch_job(cases);
        let body = r#"{"total": 2, "passed": 1, "cases": [
            {"index": 0, "verdict": "passed", "input_echo": "1", "expected": "2", "actual": "2", "error": null},
            {"index": 1, "verdict": "runtime_error", "input_echo": "2", "expected": "4", "actual": "", "error": "ValueError: x"}
        ]}"#;
        let outcome = ExecutionOutcome::accepted(framed(&markers, body), "", 40);

        let result = score_driver(&job, outcome, &markers);
        assert_eq!(result.status, ResultStatus::Accepted);
        let report = result.report.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 1);
        assert_eq!(report.runtime_ms, 40);
        assert_eq!(report.cases[1].verdict, Verdict::RuntimeError);
        assert!(report.cases[1].hidden);
        assert!(!report.cases[0].hidden);
    }

    #[test]
    fn test_driver_last_report_wins() {
        let markers = ReportMarkers::new("n");
        let job = batch_job(vec![make_test_case("1", "1")]);
        let fake = r#"{"total": 1, "passed": 0, "cases": [{"index": 0, "verdict": "failed"}]}"#;
        let real = r#"{"total": 1, "passed": 1, "cases": [{"index": 0, "verdict": "passed"}]}"#;
        let stdout = format!("{}{}", framed(&markers, fake), framed(&markers, real));

        let result = score_driver(&job, ExecutionOutcome::accepted(stdout, "", 1), &markers);
        assert_eq!(result.report.unwrap().passed, 1);
    }

    #[test]
    fn test_driver_compile_error_report() {
        let markers = ReportMarkers::new("n");
        let job = batch_job(vec![make_test_case("1", "2"), make_test_case("2", "4")]);
        let body = r#"{"compile_error": "SyntaxError: invalid syntax (solution.py, line 1)", "total": 2, "passed": 0, "cases": []}"#;

        let result = score_driver(&job, ExecutionOutcome::accepted(framed(&markers, body), "", 5), &markers);
        assert_eq!(result.status, ResultStatus::CompileError);
        assert!(result.compile_log.unwrap().contains("SyntaxError"));
        let report = result.report.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 0);
        assert!(report.cases.is_empty());
    }

    #[test]
    fn test_driver_without_markers_is_runtime_error() {
        let markers = ReportMarkers::new("n");
        let job = batch_job(vec![make_test_case("1", "2")]);
        let outcome = ExecutionOutcome::runtime_error("partial", "Segmentation fault", 5);

        let result = score_driver(&job, outcome, &markers);
        assert_eq!(result.status, ResultStatus::RuntimeError);
        let error = result.error.unwrap();
        assert!(error.contains("Segmentation fault"));
        assert!(error.contains("partial"));
        assert_eq!(result.report.unwrap().total, 1);
    }

    #[test]
    fn test_driver_malformed_report_is_parse_error() {
        let markers = ReportMarkers::new("n");
        let job = batch_job(vec![make_test_case("1", "2")]);

        let garbage = score_driver(&job, ExecutionOutcome::accepted(framed(&markers, "{not json"), "", 1), &markers);
        assert_eq!(garbage.status, ResultStatus::ParseError);

        let unterminated = format!("{}\n{{}}", markers.begin);
        let cut = score_driver(&job, ExecutionOutcome::accepted(unterminated, "", 1), &markers);
        assert_eq!(cut.status, ResultStatus::ParseError);
        assert!(cut.error.unwrap().contains("end marker"));

        let wrong_total = r#"{"total": 3, "passed": 0, "cases": []}"#;
        let result = score_driver(&job, ExecutionOutcome::accepted(framed(&markers, wrong_total), "", 1), &markers);
        assert_eq!(result.status, ResultStatus::ParseError);

        let inflated = r#"{"total": 1, "passed": 1, "cases": [{"index": 0, "verdict": "failed"}]}"#;
        let result = score_driver(&job, ExecutionOutcome::accepted(framed(&markers, inflated), "", 1), &markers);
        assert_eq!(result.status, ResultStatus::ParseError);
        assert_eq!(result.report.unwrap().passed, 0);
    }

    #[test]
    fn test_driver_foreign_nonce_is_ignored() {
        let markers = ReportMarkers::new("real");
        let forged = ReportMarkers::new("forged");
        let job = batch_job(vec![make_test_case("1", "1")]);
        let body = r#"{"total": 1, "passed": 1, "cases": [{"index": 0, "verdict": "passed"}]}"#;

        let result = score_driver(&job, ExecutionOutcome::accepted(framed(&forged, body), "", 1), &markers);
        assert_eq!(result.status, ResultStatus::RuntimeError);
    }

    #[test]
    fn test_per_case_scoring() {
        let job = batch_job(vec![
            make_test_case("1", "true"),
            make_test_case("2", "hello"),
            make_test_case("3", "x"),
        ]);
        let outcomes = vec![
            ExecutionOutcome::accepted("True\n", "", 3),
            ExecutionOutcome::accepted("  hello  \n", "", 3),
            ExecutionOutcome::accepted("y\n", "", 3),
        ];

        let result = score_per_case(&job, outcomes, Duration::from_millis(9));
        assert_eq!(result.status, ResultStatus::Accepted);
        let report = result.report.unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.passed, 2);
        assert_eq!(report.cases[2].verdict, Verdict::Failed);
        assert_eq!(report.cases[2].actual, "y");
    }

    #[test]
    fn test_per_case_compile_error_scores_nothing() {
        let job = batch_job(vec![make_test_case("1", "1"), make_test_case("2", "2")]);
        let outcomes = vec![ExecutionOutcome::compile_error("Main.java:3: error", 800)];

        let result = score_per_case(&job, outcomes, Duration::from_millis(800));
        assert_eq!(result.status, ResultStatus::CompileError);
        assert_eq!(result.compile_log.as_deref(), Some("Main.java:3: error"));
        let report = result.report.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 0);
        assert!(report.cases.is_empty());
    }

    #[test]
    fn test_per_case_fail_fast() {
        let job = batch_job(vec![
            make_test_case("1", "1"),
            make_test_case("2", "2"),
            make_test_case("3", "3"),
        ]);
        let outcomes = vec![
            ExecutionOutcome::accepted("1", "", 3),
            ExecutionOutcome::runtime_error("", "Exception in thread \"main\"", 3),
        ];

        let result = score_per_case(&job, outcomes, Duration::from_millis(6));
        assert_eq!(result.status, ResultStatus::RuntimeError);
        let report = result.report.unwrap();
        assert_eq!(report.passed, 1);
        assert_eq!(report.cases.len(), 3);
        assert_eq!(report.cases[1].verdict, Verdict::RuntimeError);
        assert_eq!(report.cases[2].verdict, Verdict::Failed);
        assert_eq!(
            report.cases[2].error.as_deref(),
            Some("not executed: case 1 aborted the batch")
        );
    }

    #[test]
    fn test_per_case_timeout_is_runtime_error_verdict() {
        let job = batch_job(vec![make_test_case("1", "1"), make_test_case("2", "2")]);
        let outcomes = vec![ExecutionOutcome::timeout("", 5000)];

        let result = score_per_case(&job, outcomes, Duration::from_millis(5000));
        assert_eq!(result.status, ResultStatus::Timeout);
        let report = result.report.unwrap();
        assert_eq!(report.cases[0].verdict, Verdict::RuntimeError);
        assert_eq!(report.cases[0].error.as_deref(), Some("time limit exceeded"));
        assert_eq!(report.cases[1].verdict, Verdict::Failed);
    }

    #[test]
    fn test_budget_exceeded_keeps_total() {
        let job = batch_job(vec![make_test_case("1", "1"), make_test_case("2", "2")]);
        let result = budget_exceeded(&job, Duration::from_secs(10));
        assert_eq!(result.status, ResultStatus::Timeout);
        assert_eq!(result.report.unwrap().total, 2);

        let single = budget_exceeded(&single_job(), Duration::from_secs(10));
        assert!(single.report.is_none());
        assert!(single.output.unwrap().starts_with("Time Limit Exceeded"));
    }
}
