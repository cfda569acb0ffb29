//! Post-hoc checks on an outgoing `ScheduleResponse` envelope (§4.17):
//! structural shape, per-block invariants, metrics sanity, explanation
//! quality, and the frontend timezone-suffix convention. Findings carry a
//! severity; `STRICT` mode fails on `ERROR`, `CRITICAL` always fails.
//!
//! Grounded on the teacher's `VerificationSystem`/`Verifier` pattern in
//! `verification.rs`: a coordinator that runs a battery of checks and
//! accumulates a `VerificationStats`-shaped tally, generalized here from
//! agent-claim verification to scheduler-response verification.

use chrono::DateTime;
use regex::Regex;
use serde_json::Value;

const MIN_DURATION_MINUTES: i64 = 5;
const MAX_DURATION_MINUTES: i64 = 480;
const MAX_TITLE_CHARS: usize = 100;
const MIN_EXPLANATION_CHARS: usize = 10;
const MAX_EXPLANATION_CHARS: usize = 500;
const JARGON_WARN_THRESHOLD: usize = 2;
const JARGON_PATTERN: &str = r"(?i)\b(solver|heuristic|objective function|utility score|feasibility|constraint satisfaction|bandit)\b";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationMode {
    Basic,
    Strict,
}

#[derive(Debug, Clone)]
pub struct Finding {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Default, Clone)]
pub struct VerificationStats {
    pub info: usize,
    pub warning: usize,
    pub error: usize,
    pub critical: usize,
}

impl VerificationStats {
    fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Info => self.info += 1,
            Severity::Warning => self.warning += 1,
            Severity::Error => self.error += 1,
            Severity::Critical => self.critical += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.info + self.warning + self.error + self.critical
    }
}

pub struct VerificationOutcome {
    pub passed: bool,
    pub findings: Vec<Finding>,
    pub stats: VerificationStats,
}

pub struct SemanticVerifier {
    mode: VerificationMode,
    auto_correct: bool,
    jargon_pattern: Regex,
}

impl SemanticVerifier {
    pub fn new(mode: VerificationMode, auto_correct: bool) -> Self {
        Self { mode, auto_correct, jargon_pattern: Regex::new(JARGON_PATTERN).unwrap() }
    }

    /// Runs the full check battery against a `ScheduleResponse` JSON
    /// envelope, optionally filling safe defaults in place. Never invents
    /// blocks or times; only fills metrics/explanations and coerces
    /// `feasible` to boolean.
    pub fn verify(&self, response: &mut Value) -> VerificationOutcome {
        let mut findings = Vec::new();

        self.check_structural(response, &mut findings);
        self.check_blocks(response, &mut findings);
        self.check_metrics(response, &mut findings);
        self.check_explanations(response, &mut findings);
        self.check_frontend_timezones(response, &mut findings);

        if self.auto_correct {
            self.apply_safe_defaults(response);
        }

        let mut stats = VerificationStats::default();
        for finding in &findings {
            stats.record(finding.severity);
        }

        let passed = stats.critical == 0 && !(self.mode == VerificationMode::Strict && stats.error > 0);

        for finding in &findings {
            match finding.severity {
                Severity::Info => tracing::info!(code = finding.code, "{}", finding.message),
                Severity::Warning => tracing::warn!(code = finding.code, "{}", finding.message),
                Severity::Error | Severity::Critical => tracing::error!(code = finding.code, "{}", finding.message),
            }
        }

        VerificationOutcome { passed, findings, stats }
    }

    fn check_structural(&self, response: &Value, findings: &mut Vec<Finding>) {
        for field in ["feasible", "blocks", "metrics"] {
            if response.get(field).is_none() {
                findings.push(Finding { severity: Severity::Critical, code: "missing_field", message: format!("response missing required field `{field}`") });
            }
        }
        if let Some(feasible) = response.get("feasible") {
            if !feasible.is_boolean() {
                findings.push(Finding { severity: Severity::Error, code: "bad_type", message: "`feasible` is not a boolean".to_string() });
            }
        }
        if let Some(blocks) = response.get("blocks") {
            if !blocks.is_array() {
                findings.push(Finding { severity: Severity::Critical, code: "bad_type", message: "`blocks` is not an array".to_string() });
            }
        }
        if response.get("jobId").is_none() {
            findings.push(Finding { severity: Severity::Info, code: "missing_job_id", message: "response has no `jobId` (acceptable for dry runs)".to_string() });
        }
    }

    fn check_blocks(&self, response: &Value, findings: &mut Vec<Finding>) {
        let Some(blocks) = response.get("blocks").and_then(Value::as_array) else { return };
        let mut parsed_ranges: Vec<(String, DateTime<chrono::FixedOffset>, DateTime<chrono::FixedOffset>)> = Vec::new();

        for (idx, block) in blocks.iter().enumerate() {
            for field in ["taskId", "start", "end"] {
                if block.get(field).is_none() {
                    findings.push(Finding { severity: Severity::Critical, code: "block_missing_field", message: format!("block[{idx}] missing `{field}`") });
                }
            }
            let task_id = block.get("taskId").and_then(Value::as_str).unwrap_or("?").to_string();

            let start = block.get("start").and_then(Value::as_str).and_then(|s| DateTime::parse_from_rfc3339(s).ok());
            let end = block.get("end").and_then(Value::as_str).and_then(|s| DateTime::parse_from_rfc3339(s).ok());
            match (start, end) {
                (Some(s), Some(e)) => {
                    let duration = (e - s).num_minutes();
                    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&duration) {
                        findings.push(Finding { severity: Severity::Error, code: "bad_duration", message: format!("block[{idx}] ({task_id}) duration {duration}min outside [5, 480]") });
                    }
                    parsed_ranges.push((task_id.clone(), s, e));
                }
                _ => {
                    findings.push(Finding { severity: Severity::Error, code: "bad_datetime", message: format!("block[{idx}] ({task_id}) has a non-ISO-8601 or timezone-less start/end") });
                }
            }

            if let Some(title) = block.get("title").and_then(Value::as_str) {
                if title.chars().count() > MAX_TITLE_CHARS {
                    findings.push(Finding { severity: Severity::Warning, code: "title_too_long", message: format!("block[{idx}] ({task_id}) title exceeds {MAX_TITLE_CHARS} chars") });
                }
            }
        }

        for i in 0..parsed_ranges.len() {
            for j in (i + 1)..parsed_ranges.len() {
                let (a_id, a_start, a_end) = &parsed_ranges[i];
                let (b_id, b_start, b_end) = &parsed_ranges[j];
                if a_start < b_end && b_start < a_end {
                    findings.push(Finding { severity: Severity::Critical, code: "overlapping_blocks", message: format!("blocks for {a_id} and {b_id} overlap") });
                }
            }
        }
    }

    fn check_metrics(&self, response: &Value, findings: &mut Vec<Finding>) {
        let Some(metrics) = response.get("metrics") else { return };
        for field in ["totalBlocks", "totalScheduledMinutes", "feasible", "solveTimeMs"] {
            match metrics.get(field) {
                None => findings.push(Finding { severity: Severity::Warning, code: "metrics_missing_field", message: format!("metrics missing `{field}`") }),
                Some(v) if field != "feasible" && !v.as_f64().is_some_and(|n| n >= 0.0) => {
                    findings.push(Finding { severity: Severity::Error, code: "metrics_negative", message: format!("metrics.{field} is not a non-negative number") });
                }
                _ => {}
            }
        }
    }

    fn check_explanations(&self, response: &Value, findings: &mut Vec<Finding>) {
        let Some(explanations) = response.get("explanations") else {
            findings.push(Finding { severity: Severity::Warning, code: "explanations_missing", message: "response has no `explanations` object".to_string() });
            return;
        };
        let Some(map) = explanations.as_object() else { return };
        for (key, value) in map {
            let Some(text) = value.as_str() else { continue };
            let len = text.chars().count();
            if !(MIN_EXPLANATION_CHARS..=MAX_EXPLANATION_CHARS).contains(&len) {
                findings.push(Finding { severity: Severity::Warning, code: "explanation_length", message: format!("explanations.{key} length {len} outside [{MIN_EXPLANATION_CHARS}, {MAX_EXPLANATION_CHARS}]") });
            }
            let jargon_count = self.jargon_pattern.find_iter(text).count();
            if jargon_count > JARGON_WARN_THRESHOLD {
                findings.push(Finding { severity: Severity::Warning, code: "jargon_density", message: format!("explanations.{key} uses {jargon_count} technical terms") });
            }
        }
    }

    fn check_frontend_timezones(&self, response: &Value, findings: &mut Vec<Finding>) {
        let Some(blocks) = response.get("blocks").and_then(Value::as_array) else { return };
        for (idx, block) in blocks.iter().enumerate() {
            for field in ["start", "end"] {
                if let Some(s) = block.get(field).and_then(Value::as_str) {
                    let has_suffix = s.ends_with('Z') || s.rfind(['+', '-']).is_some_and(|pos| pos > 10);
                    if !has_suffix {
                        findings.push(Finding { severity: Severity::Error, code: "missing_timezone_suffix", message: format!("block[{idx}].{field} lacks a timezone suffix") });
                    }
                }
            }
        }
    }

    /// Fills safe defaults only; never invents blocks or timestamps
    /// (§4.17).
    fn apply_safe_defaults(&self, response: &mut Value) {
        let Some(map) = response.as_object_mut() else { return };
        if let Some(feasible) = map.get("feasible").cloned() {
            if !feasible.is_boolean() {
                let coerced = match feasible {
                    Value::String(s) => s.eq_ignore_ascii_case("true"),
                    Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
                    _ => false,
                };
                map.insert("feasible".to_string(), Value::Bool(coerced));
            }
        }
        map.entry("explanations").or_insert_with(|| Value::Object(serde_json::Map::new()));
        map.entry("metrics").or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_response() -> Value {
        json!({
            "jobId": "job1",
            "feasible": true,
            "blocks": [
                { "taskId": "t1", "title": "Finish essay", "start": "2026-07-30T09:00:00-04:00", "end": "2026-07-30T10:00:00-04:00" },
                { "taskId": "t2", "title": "Read chapter", "start": "2026-07-30T10:00:00-04:00", "end": "2026-07-30T11:00:00-04:00" }
            ],
            "metrics": { "totalBlocks": 2, "totalScheduledMinutes": 120, "feasible": true, "solveTimeMs": 42 },
            "explanations": { "summary": "Scheduled two tasks based on your stated priorities." }
        })
    }

    #[test]
    fn test_valid_response_passes() {
        let verifier = SemanticVerifier::new(VerificationMode::Strict, false);
        let outcome = verifier.verify(&mut valid_response());
        assert!(outcome.passed);
        assert_eq!(outcome.stats.critical, 0);
    }

    #[test]
    fn test_missing_required_field_is_critical_and_fails() {
        let verifier = SemanticVerifier::new(VerificationMode::Basic, false);
        let mut response = valid_response();
        response.as_object_mut().unwrap().remove("metrics");
        let outcome = verifier.verify(&mut response);
        assert!(!outcome.passed);
        assert!(outcome.findings.iter().any(|f| f.code == "missing_field"));
    }

    #[test]
    fn test_overlapping_blocks_flagged_critical() {
        let verifier = SemanticVerifier::new(VerificationMode::Basic, false);
        let mut response = valid_response();
        response["blocks"][1]["start"] = json!("2026-07-30T09:30:00-04:00");
        let outcome = verifier.verify(&mut response);
        assert!(!outcome.passed);
        assert!(outcome.findings.iter().any(|f| f.code == "overlapping_blocks"));
    }

    #[test]
    fn test_error_severity_only_fails_in_strict_mode() {
        let mut response = valid_response();
        response["blocks"][0]["end"] = json!("2026-07-30T09:02:00-04:00");

        let basic = SemanticVerifier::new(VerificationMode::Basic, false).verify(&mut response.clone());
        assert!(basic.passed);
        assert!(basic.findings.iter().any(|f| f.code == "bad_duration"));

        let strict = SemanticVerifier::new(VerificationMode::Strict, false).verify(&mut response);
        assert!(!strict.passed);
    }

    #[test]
    fn test_timezone_less_datetime_is_flagged() {
        let verifier = SemanticVerifier::new(VerificationMode::Basic, false);
        let mut response = valid_response();
        response["blocks"][0]["start"] = json!("2026-07-30T09:00:00");
        let outcome = verifier.verify(&mut response);
        assert!(outcome.findings.iter().any(|f| f.code == "bad_datetime"));
    }

    #[test]
    fn test_auto_correct_fills_missing_explanations_without_inventing_blocks() {
        let verifier = SemanticVerifier::new(VerificationMode::Basic, true);
        let mut response = valid_response();
        response.as_object_mut().unwrap().remove("explanations");
        let original_block_count = response["blocks"].as_array().unwrap().len();
        verifier.verify(&mut response);
        assert!(response.get("explanations").is_some());
        assert_eq!(response["blocks"].as_array().unwrap().len(), original_block_count);
    }
}
