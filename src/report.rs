use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::alphabet::SearchSpace;
use crate::checkpoint::encode_identity;
use crate::coordinator::RunOutcome;
use crate::oracle::mask_secret;
use crate::stats::RunStatisticsSnapshot;

/// Characters of a recovered password left visible when it is masked.
const VISIBLE_CHARS: usize = 2;

/// Which files [`RunReport::write`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    Both,
}

impl ReportFormat {
    fn writes_text(self) -> bool {
        matches!(self, ReportFormat::Text | ReportFormat::Both)
    }

    fn writes_json(self) -> bool {
        matches!(self, ReportFormat::Json | ReportFormat::Both)
    }
}

/// Final account of one run, safe to persist.
///
/// The recovered password is masked unless the report was built with
/// `show_password`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub method: String,
    pub search_space: SearchSpace,
    pub threads_used: usize,
    pub status: String,
    pub password_found: bool,
    pub password: Option<String>,
    pub failure_reason: Option<String>,
    pub attempts: u64,
    pub session_attempts: u64,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration_seconds: f64,
    pub duration_formatted: String,
    pub attempts_per_second: f64,
    pub peak_memory_mb: f64,
    pub average_cpu_percent: f64,
}

impl RunReport {
    /// Build a report from a finished run
    ///
    /// # Arguments
    ///
    /// * `method` - Run identity the search ran under
    /// * `search_space` - Space that was enumerated
    /// * `threads` - Configured concurrency
    /// * `outcome` - Terminal value returned by the coordinator
    /// * `statistics` - Snapshot taken after the run returned
    /// * `show_password` - Keep the recovered password in clear
    ///
    /// # Examples
    ///
    /// ```
    /// use keyspace_finder::{RunOutcome, RunReport, RunStatisticsSnapshot, SearchSpace};
    /// use std::time::Duration;
    ///
    /// let space = SearchSpace::new("0123456789", 4, 4).unwrap();
    /// let outcome = RunOutcome::Success { password: "4821".to_string(), attempts: 4822 };
    /// let stats = RunStatisticsSnapshot {
    ///     attempts: 4822,
    ///     resumed_attempts: 0,
    ///     started_at: None,
    ///     ended_at: None,
    ///     duration: Duration::from_secs(2),
    ///     peak_memory_bytes: 0,
    ///     avg_cpu_percent: 0.0,
    /// };
    ///
    /// let report = RunReport::new("brute-force", &space, 4, &outcome, &stats, false);
    /// assert_eq!(report.password.as_deref(), Some("48**"));
    /// assert!(report.render_text().contains("PASSWORD FOUND"));
    /// ```
    pub fn new(
        method: &str,
        search_space: &SearchSpace,
        threads: usize,
        outcome: &RunOutcome,
        statistics: &RunStatisticsSnapshot,
        show_password: bool,
    ) -> Self {
        let password = outcome.password().map(|password| {
            if show_password {
                password.to_string()
            } else {
                mask_secret(password, VISIBLE_CHARS)
            }
        });
        let duration_seconds = statistics.duration.as_secs_f64();

        RunReport {
            method: method.to_string(),
            search_space: search_space.clone(),
            threads_used: threads,
            status: status_name(outcome).to_string(),
            password_found: outcome.is_success(),
            password,
            failure_reason: failure_reason(outcome),
            attempts: outcome.attempts(),
            session_attempts: statistics.session_attempts(),
            start_time: statistics.started_at.map(|t| t.to_rfc3339()),
            end_time: statistics.ended_at.map(|t| t.to_rfc3339()),
            duration_seconds,
            duration_formatted: format_duration(duration_seconds),
            attempts_per_second: (statistics.attempts_per_second() * 100.0).round() / 100.0,
            peak_memory_mb: statistics.peak_memory_mb(),
            average_cpu_percent: statistics.avg_cpu_percent,
        }
    }

    /// Human-readable rendering, as written to the `.txt` report.
    pub fn render_text(&self) -> String {
        let rule = "=".repeat(70);
        let thin = "-".repeat(70);
        let mut lines = vec![
            rule.clone(),
            format!("{:^70}", "KEYSPACE SEARCH REPORT"),
            rule.clone(),
            String::new(),
        ];

        if self.password_found {
            lines.push(format!("{:<35}✓", "RESULT: PASSWORD FOUND"));
            lines.push(String::new());
            lines.push(format!(
                "Password: {}",
                self.password.as_deref().unwrap_or_default()
            ));
        } else {
            lines.push(format!("{:<35}✗", "RESULT: PASSWORD NOT FOUND"));
            lines.push(format!(
                "Reason: {}",
                self.failure_reason.as_deref().unwrap_or("unknown")
            ));
        }
        lines.push(String::new());

        lines.push(thin.clone());
        lines.push(format!("{:^70}", "STATISTICS"));
        lines.push(thin);
        lines.push(format!("Method: {}", self.method));
        lines.push(format!("Search space: {}", self.search_space));
        lines.push(format!("Attempts: {}", self.attempts));
        if self.session_attempts != self.attempts {
            lines.push(format!("  this session: {}", self.session_attempts));
        }
        lines.push(format!("Rate: {} attempts/second", self.attempts_per_second));
        lines.push(String::new());
        lines.push(format!("Total time: {}", self.duration_formatted));
        lines.push(format!(
            "  • Start: {}",
            self.start_time.as_deref().unwrap_or("-")
        ));
        lines.push(format!("  • End: {}", self.end_time.as_deref().unwrap_or("-")));
        lines.push(String::new());
        lines.push(format!("Threads used: {}", self.threads_used));
        lines.push(format!("Peak memory: {:.2} MB", self.peak_memory_mb));
        lines.push(format!("Average CPU: {:.1}%", self.average_cpu_percent));
        lines.push(String::new());
        lines.push(rule);

        lines.join("\n")
    }

    /// Write the report into `dir`
    ///
    /// Files are named `report_<method>_<timestamp>.txt` / `.json`; the
    /// directory is created if needed.
    ///
    /// # Arguments
    ///
    /// * `dir` - Report directory (`logs/reports` by default)
    /// * `format` - Text, JSON or both
    ///
    /// # Returns
    ///
    /// Paths of the files written, JSON first when both are produced
    pub fn write(&self, dir: &Path, format: ReportFormat) -> std::io::Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%6f");
        let stem = format!("report_{}_{}", encode_identity(&self.method), stamp);
        let mut written = Vec::new();

        if format.writes_json() {
            let path = dir.join(format!("{}.json", stem));
            crate::io_utils::save_to_file(self, &path)?;
            written.push(path);
        }
        if format.writes_text() {
            let path = dir.join(format!("{}.txt", stem));
            fs::write(&path, self.render_text())?;
            written.push(path);
        }
        Ok(written)
    }
}

fn status_name(outcome: &RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Success { .. } => "success",
        RunOutcome::Exhausted { .. } => "exhausted",
        RunOutcome::Interrupted { .. } => "interrupted",
        RunOutcome::Failed { .. } => "failed",
    }
}

/// Why a run ended without a password, `None` for a success.
pub fn failure_reason(outcome: &RunOutcome) -> Option<String> {
    match outcome {
        RunOutcome::Success { .. } => None,
        RunOutcome::Exhausted { .. } => Some("keyspace exhausted".to_string()),
        RunOutcome::Interrupted { .. } => Some("interrupted by user".to_string()),
        RunOutcome::Failed { error, .. } => Some(error.clone()),
    }
}

/// `1h 2m 5s` style rendering; zero components are omitted, `0s` for nothing.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{}s", secs));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn snapshot(attempts: u64, resumed: u64, secs: u64) -> RunStatisticsSnapshot {
        RunStatisticsSnapshot {
            attempts,
            resumed_attempts: resumed,
            started_at: Some(chrono::Local::now()),
            ended_at: Some(chrono::Local::now()),
            duration: Duration::from_secs(secs),
            peak_memory_bytes: 3 * 1024 * 1024,
            avg_cpu_percent: 87.5,
        }
    }

    fn space() -> SearchSpace {
        SearchSpace::new("0123456789", 1, 6).unwrap()
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "keyspace_report_{}_{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_success_masks_password_by_default() {
        let outcome = RunOutcome::Success {
            password: "123456".to_string(),
            attempts: 234_567,
        };
        let report = RunReport::new("brute-force", &space(), 8, &outcome, &snapshot(234_567, 0, 10), false);

        assert!(report.password_found);
        assert_eq!(report.password.as_deref(), Some("12****"));
        assert_eq!(report.failure_reason, None);
        assert_eq!(report.threads_used, 8);
        assert_eq!(report.status, "success");

        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("123456"));
    }

    #[test]
    fn test_show_password_keeps_it_in_clear() {
        let outcome = RunOutcome::Success {
            password: "123456".to_string(),
            attempts: 1,
        };
        let report = RunReport::new("brute-force", &space(), 1, &outcome, &snapshot(1, 0, 1), true);
        assert_eq!(report.password.as_deref(), Some("123456"));
        assert!(report.render_text().contains("Password: 123456"));
    }

    #[test]
    fn test_failure_reasons() {
        let stats = snapshot(10, 0, 1);
        let cases = [
            (RunOutcome::Exhausted { attempts: 10 }, "keyspace exhausted"),
            (RunOutcome::Interrupted { attempts: 10 }, "interrupted by user"),
            (
                RunOutcome::Failed {
                    attempts: 10,
                    error: "oracle unreachable".to_string(),
                },
                "oracle unreachable",
            ),
        ];
        for (outcome, reason) in cases {
            let report = RunReport::new("brute-force", &space(), 4, &outcome, &stats, false);
            assert!(!report.password_found);
            assert_eq!(report.password, None);
            assert_eq!(report.failure_reason.as_deref(), Some(reason));
            let text = report.render_text();
            assert!(text.contains("RESULT: PASSWORD NOT FOUND"));
            assert!(text.contains(&format!("Reason: {}", reason)));
            assert!(text.contains("Threads used: 4"));
        }
    }

    #[test]
    fn test_resumed_run_reports_session_attempts() {
        let outcome = RunOutcome::Interrupted { attempts: 500 };
        let report = RunReport::new("brute-force", &space(), 2, &outcome, &snapshot(500, 300, 4), false);
        assert_eq!(report.attempts, 500);
        assert_eq!(report.session_attempts, 200);
        assert_eq!(report.attempts_per_second, 50.0);
        assert!(report.render_text().contains("this session: 200"));
    }

    #[test]
    fn test_write_both_formats() {
        let dir = scratch_dir("both");
        let outcome = RunOutcome::Exhausted { attempts: 42 };
        let report = RunReport::new("brute force", &space(), 4, &outcome, &snapshot(42, 0, 1), false);

        let written = report.write(&dir, ReportFormat::Both).unwrap();
        assert_eq!(written.len(), 2);
        assert!(written[0].extension().is_some_and(|e| e == "json"));
        assert!(written[1].extension().is_some_and(|e| e == "txt"));
        for path in &written {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("report_brute%20force_"), "{}", name);
        }

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&written[0]).unwrap()).unwrap();
        assert_eq!(json["status"], "exhausted");
        assert_eq!(json["threads_used"], 4);
        assert_eq!(json["failure_reason"], "keyspace exhausted");
        assert_eq!(fs::read_to_string(&written[1]).unwrap(), report.render_text());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_write_single_format() {
        let dir = scratch_dir("text_only");
        let outcome = RunOutcome::Interrupted { attempts: 3 };
        let report = RunReport::new("brute-force", &space(), 1, &outcome, &snapshot(3, 0, 1), false);

        let written = report.write(&dir, ReportFormat::Text).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_report_format_names() {
        let format: ReportFormat = serde_json::from_str("\"both\"").unwrap();
        assert_eq!(format, ReportFormat::Both);
        assert_eq!(serde_json::to_string(&ReportFormat::Json).unwrap(), "\"json\"");
        assert_eq!(ReportFormat::default(), ReportFormat::Text);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "0s");
        assert_eq!(format_duration(0.4), "0s");
        assert_eq!(format_duration(59.9), "59s");
        assert_eq!(format_duration(60.0), "1m");
        assert_eq!(format_duration(3725.0), "1h 2m 5s");
        assert_eq!(format_duration(7200.0), "2h");
    }
}
