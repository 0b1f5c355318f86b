//! Operator-facing status views and exports built from the tracker.

use std::fmt::Write as _;
use std::io::{self, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::tracker::{AccountTracker, AttemptRecord, TeamSummary, TrackerError};

/// Per-team summaries for every team the tracker knows about.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub teams: Vec<TeamSummary>,
}

impl StatusReport {
    /// Build the report, optionally for a single team.
    pub fn build(tracker: &dyn AccountTracker, team: Option<&str>) -> Result<Self, TrackerError> {
        let team_ids = match team {
            Some(id) => vec![id.to_string()],
            None => tracker.team_ids()?,
        };

        let teams = team_ids
            .iter()
            .map(|id| tracker.summary(id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            generated_at: Utc::now(),
            teams,
        })
    }

    /// Plain-text rendering for the terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.teams.is_empty() {
            out.push_str("No tracked identities.\n");
            return out;
        }

        for team in &self.teams {
            let _ = writeln!(
                out,
                "Team {}: {} total, {} completed, {} incomplete ({} abandoned)",
                team.team_id, team.total, team.completed, team.incomplete, team.abandoned
            );
            for count in &team.counts {
                let _ = writeln!(
                    out,
                    "  {:<22} {:<12} {}",
                    count.stage.as_str(),
                    count.status.as_str(),
                    count.count
                );
            }
            for record in &team.incomplete_accounts {
                let _ = writeln!(
                    out,
                    "  - {} at {} ({}){}",
                    record.email,
                    record.stage,
                    record.status,
                    record
                        .error_detail
                        .as_deref()
                        .map(|d| format!(": {}", d))
                        .unwrap_or_default()
                );
            }
        }
        out
    }
}

/// One exported identity.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExportRow {
    pub team: String,
    pub email: String,
    pub password: String,
    pub stage: String,
    pub status: String,
    pub error_kind: String,
    pub external_reference: String,
    pub updated_at: String,
}

impl From<&AttemptRecord> for ExportRow {
    fn from(record: &AttemptRecord) -> Self {
        Self {
            team: record.team_id.clone(),
            email: record.email.clone(),
            password: record.password.clone(),
            stage: record.stage.as_str().to_string(),
            status: record.status.as_str().to_string(),
            error_kind: record
                .error_kind
                .map(|k| k.as_str().to_string())
                .unwrap_or_default(),
            external_reference: record.external_reference.clone().unwrap_or_default(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}

const CSV_HEADER: [&str; 8] = [
    "team",
    "email",
    "password",
    "stage",
    "status",
    "error_kind",
    "external_reference",
    "updated_at",
];

/// Every current record, optionally for one team.
pub fn export_rows(
    tracker: &dyn AccountTracker,
    team: Option<&str>,
) -> Result<Vec<ExportRow>, TrackerError> {
    let team_ids = match team {
        Some(id) => vec![id.to_string()],
        None => tracker.team_ids()?,
    };

    let mut rows = Vec::new();
    for id in team_ids {
        rows.extend(tracker.list(&id)?.iter().map(ExportRow::from));
    }
    Ok(rows)
}

/// Write rows as a pretty-printed JSON array.
pub fn write_json<W: Write>(rows: &[ExportRow], mut writer: W) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut writer, rows)?;
    writeln!(writer)
}

/// Write rows as CSV with a header line.
pub fn write_csv<W: Write>(rows: &[ExportRow], mut writer: W) -> io::Result<()> {
    writeln!(writer, "{}", CSV_HEADER.join(","))?;
    for row in rows {
        let fields = [
            &row.team,
            &row.email,
            &row.password,
            &row.stage,
            &row.status,
            &row.error_kind,
            &row.external_reference,
            &row.updated_at,
        ];
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        writeln!(writer, "{}", line.join(","))?;
    }
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{ErrorKind, SqliteAccountTracker, Stage};

    fn seeded() -> SqliteAccountTracker {
        let tracker = SqliteAccountTracker::in_memory().unwrap();
        let done = AttemptRecord::new("alpha", "done@x.test", "pw1", "a1")
            .succeeded(Stage::DownstreamRegistered)
            .with_external_reference("acc-1");
        tracker.put(&done).unwrap();

        let failed = AttemptRecord::new("alpha", "stuck@x.test", "pw,2", "a2").failed(
            Stage::Registered,
            ErrorKind::Transient,
            "timeout",
        );
        tracker.put(&failed).unwrap();

        let other = AttemptRecord::new("beta", "b@x.test", "pw3", "a3").succeeded(Stage::Invited);
        tracker.put(&other).unwrap();
        tracker
    }

    #[test]
    fn test_status_report_all_teams() {
        let tracker = seeded();
        let report = StatusReport::build(&tracker, None).unwrap();
        assert_eq!(report.teams.len(), 2);

        let alpha = report.teams.iter().find(|t| t.team_id == "alpha").unwrap();
        assert_eq!(alpha.total, 2);
        assert_eq!(alpha.completed, 1);
        assert_eq!(alpha.incomplete, 1);

        let text = report.render();
        assert!(text.contains("Team alpha: 2 total, 1 completed"));
        assert!(text.contains("stuck@x.test at registered (failed): timeout"));
    }

    #[test]
    fn test_status_report_single_team() {
        let tracker = seeded();
        let report = StatusReport::build(&tracker, Some("beta")).unwrap();
        assert_eq!(report.teams.len(), 1);
        assert_eq!(report.teams[0].incomplete, 1);
    }

    #[test]
    fn test_render_empty() {
        let tracker = SqliteAccountTracker::in_memory().unwrap();
        let report = StatusReport::build(&tracker, None).unwrap();
        assert_eq!(report.render(), "No tracked identities.\n");
    }

    #[test]
    fn test_csv_export_quotes_fields() {
        let tracker = seeded();
        let rows = export_rows(&tracker, Some("alpha")).unwrap();
        assert_eq!(rows.len(), 2);

        let mut buf = Vec::new();
        write_csv(&rows, &mut buf).unwrap();
        let csv = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(
            lines[0],
            "team,email,password,stage,status,error_kind,external_reference,updated_at"
        );
        assert!(lines[1].starts_with("alpha,done@x.test,pw1,downstream_registered,succeeded,,acc-1,"));
        assert!(lines[2].starts_with("alpha,stuck@x.test,\"pw,2\",registered,failed,transient,,"));
    }

    #[test]
    fn test_json_export() {
        let tracker = seeded();
        let rows = export_rows(&tracker, None).unwrap();
        assert_eq!(rows.len(), 3);

        let mut buf = Vec::new();
        write_json(&rows, &mut buf).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_csv_field_escaping() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a\"b"), "\"a\"\"b\"");
    }
}
