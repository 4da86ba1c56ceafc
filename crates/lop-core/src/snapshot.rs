use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotDocumentError {
    #[error("snapshot is not valid json: {0}")]
    InvalidJson(String),
    #[error("snapshot must be a json array")]
    NotAnArray,
}

/// Per-guild progress of the one-shot claim procedure. `Done` is sticky.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClaimAllState {
    NotRun,
    Running,
    Done,
}

impl ClaimAllState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotRun => "not_run",
            Self::Running => "running",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for ClaimAllState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimAllState {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim() {
            "not_run" => Ok(Self::NotRun),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            other => Err(format!("unknown claim-all state: {other}")),
        }
    }
}

/// One validated legacy row ready for import.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub username: String,
    pub xp: u64,
    pub level: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSnapshot {
    pub entries: Vec<SnapshotEntry>,
    pub rejected: usize,
}

/// Parses a legacy export: a json array of `{username, xp, level?}` objects.
///
/// Only the document shape is fatal. Entries without a non-empty username or
/// with a non-numeric, negative or non-finite `xp` are counted in `rejected`.
pub fn parse_snapshot_document(raw: &str) -> Result<ParsedSnapshot, SnapshotDocumentError> {
    let document: Value = serde_json::from_str(raw)
        .map_err(|err| SnapshotDocumentError::InvalidJson(err.to_string()))?;
    let rows = document
        .as_array()
        .ok_or(SnapshotDocumentError::NotAnArray)?;

    let mut parsed = ParsedSnapshot::default();
    for row in rows {
        match snapshot_entry(row) {
            Some(entry) => parsed.entries.push(entry),
            None => parsed.rejected += 1,
        }
    }
    Ok(parsed)
}

fn snapshot_entry(row: &Value) -> Option<SnapshotEntry> {
    let username = row.get("username")?.as_str()?;
    if username.trim().is_empty() {
        return None;
    }
    let xp = whole_number(row.get("xp")?)?;
    let level = row
        .get("level")
        .and_then(whole_number)
        .and_then(|level| u32::try_from(level).ok())
        .unwrap_or(0);

    Some(SnapshotEntry {
        username: username.to_string(),
        xp,
        level,
    })
}

/// Largest xp an SQLite INTEGER column can hold.
pub const MAX_SNAPSHOT_XP: u64 = i64::MAX as u64;

// Fractions are truncated; negatives and values beyond MAX_SNAPSHOT_XP are refused.
fn whole_number(value: &Value) -> Option<u64> {
    if let Some(number) = value.as_u64() {
        return (number <= MAX_SNAPSHOT_XP).then_some(number);
    }
    let number = value.as_f64()?;
    if !number.is_finite() || number < 0.0 || number >= MAX_SNAPSHOT_XP as f64 {
        return None;
    }
    Some(number.trunc() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_rows_with_username_and_numeric_xp() {
        let parsed = parse_snapshot_document(
            r#"[{"username": "Rook", "xp": 12000, "level": 15}, {"username": "Ann", "xp": 500}]"#,
        )
        .expect("valid document");

        assert_eq!(parsed.rejected, 0);
        assert_eq!(
            parsed.entries,
            vec![
                SnapshotEntry {
                    username: "Rook".to_string(),
                    xp: 12_000,
                    level: 15,
                },
                SnapshotEntry {
                    username: "Ann".to_string(),
                    xp: 500,
                    level: 0,
                },
            ]
        );
    }

    #[test]
    fn invalid_rows_are_counted_not_fatal() {
        let parsed = parse_snapshot_document(
            r#"[
                {"username": "", "xp": 10},
                {"username": "   ", "xp": 10},
                {"username": "no-xp"},
                {"username": "text-xp", "xp": "100"},
                {"username": "negative", "xp": -4},
                {"xp": 10},
                "loose string",
                {"username": "Whale", "xp": 10000000000000000000},
                {"username": "float-whale", "xp": 1.0e19},
                {"username": "fraction", "xp": 10.9}
            ]"#,
        )
        .expect("valid document");

        assert_eq!(parsed.rejected, 9);
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].xp, 10);
    }

    #[test]
    fn largest_storable_xp_is_accepted() {
        let raw = format!(r#"[{{"username": "Cap", "xp": {MAX_SNAPSHOT_XP}}}]"#);
        let parsed = parse_snapshot_document(&raw).expect("valid document");
        assert_eq!(parsed.rejected, 0);
        assert_eq!(parsed.entries[0].xp, MAX_SNAPSHOT_XP);
    }

    #[test]
    fn document_shape_errors_are_fatal() {
        assert_eq!(
            parse_snapshot_document(r#"{"username": "Rook", "xp": 1}"#),
            Err(SnapshotDocumentError::NotAnArray)
        );
        assert!(matches!(
            parse_snapshot_document("[{"),
            Err(SnapshotDocumentError::InvalidJson(_))
        ));
    }
}
