use crate::{AccessPolicy, Operator, PermissionDenied};
use lop_core::snapshot::{parse_snapshot_document, SnapshotDocumentError};
use lop_storage::{StorageError, XpStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    PermissionDenied(#[from] PermissionDenied),
    #[error("invalid snapshot document: {0}")]
    Document(#[from] SnapshotDocumentError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportReport {
    /// Valid rows written or refreshed.
    pub accepted: usize,
    /// Rows missing a username or a usable xp value.
    pub rejected: usize,
    /// Valid rows whose username is already claimed; left untouched.
    pub claimed_untouched: usize,
}

/// Loads a legacy export into the guild's snapshot table. Re-importing a
/// username replaces its unclaimed values; claimed rows never change.
pub fn import_snapshot(
    store: &XpStore,
    policy: &AccessPolicy,
    operator: &Operator,
    guild_id: &str,
    raw_document: &str,
) -> Result<ImportReport, SnapshotError> {
    policy.require_admin(operator, "snapshot import")?;

    let parsed = parse_snapshot_document(raw_document)?;
    let counts = store.write_snapshot_entries(guild_id, &parsed.entries)?;
    let report = ImportReport {
        accepted: counts.written,
        rejected: parsed.rejected,
        claimed_untouched: counts.claimed_untouched,
    };

    info!(
        event = "snapshot_imported",
        guild_id,
        operator = %operator.user_id,
        accepted = report.accepted,
        rejected = report.rejected,
        claimed_untouched = report.claimed_untouched
    );
    Ok(report)
}
