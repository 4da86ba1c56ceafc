pub mod accrual;
pub mod admin;
pub mod claimer;
pub mod importer;
pub mod ranking;
pub mod voice;

pub use accrual::{
    level_up_notice, AccrualConfig, GrantOutcome, LevelUp, MessageActivity, ReactionActivity,
    XpAccrualEngine, DEFAULT_MAX_CAS_ATTEMPTS,
};
pub use admin::{add_user_xp, recalculate_levels, set_user_xp, RecalcReport};
pub use claimer::{claim_all, ClaimError, ClaimOptions, ClaimReport, MemberIndex};
pub use importer::{import_snapshot, ImportReport, SnapshotError};
pub use ranking::{
    clamp_page, leaderboard_page, rank_card, rank_position, LeaderboardEntry, LeaderboardPage, RankCard,
    DEFAULT_PAGE_SIZE, MAX_PAGE, MAX_PAGE_SIZE,
};
pub use voice::VoiceSweepReport;

use lop_core::CollaboratorError;
use lop_storage::StorageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LevelingError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    PermissionDenied(#[from] PermissionDenied),
    #[error("xp row {guild_id}/{user_id} kept changing after {attempts} attempts")]
    Contention {
        guild_id: String,
        user_id: String,
        attempts: u32,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{user_id} may not run {operation}")]
pub struct PermissionDenied {
    pub user_id: String,
    pub operation: &'static str,
}

/// Whoever triggered an administrative operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operator {
    pub user_id: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl Operator {
    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
        }
    }

    pub fn member(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }
}

/// Override identities may run any administrative operation and bypass the
/// claim-all lock, whether or not they hold the administrator permission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    override_user_ids: BTreeSet<String>,
}

impl AccessPolicy {
    pub fn new<I, S>(override_user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            override_user_ids: override_user_ids
                .into_iter()
                .map(Into::into)
                .map(|id: String| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }

    pub fn is_override(&self, operator: &Operator) -> bool {
        self.override_user_ids.contains(&operator.user_id)
    }

    pub fn require_admin(
        &self,
        operator: &Operator,
        operation: &'static str,
    ) -> Result<(), PermissionDenied> {
        if operator.is_admin || self.is_override(operator) {
            return Ok(());
        }
        Err(PermissionDenied {
            user_id: operator.user_id.clone(),
            operation,
        })
    }
}
