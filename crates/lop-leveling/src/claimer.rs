//! One-shot reconciliation of legacy snapshot usernames with live members.
//!
//! Each unclaimed snapshot row is matched by exact equality of normalized
//! names against three member indexes (handle, nickname, profile display
//! name). Only a single unique candidate is assigned; absent or ambiguous
//! names are skipped and stay unclaimed for a later, manually corrected run.
//! A successful run locks the guild (`done`) unless an override identity
//! asks to leave it re-runnable.

use crate::{AccessPolicy, Operator, PermissionDenied};
use chrono::{DateTime, Utc};
use lop_core::{normalize_name, ClaimAllState, CollaboratorError, MemberDirectory, MemberProfile};
use lop_storage::{LegacySnapshotRow, StorageError, XpStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error(transparent)]
    PermissionDenied(#[from] PermissionDenied),
    #[error("claim-all already ran for guild {guild_id}")]
    AlreadyRun { guild_id: String },
    #[error("claim-all is already running for guild {guild_id}")]
    InProgress { guild_id: String },
    #[error("no legacy snapshot imported for guild {guild_id}")]
    NoSnapshot { guild_id: String },
    #[error("member directory error: {0}")]
    Directory(#[from] CollaboratorError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimOptions {
    /// Only honoured for override identities: restore `not_run` afterwards.
    #[serde(default)]
    pub leave_unlocked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimReport {
    pub matched: usize,
    pub skipped: usize,
    pub already: usize,
    pub members_indexed: usize,
    pub final_state: ClaimAllState,
}

/// Normalized name lookups over the non-bot members of a guild.
#[derive(Debug, Clone, Default)]
pub struct MemberIndex {
    by_handle: BTreeMap<String, BTreeSet<String>>,
    by_nickname: BTreeMap<String, BTreeSet<String>>,
    by_display_name: BTreeMap<String, BTreeSet<String>>,
    members: usize,
}

impl MemberIndex {
    pub fn build(members: &[MemberProfile]) -> Self {
        let mut index = Self::default();
        for member in members.iter().filter(|member| !member.is_bot) {
            index.members += 1;
            insert_name(&mut index.by_handle, Some(&member.handle), &member.id);
            insert_name(&mut index.by_nickname, member.nickname.as_deref(), &member.id);
            insert_name(
                &mut index.by_display_name,
                member.display_name.as_deref(),
                &member.id,
            );
        }
        index
    }

    pub fn len(&self) -> usize {
        self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members == 0
    }

    /// Distinct member ids whose handle, nickname or display name matches.
    pub fn candidates(&self, legacy_username: &str) -> BTreeSet<String> {
        let key = normalize_name(legacy_username);
        if key.is_empty() {
            return BTreeSet::new();
        }
        [&self.by_handle, &self.by_nickname, &self.by_display_name]
            .into_iter()
            .filter_map(|index| index.get(&key))
            .flatten()
            .cloned()
            .collect()
    }

    /// The single member a name resolves to, if it resolves to exactly one.
    pub fn unique_match(&self, legacy_username: &str) -> Option<String> {
        let mut candidates = self.candidates(legacy_username).into_iter();
        match (candidates.next(), candidates.next()) {
            (Some(member_id), None) => Some(member_id),
            _ => None,
        }
    }
}

fn insert_name(index: &mut BTreeMap<String, BTreeSet<String>>, name: Option<&str>, id: &str) {
    let Some(name) = name else {
        return;
    };
    let key = normalize_name(name);
    if key.is_empty() {
        return;
    }
    index.entry(key).or_default().insert(id.to_string());
}

pub fn claim_all(
    store: &XpStore,
    directory: &dyn MemberDirectory,
    policy: &AccessPolicy,
    operator: &Operator,
    guild_id: &str,
    options: ClaimOptions,
    now: DateTime<Utc>,
) -> Result<ClaimReport, ClaimError> {
    policy.require_admin(operator, "claim-all")?;
    let is_override = policy.is_override(operator);

    let prior = store.claim_all_state(guild_id)?;
    match prior {
        ClaimAllState::Done if !is_override => {
            return Err(ClaimError::AlreadyRun {
                guild_id: guild_id.to_string(),
            })
        }
        ClaimAllState::Running if !is_override => {
            return Err(ClaimError::InProgress {
                guild_id: guild_id.to_string(),
            })
        }
        _ => {}
    }

    let rows = store.snapshot_rows(guild_id)?;
    if rows.is_empty() {
        return Err(ClaimError::NoSnapshot {
            guild_id: guild_id.to_string(),
        });
    }

    if !store.transition_claim_all_state(guild_id, prior, ClaimAllState::Running)? {
        return Err(ClaimError::InProgress {
            guild_id: guild_id.to_string(),
        });
    }
    info!(
        event = "claim_all_started",
        guild_id,
        operator = %operator.user_id,
        override_run = is_override,
        prior_state = %prior,
        rows = rows.len()
    );

    let result = match directory.list_members(guild_id) {
        Ok(members) => {
            let index = MemberIndex::build(&members);
            assign_rows(store, &index, guild_id, &rows, now)
                .map(|(matched, skipped, already)| (index.len(), matched, skipped, already))
        }
        Err(err) => Err(ClaimError::Directory(err)),
    };

    let (members_indexed, matched, skipped, already) = match result {
        Ok(counts) => counts,
        Err(err) => {
            restore_state(store, guild_id, prior);
            warn!(event = "claim_all_failed", guild_id, error = %err);
            return Err(err);
        }
    };

    let target = if is_override && options.leave_unlocked {
        ClaimAllState::NotRun
    } else {
        ClaimAllState::Done
    };
    let final_state =
        if store.transition_claim_all_state(guild_id, ClaimAllState::Running, target)? {
            target
        } else {
            let current = store.claim_all_state(guild_id)?;
            warn!(
                event = "claim_all_state_moved",
                guild_id,
                expected = "running",
                wanted = %target,
                found = %current
            );
            current
        };

    info!(
        event = "claim_all_finished",
        guild_id,
        matched,
        skipped,
        already,
        members_indexed,
        final_state = %final_state
    );
    Ok(ClaimReport {
        matched,
        skipped,
        already,
        members_indexed,
        final_state,
    })
}

fn assign_rows(
    store: &XpStore,
    index: &MemberIndex,
    guild_id: &str,
    rows: &[LegacySnapshotRow],
    now: DateTime<Utc>,
) -> Result<(usize, usize, usize), ClaimError> {
    let now_ms = now.timestamp_millis();
    let (mut matched, mut skipped, mut already) = (0, 0, 0);

    for row in rows {
        if row.is_claimed() {
            already += 1;
            continue;
        }

        let candidates = index.candidates(&row.snapshot_username);
        let member_id = match candidates.first() {
            Some(member_id) if candidates.len() == 1 => member_id,
            _ => {
                let reason = if candidates.is_empty() {
                    "absent"
                } else {
                    "ambiguous"
                };
                debug!(
                    event = "claim_skipped",
                    guild_id,
                    username = %row.snapshot_username,
                    reason
                );
                skipped += 1;
                continue;
            }
        };

        if store.claim_snapshot_row(guild_id, &row.snapshot_username, member_id, now_ms)? {
            debug!(
                event = "claim_matched",
                guild_id,
                username = %row.snapshot_username,
                user_id = %member_id,
                xp = row.snapshot_xp
            );
            matched += 1;
        } else {
            already += 1;
        }
    }

    Ok((matched, skipped, already))
}

fn restore_state(store: &XpStore, guild_id: &str, prior: ClaimAllState) {
    match store.transition_claim_all_state(guild_id, ClaimAllState::Running, prior) {
        Ok(true) => {}
        Ok(false) => warn!(event = "claim_all_state_moved", guild_id, expected = "running"),
        Err(err) => warn!(event = "claim_all_state_restore_failed", guild_id, error = %err),
    }
}
