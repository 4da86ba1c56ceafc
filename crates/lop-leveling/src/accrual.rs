use crate::LevelingError;
use chrono::{DateTime, Utc};
use lop_core::{level_from_xp, ChannelKind, GuildSettings, GuildSettingsProvider, XpSource};
use lop_storage::{UserXpRecord, XpStore};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_MAX_CAS_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualConfig {
    pub max_cas_attempts: u32,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            max_cas_attempts: DEFAULT_MAX_CAS_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrantOutcome {
    pub old_level: u32,
    pub new_level: u32,
    pub new_xp: u64,
}

impl GrantOutcome {
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.old_level
    }
}

/// Handed to the announcer when a grant crosses a level boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelUp {
    pub guild_id: String,
    pub user_id: String,
    pub old_level: u32,
    pub new_level: u32,
    pub new_xp: u64,
    /// Every configured role whose level is at or below `new_level`.
    pub role_ids: Vec<String>,
    pub announce_channel_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageActivity {
    pub guild_id: String,
    pub user_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionActivity {
    pub guild_id: String,
    pub user_id: String,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, Default)]
pub struct XpAccrualEngine {
    config: AccrualConfig,
}

impl XpAccrualEngine {
    pub fn new(config: AccrualConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> AccrualConfig {
        self.config
    }

    /// Adds `amount` to the user's total without any cooldown gate.
    pub fn grant_xp(
        &self,
        store: &XpStore,
        guild_id: &str,
        user_id: &str,
        source: XpSource,
        amount: u64,
    ) -> Result<GrantOutcome, LevelingError> {
        store.ensure_user(guild_id, user_id)?;

        for attempt in 1..=self.config.max_cas_attempts {
            let record = self.current_record(store, guild_id, user_id)?;
            let new_xp = checked_total(&record, amount)?;
            if store.compare_and_set_xp(guild_id, user_id, record.xp, new_xp)? {
                let outcome = GrantOutcome {
                    old_level: record.level,
                    new_level: level_from_xp(new_xp),
                    new_xp,
                };
                debug!(
                    event = "xp_granted",
                    guild_id,
                    user_id,
                    source = %source,
                    amount,
                    new_xp
                );
                return Ok(outcome);
            }
            debug!(event = "xp_cas_retry", guild_id, user_id, attempt);
        }

        Err(self.contention(guild_id, user_id))
    }

    /// Cooldown-gated grant for message and reaction sources. `Ok(None)` means
    /// the user is still inside the window, including when a concurrent event
    /// won the same window first.
    pub fn grant_gated(
        &self,
        store: &XpStore,
        settings: &GuildSettings,
        user_id: &str,
        source: XpSource,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<GrantOutcome>, LevelingError> {
        let guild_id = settings.guild_id.as_str();
        let cooldown_ms = settings
            .cooldown_ms(source)
            .ok_or_else(|| LevelingError::Validation(format!("{source} xp has no cooldown")))?;
        let now_ms = now.timestamp_millis();
        store.ensure_user(guild_id, user_id)?;

        for attempt in 1..=self.config.max_cas_attempts {
            let record = self.current_record(store, guild_id, user_id)?;
            let last = record.last_grant_at(source).ok_or_else(|| {
                LevelingError::Internal(format!("{source} has no last-grant column"))
            })?;
            // 0 marks a source that has never granted.
            if last != 0 && now_ms.saturating_sub(last) < cooldown_ms {
                return Ok(None);
            }

            let new_xp = checked_total(&record, amount)?;
            if store.compare_and_grant(guild_id, user_id, source, &record, new_xp, now_ms)? {
                return Ok(Some(GrantOutcome {
                    old_level: record.level,
                    new_level: level_from_xp(new_xp),
                    new_xp,
                }));
            }
            debug!(event = "xp_cas_retry", guild_id, user_id, source = %source, attempt);
        }

        Err(self.contention(guild_id, user_id))
    }

    pub fn on_message<R: Rng>(
        &self,
        store: &XpStore,
        settings: &dyn GuildSettingsProvider,
        activity: &MessageActivity,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Option<GrantOutcome>, LevelingError> {
        if activity.is_bot {
            return Ok(None);
        }
        if store.is_channel_ignored(&activity.guild_id, &activity.channel_id, ChannelKind::Text)? {
            return Ok(None);
        }

        let settings = settings.guild_settings(&activity.guild_id)?;
        let low = settings.message_xp_min.min(settings.message_xp_max);
        let high = settings.message_xp_min.max(settings.message_xp_max);
        let amount = rng.gen_range(low..=high);
        self.grant_gated(
            store,
            &settings,
            &activity.user_id,
            XpSource::Message,
            u64::from(amount),
            now,
        )
    }

    pub fn on_reaction(
        &self,
        store: &XpStore,
        settings: &dyn GuildSettingsProvider,
        activity: &ReactionActivity,
        now: DateTime<Utc>,
    ) -> Result<Option<GrantOutcome>, LevelingError> {
        if activity.is_bot {
            return Ok(None);
        }
        let settings = settings.guild_settings(&activity.guild_id)?;
        let amount = u64::from(settings.reaction_xp);
        self.grant_gated(
            store,
            &settings,
            &activity.user_id,
            XpSource::Reaction,
            amount,
            now,
        )
    }

    fn current_record(
        &self,
        store: &XpStore,
        guild_id: &str,
        user_id: &str,
    ) -> Result<UserXpRecord, LevelingError> {
        store.user_record(guild_id, user_id)?.ok_or_else(|| {
            LevelingError::Internal(format!("xp row {guild_id}/{user_id} missing after ensure"))
        })
    }

    fn contention(&self, guild_id: &str, user_id: &str) -> LevelingError {
        LevelingError::Contention {
            guild_id: guild_id.to_string(),
            user_id: user_id.to_string(),
            attempts: self.config.max_cas_attempts,
        }
    }
}

/// Builds the announcer payload for a grant that crossed a level boundary.
pub fn level_up_notice(
    store: &XpStore,
    settings: &GuildSettings,
    user_id: &str,
    outcome: &GrantOutcome,
) -> Result<Option<LevelUp>, LevelingError> {
    if !outcome.leveled_up() {
        return Ok(None);
    }

    let role_ids = store
        .level_roles(&settings.guild_id)?
        .into_iter()
        .filter(|role| role.level <= outcome.new_level)
        .map(|role| role.role_id)
        .collect::<Vec<_>>();

    info!(
        event = "level_up",
        guild_id = %settings.guild_id,
        user_id,
        old_level = outcome.old_level,
        new_level = outcome.new_level,
        roles = role_ids.len()
    );

    Ok(Some(LevelUp {
        guild_id: settings.guild_id.clone(),
        user_id: user_id.to_string(),
        old_level: outcome.old_level,
        new_level: outcome.new_level,
        new_xp: outcome.new_xp,
        role_ids,
        announce_channel_id: settings.level_up_channel_id.clone(),
    }))
}

fn checked_total(record: &UserXpRecord, amount: u64) -> Result<u64, LevelingError> {
    record.xp.checked_add(amount).ok_or_else(|| {
        LevelingError::Validation(format!(
            "adding {amount} xp to {} overflows the total",
            record.xp
        ))
    })
}
