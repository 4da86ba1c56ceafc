use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_MESSAGE_XP_MIN: u32 = 15;
pub const DEFAULT_MESSAGE_XP_MAX: u32 = 25;
pub const DEFAULT_MESSAGE_COOLDOWN_SECONDS: u32 = 60;
pub const DEFAULT_REACTION_XP: u32 = 3;
pub const DEFAULT_REACTION_COOLDOWN_SECONDS: u32 = 30;
pub const DEFAULT_VOICE_XP_PER_MINUTE: u32 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("message_xp_min ({min}) must not exceed message_xp_max ({max})")]
    MessageRangeInverted { min: u32, max: u32 },
    #[error("unknown channel kind: {0}")]
    UnknownChannelKind(String),
    #[error("unknown xp source: {0}")]
    UnknownSource(String),
}

/// Per-guild XP tuning. Missing values fall back to the documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuildSettings {
    pub guild_id: String,
    pub message_xp_min: u32,
    pub message_xp_max: u32,
    pub message_cooldown_seconds: u32,
    pub reaction_xp: u32,
    pub reaction_cooldown_seconds: u32,
    pub voice_xp_per_minute: u32,
    #[serde(default)]
    pub level_up_channel_id: Option<String>,
}

impl GuildSettings {
    pub fn defaults_for(guild_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            message_xp_min: DEFAULT_MESSAGE_XP_MIN,
            message_xp_max: DEFAULT_MESSAGE_XP_MAX,
            message_cooldown_seconds: DEFAULT_MESSAGE_COOLDOWN_SECONDS,
            reaction_xp: DEFAULT_REACTION_XP,
            reaction_cooldown_seconds: DEFAULT_REACTION_COOLDOWN_SECONDS,
            voice_xp_per_minute: DEFAULT_VOICE_XP_PER_MINUTE,
            level_up_channel_id: None,
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.message_xp_min > self.message_xp_max {
            return Err(SettingsError::MessageRangeInverted {
                min: self.message_xp_min,
                max: self.message_xp_max,
            });
        }
        Ok(())
    }

    /// Cooldown window for a gated source, `None` for sources without one.
    pub fn cooldown_ms(&self, source: XpSource) -> Option<i64> {
        match source {
            XpSource::Message => Some(i64::from(self.message_cooldown_seconds) * 1_000),
            XpSource::Reaction => Some(i64::from(self.reaction_cooldown_seconds) * 1_000),
            XpSource::Voice | XpSource::Admin => None,
        }
    }

    /// Applies a patch and validates the result without touching `self` on failure.
    pub fn patched(&self, patch: &SettingsPatch) -> Result<Self, SettingsError> {
        let mut next = self.clone();
        if let Some(value) = patch.message_xp_min {
            next.message_xp_min = value;
        }
        if let Some(value) = patch.message_xp_max {
            next.message_xp_max = value;
        }
        if let Some(value) = patch.message_cooldown_seconds {
            next.message_cooldown_seconds = value;
        }
        if let Some(value) = patch.reaction_xp {
            next.reaction_xp = value;
        }
        if let Some(value) = patch.reaction_cooldown_seconds {
            next.reaction_cooldown_seconds = value;
        }
        if let Some(value) = patch.voice_xp_per_minute {
            next.voice_xp_per_minute = value;
        }
        if let Some(value) = &patch.level_up_channel_id {
            next.level_up_channel_id = value
                .as_ref()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty());
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial update over the known setting keys; unknown keys are rejected at parse time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SettingsPatch {
    #[serde(default)]
    pub message_xp_min: Option<u32>,
    #[serde(default)]
    pub message_xp_max: Option<u32>,
    #[serde(default)]
    pub message_cooldown_seconds: Option<u32>,
    #[serde(default)]
    pub reaction_xp: Option<u32>,
    #[serde(default)]
    pub reaction_cooldown_seconds: Option<u32>,
    #[serde(default)]
    pub voice_xp_per_minute: Option<u32>,
    #[serde(
        default,
        deserialize_with = "deserialize_clearable",
        skip_serializing_if = "Option::is_none"
    )]
    pub level_up_channel_id: Option<Option<String>>,
}

/// Keeps an explicit `null` distinct from an absent key.
fn deserialize_clearable<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum XpSource {
    Message,
    Reaction,
    Voice,
    Admin,
}

impl XpSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Reaction => "reaction",
            Self::Voice => "voice",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for XpSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for XpSource {
    type Err = SettingsError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "message" => Ok(Self::Message),
            "reaction" => Ok(Self::Reaction),
            "voice" => Ok(Self::Voice),
            "admin" => Ok(Self::Admin),
            other => Err(SettingsError::UnknownSource(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Voice,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = SettingsError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "voice" => Ok(Self::Voice),
            other => Err(SettingsError::UnknownChannelKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelRole {
    pub level: u32,
    pub role_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = GuildSettings::defaults_for("g1");
        assert_eq!(settings.message_xp_min, 15);
        assert_eq!(settings.message_xp_max, 25);
        assert_eq!(settings.cooldown_ms(XpSource::Message), Some(60_000));
        assert_eq!(settings.cooldown_ms(XpSource::Reaction), Some(30_000));
        assert_eq!(settings.cooldown_ms(XpSource::Voice), None);
        assert_eq!(settings.reaction_xp, 3);
        assert_eq!(settings.voice_xp_per_minute, 5);
    }

    #[test]
    fn patch_rejects_inverted_message_range() {
        let settings = GuildSettings::defaults_for("g1");
        let patch = SettingsPatch {
            message_xp_min: Some(40),
            ..SettingsPatch::default()
        };
        assert_eq!(
            settings.patched(&patch),
            Err(SettingsError::MessageRangeInverted { min: 40, max: 25 })
        );
    }

    #[test]
    fn patch_clears_level_up_channel_with_explicit_null() {
        let mut settings = GuildSettings::defaults_for("g1");
        settings.level_up_channel_id = Some("c1".to_string());

        let patch: SettingsPatch =
            serde_json::from_str(r#"{"level_up_channel_id": null, "reaction_xp": 7}"#)
                .expect("patch json");
        let next = settings.patched(&patch).expect("valid patch");

        assert_eq!(next.level_up_channel_id, None);
        assert_eq!(next.reaction_xp, 7);
    }

    #[test]
    fn patch_rejects_unknown_keys() {
        let parsed = serde_json::from_str::<SettingsPatch>(r#"{"claim_all_done": 1}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn channel_kind_parses_case_insensitively() {
        assert_eq!("Voice".parse::<ChannelKind>(), Ok(ChannelKind::Voice));
        assert!("stage".parse::<ChannelKind>().is_err());
    }
}
