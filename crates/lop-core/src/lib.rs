pub mod leveling;
pub mod mod_actions;
pub mod names;
pub mod settings;
pub mod snapshot;

pub use leveling::{
    level_from_xp, progress_from_total_xp, xp_for_level, xp_to_advance, LevelProgress,
    LEVEL_CURVE_VERSION,
};
pub use names::normalize_name;
pub use settings::{ChannelKind, GuildSettings, LevelRole, SettingsError, SettingsPatch, XpSource};
pub use snapshot::{ClaimAllState, SnapshotEntry};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A guild member as seen by the chat platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberProfile {
    pub id: String,
    pub handle: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
}

/// A member currently connected to a voice channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceMember {
    pub user_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorFailureKind {
    Unavailable,
    NotFound,
    InvalidData,
}

impl CollaboratorFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::NotFound => "not_found",
            Self::InvalidData => "invalid_data",
        }
    }
}

impl fmt::Display for CollaboratorFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct CollaboratorError {
    pub kind: CollaboratorFailureKind,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(kind: CollaboratorFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub trait GuildSettingsProvider {
    fn guild_settings(&self, guild_id: &str) -> Result<GuildSettings, CollaboratorError>;
}

pub trait MemberDirectory {
    fn list_members(&self, guild_id: &str) -> Result<Vec<MemberProfile>, CollaboratorError>;
}

/// Source of the voice sweep: which guilds to visit and who is connected.
pub trait VoicePresence {
    fn guild_ids(&self) -> Vec<String>;

    fn voice_members(&self, guild_id: &str) -> Result<Vec<VoiceMember>, CollaboratorError>;
}
