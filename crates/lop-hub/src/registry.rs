use lop_core::{
    CollaboratorError, CollaboratorFailureKind, MemberDirectory, MemberProfile, VoiceMember,
    VoicePresence,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// What the platform adapter last pushed for one guild.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceSnapshot {
    #[serde(default)]
    pub members: Vec<MemberProfile>,
    #[serde(default)]
    pub voice: Vec<VoiceMember>,
}

/// In-process member directory and voice presence, replaced wholesale per guild.
#[derive(Debug, Default)]
pub struct GuildRegistry {
    guilds: RwLock<BTreeMap<String, PresenceSnapshot>>,
}

impl GuildRegistry {
    pub fn replace(&self, guild_id: &str, snapshot: PresenceSnapshot) -> Result<(), CollaboratorError> {
        let mut guilds = self.guilds.write().map_err(|_| poisoned())?;
        guilds.insert(guild_id.to_string(), snapshot);
        Ok(())
    }

    fn snapshot(&self, guild_id: &str) -> Result<PresenceSnapshot, CollaboratorError> {
        let guilds = self.guilds.read().map_err(|_| poisoned())?;
        guilds.get(guild_id).cloned().ok_or_else(|| {
            CollaboratorError::new(
                CollaboratorFailureKind::NotFound,
                format!("no member snapshot for guild {guild_id}"),
            )
        })
    }
}

impl MemberDirectory for GuildRegistry {
    fn list_members(&self, guild_id: &str) -> Result<Vec<MemberProfile>, CollaboratorError> {
        Ok(self.snapshot(guild_id)?.members)
    }
}

impl VoicePresence for GuildRegistry {
    fn guild_ids(&self) -> Vec<String> {
        self.guilds
            .read()
            .map(|guilds| guilds.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn voice_members(&self, guild_id: &str) -> Result<Vec<VoiceMember>, CollaboratorError> {
        Ok(self.snapshot(guild_id)?.voice)
    }
}

fn poisoned() -> CollaboratorError {
    CollaboratorError::new(
        CollaboratorFailureKind::Unavailable,
        "guild registry lock poisoned",
    )
}
