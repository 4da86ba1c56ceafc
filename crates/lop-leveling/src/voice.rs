use crate::accrual::{level_up_notice, LevelUp, XpAccrualEngine};
use lop_core::{ChannelKind, GuildSettingsProvider, VoicePresence, XpSource};
use lop_storage::XpStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceSweepReport {
    pub guilds_scanned: usize,
    pub members_seen: usize,
    pub members_granted: usize,
    /// Bots and members sitting in ignored voice channels.
    pub members_skipped: usize,
    pub failures: usize,
    pub level_ups: Vec<LevelUp>,
}

impl XpAccrualEngine {
    /// One voice tick: every connected, non-bot member outside an ignored
    /// voice channel earns the guild's per-minute amount. A failing guild or
    /// member is logged and counted, and the sweep moves on.
    pub fn sweep_voice(
        &self,
        store: &XpStore,
        settings: &dyn GuildSettingsProvider,
        presence: &dyn VoicePresence,
    ) -> VoiceSweepReport {
        let mut report = VoiceSweepReport::default();

        for guild_id in presence.guild_ids() {
            report.guilds_scanned += 1;

            let members = match presence.voice_members(&guild_id) {
                Ok(members) => members,
                Err(err) => {
                    warn!(event = "voice_presence_failed", guild_id = %guild_id, error = %err);
                    report.failures += 1;
                    continue;
                }
            };
            if members.is_empty() {
                continue;
            }

            let guild_settings = match settings.guild_settings(&guild_id) {
                Ok(guild_settings) => guild_settings,
                Err(err) => {
                    warn!(event = "voice_settings_failed", guild_id = %guild_id, error = %err);
                    report.failures += 1;
                    continue;
                }
            };
            let ignored = match store.ignored_channels(&guild_id, ChannelKind::Voice) {
                Ok(ignored) => ignored,
                Err(err) => {
                    warn!(event = "voice_ignored_channels_failed", guild_id = %guild_id, error = %err);
                    report.failures += 1;
                    continue;
                }
            };
            let amount = u64::from(guild_settings.voice_xp_per_minute);

            for member in members {
                report.members_seen += 1;
                if member.is_bot || ignored.contains(&member.channel_id) {
                    report.members_skipped += 1;
                    continue;
                }

                let granted = self
                    .grant_xp(store, &guild_id, &member.user_id, XpSource::Voice, amount)
                    .and_then(|outcome| {
                        level_up_notice(store, &guild_settings, &member.user_id, &outcome)
                    });
                match granted {
                    Ok(level_up) => {
                        report.members_granted += 1;
                        report.level_ups.extend(level_up);
                    }
                    Err(err) => {
                        warn!(
                            event = "voice_grant_failed",
                            guild_id = %guild_id,
                            user_id = %member.user_id,
                            error = %err
                        );
                        report.failures += 1;
                    }
                }
            }
        }

        info!(
            event = "voice_sweep",
            guilds = report.guilds_scanned,
            granted = report.members_granted,
            skipped = report.members_skipped,
            failures = report.failures,
            level_ups = report.level_ups.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lop_core::{CollaboratorError, CollaboratorFailureKind, VoiceMember};
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct FakePresence {
        guilds: BTreeMap<String, Result<Vec<VoiceMember>, CollaboratorError>>,
    }

    impl FakePresence {
        fn with(mut self, guild_id: &str, members: Vec<VoiceMember>) -> Self {
            self.guilds.insert(guild_id.to_string(), Ok(members));
            self
        }

        fn failing(mut self, guild_id: &str) -> Self {
            self.guilds.insert(
                guild_id.to_string(),
                Err(CollaboratorError::new(
                    CollaboratorFailureKind::Unavailable,
                    "voice state unavailable",
                )),
            );
            self
        }
    }

    impl VoicePresence for FakePresence {
        fn guild_ids(&self) -> Vec<String> {
            self.guilds.keys().cloned().collect()
        }

        fn voice_members(&self, guild_id: &str) -> Result<Vec<VoiceMember>, CollaboratorError> {
            self.guilds.get(guild_id).cloned().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn voice(user_id: &str, channel_id: &str, is_bot: bool) -> VoiceMember {
        VoiceMember {
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
            is_bot,
        }
    }

    #[test]
    fn grants_connected_humans_outside_ignored_channels() {
        let store = XpStore::open_in_memory().expect("open store");
        store
            .ignore_channel("g1", "afk", ChannelKind::Voice)
            .expect("ignore afk");
        let presence = FakePresence::default().with(
            "g1",
            vec![
                voice("alice", "lounge", false),
                voice("music-bot", "lounge", true),
                voice("idler", "afk", false),
            ],
        );

        let report = XpAccrualEngine::default().sweep_voice(&store, &store, &presence);
        assert_eq!(report.members_seen, 3);
        assert_eq!(report.members_granted, 1);
        assert_eq!(report.members_skipped, 2);
        assert_eq!(report.failures, 0);

        let alice = store.user_record("g1", "alice").expect("read").expect("row");
        assert_eq!(alice.xp, 5);
        assert_eq!(store.user_record("g1", "idler").expect("read"), None);
    }

    #[test]
    fn failing_guild_does_not_stop_the_sweep() {
        let store = XpStore::open_in_memory().expect("open store");
        let presence = FakePresence::default()
            .failing("g0")
            .with("g1", vec![voice("bob", "lounge", false)]);

        let report = XpAccrualEngine::default().sweep_voice(&store, &store, &presence);
        assert_eq!(report.guilds_scanned, 2);
        assert_eq!(report.failures, 1);
        assert_eq!(report.members_granted, 1);
        assert_eq!(
            store.user_record("g1", "bob").expect("read").expect("row").xp,
            5
        );
    }

    #[test]
    fn level_ups_are_collected() {
        let store = XpStore::open_in_memory().expect("open store");
        store.set_user_xp("g1", "carol", 98).expect("seed near level 1");
        store.set_level_role("g1", 1, "regular").expect("level role");
        let presence = FakePresence::default().with("g1", vec![voice("carol", "lounge", false)]);

        let report = XpAccrualEngine::default().sweep_voice(&store, &store, &presence);
        assert_eq!(report.level_ups.len(), 1);
        let level_up = &report.level_ups[0];
        assert_eq!(level_up.user_id, "carol");
        assert_eq!(level_up.new_level, 1);
        assert_eq!(level_up.role_ids, vec!["regular"]);
    }
}
