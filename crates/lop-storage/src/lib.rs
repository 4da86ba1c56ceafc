use lop_core::{
    level_from_xp, ChannelKind, ClaimAllState, CollaboratorError, CollaboratorFailureKind,
    GuildSettings, GuildSettingsProvider, LevelRole, SettingsError, SettingsPatch,
    SnapshotEntry, XpSource,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const XP_SCHEMA_VERSION: i64 = 2;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("{field} out of storable range: {value}")]
    OutOfRange { field: &'static str, value: u64 },
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("invalid settings: {0}")]
    InvalidSettings(#[from] SettingsError),
    #[error("{0} has no cooldown gate")]
    UngatedSource(XpSource),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserXpRecord {
    pub guild_id: String,
    pub user_id: String,
    pub xp: u64,
    pub level: u32,
    pub last_message_xp_at: i64,
    pub last_reaction_xp_at: i64,
}

impl UserXpRecord {
    /// Last grant timestamp for a cooldown-gated source.
    pub fn last_grant_at(&self, source: XpSource) -> Option<i64> {
        match source {
            XpSource::Message => Some(self.last_message_xp_at),
            XpSource::Reaction => Some(self.last_reaction_xp_at),
            XpSource::Voice | XpSource::Admin => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacySnapshotRow {
    pub guild_id: String,
    pub snapshot_username: String,
    pub snapshot_xp: u64,
    pub snapshot_level: u32,
    pub claimed_user_id: Option<String>,
    pub claimed_at: Option<i64>,
}

impl LegacySnapshotRow {
    pub fn is_claimed(&self) -> bool {
        self.claimed_user_id.is_some()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotWriteCounts {
    pub written: usize,
    pub claimed_untouched: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LevelRewriteCounts {
    pub rows_scanned: usize,
    pub rows_updated: usize,
}

pub struct XpStore {
    conn: Connection,
}

impl XpStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let mut current = self.schema_version()?;
        if current > XP_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: XP_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_xp_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
            current = 1;
        }

        if current < 2 {
            let sql = include_str!("../migrations/0002_claim_all_state.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 2", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table_name],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }

    // ---- user xp -------------------------------------------------------

    /// Creates the zeroed row if absent. Returns whether a row was inserted.
    pub fn ensure_user(&self, guild_id: &str, user_id: &str) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            INSERT INTO user_xp (guild_id, user_id, xp, level, last_message_xp_at, last_reaction_xp_at)
            VALUES (?1, ?2, 0, 0, 0, 0)
            ON CONFLICT (guild_id, user_id) DO NOTHING
            ",
            params![guild_id, user_id],
        )?;
        Ok(changes > 0)
    }

    pub fn user_record(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<Option<UserXpRecord>, StorageError> {
        let raw = self
            .conn
            .query_row(
                "
                SELECT guild_id, user_id, xp, level, last_message_xp_at, last_reaction_xp_at
                FROM user_xp
                WHERE guild_id = ?1 AND user_id = ?2
                ",
                params![guild_id, user_id],
                raw_user_row,
            )
            .optional()?;
        raw.map(user_record_from_raw).transpose()
    }

    /// Writes `new_xp` and its level only if the row still holds `expected_xp`.
    pub fn compare_and_set_xp(
        &self,
        guild_id: &str,
        user_id: &str,
        expected_xp: u64,
        new_xp: u64,
    ) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            UPDATE user_xp
            SET xp = ?3, level = ?4
            WHERE guild_id = ?1 AND user_id = ?2 AND xp = ?5
            ",
            params![
                guild_id,
                user_id,
                xp_to_sql(new_xp)?,
                level_from_xp(new_xp),
                xp_to_sql(expected_xp)?,
            ],
        )?;
        Ok(changes > 0)
    }

    /// Cooldown-gated grant: xp, level and the source's last-grant timestamp
    /// move together, and only if neither xp nor the timestamp changed since
    /// they were read.
    pub fn compare_and_grant(
        &self,
        guild_id: &str,
        user_id: &str,
        source: XpSource,
        expected: &UserXpRecord,
        new_xp: u64,
        now_ms: i64,
    ) -> Result<bool, StorageError> {
        let column = cooldown_column(source)?;
        let expected_last = expected
            .last_grant_at(source)
            .ok_or(StorageError::UngatedSource(source))?;
        let sql = format!(
            "
            UPDATE user_xp
            SET xp = ?3, level = ?4, {column} = ?5
            WHERE guild_id = ?1 AND user_id = ?2 AND xp = ?6 AND {column} = ?7
            "
        );
        let changes = self.conn.execute(
            &sql,
            params![
                guild_id,
                user_id,
                xp_to_sql(new_xp)?,
                level_from_xp(new_xp),
                now_ms,
                xp_to_sql(expected.xp)?,
                expected_last,
            ],
        )?;
        Ok(changes > 0)
    }

    /// Overwrites the total; the stored level is always recomputed from it.
    pub fn set_user_xp(
        &self,
        guild_id: &str,
        user_id: &str,
        xp: u64,
    ) -> Result<UserXpRecord, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        overwrite_user_xp(&tx, guild_id, user_id, xp)?;
        tx.commit()?;
        self.user_record(guild_id, user_id)?
            .ok_or_else(|| StorageError::Corrupt(format!("user row vanished: {guild_id}/{user_id}")))
    }

    pub fn user_count(&self, guild_id: &str) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM user_xp WHERE guild_id = ?1",
            [guild_id],
            |row| row.get(0),
        )?;
        u64::try_from(count).map_err(|_| StorageError::Corrupt(format!("negative count {count}")))
    }

    /// 1-based position in the `xp DESC, user_id ASC` order, `None` if the user has no row.
    pub fn rank_position(&self, guild_id: &str, user_id: &str) -> Result<Option<u64>, StorageError> {
        let position: Option<i64> = self
            .conn
            .query_row(
                "
                SELECT 1 + (
                    SELECT COUNT(*)
                    FROM user_xp AS other
                    WHERE other.guild_id = target.guild_id
                      AND (other.xp > target.xp
                           OR (other.xp = target.xp AND other.user_id < target.user_id))
                )
                FROM user_xp AS target
                WHERE target.guild_id = ?1 AND target.user_id = ?2
                ",
                params![guild_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        position
            .map(|value| {
                u64::try_from(value)
                    .map_err(|_| StorageError::Corrupt(format!("negative rank {value}")))
            })
            .transpose()
    }

    pub fn leaderboard_rows(
        &self,
        guild_id: &str,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<UserXpRecord>, StorageError> {
        let offset = i64::try_from(offset).map_err(|_| StorageError::OutOfRange {
            field: "offset",
            value: offset,
        })?;
        let mut stmt = self.conn.prepare(
            "
            SELECT guild_id, user_id, xp, level, last_message_xp_at, last_reaction_xp_at
            FROM user_xp
            WHERE guild_id = ?1
            ORDER BY xp DESC, user_id ASC
            LIMIT ?2 OFFSET ?3
            ",
        )?;
        let rows = stmt.query_map(params![guild_id, limit, offset], raw_user_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(user_record_from_raw(row?)?);
        }
        Ok(out)
    }

    /// Recomputes every stored level in the guild from its xp, in one transaction.
    pub fn rewrite_levels(&self, guild_id: &str) -> Result<LevelRewriteCounts, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut counts = LevelRewriteCounts::default();
        let mut stale = Vec::new();
        {
            let mut stmt =
                tx.prepare("SELECT user_id, xp, level FROM user_xp WHERE guild_id = ?1")?;
            let rows = stmt.query_map([guild_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            for row in rows {
                let (user_id, xp, level) = row?;
                counts.rows_scanned += 1;
                let expected = level_from_xp(xp_from_sql(xp)?);
                if i64::from(expected) != level {
                    stale.push((user_id, expected));
                }
            }
        }
        for (user_id, level) in &stale {
            tx.execute(
                "UPDATE user_xp SET level = ?3 WHERE guild_id = ?1 AND user_id = ?2",
                params![guild_id, user_id, level],
            )?;
        }
        tx.commit()?;
        counts.rows_updated = stale.len();
        Ok(counts)
    }

    // ---- legacy snapshot -------------------------------------------------

    /// Upserts snapshot rows keyed on the username as given. Rows that are
    /// already claimed are left exactly as they are.
    pub fn write_snapshot_entries(
        &self,
        guild_id: &str,
        entries: &[SnapshotEntry],
    ) -> Result<SnapshotWriteCounts, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut counts = SnapshotWriteCounts::default();
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO legacy_snapshot (guild_id, snapshot_username, snapshot_xp, snapshot_level)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (guild_id, snapshot_username) DO UPDATE SET
                    snapshot_xp = excluded.snapshot_xp,
                    snapshot_level = excluded.snapshot_level
                WHERE legacy_snapshot.claimed_user_id IS NULL
                ",
            )?;
            for entry in entries {
                let changes = stmt.execute(params![
                    guild_id,
                    entry.username,
                    xp_to_sql(entry.xp)?,
                    entry.level,
                ])?;
                if changes > 0 {
                    counts.written += 1;
                } else {
                    counts.claimed_untouched += 1;
                }
            }
        }
        tx.commit()?;
        Ok(counts)
    }

    pub fn snapshot_rows(&self, guild_id: &str) -> Result<Vec<LegacySnapshotRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT guild_id, snapshot_username, snapshot_xp, snapshot_level, claimed_user_id, claimed_at
            FROM legacy_snapshot
            WHERE guild_id = ?1
            ORDER BY snapshot_username ASC
            ",
        )?;
        let rows = stmt.query_map([guild_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<i64>>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (guild_id, snapshot_username, xp, level, claimed_user_id, claimed_at) = row?;
            out.push(LegacySnapshotRow {
                guild_id,
                snapshot_username,
                snapshot_xp: xp_from_sql(xp)?,
                snapshot_level: level_from_sql(level)?,
                claimed_user_id,
                claimed_at,
            });
        }
        Ok(out)
    }

    /// Marks an unclaimed snapshot row as claimed by `user_id` and overwrites
    /// that user's xp with the snapshot xp, atomically. Returns `false`
    /// without side effects when the row is missing or already claimed.
    pub fn claim_snapshot_row(
        &self,
        guild_id: &str,
        snapshot_username: &str,
        user_id: &str,
        now_ms: i64,
    ) -> Result<bool, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let changes = tx.execute(
            "
            UPDATE legacy_snapshot
            SET claimed_user_id = ?3, claimed_at = ?4
            WHERE guild_id = ?1 AND snapshot_username = ?2 AND claimed_user_id IS NULL
            ",
            params![guild_id, snapshot_username, user_id, now_ms],
        )?;
        if changes == 0 {
            tx.rollback()?;
            return Ok(false);
        }

        let snapshot_xp: i64 = tx.query_row(
            "SELECT snapshot_xp FROM legacy_snapshot WHERE guild_id = ?1 AND snapshot_username = ?2",
            params![guild_id, snapshot_username],
            |row| row.get(0),
        )?;
        overwrite_user_xp(&tx, guild_id, user_id, xp_from_sql(snapshot_xp)?)?;
        tx.commit()?;
        Ok(true)
    }

    // ---- guild settings ------------------------------------------------

    fn ensure_guild_settings(&self, guild_id: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO guild_settings (guild_id) VALUES (?1)",
            [guild_id],
        )?;
        Ok(())
    }

    pub fn guild_settings(&self, guild_id: &str) -> Result<GuildSettings, StorageError> {
        self.ensure_guild_settings(guild_id)?;
        let raw = self.conn.query_row(
            "
            SELECT message_xp_min, message_xp_max, message_cooldown_seconds, reaction_xp,
                   reaction_cooldown_seconds, voice_xp_per_minute, level_up_channel_id
            FROM guild_settings
            WHERE guild_id = ?1
            ",
            [guild_id],
            |row| {
                Ok((
                    [
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ],
                    row.get::<_, Option<String>>(6)?,
                ))
            },
        )?;

        let ([min, max, message_cooldown, reaction_xp, reaction_cooldown, voice], channel) = raw;
        Ok(GuildSettings {
            guild_id: guild_id.to_string(),
            message_xp_min: setting_from_sql("message_xp_min", min)?,
            message_xp_max: setting_from_sql("message_xp_max", max)?,
            message_cooldown_seconds: setting_from_sql("message_cooldown_seconds", message_cooldown)?,
            reaction_xp: setting_from_sql("reaction_xp", reaction_xp)?,
            reaction_cooldown_seconds: setting_from_sql(
                "reaction_cooldown_seconds",
                reaction_cooldown,
            )?,
            voice_xp_per_minute: setting_from_sql("voice_xp_per_minute", voice)?,
            level_up_channel_id: channel,
        })
    }

    pub fn update_guild_settings(
        &self,
        guild_id: &str,
        patch: &SettingsPatch,
    ) -> Result<GuildSettings, StorageError> {
        let next = self.guild_settings(guild_id)?.patched(patch)?;
        self.conn.execute(
            "
            UPDATE guild_settings
            SET message_xp_min = ?2,
                message_xp_max = ?3,
                message_cooldown_seconds = ?4,
                reaction_xp = ?5,
                reaction_cooldown_seconds = ?6,
                voice_xp_per_minute = ?7,
                level_up_channel_id = ?8
            WHERE guild_id = ?1
            ",
            params![
                guild_id,
                next.message_xp_min,
                next.message_xp_max,
                next.message_cooldown_seconds,
                next.reaction_xp,
                next.reaction_cooldown_seconds,
                next.voice_xp_per_minute,
                next.level_up_channel_id,
            ],
        )?;
        Ok(next)
    }

    pub fn claim_all_state(&self, guild_id: &str) -> Result<ClaimAllState, StorageError> {
        self.ensure_guild_settings(guild_id)?;
        let raw: String = self.conn.query_row(
            "SELECT claim_all_state FROM guild_settings WHERE guild_id = ?1",
            [guild_id],
            |row| row.get(0),
        )?;
        raw.parse().map_err(StorageError::Corrupt)
    }

    /// Moves the claim state from `from` to `to`; `false` if another writer moved it first.
    pub fn transition_claim_all_state(
        &self,
        guild_id: &str,
        from: ClaimAllState,
        to: ClaimAllState,
    ) -> Result<bool, StorageError> {
        self.ensure_guild_settings(guild_id)?;
        let changes = self.conn.execute(
            "
            UPDATE guild_settings
            SET claim_all_state = ?3
            WHERE guild_id = ?1 AND claim_all_state = ?2
            ",
            params![guild_id, from.as_str(), to.as_str()],
        )?;
        Ok(changes > 0)
    }

    // ---- ignored channels and level roles --------------------------------

    pub fn ignore_channel(
        &self,
        guild_id: &str,
        channel_id: &str,
        kind: ChannelKind,
    ) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            INSERT OR IGNORE INTO ignored_channels (guild_id, channel_id, channel_type)
            VALUES (?1, ?2, ?3)
            ",
            params![guild_id, channel_id, kind.as_str()],
        )?;
        Ok(changes > 0)
    }

    pub fn unignore_channel(
        &self,
        guild_id: &str,
        channel_id: &str,
        kind: ChannelKind,
    ) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            DELETE FROM ignored_channels
            WHERE guild_id = ?1 AND channel_id = ?2 AND channel_type = ?3
            ",
            params![guild_id, channel_id, kind.as_str()],
        )?;
        Ok(changes > 0)
    }

    pub fn ignored_channels(
        &self,
        guild_id: &str,
        kind: ChannelKind,
    ) -> Result<BTreeSet<String>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT channel_id FROM ignored_channels WHERE guild_id = ?1 AND channel_type = ?2",
        )?;
        let rows = stmt.query_map(params![guild_id, kind.as_str()], |row| {
            row.get::<_, String>(0)
        })?;
        let mut out = BTreeSet::new();
        for row in rows {
            out.insert(row?);
        }
        Ok(out)
    }

    pub fn is_channel_ignored(
        &self,
        guild_id: &str,
        channel_id: &str,
        kind: ChannelKind,
    ) -> Result<bool, StorageError> {
        let found = self
            .conn
            .query_row(
                "
                SELECT 1 FROM ignored_channels
                WHERE guild_id = ?1 AND channel_id = ?2 AND channel_type = ?3
                ",
                params![guild_id, channel_id, kind.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn set_level_role(&self, guild_id: &str, level: u32, role_id: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO level_roles (guild_id, level, role_id)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (guild_id, level) DO UPDATE SET role_id = excluded.role_id
            ",
            params![guild_id, level, role_id],
        )?;
        Ok(())
    }

    pub fn delete_level_role(&self, guild_id: &str, level: u32) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "DELETE FROM level_roles WHERE guild_id = ?1 AND level = ?2",
            params![guild_id, level],
        )?;
        Ok(changes > 0)
    }

    pub fn level_roles(&self, guild_id: &str) -> Result<Vec<LevelRole>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT level, role_id FROM level_roles WHERE guild_id = ?1 ORDER BY level ASC",
        )?;
        let rows = stmt.query_map([guild_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (level, role_id) = row?;
            out.push(LevelRole {
                level: level_from_sql(level)?,
                role_id,
            });
        }
        Ok(out)
    }
}

impl GuildSettingsProvider for XpStore {
    fn guild_settings(&self, guild_id: &str) -> Result<GuildSettings, CollaboratorError> {
        XpStore::guild_settings(self, guild_id)
            .map_err(|err| CollaboratorError::new(CollaboratorFailureKind::Unavailable, err.to_string()))
    }
}

type RawUserRow = (String, String, i64, i64, i64, i64);

fn raw_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawUserRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn user_record_from_raw(raw: RawUserRow) -> Result<UserXpRecord, StorageError> {
    let (guild_id, user_id, xp, level, last_message_xp_at, last_reaction_xp_at) = raw;
    Ok(UserXpRecord {
        guild_id,
        user_id,
        xp: xp_from_sql(xp)?,
        level: level_from_sql(level)?,
        last_message_xp_at,
        last_reaction_xp_at,
    })
}

fn overwrite_user_xp(
    conn: &Connection,
    guild_id: &str,
    user_id: &str,
    xp: u64,
) -> Result<(), StorageError> {
    conn.execute(
        "
        INSERT INTO user_xp (guild_id, user_id, xp, level, last_message_xp_at, last_reaction_xp_at)
        VALUES (?1, ?2, ?3, ?4, 0, 0)
        ON CONFLICT (guild_id, user_id) DO UPDATE SET
            xp = excluded.xp,
            level = excluded.level
        ",
        params![guild_id, user_id, xp_to_sql(xp)?, level_from_xp(xp)],
    )?;
    Ok(())
}

fn cooldown_column(source: XpSource) -> Result<&'static str, StorageError> {
    match source {
        XpSource::Message => Ok("last_message_xp_at"),
        XpSource::Reaction => Ok("last_reaction_xp_at"),
        XpSource::Voice | XpSource::Admin => Err(StorageError::UngatedSource(source)),
    }
}

fn xp_to_sql(xp: u64) -> Result<i64, StorageError> {
    i64::try_from(xp).map_err(|_| StorageError::OutOfRange {
        field: "xp",
        value: xp,
    })
}

fn xp_from_sql(xp: i64) -> Result<u64, StorageError> {
    u64::try_from(xp).map_err(|_| StorageError::Corrupt(format!("negative xp {xp}")))
}

fn level_from_sql(level: i64) -> Result<u32, StorageError> {
    u32::try_from(level).map_err(|_| StorageError::Corrupt(format!("level out of range {level}")))
}

fn setting_from_sql(field: &str, value: i64) -> Result<u32, StorageError> {
    u32::try_from(value).map_err(|_| StorageError::Corrupt(format!("{field} out of range {value}")))
}
