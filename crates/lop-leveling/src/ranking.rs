use crate::LevelingError;
use lop_core::{progress_from_total_xp, LevelProgress};
use lop_storage::XpStore;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE: u32 = 999;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub position: u64,
    pub user_id: String,
    pub xp: u64,
    pub level: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardPage {
    pub guild_id: String,
    pub page: u32,
    pub per_page: u32,
    pub total_users: u64,
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankCard {
    pub guild_id: String,
    pub user_id: String,
    /// `None` while the user has no xp row.
    pub rank: Option<u64>,
    pub total_users: u64,
    pub progress: LevelProgress,
}

/// Out-of-range page numbers are pulled into `[1, MAX_PAGE]`, never rejected.
pub fn clamp_page(requested: i64) -> u32 {
    requested.clamp(1, i64::from(MAX_PAGE)) as u32
}

pub fn rank_position(
    store: &XpStore,
    guild_id: &str,
    user_id: &str,
) -> Result<Option<u64>, LevelingError> {
    Ok(store.rank_position(guild_id, user_id)?)
}

pub fn leaderboard_page(
    store: &XpStore,
    guild_id: &str,
    page: i64,
    per_page: u32,
) -> Result<LeaderboardPage, LevelingError> {
    if !(1..=MAX_PAGE_SIZE).contains(&per_page) {
        return Err(LevelingError::Validation(format!(
            "per_page must be between 1 and {MAX_PAGE_SIZE}, got {per_page}"
        )));
    }

    let page = clamp_page(page);
    let offset = u64::from(page - 1) * u64::from(per_page);
    let entries = store
        .leaderboard_rows(guild_id, per_page, offset)?
        .into_iter()
        .enumerate()
        .map(|(index, record)| LeaderboardEntry {
            position: offset + index as u64 + 1,
            user_id: record.user_id,
            xp: record.xp,
            level: record.level,
        })
        .collect();

    Ok(LeaderboardPage {
        guild_id: guild_id.to_string(),
        page,
        per_page,
        total_users: store.user_count(guild_id)?,
        entries,
    })
}

/// Rank and level progress for one user. Reading a card never creates a row.
pub fn rank_card(store: &XpStore, guild_id: &str, user_id: &str) -> Result<RankCard, LevelingError> {
    let total_xp = store
        .user_record(guild_id, user_id)?
        .map(|record| record.xp)
        .unwrap_or(0);

    Ok(RankCard {
        guild_id: guild_id.to_string(),
        user_id: user_id.to_string(),
        rank: store.rank_position(guild_id, user_id)?,
        total_users: store.user_count(guild_id)?,
        progress: progress_from_total_xp(total_xp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: &str = "guild-1";

    fn seeded_store(rows: &[(&str, u64)]) -> XpStore {
        let store = XpStore::open_in_memory().expect("open in-memory store");
        for (user_id, xp) in rows {
            store.set_user_xp(GUILD, user_id, *xp).expect("seed xp");
        }
        store
    }

    #[test]
    fn page_numbers_are_clamped() {
        assert_eq!(clamp_page(-3), 1);
        assert_eq!(clamp_page(0), 1);
        assert_eq!(clamp_page(42), 42);
        assert_eq!(clamp_page(5_000), MAX_PAGE);
    }

    #[test]
    fn ties_break_by_ascending_user_id() {
        let store = seeded_store(&[("c", 50), ("a", 50), ("b", 90), ("d", 10)]);

        let page = leaderboard_page(&store, GUILD, 1, DEFAULT_PAGE_SIZE).expect("page");
        let order = page
            .entries
            .iter()
            .map(|entry| (entry.position, entry.user_id.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![(1, "b"), (2, "a"), (3, "c"), (4, "d")]);
        assert_eq!(page.total_users, 4);

        assert_eq!(rank_position(&store, GUILD, "c").expect("rank"), Some(3));
        assert_eq!(rank_position(&store, GUILD, "zz").expect("rank"), None);
    }

    #[test]
    fn pages_concatenate_to_full_order() {
        let rows = (0..23)
            .map(|index| (format!("user-{index:02}"), (index % 5) as u64 * 100))
            .collect::<Vec<_>>();
        let borrowed = rows
            .iter()
            .map(|(user, xp)| (user.as_str(), *xp))
            .collect::<Vec<_>>();
        let store = seeded_store(&borrowed);

        let mut seen = Vec::new();
        for page in 1..=4 {
            let chunk = leaderboard_page(&store, GUILD, page, 7).expect("page");
            seen.extend(chunk.entries);
        }

        assert_eq!(seen.len(), 23);
        for (index, entry) in seen.iter().enumerate() {
            assert_eq!(entry.position, index as u64 + 1);
        }
        for pair in seen.windows(2) {
            let (left, right) = (&pair[0], &pair[1]);
            assert!(
                left.xp > right.xp || (left.xp == right.xp && left.user_id < right.user_id),
                "{left:?} before {right:?}"
            );
        }
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let store = seeded_store(&[("a", 1)]);
        let page = leaderboard_page(&store, GUILD, 3, 10).expect("page");
        assert!(page.entries.is_empty());
        assert_eq!(page.page, 3);
    }

    #[test]
    fn per_page_outside_bounds_is_rejected() {
        let store = seeded_store(&[]);
        for per_page in [0, MAX_PAGE_SIZE + 1] {
            let err = leaderboard_page(&store, GUILD, 1, per_page).expect_err("bad page size");
            assert!(matches!(err, LevelingError::Validation(_)));
        }
    }

    #[test]
    fn rank_card_for_unknown_user_does_not_create_row() {
        let store = seeded_store(&[("a", 300)]);
        let card = rank_card(&store, GUILD, "ghost").expect("card");
        assert_eq!(card.rank, None);
        assert_eq!(card.progress.total_xp, 0);
        assert_eq!(card.progress.level, 0);
        assert_eq!(card.total_users, 1);
        assert_eq!(store.user_record(GUILD, "ghost").expect("read"), None);

        let known = rank_card(&store, GUILD, "a").expect("card");
        assert_eq!(known.rank, Some(1));
        assert_eq!(known.progress.total_xp, 300);
        assert_eq!(known.progress.level, 2);
    }
}
