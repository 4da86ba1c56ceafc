use lop_core::{ClaimAllState, GuildSettings};
use lop_leveling::{ClaimReport, GrantOutcome, ImportReport, LeaderboardPage, RankCard};

pub fn print_import(report: &ImportReport) {
    println!(
        "Imported {} rows ({} rejected, {} already claimed and left as is)",
        report.accepted, report.rejected, report.claimed_untouched
    );
}

pub fn print_claim(report: &ClaimReport) {
    println!("Members indexed: {}", report.members_indexed);
    println!("Matched:         {}", report.matched);
    println!("Skipped:         {}", report.skipped);
    println!("Already claimed: {}", report.already);
    println!("Claim-all state: {}", report.final_state);
}

pub fn print_rank(card: &RankCard) {
    println!("{}", rank_line(card));
    let progress = &card.progress;
    println!(
        "Level {} ({} xp total, {}/{} toward next)",
        progress.level,
        progress.total_xp,
        progress.xp_into_level,
        progress.xp_into_level + progress.xp_to_next
    );
}

fn rank_line(card: &RankCard) -> String {
    match card.rank {
        Some(rank) => format!("{} is #{rank} of {}", card.user_id, card.total_users),
        None => format!("{} is unranked", card.user_id),
    }
}

pub fn print_leaderboard(page: &LeaderboardPage) {
    println!(
        "Leaderboard page {} ({} per page, {} members)",
        page.page, page.per_page, page.total_users
    );
    if page.entries.is_empty() {
        println!("(empty)");
    }
    for entry in &page.entries {
        println!(
            "{:>5}. {:<24} level {:>3}  {} xp",
            entry.position, entry.user_id, entry.level, entry.xp
        );
    }
}

pub fn print_grant(user_id: &str, outcome: &GrantOutcome) {
    if outcome.leveled_up() {
        println!(
            "{user_id} now has {} xp, level {} -> {}",
            outcome.new_xp, outcome.old_level, outcome.new_level
        );
    } else {
        println!(
            "{user_id} now has {} xp at level {}",
            outcome.new_xp, outcome.new_level
        );
    }
}

pub fn print_settings(settings: &GuildSettings, state: ClaimAllState) {
    println!("guild:                     {}", settings.guild_id);
    println!(
        "message xp:                {}..={} every {}s",
        settings.message_xp_min, settings.message_xp_max, settings.message_cooldown_seconds
    );
    println!(
        "reaction xp:               {} every {}s",
        settings.reaction_xp, settings.reaction_cooldown_seconds
    );
    println!("voice xp per minute:       {}", settings.voice_xp_per_minute);
    println!(
        "level-up channel:          {}",
        settings.level_up_channel_id.as_deref().unwrap_or("(reply in place)")
    );
    println!("claim-all:                 {state}");
}

pub fn join_or_none<'a>(items: impl Iterator<Item = &'a String>) -> String {
    let joined = items.map(String::as_str).collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "(none)".to_string()
    } else {
        joined
    }
}
