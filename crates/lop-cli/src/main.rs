mod directory;
mod render;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use directory::FileDirectory;
use lop_core::{ChannelKind, SettingsPatch};
use lop_leveling::{
    add_user_xp, claim_all, import_snapshot, leaderboard_page, rank_card, recalculate_levels,
    set_user_xp, AccessPolicy, ClaimOptions, Operator, XpAccrualEngine, DEFAULT_PAGE_SIZE,
};
use lop_storage::XpStore;
use std::fs;
use std::path::PathBuf;

const DEFAULT_DB_PATH: &str = "lop.db";

#[derive(Parser)]
#[command(name = "lop")]
#[command(about = "XP leveling and legacy claim operator console", long_about = None)]
struct Cli {
    /// SQLite database; falls back to LOP_DB_PATH, then lop.db.
    #[arg(long, global = true, default_value = "")]
    db: String,
    /// User id recorded as the operator of administrative commands.
    #[arg(long, global = true, default_value = "console")]
    operator: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GuildArg {
    #[arg(long)]
    guild: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a legacy JSON snapshot of {username, xp, level?} rows
    Import {
        #[command(flatten)]
        guild: GuildArg,
        file: PathBuf,
    },
    /// Match snapshot usernames to members and hand over their legacy xp
    ClaimAll {
        #[command(flatten)]
        guild: GuildArg,
        /// JSON array of {id, handle, nickname?, display_name?, is_bot?}
        #[arg(long)]
        members: PathBuf,
        /// Run even when the guild is locked (operator acts as override identity)
        #[arg(long, default_value_t = false)]
        force: bool,
        /// With --force, leave the guild re-runnable afterwards
        #[arg(long, default_value_t = false)]
        leave_unlocked: bool,
    },
    /// Show a member's rank and level progress
    Rank {
        #[command(flatten)]
        guild: GuildArg,
        user: String,
    },
    /// Show one leaderboard page
    Leaderboard {
        #[command(flatten)]
        guild: GuildArg,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        per_page: u32,
    },
    /// Overwrite or add to a member's xp
    Xp {
        #[command(subcommand)]
        action: XpCommands,
    },
    /// Recompute every stored level from xp
    RecalcLevels {
        #[command(flatten)]
        guild: GuildArg,
    },
    /// Inspect or change per-guild xp tuning
    Settings {
        #[command(subcommand)]
        action: SettingsCommands,
    },
    /// Manage channels that earn no xp
    Ignore {
        #[command(subcommand)]
        action: IgnoreCommands,
    },
    /// Manage roles handed out at levels
    LevelRole {
        #[command(subcommand)]
        action: LevelRoleCommands,
    },
}

#[derive(Subcommand)]
enum XpCommands {
    Set {
        #[command(flatten)]
        guild: GuildArg,
        user: String,
        amount: u64,
    },
    Add {
        #[command(flatten)]
        guild: GuildArg,
        user: String,
        amount: u64,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    Show {
        #[command(flatten)]
        guild: GuildArg,
    },
    Set {
        #[command(flatten)]
        guild: GuildArg,
        #[arg(long)]
        message_xp_min: Option<u32>,
        #[arg(long)]
        message_xp_max: Option<u32>,
        #[arg(long)]
        message_cooldown_seconds: Option<u32>,
        #[arg(long)]
        reaction_xp: Option<u32>,
        #[arg(long)]
        reaction_cooldown_seconds: Option<u32>,
        #[arg(long)]
        voice_xp_per_minute: Option<u32>,
        #[arg(long, conflicts_with = "clear_level_up_channel")]
        level_up_channel: Option<String>,
        #[arg(long, default_value_t = false)]
        clear_level_up_channel: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Text,
    Voice,
}

impl From<KindArg> for ChannelKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Text => ChannelKind::Text,
            KindArg::Voice => ChannelKind::Voice,
        }
    }
}

#[derive(Subcommand)]
enum IgnoreCommands {
    Add {
        #[command(flatten)]
        guild: GuildArg,
        #[arg(long, value_enum)]
        kind: KindArg,
        channel: String,
    },
    Remove {
        #[command(flatten)]
        guild: GuildArg,
        #[arg(long, value_enum)]
        kind: KindArg,
        channel: String,
    },
    List {
        #[command(flatten)]
        guild: GuildArg,
    },
}

#[derive(Subcommand)]
enum LevelRoleCommands {
    Set {
        #[command(flatten)]
        guild: GuildArg,
        level: u32,
        role: String,
    },
    Remove {
        #[command(flatten)]
        guild: GuildArg,
        level: u32,
    },
    List {
        #[command(flatten)]
        guild: GuildArg,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let db_path = resolve_db_path(&cli.db);
    let store = XpStore::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let operator = Operator::admin(cli.operator.clone());
    let policy = AccessPolicy::default();

    match cli.command {
        Commands::Import { guild, file } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let report = import_snapshot(&store, &policy, &operator, &guild.guild, &raw)
                .context("Snapshot import failed")?;
            render::print_import(&report);
        }
        Commands::ClaimAll {
            guild,
            members,
            force,
            leave_unlocked,
        } => {
            if leave_unlocked && !force {
                bail!("--leave-unlocked only applies together with --force");
            }
            let directory = FileDirectory::load(&members)?;
            let policy = if force {
                AccessPolicy::new([operator.user_id.clone()])
            } else {
                policy
            };
            let report = claim_all(
                &store,
                &directory,
                &policy,
                &operator,
                &guild.guild,
                ClaimOptions { leave_unlocked },
                Utc::now(),
            )
            .context("claim-all failed")?;
            render::print_claim(&report);
        }
        Commands::Rank { guild, user } => {
            let card = rank_card(&store, &guild.guild, &user).context("Rank lookup failed")?;
            render::print_rank(&card);
        }
        Commands::Leaderboard {
            guild,
            page,
            per_page,
        } => {
            let page = leaderboard_page(&store, &guild.guild, page, per_page)
                .context("Leaderboard lookup failed")?;
            render::print_leaderboard(&page);
        }
        Commands::Xp { action } => {
            let (user, outcome) = match action {
                XpCommands::Set {
                    guild,
                    user,
                    amount,
                } => {
                    let outcome =
                        set_user_xp(&store, &policy, &operator, &guild.guild, &user, amount)
                            .context("xp set failed")?;
                    (user, outcome)
                }
                XpCommands::Add {
                    guild,
                    user,
                    amount,
                } => {
                    let engine = XpAccrualEngine::default();
                    let outcome = add_user_xp(
                        &engine,
                        &store,
                        &policy,
                        &operator,
                        &guild.guild,
                        &user,
                        amount,
                    )
                    .context("xp add failed")?;
                    (user, outcome)
                }
            };
            render::print_grant(&user, &outcome);
        }
        Commands::RecalcLevels { guild } => {
            let report = recalculate_levels(&store, &policy, &operator, &guild.guild)
                .context("Level recalculation failed")?;
            println!(
                "Recalculated {} rows with {}, {} changed",
                report.rows_scanned, report.curve_version, report.rows_updated
            );
        }
        Commands::Settings { action } => match action {
            SettingsCommands::Show { guild } => {
                let settings = store
                    .guild_settings(&guild.guild)
                    .context("Failed to read settings")?;
                let state = store
                    .claim_all_state(&guild.guild)
                    .context("Failed to read claim-all state")?;
                render::print_settings(&settings, state);
            }
            SettingsCommands::Set {
                guild,
                message_xp_min,
                message_xp_max,
                message_cooldown_seconds,
                reaction_xp,
                reaction_cooldown_seconds,
                voice_xp_per_minute,
                level_up_channel,
                clear_level_up_channel,
            } => {
                let patch = SettingsPatch {
                    message_xp_min,
                    message_xp_max,
                    message_cooldown_seconds,
                    reaction_xp,
                    reaction_cooldown_seconds,
                    voice_xp_per_minute,
                    level_up_channel_id: if clear_level_up_channel {
                        Some(None)
                    } else {
                        level_up_channel.map(Some)
                    },
                };
                if patch.is_empty() {
                    bail!("Nothing to change; pass at least one setting flag");
                }
                let settings = store
                    .update_guild_settings(&guild.guild, &patch)
                    .context("Failed to update settings")?;
                let state = store
                    .claim_all_state(&guild.guild)
                    .context("Failed to read claim-all state")?;
                render::print_settings(&settings, state);
            }
        },
        Commands::Ignore { action } => match action {
            IgnoreCommands::Add {
                guild,
                kind,
                channel,
            } => {
                let kind = ChannelKind::from(kind);
                let added = store
                    .ignore_channel(&guild.guild, &channel, kind)
                    .context("Failed to ignore channel")?;
                if added {
                    println!("{kind} channel {channel} now earns no xp");
                } else {
                    println!("{kind} channel {channel} was already ignored");
                }
            }
            IgnoreCommands::Remove {
                guild,
                kind,
                channel,
            } => {
                let kind = ChannelKind::from(kind);
                let removed = store
                    .unignore_channel(&guild.guild, &channel, kind)
                    .context("Failed to unignore channel")?;
                if removed {
                    println!("{kind} channel {channel} earns xp again");
                } else {
                    println!("{kind} channel {channel} was not ignored");
                }
            }
            IgnoreCommands::List { guild } => {
                for kind in [ChannelKind::Text, ChannelKind::Voice] {
                    let channels = store
                        .ignored_channels(&guild.guild, kind)
                        .context("Failed to list ignored channels")?;
                    println!("{kind}: {}", render::join_or_none(channels.iter()));
                }
            }
        },
        Commands::LevelRole { action } => match action {
            LevelRoleCommands::Set { guild, level, role } => {
                store
                    .set_level_role(&guild.guild, level, &role)
                    .context("Failed to set level role")?;
                println!("Level {level} now grants role {role}");
            }
            LevelRoleCommands::Remove { guild, level } => {
                let removed = store
                    .delete_level_role(&guild.guild, level)
                    .context("Failed to remove level role")?;
                if removed {
                    println!("Level {level} no longer grants a role");
                } else {
                    println!("No role configured for level {level}");
                }
            }
            LevelRoleCommands::List { guild } => {
                let roles = store
                    .level_roles(&guild.guild)
                    .context("Failed to list level roles")?;
                if roles.is_empty() {
                    println!("No level roles configured");
                }
                for role in roles {
                    println!("level {:>3}  {}", role.level, role.role_id);
                }
            }
        },
    }

    Ok(())
}

fn resolve_db_path(flag: &str) -> PathBuf {
    if !flag.trim().is_empty() {
        return PathBuf::from(flag.trim());
    }
    match std::env::var("LOP_DB_PATH") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value.trim()),
        _ => PathBuf::from(DEFAULT_DB_PATH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn explicit_db_flag_is_used() {
        assert_eq!(resolve_db_path(" data/xp.db "), PathBuf::from("data/xp.db"));
    }

    #[test]
    fn claim_all_flags_parse() {
        let cli = Cli::try_parse_from([
            "lop",
            "--db",
            "x.db",
            "claim-all",
            "--guild",
            "g",
            "--members",
            "members.json",
            "--force",
            "--leave-unlocked",
        ])
        .expect("parse claim-all");
        match cli.command {
            Commands::ClaimAll {
                guild,
                force,
                leave_unlocked,
                ..
            } => {
                assert_eq!(guild.guild, "g");
                assert!(force);
                assert!(leave_unlocked);
            }
            _ => panic!("expected claim-all"),
        }
    }

    #[test]
    fn level_up_channel_flags_conflict() {
        let parsed = Cli::try_parse_from([
            "lop",
            "settings",
            "set",
            "--guild",
            "g",
            "--level-up-channel",
            "levels",
            "--clear-level-up-channel",
        ]);
        assert!(parsed.is_err());
    }
}
