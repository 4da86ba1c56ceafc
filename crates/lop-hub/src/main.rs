mod api;
mod error;
mod registry;

use clap::Parser;
use lop_core::mod_actions::InMemoryModActionStore;
use lop_leveling::{AccessPolicy, XpAccrualEngine};
use lop_storage::XpStore;
use std::{
    fs::OpenOptions,
    io::{self, Write},
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{error, info};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const DEFAULT_ADDR: &str = "127.0.0.1:7433";
const DEFAULT_DB_PATH: &str = "lop.db";
const LOG_FILE_NAME: &str = "lop-hub.log";

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    db_path: PathBuf,
    debug: bool,
    voice_tick: Duration,
    override_user_ids: Vec<String>,
    log_dir: String,
}

#[derive(Parser, Debug)]
#[command(name = "lop-hub")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value = "")]
    db: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    /// Seconds between voice presence sweeps; 0 turns the sweep off.
    #[arg(long, default_value_t = 60)]
    voice_tick_seconds: u64,
    /// User id allowed to bypass the claim-all lock. Repeatable.
    #[arg(long = "override-user")]
    override_users: Vec<String>,
    #[arg(long, default_value = "")]
    log_dir: String,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    let _log_guard = init_logging(&config);
    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };
    if !addr.ip().is_loopback() {
        error!(event = "invalid_addr", addr = %config.addr, reason = "not loopback");
        return;
    }

    let store = match XpStore::open(&config.db_path) {
        Ok(store) => store,
        Err(err) => {
            error!(event = "store_open_failed", path = %config.db_path.display(), error = %err);
            return;
        }
    };

    let state = Arc::new(api::AppState::new(
        store,
        XpAccrualEngine::default(),
        AccessPolicy::new(config.override_user_ids.clone()),
        Arc::new(InMemoryModActionStore::default()),
    ));
    state.clone().start_voice_sweep(config.voice_tick);

    let app = api::router(state);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            return;
        }
    };

    info!(
        event = "hub_start",
        addr = %config.addr,
        db = %config.db_path.display(),
        voice_tick_seconds = config.voice_tick.as_secs(),
        overrides = config.override_user_ids.len()
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(event = "hub_error", error = %err);
    }
    info!(event = "hub_stop");
}

fn load_config() -> Config {
    let args = Args::parse();
    let debug = args.debug || env_true("LOP_HUB_DEBUG");
    Config {
        addr: resolve_flag(&args.addr, "LOP_HUB_ADDR", DEFAULT_ADDR),
        db_path: PathBuf::from(resolve_flag(&args.db, "LOP_DB_PATH", DEFAULT_DB_PATH)),
        debug,
        voice_tick: Duration::from_secs(args.voice_tick_seconds),
        override_user_ids: resolve_override_users(&args.override_users),
        log_dir: resolve_flag(&args.log_dir, "LOP_LOG_DIR", ""),
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("LOP_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

/// Tees log lines to stdout and, when configured, the log file.
struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

/// Flag first, then the environment, then the built-in default.
fn resolve_flag(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.trim().to_string();
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return value.trim().to_string();
        }
    }
    default.to_string()
}

fn resolve_override_users(flags: &[String]) -> Vec<String> {
    if !flags.is_empty() {
        return split_ids(flags.iter().map(String::as_str));
    }
    match std::env::var("LOP_OVERRIDE_USER_IDS") {
        Ok(value) => split_ids(value.split(',')),
        Err(_) => Vec::new(),
    }
}

fn split_ids<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    raw.map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins_over_default() {
        assert_eq!(
            resolve_flag(" 127.0.0.1:9000 ", "LOP_HUB_TEST_UNSET_ADDR", DEFAULT_ADDR),
            "127.0.0.1:9000"
        );
        assert_eq!(
            resolve_flag("", "LOP_HUB_TEST_UNSET_ADDR", DEFAULT_ADDR),
            DEFAULT_ADDR
        );
    }

    #[test]
    fn override_flags_are_trimmed_and_blank_dropped() {
        let flags = vec![" 111 ".to_string(), "".to_string(), "222".to_string()];
        assert_eq!(resolve_override_users(&flags), vec!["111", "222"]);
    }

    #[test]
    fn comma_lists_split_cleanly() {
        assert_eq!(split_ids("1, 2,,3 ".split(',')), vec!["1", "2", "3"]);
    }

    #[test]
    fn empty_log_dir_disables_file_output() {
        let guard = open_log_file("  ").expect("no-op log guard");
        assert!(guard.file.is_none());
    }

    #[test]
    fn log_file_is_created_in_log_dir() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested");
        let guard = open_log_file(path.to_str().expect("utf8 path")).expect("log guard");
        assert!(guard.file.is_some());
        assert!(path.join(LOG_FILE_NAME).exists());
    }
}
