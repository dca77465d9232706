//! ロギング初期化ユーティリティ
//!
//! `tracing` による構造化ロギングを標準出力と日次のJSONライン形式ファイルへ出力する。

use chrono::{Local, NaiveDate};
use std::{
    env,
    fs::{self, OpenOptions},
    io::{self, Error, ErrorKind},
    path::{Path, PathBuf},
    sync::OnceLock,
};
use tracing_appender::{non_blocking, non_blocking::WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// ログファイル名（JSON Lines）。日付は日ごとに付与される
pub const LOG_FILE_BASE: &str = "fleet-router.jsonl";

const LOG_SUBDIR: &str = "logs";
const DEFAULT_DATA_DIR: &str = ".fleet";
const DEFAULT_RETENTION_DAYS: u32 = 7;
const DATE_FORMAT: &str = "%Y-%m-%d";

const LOG_DIR_ENV: &str = "FLEET_LOG_DIR";
const LOG_LEVEL_ENV: &str = "FLEET_LOG_LEVEL";
const LOG_RETENTION_DAYS_ENV: &str = "FLEET_LOG_RETENTION_DAYS";
// 非推奨
const LEGACY_LOG_DIR_ENV: &str = "SWARM_LOG_DIR";
const LEGACY_LOG_LEVEL_ENV: &str = "SWARM_LOG_LEVEL";
const ALT_LEVEL_ENV: &str = "RUST_LOG";

static LOGGER_GUARD: OnceLock<Result<LoggerGuard, io::Error>> = OnceLock::new();

struct LoggerGuard {
    _file_guard: WorkerGuard,
}

/// ロギングを初期化する（プロセスにつき1回）。`debug` で既定レベルを下げる
pub fn init(debug: bool) -> io::Result<()> {
    match LOGGER_GUARD.get_or_init(|| configure_logger(debug)) {
        Ok(_) => Ok(()),
        Err(err) => Err(io::Error::new(err.kind(), err.to_string())),
    }
}

/// ログファイルの出力先ディレクトリ
pub fn log_dir() -> io::Result<PathBuf> {
    if let Ok(dir) = env::var(LOG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(dir) = env::var(LEGACY_LOG_DIR_ENV) {
        // まだロガーが無いので、警告は初期化後に出す
        return Ok(PathBuf::from(dir));
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map_err(|_| Error::new(ErrorKind::NotFound, "Failed to resolve home directory"))?;
    Ok(PathBuf::from(home).join(DEFAULT_DATA_DIR).join(LOG_SUBDIR))
}

/// 本日のログファイル
pub fn log_file_path() -> io::Result<PathBuf> {
    let today = Local::now().format(DATE_FORMAT);
    Ok(log_dir()?.join(format!("{}.{}", LOG_FILE_BASE, today)))
}

fn retention_days() -> u32 {
    env::var(LOG_RETENTION_DAYS_ENV)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(DEFAULT_RETENTION_DAYS)
}

/// フィルタの優先順位: `FLEET_LOG_LEVEL`、`SWARM_LOG_LEVEL`、`RUST_LOG`、
/// 最後にデバッグモードに応じた `debug` / `info`
fn build_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .or_else(|_| EnvFilter::try_from_env(LEGACY_LOG_LEVEL_ENV))
        .or_else(|_| EnvFilter::try_from_env(ALT_LEVEL_ENV))
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }))
}

/// `retention_days` より古い日次ファイルを削除し、削除件数を返す
fn cleanup_old_logs(log_dir: &Path, retention_days: u32) -> io::Result<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let cutoff = Local::now().date_naive() - chrono::Duration::days(i64::from(retention_days));
    let prefix = format!("{}.", LOG_FILE_BASE);
    let mut removed = 0;

    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();
        let Some(date) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(&prefix))
            .and_then(|date| NaiveDate::parse_from_str(date, DATE_FORMAT).ok())
        else {
            continue;
        };
        if date < cutoff && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

fn configure_logger(debug: bool) -> io::Result<LoggerGuard> {
    let log_directory = log_dir()?;
    fs::create_dir_all(&log_directory)?;
    let removed = cleanup_old_logs(&log_directory, retention_days())?;

    let log_path = log_file_path()?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let (file_writer, file_guard) = non_blocking(file);

    let file_layer = fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_current_span(false)
        .with_span_list(false)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    let stdout_layer = fmt::layer()
        .with_target(debug)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(build_filter(debug))
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(Error::other)?;

    if env::var(LOG_DIR_ENV).is_err() && env::var(LEGACY_LOG_DIR_ENV).is_ok() {
        tracing::warn!(
            "Environment variable '{}' is deprecated, use '{}' instead",
            LEGACY_LOG_DIR_ENV,
            LOG_DIR_ENV
        );
    }
    tracing::info!(
        category = "system",
        removed_logs = removed,
        "Logs initialized: {}",
        log_path.display()
    );

    Ok(LoggerGuard {
        _file_guard: file_guard,
    })
}
