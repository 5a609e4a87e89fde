// Log setup for the library and the CLI
// Console output goes to stderr; stdout is reserved for command results

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use anyhow::{Result, Context};
use chrono::Utc;
use log::{debug, info, warn, LevelFilter};
use fern::Dispatch;

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "appauth_";
const BYTES_PER_MB: u64 = 1024 * 1024;

struct LogFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

pub struct Logger {
    log_dir: PathBuf,
    max_size_mb: u64,
}

impl Logger {
    /// Prepares the log directory and, with rotation on, prunes it.
    pub fn new(config: &LoggingConfig) -> Result<Self> {
        let log_dir = ensure_dir(Path::new(&config.log_dir))?;

        let logger = Logger {
            log_dir,
            max_size_mb: config.max_log_size_mb,
        };
        if config.file_rotation {
            logger.cleanup_old_logs()?;
        }

        Ok(logger)
    }

    pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
        let level = Self::parse_log_level(&config.level)?;

        let mut dispatch = Dispatch::new()
            .level(level)
            // Connection pool chatter drowns out the exchange itself
            .level_for("hyper_util", LevelFilter::Warn)
            .level_for("reqwest", LevelFilter::Warn)
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{} {:<5} {} - {}",
                    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                    record.level(),
                    record.target(),
                    message
                ))
            });

        if config.console {
            dispatch = dispatch.chain(std::io::stderr());
        }

        let file = match (&config.file_path, config.file_rotation) {
            (Some(path), _) => Some(PathBuf::from(path)),
            (None, true) => Some(Self::create_log_file_path(&config.log_dir)?),
            (None, false) => None,
        };
        if let Some(path) = &file {
            let output = fern::log_file(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            dispatch = dispatch.chain(output);
        }

        dispatch.apply().context("Failed to install logger")?;

        match file {
            Some(path) => info!("Logging at {} to {:?}", config.level, path),
            None => info!("Logging at {}", config.level),
        }
        Ok(())
    }

    /// Used when the configured logger cannot be installed. Honors `RUST_LOG`.
    pub fn init_fallback() {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .target(env_logger::Target::Stderr)
            .try_init();
    }

    fn parse_log_level(level: &str) -> Result<LevelFilter> {
        let filter = match level.to_ascii_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" | "warning" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            other => anyhow::bail!("Unknown log level '{}'", other),
        };
        Ok(filter)
    }

    fn create_log_file_path(log_dir: &str) -> Result<PathBuf> {
        let dir = ensure_dir(Path::new(log_dir))?;
        Ok(dir.join(format!("{}{}.log", LOG_FILE_PREFIX, Utc::now().format("%Y%m%d_%H%M%S"))))
    }

    /// Our log files in the directory, newest first.
    fn scan(&self) -> Result<Vec<LogFile>> {
        if !self.log_dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.log_dir)
            .with_context(|| format!("Failed to read log directory {:?}", self.log_dir))?
        {
            let path = entry?.path();
            if !is_log_file(&path) {
                continue;
            }
            let metadata = fs::metadata(&path)?;
            files.push(LogFile {
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                size: metadata.len(),
                path,
            });
        }

        files.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(files)
    }

    /// Keeps the newest files that fit within `max_log_size_mb` and deletes the rest.
    pub fn cleanup_old_logs(&self) -> Result<()> {
        debug!("Pruning log files in {:?}", self.log_dir);

        let budget = self.max_size_mb * BYTES_PER_MB;
        let mut kept: u64 = 0;

        for file in self.scan()? {
            if kept + file.size <= budget {
                kept += file.size;
                continue;
            }
            match fs::remove_file(&file.path) {
                Ok(()) => info!("Removed old log file {:?}", file.path),
                Err(e) => warn!("Could not remove old log file {:?}: {}", file.path, e),
            }
        }

        debug!("{:.2} MB of logs kept", kept as f64 / BYTES_PER_MB as f64);
        Ok(())
    }

    pub fn get_log_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.scan()?.into_iter().map(|file| file.path).collect())
    }
}

fn ensure_dir(dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create log directory {:?}", dir))?;
    Ok(dir.to_path_buf())
}

fn is_log_file(path: &Path) -> bool {
    let named_like_ours = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX) && name.ends_with(".log"));
    named_like_ours && path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn logging_config(log_dir: &Path, max_log_size_mb: u64, file_rotation: bool) -> LoggingConfig {
        LoggingConfig {
            level: "debug".to_string(),
            file_path: None,
            console: true,
            log_dir: log_dir.to_str().unwrap().to_string(),
            max_log_size_mb,
            file_rotation,
        }
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(Logger::parse_log_level("debug").unwrap(), LevelFilter::Debug);
        assert_eq!(Logger::parse_log_level("INFO").unwrap(), LevelFilter::Info);
        assert_eq!(Logger::parse_log_level("warning").unwrap(), LevelFilter::Warn);
        assert_eq!(Logger::parse_log_level("error").unwrap(), LevelFilter::Error);
        assert_eq!(Logger::parse_log_level("trace").unwrap(), LevelFilter::Trace);

        assert_eq!(Logger::parse_log_level("off").unwrap(), LevelFilter::Off);
        assert!(Logger::parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_log_file_creation() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("nested");

        let log_file = Logger::create_log_file_path(log_dir.to_str().unwrap()).unwrap();
        assert!(log_file.starts_with(&log_dir));
        assert!(log_dir.exists());
        assert_eq!(log_file.extension().unwrap(), "log");
        assert!(log_file.file_name().unwrap().to_str().unwrap().starts_with("appauth_"));
    }

    #[test]
    fn test_logger_creation() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("logs");

        let logger = Logger::new(&logging_config(&log_dir, 10, true)).unwrap();
        assert_eq!(logger.max_size_mb, 10);
        assert!(logger.log_dir.exists());
    }

    #[test]
    fn test_cleanup_keeps_newest_within_budget() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path();

        let chunk = vec![b'x'; 600 * 1024];
        let old = log_dir.join("appauth_20240101_000000.log");
        fs::write(&old, &chunk).unwrap();
        let an_hour_ago = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        fs::File::options().write(true).open(&old).unwrap().set_modified(an_hour_ago).unwrap();
        let new = log_dir.join("appauth_20240102_000000.log");
        fs::write(&new, &chunk).unwrap();
        let unrelated = log_dir.join("other.log");
        fs::write(&unrelated, &chunk).unwrap();

        // 1 MB budget only fits one 600 KB file
        let logger = Logger::new(&logging_config(log_dir, 1, true)).unwrap();

        assert!(new.exists());
        assert!(!old.exists());
        assert!(unrelated.exists());
        assert_eq!(logger.get_log_files().unwrap(), vec![new]);
    }
}
