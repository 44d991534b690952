//! Logging setup for the evaporator service
//!
//! Formatted events go to stdout, a daily-rotated file and an in-process
//! broadcast channel that feeds the web log stream.

mod broadcast;
mod level;
mod state;
mod structured;

pub use broadcast::subscribe_log_lines;
pub use level::{parse_line_level, parse_log_level, set_web_log_level_str, should_emit_to_web};
pub use state::{get_web_log_level, set_web_log_level};
pub use structured::{LogContext, StructuredLogger, get_logger, get_logger_with_context};

use crate::config::LoggingConfig;
use crate::error::{EvaporatorError, Result};
use broadcast::LogLineSink;
use level::min_level;
use state::{INIT_ERROR, INIT_ONCE, LOG_GUARD};
use std::path::{Path, PathBuf};
use tracing::{Level, info};
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_appender::non_blocking;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::layer::Layered;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable that keeps logging on the console only
pub const DISABLE_FILE_LOG_ENV: &str = "EVAPORATOR_DISABLE_FILE_LOG";

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Initialize logging system based on configuration
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    INIT_ONCE.call_once(|| {
        if let Err(e) = install(config) {
            let _ = INIT_ERROR.set(e.to_string());
        }
    });

    if let Some(err) = INIT_ERROR.get() {
        return Err(EvaporatorError::config(err.clone()));
    }
    Ok(())
}

fn install(config: &LoggingConfig) -> Result<()> {
    let base_level = parse_log_level(&config.level)?;
    let level_or_base = |level: &Option<String>| {
        level
            .as_deref()
            .and_then(|s| parse_log_level(s).ok())
            .unwrap_or(base_level)
    };
    let console_level = level_or_base(&config.console_level);
    let file_level = level_or_base(&config.file_level);
    let web_level = level_or_base(&config.web_level);

    // Layer filters can only narrow what the env filter lets through
    let most_verbose = min_level(min_level(console_level, file_level), web_level);

    // Web stream captures everything; its runtime level applies at the SSE endpoint
    let mut layers: Vec<BoxedLayer> =
        vec![text_or_json(LogLineSink::shared(), config.json_format, Level::TRACE)];

    let console_only = should_use_console_only();
    if console_only || config.console_output {
        layers.push(text_or_json(std::io::stdout, config.json_format, console_level));
    }

    if !console_only {
        let (writer, guard) = non_blocking(file_appender(config)?);
        let _ = LOG_GUARD.set(guard);
        layers.push(text_or_json(writer, config.json_format, file_level));
    }

    tracing_subscriber::registry()
        .with(build_env_filter(most_verbose))
        .with(layers)
        .try_init()
        .map_err(|e| EvaporatorError::config(format!("Logging already initialized: {}", e)))?;

    set_web_log_level(web_level);

    if console_only {
        info!(
            "Logging initialized - console_level: {:?}, web_level: {:?}, console-only",
            console_level, web_level
        );
    } else {
        info!(
            "Logging initialized - console_level: {:?}, file_level: {:?}, web_level: {:?}, file: {}",
            console_level, file_level, web_level, config.file
        );
    }
    Ok(())
}

fn text_or_json<W>(writer: W, json: bool, level: Level) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = fmt::layer()
        .with_writer(writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false);
    let filter = LevelFilter::from_level(level);
    if json {
        base.json().with_filter(filter).boxed()
    } else {
        base.with_filter(filter).boxed()
    }
}

fn build_env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("evaporator={},tokio_modbus=warn", level).into())
}

fn should_use_console_only() -> bool {
    cfg!(test) || std::env::var_os(DISABLE_FILE_LOG_ENV).is_some()
}

/// Daily-rotated appender writing `<prefix>.<date>.<suffix>` next to the configured file
pub(crate) fn file_appender(config: &LoggingConfig) -> Result<RollingFileAppender> {
    let (directory, prefix, suffix) = rotation_pattern(Path::new(&config.file));
    rolling::Builder::new()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix(suffix)
        .max_log_files(config.backup_count.max(1) as usize)
        .build(directory)
        .map_err(|e| EvaporatorError::io(format!("Failed to create log file appender: {}", e)))
}

/// Directory, file prefix and extension of the rotated log files
///
/// `logs/rig.log` rotates as `logs/rig.<date>.log`. A path without an
/// extension is taken as the directory and files are named `evaporator.<date>.log`.
pub(crate) fn rotation_pattern(file: &Path) -> (PathBuf, String, String) {
    let Some(extension) = file.extension().and_then(|e| e.to_str()) else {
        return (file.to_path_buf(), "evaporator".to_string(), "log".to_string());
    };
    let directory = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("evaporator");
    (directory, prefix.to_string(), extension.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn init_test_logging() {
        INIT.call_once(|| {
            let config = LoggingConfig::default();
            init_logging(&config).ok();
        });
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("ERROR").unwrap(), Level::ERROR);
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_log_context() {
        let context = LogContext::new("power_supply")
            .with_port("/dev/ttyUSB0")
            .with_slave_id(1)
            .with_field("key", "value".to_string());

        assert_eq!(context.component, "power_supply");
        assert_eq!(context.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(context.slave_id, Some(1));
        assert_eq!(context.extra_fields.get("key"), Some(&"value".to_string()));
    }

    #[test]
    fn test_structured_logger() {
        init_test_logging();

        let logger = StructuredLogger::new(LogContext::new("test_component").with_slave_id(3));

        // These should not panic
        logger.info("Test info message");
        logger.debug("Test debug message");
        logger.warn("Test warning message");
        logger.error("Test error message");
    }

    #[test]
    fn test_get_logger() {
        let logger = get_logger("step_motor").for_port("COM2");
        assert_eq!(logger.context.component, "step_motor");
        assert_eq!(logger.context.port.as_deref(), Some("COM2"));
    }

    #[test]
    fn test_rotation_pattern() {
        let owned = |d: &str, p: &str, s: &str| (PathBuf::from(d), p.to_string(), s.to_string());
        assert_eq!(
            rotation_pattern(Path::new("/var/log/rig.txt")),
            owned("/var/log", "rig", "txt")
        );
        assert_eq!(
            rotation_pattern(Path::new("/var/log/evaporator")),
            owned("/var/log/evaporator", "evaporator", "log")
        );
        assert_eq!(
            rotation_pattern(Path::new("evaporator.log")),
            owned(".", "evaporator", "log")
        );
    }

    #[test]
    fn test_file_appender_follows_configured_name() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            file: dir.path().join("rig.log").to_string_lossy().into_owned(),
            ..LoggingConfig::default()
        };
        let mut appender = file_appender(&config).unwrap();
        appender.write_all(b"hello\n").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("rig.") && names[0].ends_with(".log"), "{names:?}");
    }
}
