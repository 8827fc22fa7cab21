//! Logger setup for hosts that do not install their own.

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors (default).
    #[default]
    Warn,
    /// Show info, warnings and errors.
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including per-frame trace.
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text with second timestamps.
    #[default]
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

/// Installs an `env_logger` logger. `RUST_LOG` directives are read first,
/// then `config.level` sets the base filter.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(config.level.to_level_filter());

    match config.format {
        LogFormat::Plain => {
            builder.format_timestamp_secs();
        }
        LogFormat::Json => {
            builder.format(|buf, record| {
                use std::io::Write;
                let ts = buf.timestamp().to_string();
                writeln!(buf, "{}", json_record(&ts, record))
            });
        }
    }

    builder.try_init()?;
    Ok(())
}

/// One log record as a JSON object.
fn json_record(ts: &str, record: &log::Record) -> serde_json::Value {
    serde_json::json!({
        "ts": ts,
        "lvl": record.level().as_str(),
        "target": record.target(),
        "msg": record.args().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_map_to_filters() {
        assert_eq!(LogLevel::default().to_level_filter(), log::LevelFilter::Warn);
        assert_eq!(LogLevel::Off.to_level_filter(), log::LevelFilter::Off);
        assert_eq!(LogLevel::Trace.to_level_filter(), log::LevelFilter::Trace);
    }

    #[test]
    fn parses_lowercase_names() -> Result<()> {
        let config: LoggingConfig = serde_yaml_ng::from_str("level: debug\nformat: json\n")?;
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Json);
        assert!(serde_yaml_ng::from_str::<LoggingConfig>("level: loud").is_err());
        Ok(())
    }

    #[test]
    fn json_record_escapes_message() -> Result<()> {
        let msg = "\u{1b}[1mframe \"7\"\n\tskipped";
        let line = json_record(
            "2026-10-19T00:00:00Z",
            &log::Record::builder()
                .args(format_args!("{msg}"))
                .level(log::Level::Warn)
                .target("dtsdownmix::element")
                .build(),
        )
        .to_string();

        assert!(line.contains("\\u001b"), "{line}");
        assert!(!line.contains('\n'));
        let parsed: serde_json::Value = serde_json::from_str(&line)?;
        assert_eq!(parsed["msg"], msg);
        assert_eq!(parsed["lvl"], "WARN");
        assert_eq!(parsed["target"], "dtsdownmix::element");
        Ok(())
    }
}
