//! Process-wide `tracing` subscriber. Query output owns stdout, so events are
//! written to stderr in either format.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

use crate::error::QueryError;

/// Environment variable holding `EnvFilter` directives.
pub const LOG_ENV: &str = "SYSQ_LOG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            other => Err(format!("未知的日志格式: {other}（可选 json / text）")),
        }
    }
}

/// Filter from `directives`, `info` when unset or blank.
#[allow(clippy::missing_errors_doc)]
pub fn log_filter(directives: Option<&str>) -> Result<EnvFilter, QueryError> {
    match directives.map(str::trim).filter(|d| !d.is_empty()) {
        None => Ok(EnvFilter::new("info")),
        Some(d) => EnvFilter::try_new(d).map_err(|e| QueryError::ConfigError {
            message: format!("{LOG_ENV} 无效（{d}）: {e}"),
        }),
    }
}

#[allow(clippy::missing_errors_doc)]
pub fn init_telemetry(format: LogFormat) -> Result<(), QueryError> {
    let directives = std::env::var(LOG_ENV).ok();
    let filter = log_filter(directives.as_deref())?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Json => builder
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_thread_ids(true)
            .try_init(),
        LogFormat::Text => builder.compact().without_time().try_init(),
    };
    installed.map_err(|e| QueryError::ConfigError {
        message: format!("初始化 telemetry 失败: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use super::{LogFormat, log_filter};

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn blank_directives_fall_back_to_info() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(log_filter(None)?.max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(log_filter(Some("  "))?.max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(
            log_filter(Some("common=debug"))?.max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
        Ok(())
    }
}
