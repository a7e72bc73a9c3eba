//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Filter directive for this crate: `--verbose` forces debug
pub fn directive(level: LogLevel, verbose: bool) -> String {
    let level = if verbose { LogLevel::Debug } else { level };
    format!("clickforge={}", level.as_str())
}

/// Install the global subscriber; `RUST_LOG` still takes precedence when set
pub fn init(level: LogLevel, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive(level, verbose)));

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive() {
        assert_eq!(directive(LogLevel::Info, false), "clickforge=info");
        assert_eq!(directive(LogLevel::Warn, true), "clickforge=debug");
        assert_eq!(directive(LogLevel::Trace, false), "clickforge=trace");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(LogLevel::Warn, false);
        init(LogLevel::Debug, true);
    }
}
