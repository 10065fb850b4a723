//! Logger initialisation
//!
//! `env_logger` behind the `log` facade. The filter comes from the config's
//! `[logging] level`; `RUST_LOG` wins when it is set.

use std::io::Write;

use env_logger::{Builder, Env};

use crate::config::LoggingConfig;

/// Build the logger for `config`. Timestamps are milliseconds so flip
/// timing problems show up in ordinary logs.
pub fn builder(config: &LoggingConfig) -> Builder {
    let mut builder = Builder::from_env(Env::default().default_filter_or(config.level.as_str()));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {:<5} {}: {}",
            buf.timestamp_millis(),
            record.level(),
            record.target(),
            record.args()
        )
    });
    builder
}

/// Install the global logger. A second call is a no-op.
pub fn init(config: &LoggingConfig) {
    if builder(config).try_init().is_err() {
        log::debug!("logger already initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        let config = LoggingConfig {
            level: "warn".to_string(),
        };
        init(&config);
        init(&config);
        log::warn!("still logging");
    }
}
