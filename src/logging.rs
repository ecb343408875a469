//! Process-wide tracing subscriber.

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Noisy dependencies capped at `warn` unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: &[&str] = &["object_store", "hyper", "hyper_util", "reqwest", "h2"];

/// Level filter for `config`: `RUST_LOG` when set, else debug or info.
pub fn filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if config.debug { "debug" } else { "info" };
        let directives = std::iter::once(level.to_string())
            .chain(QUIET_TARGETS.iter().map(|target| format!("{}=warn", target)))
            .collect::<Vec<_>>()
            .join(",");
        EnvFilter::new(directives)
    })
}

/// Install the global subscriber, writing to the log file if one is configured.
pub fn init(config: &LogConfig) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(filter(config));

    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing::subscriber::set_global_default(
                builder.with_ansi(false).with_writer(Mutex::new(file)).finish(),
            )
        }
        None => tracing::subscriber::set_global_default(builder.finish()),
    }
    .context("Failed to set tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_caps_dependencies() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let rendered = filter(&LogConfig {
            log_file: None,
            debug: true,
        })
        .to_string();
        assert!(rendered.contains("debug"));
        assert!(rendered.contains("object_store=warn"));
    }
}
