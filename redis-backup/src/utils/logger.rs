//! Logging configuration using tracing.
//!
//! Logs go to stderr so that `list` and `verify` output on stdout stays
//! parseable.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Dependencies that log per request at debug level.
const QUIET_TARGETS: &[&str] = &["redis", "object_store", "hyper", "reqwest", "h2", "rustls"];

/// Filter directives for `level`: full verbosity for this crate, warnings
/// only for the client libraries underneath it.
fn directives(level: &str) -> String {
    let mut parts = vec![level.to_string()];
    parts.extend(QUIET_TARGETS.iter().map(|target| format!("{}=warn", target)));
    parts.join(",")
}

/// Initialize logging with the specified level.
///
/// `RUST_LOG` takes precedence over `level` when it is set.
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives(level)))
        .unwrap_or_else(|_| EnvFilter::new(directives("info")));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_quiet_clients() {
        let d = directives("debug");
        assert!(d.starts_with("debug,"));
        assert!(d.contains("redis=warn"));
        assert!(d.contains("object_store=warn"));
        assert!(EnvFilter::try_new(&d).is_ok());
    }
}
