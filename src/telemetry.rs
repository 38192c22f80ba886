use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Log variable read when `RUST_LOG` is unset.
pub const LOG_ENV: &str = "CVS_LOG";

/// Directives appended to every non-`RUST_LOG` filter; query and connection chatter
/// from these drowns out per-unit crawl logs.
const QUIET_DEPS: &str = "sqlx=warn,hyper=warn,hyper_util=warn,reqwest=warn";

/// Pick the filter string: `RUST_LOG` verbatim, else `CVS_LOG`, else `default_filter`.
/// The latter two get [`QUIET_DEPS`] appended.
pub fn resolve_filter(rust_log: Option<&str>, cvs_log: Option<&str>, default_filter: &str) -> String {
    let non_empty = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);
    if let Some(v) = non_empty(rust_log) {
        return v;
    }
    let base = non_empty(cvs_log).unwrap_or_else(|| default_filter.to_string());
    format!("{base},{QUIET_DEPS}")
}

/// Installs the global fmt subscriber for the `cvs` binary.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let cvs_log = std::env::var(LOG_ENV).ok();
    let directives = resolve_filter(rust_log.as_deref(), cvs_log.as_deref(), default_filter);
    let filter = EnvFilter::try_new(&directives)
        .map_err(|e| anyhow::anyhow!("invalid log filter {directives:?}: {e}"))?;

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_wins_untouched() {
        assert_eq!(resolve_filter(Some("trace"), Some("debug"), "info"), "trace");
    }

    #[test]
    fn cvs_log_then_default_with_quiet_deps() {
        let f = resolve_filter(None, Some("cvs_directory=debug"), "info");
        assert!(f.starts_with("cvs_directory=debug,"));
        assert!(f.contains("sqlx=warn"));

        let f = resolve_filter(Some("  "), None, "info");
        assert!(f.starts_with("info,"));
        assert!(EnvFilter::try_new(&f).is_ok());
    }
}
