use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `LOG_LEVEL`; when neither is set the
/// filter is `default_level` with sqlx statement logging quieted to `warn`.
/// Calling this more than once is harmless: later calls are ignored.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new(default_filter(default_level)));

    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}

fn default_filter(level: &str) -> String {
    format!("{level},sqlx=warn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_quiets_sqlx() {
        assert_eq!(default_filter("debug"), "debug,sqlx=warn");
    }

    #[test]
    fn init_twice_does_not_panic() {
        init_tracing("info");
        init_tracing("debug");
    }
}
