//! Tracing subscriber setup from the `logging` config section.

use persona_voice_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Build the filter directives: base level followed by per-crate overrides.
fn directives(logging: &LoggingConfig, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        logging.level.as_deref().unwrap_or("info")
    };
    std::iter::once(level)
        .chain(logging.filters.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. `RUST_LOG` takes precedence when set.
pub fn init(logging: Option<&LoggingConfig>, verbose: bool) {
    let logging = logging.cloned().unwrap_or_default();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(&logging, verbose)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let json = logging.format == "json";
    let stdout = logging.output == "stdout";

    // A second init (e.g. in tests) is not an error worth reporting.
    let _ = match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).try_init(),
        (true, false) => builder.json().with_writer(std::io::stderr).try_init(),
        (false, true) => builder.with_writer(std::io::stdout).try_init(),
        (false, false) => builder.with_writer(std::io::stderr).try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives() {
        let logging = LoggingConfig {
            level: Some("warn".into()),
            filters: vec!["persona_voice_media=trace".into()],
            ..Default::default()
        };
        assert_eq!(directives(&logging, false), "warn,persona_voice_media=trace");
        assert_eq!(directives(&logging, true), "debug,persona_voice_media=trace");
        assert_eq!(directives(&LoggingConfig::default(), false), "info");
    }
}
