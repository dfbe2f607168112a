use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

/// Console filter for the CLI tier. A `RUST_LOG` value replaces the tier's
/// directives entirely.
fn console_filter(console_level: LevelFilter, rust_log: Option<&str>) -> anyhow::Result<EnvFilter> {
    let builder = EnvFilter::builder().with_default_directive(console_level.into());
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        return Ok(builder.parse_lossy(directives));
    }

    // HTTP client internals stay quiet on the console unless asked for.
    let client_level = console_level.min(LevelFilter::WARN);
    Ok(builder
        .parse_lossy("")
        .add_directive(format!("hyper={client_level}").parse()?)
        .add_directive(format!("reqwest={client_level}").parse()?))
}

/// Console output at `console_level` (or `RUST_LOG`), plus a debug-level log
/// file that captures everything regardless of the console tier.
pub fn init(console_level: LevelFilter, log_file: &Path) -> anyhow::Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let console_filter = console_filter(console_level, rust_log.as_deref())?;

    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .without_time()
        .with_target(false)
        .with_filter(console_filter);

    let file_layer = match OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(file) => Some(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_line_number(true)
                .with_filter(LevelFilter::DEBUG),
        ),
        Err(e) => {
            eprintln!("Warning: cannot open log file {}: {e}", log_file.display());
            None
        }
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_crates_capped_at_warn() {
        let filter = console_filter(LevelFilter::DEBUG, None).unwrap().to_string();
        assert!(filter.contains("reqwest=warn"), "{filter}");
        assert!(filter.contains("hyper=warn"), "{filter}");

        let quiet = console_filter(LevelFilter::ERROR, None).unwrap().to_string();
        assert!(quiet.contains("reqwest=error"), "{quiet}");
    }

    #[test]
    fn test_rust_log_is_not_overridden() {
        let filter = console_filter(LevelFilter::WARN, Some("reqwest=debug,info"))
            .unwrap()
            .to_string();
        assert!(filter.contains("reqwest=debug"), "{filter}");
        assert!(!filter.contains("reqwest=warn"), "{filter}");
        assert!(!filter.contains("hyper="), "{filter}");
    }

    #[test]
    fn test_blank_rust_log_keeps_cli_tier() {
        let filter = console_filter(LevelFilter::INFO, Some("  ")).unwrap().to_string();
        assert!(filter.contains("reqwest=warn"), "{filter}");
    }
}
