use grafana_mcp_core::error::{Error, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// `RUST_LOG` wins; otherwise the level, with the HTTP stack held at `warn`
/// unless debugging.
pub fn filter_directives(level: &str, rust_log: Option<&str>) -> Result<String> {
    if let Some(directives) = rust_log.map(str::trim).filter(|raw| !raw.is_empty()) {
        return Ok(directives.to_string());
    }
    let level = level.trim().to_ascii_lowercase();
    if !LEVELS.contains(&level.as_str()) {
        return Err(Error::config(format!(
            "unknown log level '{level}'; expected one of {}",
            LEVELS.join(", ")
        )));
    }
    Ok(match level.as_str() {
        "debug" | "trace" => level,
        _ => format!("{level},hyper=warn,reqwest=warn,h2=warn"),
    })
}

/// JSON logs on stderr; stdout belongs to the stdio transport.
pub fn init(level: &str) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let directives = filter_directives(level, rust_log.as_deref())?;
    let filter = EnvFilter::try_new(&directives)
        .map_err(|err| Error::config(format!("invalid log filter '{directives}': {err}")))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|err| Error::Internal(format!("logging already initialized: {err}")))
}
