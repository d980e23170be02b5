//! # Telemetry
//!
//! Purpose: Give every public operation a span with consistent naming and
//! consistent structured field names, and offer an explicit subscriber
//! bootstrap for applications that do not install their own.
//!
//! Spans are named `ukv` with `otel.name = "ukv.<component>/<operation>"` so
//! OpenTelemetry bridges export the descriptive name.

use std::future::Future;

use serde::Deserialize;
use tracing::{field, Instrument, Span};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ukv_common::{CacheError, CacheResult};

/// Structured log field names shared by every component.
pub mod fields {
    pub const KEY: &str = "key";
    pub const FIELD: &str = "field";
    pub const CHANNEL: &str = "channel";
    pub const SESSION_ID: &str = "session_id";
    pub const COMMANDS: &str = "commands";
}

/// Settings for [`init`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter directives, used when `RUST_LOG` is unset.
    pub filter: String,
    /// Colored output.
    pub ansi: bool,
    /// Print event targets.
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            filter: "info".to_string(),
            ansi: false,
            with_target: true,
        }
    }
}

/// Installs a global `fmt` subscriber filtered by `RUST_LOG` or
/// `config.filter`.
///
/// Fails when the filter does not parse or a global subscriber is already
/// installed.
pub fn init(config: &TelemetryConfig) -> CacheResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|err| CacheError::Validation(format!("log filter: {}", err)))?,
    };
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi)
        .with_target(config.with_target);

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|err| CacheError::Validation(format!("tracing subscriber: {}", err)))
}

/// Descriptive span name for an operation.
pub fn span_name(component: &str, op: &str) -> String {
    format!("ukv.{}/{}", component, op)
}

/// Creates the client span for one operation.
pub fn operation_span(component: &'static str, op: &'static str) -> Span {
    tracing::info_span!(
        "ukv",
        otel.name = %span_name(component, op),
        otel.kind = "client",
        component,
        op,
        error = field::Empty,
    )
}

/// Runs `fut` inside the operation span and records its error, if any.
pub(crate) async fn instrument<T, F>(component: &'static str, op: &'static str, fut: F) -> CacheResult<T>
where
    F: Future<Output = CacheResult<T>>,
{
    let span = operation_span(component, op);
    let out = fut.instrument(span.clone()).await;
    if let Err(err) = &out {
        span.record("error", field::display(err));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_names() {
        assert_eq!(span_name("batch", "execute"), "ukv.batch/execute");
        assert_eq!(span_name("hash", "set_field"), "ukv.hash/set_field");
    }

    #[tokio::test]
    async fn instrument_passes_results_through() {
        let ok = instrument("key", "exists", async { Ok::<_, CacheError>(3) }).await;
        assert_eq!(ok, Ok(3));
        let err = instrument("key", "exists", async { Err::<u8, _>(CacheError::NotFound) }).await;
        assert_eq!(err, Err(CacheError::NotFound));
    }

    #[test]
    fn config_defaults_from_json() {
        let config: TelemetryConfig = serde_json::from_str(r#"{"ansi": true}"#).unwrap();
        assert!(config.ansi);
        assert_eq!(config.filter, "info");
    }
}
