//! Logging bootstrap: EnvFilter plus a text or JSON fmt layer with RFC3339
//! UTC timestamps. Call once at process start.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

pub fn init(filter: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_new(filter)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = {
        let base = fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339());
        if json {
            base.json().boxed()
        } else {
            base.boxed()
        }
    };

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow!("install tracing subscriber: {e}"))
}
