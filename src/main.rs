//! Calculator data hub: binary entrypoint.
//! Boots the Axum server, the background refresh scheduler and `/metrics`.

use calc_data_hub::{metrics::Metrics, DataHub, HubConfig};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `LOG_FORMAT=json` switches to JSON lines, otherwise compact output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("calc_data_hub=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // try_init: the shuttle runtime may already have installed a subscriber
    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already set");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = HubConfig::load_default().map_err(shuttle_runtime::Error::Custom)?;
    let hub = DataHub::from_config(&cfg).map_err(shuttle_runtime::Error::Custom)?;
    hub.start();

    let mut router = calc_data_hub::router(hub);
    match Metrics::init() {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => tracing::warn!(error = ?e, "metrics exporter disabled"),
    }

    Ok(router.into())
}
