//! CLI entrypoint: loads config, wires the engine and its subsystems under
//! a `tokio_graceful_shutdown::Toplevel`, and runs until a shutdown signal.

use audio_broker_engine::api::EngineApi;
use audio_broker_engine::config::{self, Cli};
use audio_broker_engine::discovery::sap;
use audio_broker_engine::discovery::SessionRegistry;
use audio_broker_engine::encoder::mp3::Mp3RingRegistry;
use audio_broker_engine::engine::Engine;
use audio_broker_engine::telemetry;
use clap::Parser;
use std::sync::Arc;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};
use tracing::info;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.log_level);

    let config = config::load(&cli).map_err(|e| miette::miette!("{e}"))?;
    info!(?config, "starting audio broker");

    let engine = Arc::new(Engine::new(config));
    let sap_registry = Arc::new(SessionRegistry::new());
    let mp3_rings = Arc::new(Mp3RingRegistry::default());
    let _api = EngineApi::new(engine.clone(), sap_registry.clone(), mp3_rings.clone());

    Toplevel::new(|s| async move {
        let registry = sap_registry.clone();
        s.start(SubsystemBuilder::new("sap-discovery", move |s| sap::run(s, registry)));
    })
    .catch_signals()
    .handle_shutdown_requests(std::time::Duration::from_secs(5))
    .await
    .map_err(|e| miette::miette!("{e}"))
}
