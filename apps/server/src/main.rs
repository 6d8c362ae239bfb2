use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use ld_core_sync::ld_event_log::EventLog;
use ld_server::{router, utils, AppState, Config};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let config = Config::parse();

	utils::init_tracing().context("failed to initialise tracing")?;

	let log = EventLog::connect(config.database_url.unsecure(), &config.event_log_options())
		.await
		.context("failed to connect to the event log database")?;

	let upstream = config
		.upstream()
		.context("invalid upstream shape service url")?;

	let app = router(AppState::new(
		log.clone(),
		upstream,
		config.relay_idle_timeout(),
	));

	let addr = SocketAddr::new(config.host, config.port);
	let listener = tokio::net::TcpListener::bind(addr)
		.await
		.with_context(|| format!("failed to bind to {addr}"))?;

	info!("Listening on http://{addr}");

	axum::serve(listener, app)
		.with_graceful_shutdown(utils::axum_shutdown_signal())
		.await
		.context("server error")?;

	log.close().await?;

	Ok(())
}
