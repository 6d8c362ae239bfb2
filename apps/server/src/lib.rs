#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use std::time::Duration;

use axum::{routing::get, Router};
use ld_core_sync::{
	ld_event_log::EventLog, PullProxy, PushIngress, RelayRegistry, Upstream,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

mod config;
mod electric;
mod error;
mod relay;
pub mod utils;

pub use config::Config;
pub use error::{ApiError, ErrorResponse};

#[derive(Clone)]
pub struct AppState {
	pub ingress: PushIngress,
	pub pull: PullProxy,
	pub relays: RelayRegistry,
}

impl AppState {
	#[must_use]
	pub fn new(log: EventLog, upstream: Upstream, relay_idle_timeout: Duration) -> Self {
		Self::with_http_client(log, upstream, relay_idle_timeout, reqwest::Client::new())
	}

	#[must_use]
	pub fn with_http_client(
		log: EventLog,
		upstream: Upstream,
		relay_idle_timeout: Duration,
		client: reqwest::Client,
	) -> Self {
		Self {
			ingress: PushIngress::new(log.clone()),
			pull: PullProxy::with_client(log.clone(), upstream, client),
			relays: RelayRegistry::new(log, relay_idle_timeout),
		}
	}
}

/// Any method on `/api/electric` other than `GET`, `HEAD` and `POST` falls through to
/// axum's `405 Method Not Allowed` without touching state.
pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/", get(|| async { "Larder sync server" }))
		.route("/health", get(|| async { "OK" }))
		.route(
			"/api/electric",
			get(electric::pull)
				.head(electric::probe)
				.post(electric::push),
		)
		.route("/api/websocket", get(relay::connect))
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
		.with_state(state)
}
