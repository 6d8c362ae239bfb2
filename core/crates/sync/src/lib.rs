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

//! Server side of event log sync: the push ingress, the pull proxy towards the upstream
//! shape service and the per store realtime relays.

use ld_event_log::{StoreId, ValidationError};

mod actor;
pub mod ingress;
pub mod pull;
pub mod relay;

pub use ingress::{PushIngress, PushResponse};
pub use pull::{PullArgs, PullProxy, ShapeHandle, ShapeRequest, Upstream};
pub use relay::{ClientMessage, ConnectionId, RelayConnection, RelayRegistry, ServerMessage};

pub use ld_event_log;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error(transparent)]
	Validation(#[from] ValidationError),
	#[error(transparent)]
	EventLog(#[from] ld_event_log::Error),
	#[error("invalid pull arguments: {0}")]
	PullArgs(String),
	#[error("invalid upstream shape service url: {0}")]
	UpstreamUrl(String),
	#[error("upstream shape request failed: {0}")]
	Upstream(#[from] reqwest::Error),
	#[error("push for store <id={got}> was sent to the relay of store <id={expected}>")]
	StoreMismatch { expected: StoreId, got: StoreId },
	#[error("relay for store <id={0}> is not running")]
	RelayClosed(StoreId),
}

impl Error {
	/// Stable identifier of the failure, safe to hand out to clients.
	#[must_use]
	pub const fn code(&self) -> &'static str {
		match self {
			Self::Validation(_) | Self::EventLog(ld_event_log::Error::EmptyBatch) => "validation",
			Self::PullArgs(_) => "invalid_pull_args",
			Self::StoreMismatch { .. } => "store_mismatch",
			Self::EventLog(ld_event_log::Error::DuplicateSequence { .. }) => "duplicate_sequence",
			Self::EventLog(ld_event_log::Error::Provisioning { .. }) => "provisioning",
			Self::EventLog(_) => "storage",
			Self::UpstreamUrl(_) => "configuration",
			Self::Upstream(_) => "upstream_unreachable",
			Self::RelayClosed(_) => "relay_unavailable",
		}
	}

	/// The request itself was at fault, as opposed to the server or its dependencies.
	#[must_use]
	pub const fn is_client_error(&self) -> bool {
		matches!(
			self,
			Self::Validation(_)
				| Self::EventLog(ld_event_log::Error::EmptyBatch)
				| Self::PullArgs(_)
				| Self::StoreMismatch { .. }
		)
	}

	/// Description meant for clients.
	///
	/// Server side failures are only named, their details (SQL, table names, upstream
	/// urls carrying credentials) stay in the server logs.
	#[must_use]
	pub fn client_message(&self) -> String {
		if self.is_client_error() {
			return self.to_string();
		}

		match self {
			Self::EventLog(ld_event_log::Error::DuplicateSequence { .. }) => {
				"batch conflicts with already persisted events"
			}
			Self::EventLog(ld_event_log::Error::Provisioning { .. }) => "failed to provision store",
			Self::UpstreamUrl(_) => "server is misconfigured",
			Self::Upstream(_) => "upstream shape service is unreachable",
			Self::RelayClosed(_) => "relay for this store is not running",
			_ => "event log storage failed",
		}
		.to_string()
	}
}
