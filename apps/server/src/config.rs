use std::{convert::Infallible, net::IpAddr, time::Duration};

use clap::Parser;
use ld_core_sync::{ld_event_log::EventLogOptions, Upstream};
use secstr::SecUtf8;

/// Sync server for the Larder event log.
#[derive(Debug, Clone, Parser)]
#[command(name = "ld-server", version, about)]
pub struct Config {
	/// Postgres connection string of the event log database
	#[arg(long, env = "DATABASE_URL", value_parser = parse_secret, hide_env_values = true)]
	pub database_url: SecUtf8,

	#[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 10)]
	pub database_max_connections: u32,

	/// Base url of the upstream shape streaming service
	#[arg(long, env = "ELECTRIC_HOST", default_value = "http://localhost:3000")]
	pub electric_host: String,

	#[arg(long, env = "ELECTRIC_SOURCE_ID")]
	pub electric_source_id: Option<String>,

	#[arg(long, env = "ELECTRIC_SOURCE_SECRET", value_parser = parse_secret, hide_env_values = true)]
	pub electric_source_secret: Option<SecUtf8>,

	#[arg(long, env = "HOST", default_value = "::")]
	pub host: IpAddr,

	#[arg(long, env = "PORT", default_value_t = 8080)]
	pub port: u16,

	/// How long a store's relay may sit without connections before it is torn down
	#[arg(long, env = "RELAY_IDLE_TIMEOUT_SECS", default_value_t = 60)]
	pub relay_idle_timeout_secs: u64,
}

impl Config {
	#[must_use]
	pub fn event_log_options(&self) -> EventLogOptions {
		EventLogOptions {
			max_connections: self.database_max_connections,
			..Default::default()
		}
	}

	pub fn upstream(&self) -> Result<Upstream, ld_core_sync::Error> {
		Upstream::new(
			&self.electric_host,
			self.electric_source_id.clone(),
			self.electric_source_secret.clone(),
		)
	}

	#[must_use]
	pub const fn relay_idle_timeout(&self) -> Duration {
		Duration::from_secs(self.relay_idle_timeout_secs)
	}
}

fn parse_secret(value: &str) -> Result<SecUtf8, Infallible> {
	Ok(SecUtf8::from(value.to_string()))
}
