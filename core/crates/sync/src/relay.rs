//! Per store coordination point for clients pushing over a persistent connection.
//!
//! Every store gets at most one relay actor. It serializes the pushes of all connections
//! attached to it, appends them through the same path as the HTTP ingress and fans
//! successful batches out to the other connections of that store.

use std::{
	collections::HashMap,
	fmt,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
	time::Duration,
};

use ld_event_log::{Event, EventLog, PushPayload, StoreHandle, StoreId};
use serde::{Deserialize, Serialize};
use tokio::{
	spawn,
	sync::{broadcast::error::RecvError, oneshot, RwLock},
	time::timeout,
};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
	actor::{create_actor_io, ActorAddr, ActorIO, ActorTypes, HandlerIO},
	Error,
};

type Relays = Arc<RwLock<HashMap<StoreId, ActorAddr<Relay>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Messages a client sends over its relay connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
	Push {
		request_id: String,
		store_id: StoreId,
		batch: Vec<Event>,
	},
}

/// Messages the relay sends back to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
	/// The batch of `request_id` is durable.
	PushAck { request_id: String },
	/// The batch of `request_id` was rejected as a whole.
	PushNack { request_id: String, message: String },
	/// A batch another client of the same store made durable.
	PushBroadcast { batch: Vec<Event> },
}

#[derive(Debug)]
pub enum Request {
	Push {
		origin: ConnectionId,
		batch: Vec<Event>,
		ack: oneshot::Sender<Result<(), Error>>,
	},
}

#[derive(Debug, Clone)]
pub struct Broadcast {
	origin: ConnectionId,
	batch: Arc<[Event]>,
}

/// Addressable collection of the running relays, one per store.
#[derive(Clone)]
pub struct RelayRegistry {
	log: EventLog,
	idle_timeout: Duration,
	relays: Relays,
	next_connection: Arc<AtomicU64>,
}

impl RelayRegistry {
	#[must_use]
	pub fn new(log: EventLog, idle_timeout: Duration) -> Self {
		Self {
			log,
			idle_timeout,
			relays: Arc::default(),
			next_connection: Arc::default(),
		}
	}

	/// Attaches a new connection to the relay of `store_id`, starting the relay if needed.
	#[instrument(skip(self))]
	pub async fn connect(&self, store_id: StoreId) -> RelayConnection {
		let mut relays = self.relays.write().await;

		let addr = relays
			.entry(store_id.clone())
			.and_modify(|addr| {
				if addr.is_closed() {
					*addr = self.spawn_relay(store_id.clone());
				}
			})
			.or_insert_with(|| self.spawn_relay(store_id.clone()));

		// Attaching under the registry lock, so the relay can't retire in between
		let io = addr.attach();
		let id = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));

		debug!(connection_id = %id, "Connection attached to relay;");

		RelayConnection { id, store_id, io }
	}

	/// Stores that currently have a running relay.
	pub async fn running(&self) -> Vec<StoreId> {
		self.relays.read().await.keys().cloned().collect()
	}

	fn spawn_relay(&self, store_id: StoreId) -> ActorAddr<Relay> {
		let (addr, io) = create_actor_io::<Relay>();

		let relay = Relay {
			store: self.log.store(&store_id),
			store_id,
			provisioned: false,
			io,
			idle_timeout: self.idle_timeout,
			relays: Arc::clone(&self.relays),
		};

		spawn(relay.run());

		addr
	}
}

impl fmt::Debug for RelayRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RelayRegistry")
			.field("idle_timeout", &self.idle_timeout)
			.finish_non_exhaustive()
	}
}

struct Relay {
	store_id: StoreId,
	store: StoreHandle,
	provisioned: bool,
	io: HandlerIO<Self>,
	idle_timeout: Duration,
	relays: Relays,
}

impl ActorTypes for Relay {
	type Event = Broadcast;
	type Request = Request;
}

impl Relay {
	#[instrument(skip(self), fields(store_id = %self.store_id))]
	async fn run(mut self) {
		info!("Relay started;");

		if let Err(e) = self.provision().await {
			error!(?e, "Failed to provision store for relay, retrying on next push;");
		}

		loop {
			match timeout(self.idle_timeout, self.io.req_rx.recv()).await {
				Ok(Some(request)) => self.handle(request).await,
				Ok(None) => break,
				Err(_) => {
					if self.try_retire().await {
						break;
					}
				}
			}
		}

		self.store.close();

		info!("Relay stopped;");
	}

	async fn handle(&mut self, request: Request) {
		match request {
			Request::Push { origin, batch, ack } => {
				info!(
					connection_id = %origin,
					count = batch.len(),
					"Received pushed batch;"
				);

				let res = self.append(&batch).await;

				if res.is_ok()
					&& self
						.io
						.event_tx
						.send(Broadcast {
							origin,
							batch: batch.into(),
						})
						.is_err()
				{
					trace!("No connections left to broadcast to;");
				}

				if ack.send(res).is_err() {
					warn!(connection_id = %origin, "Connection went away before its push was acknowledged;");
				}
			}
		}
	}

	async fn append(&mut self, batch: &[Event]) -> Result<(), Error> {
		self.provision().await?;

		Ok(self.store.append_batch(batch).await?)
	}

	async fn provision(&mut self) -> Result<(), Error> {
		if !self.provisioned {
			self.store.ensure_provisioned().await?;
			self.provisioned = true;
		}

		Ok(())
	}

	/// Removes this relay from the registry if nobody is attached anymore.
	async fn try_retire(&mut self) -> bool {
		let mut relays = self.relays.write().await;

		if self.io.attached() > 0 || !self.io.req_rx.is_empty() {
			return false;
		}

		relays.remove(&self.store_id);
		debug!("Relay idle without connections, retiring;");

		true
	}
}

/// One client's attachment to the relay of a store.
pub struct RelayConnection {
	id: ConnectionId,
	store_id: StoreId,
	io: ActorIO<Relay>,
}

impl RelayConnection {
	#[must_use]
	pub const fn id(&self) -> ConnectionId {
		self.id
	}

	#[must_use]
	pub const fn store_id(&self) -> &StoreId {
		&self.store_id
	}

	/// Applies a batch through the relay and waits until it is durable or rejected.
	pub async fn push(&self, payload: PushPayload) -> Result<(), Error> {
		if payload.store_id != self.store_id {
			return Err(Error::StoreMismatch {
				expected: self.store_id.clone(),
				got: payload.store_id,
			});
		}

		payload.validate()?;

		let (ack, ack_rx) = oneshot::channel();

		self.io
			.send(Request::Push {
				origin: self.id,
				batch: payload.batch,
				ack,
			})
			.await
			.map_err(|_| Error::RelayClosed(self.store_id.clone()))?;

		ack_rx
			.await
			.map_err(|_| Error::RelayClosed(self.store_id.clone()))?
	}

	/// Handles one client message, producing the acknowledgement to send back.
	pub async fn handle(&self, message: ClientMessage) -> ServerMessage {
		match message {
			ClientMessage::Push {
				request_id,
				store_id,
				batch,
			} => match self.push(PushPayload { store_id, batch }).await {
				Ok(()) => ServerMessage::PushAck { request_id },
				Err(e) => {
					if e.is_client_error() {
						debug!(connection_id = %self.id, ?e, "Push rejected;");
					} else {
						warn!(connection_id = %self.id, ?e, "Push failed;");
					}

					ServerMessage::PushNack {
						request_id,
						message: e.client_message(),
					}
				}
			},
		}
	}

	/// Waits for the next batch pushed by another connection of this store.
	///
	/// Returns `None` once the relay is gone.
	pub async fn next_broadcast(&mut self) -> Option<ServerMessage> {
		loop {
			match self.io.event_rx.recv().await {
				Ok(Broadcast { origin, .. }) if origin == self.id => continue,
				Ok(Broadcast { batch, .. }) => {
					return Some(ServerMessage::PushBroadcast {
						batch: batch.to_vec(),
					})
				}
				Err(RecvError::Lagged(skipped)) => {
					// The client catches up through its pull subscription
					warn!(connection_id = %self.id, skipped, "Connection lagged behind relay broadcasts;");
				}
				Err(RecvError::Closed) => return None,
			}
		}
	}
}

impl fmt::Debug for RelayConnection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RelayConnection")
			.field("id", &self.id)
			.field("store_id", &self.store_id)
			.finish_non_exhaustive()
	}
}
