use tokio::sync::{broadcast, mpsc};

const REQUEST_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

pub trait ActorTypes {
	type Event: Clone;
	type Request;
}

/// Held by each party talking to the actor: sends requests, observes broadcast events.
pub struct ActorIO<T: ActorTypes> {
	pub event_rx: broadcast::Receiver<T::Event>,
	pub req_tx: mpsc::Sender<T::Request>,
}

impl<T: ActorTypes> ActorIO<T> {
	pub async fn send(&self, value: T::Request) -> Result<(), mpsc::error::SendError<T::Request>> {
		self.req_tx.send(value).await
	}
}

/// Held by the actor itself.
pub struct HandlerIO<T: ActorTypes> {
	pub event_tx: broadcast::Sender<T::Event>,
	pub req_rx: mpsc::Receiver<T::Request>,
}

impl<T: ActorTypes> HandlerIO<T> {
	/// Number of [`ActorIO`]s currently attached.
	pub fn attached(&self) -> usize {
		self.event_tx.receiver_count()
	}
}

/// Address of a running actor, new [`ActorIO`]s are attached through it.
pub struct ActorAddr<T: ActorTypes> {
	event_tx: broadcast::Sender<T::Event>,
	req_tx: mpsc::Sender<T::Request>,
}

impl<T: ActorTypes> ActorAddr<T> {
	pub fn attach(&self) -> ActorIO<T> {
		ActorIO {
			event_rx: self.event_tx.subscribe(),
			req_tx: self.req_tx.clone(),
		}
	}

	pub fn is_closed(&self) -> bool {
		self.req_tx.is_closed()
	}
}

impl<T: ActorTypes> Clone for ActorAddr<T> {
	fn clone(&self) -> Self {
		Self {
			event_tx: self.event_tx.clone(),
			req_tx: self.req_tx.clone(),
		}
	}
}

pub fn create_actor_io<T: ActorTypes>() -> (ActorAddr<T>, HandlerIO<T>) {
	let (req_tx, req_rx) = mpsc::channel(REQUEST_BUFFER);
	let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

	(
		ActorAddr {
			event_tx: event_tx.clone(),
			req_tx,
		},
		HandlerIO { event_tx, req_rx },
	)
}
