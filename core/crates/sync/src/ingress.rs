use ld_event_log::{EventLog, PushPayload};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
	pub success: bool,
}

/// The stateless write endpoint: the only way new events enter the authoritative log
/// besides the relays.
///
/// Does not provision stores, that happens when a client bootstraps its pull
/// subscription. No retries either, clients re-derive a fresh batch and push again.
#[derive(Debug, Clone)]
pub struct PushIngress {
	log: EventLog,
}

impl PushIngress {
	#[must_use]
	pub const fn new(log: EventLog) -> Self {
		Self { log }
	}

	#[instrument(skip_all, err)]
	pub async fn push(&self, body: &[u8]) -> Result<PushResponse, Error> {
		let payload = PushPayload::decode(body)?;

		let store = self.log.store(&payload.store_id);
		let res = store.append_batch(&payload.batch).await;
		store.close();
		res?;

		info!(
			store_id = %payload.store_id,
			count = payload.batch.len(),
			"Persisted pushed batch;"
		);

		Ok(PushResponse { success: true })
	}
}
