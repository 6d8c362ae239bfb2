use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ValidationError;

/// Identifies one logical partition of the event log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoreId(String);

impl StoreId {
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl TryFrom<String> for StoreId {
	type Error = ValidationError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		if value.is_empty() {
			return Err(ValidationError::EmptyStoreId);
		}

		Ok(Self(value))
	}
}

impl TryFrom<&str> for StoreId {
	type Error = ValidationError;

	fn try_from(value: &str) -> Result<Self, Self::Error> {
		Self::try_from(value.to_owned())
	}
}

impl From<StoreId> for String {
	fn from(id: StoreId) -> Self {
		id.0
	}
}

impl fmt::Display for StoreId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// A single immutable change recorded in a store.
///
/// `args` is never interpreted here, only client side materializers know its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
	pub seq_num: i64,
	#[serde(default)]
	pub parent_seq_num: Option<i64>,
	pub name: String,
	pub args: Value,
	pub client_id: String,
	pub session_id: String,
}

impl Event {
	fn validate(&self) -> Result<(), String> {
		if self.seq_num < 0 {
			return Err(format!("seqNum must not be negative, got {}", self.seq_num));
		}

		if let Some(parent) = self.parent_seq_num {
			if parent < 0 || parent >= self.seq_num {
				return Err(format!(
					"parentSeqNum {parent} must be a non-negative predecessor of seqNum {}",
					self.seq_num
				));
			}
		}

		for (field, value) in [
			("name", &self.name),
			("clientId", &self.client_id),
			("sessionId", &self.session_id),
		] {
			if value.is_empty() {
				return Err(format!("{field} must not be empty"));
			}
		}

		Ok(())
	}
}

/// A batch of events pushed by a client, applied all-or-nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
	pub store_id: StoreId,
	pub batch: Vec<Event>,
}

impl PushPayload {
	/// Decodes a JSON request body and checks the envelope of every event.
	pub fn decode(bytes: &[u8]) -> Result<Self, ValidationError> {
		let payload = serde_json::from_slice::<Self>(bytes)?;
		payload.validate()?;

		Ok(payload)
	}

	pub fn validate(&self) -> Result<(), ValidationError> {
		validate_batch(&self.batch)
	}
}

/// Checks a batch can be applied as one contiguous, ordered insert.
pub(crate) fn validate_batch(batch: &[Event]) -> Result<(), ValidationError> {
	if batch.is_empty() {
		return Err(ValidationError::EmptyBatch);
	}

	let mut previous = None;

	for (index, event) in batch.iter().enumerate() {
		event
			.validate()
			.map_err(|reason| ValidationError::InvalidEvent { index, reason })?;

		if let Some(previous) = previous {
			if event.seq_num <= previous {
				return Err(ValidationError::OutOfOrder {
					index,
					previous,
					seq_num: event.seq_num,
				});
			}
		}

		previous = Some(event.seq_num);
	}

	Ok(())
}
