use sea_orm::DbErr;

use crate::StoreId;

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
	#[error("malformed push payload: {0}")]
	Decode(#[from] serde_json::Error),
	#[error("store id must not be empty")]
	EmptyStoreId,
	#[error("push batch must contain at least one event")]
	EmptyBatch,
	#[error("invalid event at index {index}: {reason}")]
	InvalidEvent { index: usize, reason: String },
	#[error(
		"events must have strictly increasing seqNums within a batch \
		(index {index}: {seq_num} does not follow {previous})"
	)]
	OutOfOrder {
		index: usize,
		previous: i64,
		seq_num: i64,
	},
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("failed to connect to the event log database: {0}")]
	Connect(#[source] DbErr),
	#[error("failed to provision event log for store <id={store_id}>: {source}")]
	Provisioning {
		store_id: StoreId,
		#[source]
		source: DbErr,
	},
	#[error(
		"batch for store <id={store_id}> conflicts with already persisted events \
		(seqNums {lowest}..={highest}): {source}"
	)]
	DuplicateSequence {
		store_id: StoreId,
		lowest: i64,
		highest: i64,
		#[source]
		source: DbErr,
	},
	#[error("tried to append an empty batch")]
	EmptyBatch,
	#[error("database error: {0}")]
	Database(#[from] DbErr),
}
