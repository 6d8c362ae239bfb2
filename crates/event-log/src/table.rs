use std::fmt;

use crate::StoreId;

/// Bumped whenever the on-disk layout of an event log table changes, so new tables never
/// collide with ones written in an older layout.
pub const PERSISTENCE_FORMAT_VERSION: u32 = 1;

const PREFIX: &str = "eventlog";
const MAX_SLUG_LEN: usize = 24;
const HASH_HEX_LEN: usize = 12;

/// SQL-safe identifier of the table backing a store.
///
/// The slug keeps names readable in `psql`, the hash suffix keeps two store ids that
/// sanitize to the same slug apart. Always lowercase and at most 63 bytes, so Postgres
/// neither folds nor truncates it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
	#[must_use]
	pub fn for_store(store_id: &StoreId) -> Self {
		let slug = store_id
			.as_str()
			.bytes()
			.take(MAX_SLUG_LEN)
			.map(|b| {
				if b.is_ascii_alphanumeric() {
					char::from(b.to_ascii_lowercase())
				} else {
					'_'
				}
			})
			.collect::<String>();

		let hash = blake3::hash(store_id.as_str().as_bytes()).to_hex();

		Self(format!(
			"{PREFIX}_v{PERSISTENCE_FORMAT_VERSION}_{slug}_{}",
			&hash[..HASH_HEX_LEN]
		))
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Stable 64 bit key for this table, used for Postgres advisory locks.
	#[must_use]
	pub fn lock_key(&self) -> i64 {
		let hash = blake3::hash(self.0.as_bytes());
		let mut bytes = [0; 8];
		bytes.copy_from_slice(&hash.as_bytes()[..8]);
		i64::from_le_bytes(bytes)
	}
}

impl fmt::Display for TableName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}
