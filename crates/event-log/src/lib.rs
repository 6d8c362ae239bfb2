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

//! Durable, per-store event log.
//!
//! Every store owns one table holding its confirmed history. Tables are created lazily
//! and the `seqNum` primary key is the only arbiter between concurrent writers.

mod error;
mod event;
mod store;
mod table;

pub use error::{Error, ValidationError};
pub use event::{Event, PushPayload, StoreId};
pub use store::{EventLog, EventLogOptions, StoreHandle, MAX_ROWS_PER_STATEMENT};
pub use table::{TableName, PERSISTENCE_FORMAT_VERSION};
