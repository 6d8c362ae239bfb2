use std::time::Duration;

use sea_orm::{
	sea_query::{Alias, ColumnDef, Expr, Order, Query, SimpleExpr, Table},
	ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, SqlErr,
	Statement, TransactionTrait,
};
use tracing::{debug, instrument, trace};

use crate::{Error, Event, StoreId, TableName};

/// Upper bound of rows per `INSERT`, keeps every statement below the bind parameter limits
/// of both Postgres and SQLite. Larger batches are split but still share one transaction.
pub const MAX_ROWS_PER_STATEMENT: usize = 500;

const SEQ_NUM: &str = "seqNum";
const PARENT_SEQ_NUM: &str = "parentSeqNum";
const NAME: &str = "name";
const ARGS: &str = "args";
const CLIENT_ID: &str = "clientId";
const SESSION_ID: &str = "sessionId";

const COLUMNS: [&str; 6] = [SEQ_NUM, PARENT_SEQ_NUM, NAME, ARGS, CLIENT_ID, SESSION_ID];

#[derive(Debug, Clone)]
pub struct EventLogOptions {
	pub max_connections: u32,
	pub connect_timeout: Duration,
}

impl Default for EventLogOptions {
	fn default() -> Self {
		Self {
			max_connections: 10,
			connect_timeout: Duration::from_secs(8),
		}
	}
}

/// Connection pool shared by every request touching the event log.
#[derive(Debug, Clone)]
pub struct EventLog {
	conn: DatabaseConnection,
}

impl EventLog {
	pub async fn connect(url: &str, options: &EventLogOptions) -> Result<Self, Error> {
		let mut opt = ConnectOptions::new(url);
		opt.max_connections(options.max_connections)
			.connect_timeout(options.connect_timeout)
			.sqlx_logging(false); // We use tracing instead

		let conn = Database::connect(opt).await.map_err(Error::Connect)?;

		debug!(backend = ?conn.get_database_backend(), "Connected to event log database");

		Ok(Self { conn })
	}

	/// Opens a handle scoped to a single store and request.
	#[must_use]
	pub fn store(&self, store_id: &StoreId) -> StoreHandle {
		StoreHandle {
			store_id: store_id.clone(),
			table: TableName::for_store(store_id),
			conn: self.conn.clone(),
		}
	}

	pub async fn close(self) -> Result<(), Error> {
		self.conn.close().await.map_err(Into::into)
	}
}

/// Access to one store's table for the lifetime of a request.
///
/// Pool connections are only checked out for the duration of a statement or transaction,
/// so they are returned on every exit path; `close` consumes the handle so it can not be
/// used afterwards.
#[derive(Debug)]
pub struct StoreHandle {
	store_id: StoreId,
	table: TableName,
	conn: DatabaseConnection,
}

impl StoreHandle {
	#[must_use]
	pub const fn store_id(&self) -> &StoreId {
		&self.store_id
	}

	#[must_use]
	pub const fn table(&self) -> &TableName {
		&self.table
	}

	/// Creates the backing table if it doesn't exist yet. Safe to call concurrently.
	#[instrument(skip(self), fields(store_id = %self.store_id, table = %self.table), err)]
	pub async fn ensure_provisioned(&self) -> Result<(), Error> {
		let backend = self.conn.get_database_backend();
		let create = backend.build(
			&Table::create()
				.table(Alias::new(self.table.as_str()))
				.if_not_exists()
				.col(
					ColumnDef::new(Alias::new(SEQ_NUM))
						.big_integer()
						.not_null()
						.primary_key(),
				)
				.col(ColumnDef::new(Alias::new(PARENT_SEQ_NUM)).big_integer().null())
				.col(ColumnDef::new(Alias::new(NAME)).text().not_null())
				.col(ColumnDef::new(Alias::new(ARGS)).json_binary().not_null())
				.col(ColumnDef::new(Alias::new(CLIENT_ID)).text().not_null())
				.col(ColumnDef::new(Alias::new(SESSION_ID)).text().not_null())
				.to_owned(),
		);

		let res = match backend {
			// `CREATE TABLE IF NOT EXISTS` alone still races on the Postgres catalog, so
			// concurrent provisioners of the same table queue up on an advisory lock.
			DbBackend::Postgres => {
				async {
					let txn = self.conn.begin().await?;
					txn.execute(Statement::from_sql_and_values(
						DbBackend::Postgres,
						"SELECT pg_advisory_xact_lock($1)",
						[self.table.lock_key().into()],
					))
					.await?;
					txn.execute(create).await?;
					txn.commit().await
				}
				.await
			}
			_ => self.conn.execute(create).await.map(|_| ()),
		};

		res.map_err(|source| Error::Provisioning {
			store_id: self.store_id.clone(),
			source,
		})?;

		debug!("Event log provisioned");

		Ok(())
	}

	/// Appends the whole batch or nothing at all.
	///
	/// The table is not created here; pushing to a store that was never pulled fails.
	#[instrument(skip(self, events), fields(store_id = %self.store_id, count = events.len()), err)]
	pub async fn append_batch(&self, events: &[Event]) -> Result<(), Error> {
		let (Some(lowest), Some(highest)) = (
			events.iter().map(|e| e.seq_num).min(),
			events.iter().map(|e| e.seq_num).max(),
		) else {
			return Err(Error::EmptyBatch);
		};

		let backend = self.conn.get_database_backend();
		let txn = self.conn.begin().await?;

		for chunk in events.chunks(MAX_ROWS_PER_STATEMENT) {
			let insert = backend.build(&self.insert_statement(chunk)?);

			if let Err(e) = txn.execute(insert).await {
				// Dropping the transaction rolls back the chunks already written
				return Err(self.map_write_error(e, lowest, highest));
			}
		}

		txn.commit()
			.await
			.map_err(|e| self.map_write_error(e, lowest, highest))?;

		trace!(lowest, highest, "Batch appended");

		Ok(())
	}

	/// Reads back persisted events ordered by `seqNum`, optionally only those after a cursor.
	#[instrument(skip(self), fields(store_id = %self.store_id), err)]
	pub async fn read_events(&self, after: Option<i64>) -> Result<Vec<Event>, Error> {
		let mut select = Query::select();
		select
			.columns(COLUMNS.map(Alias::new))
			.from(Alias::new(self.table.as_str()))
			.order_by(Alias::new(SEQ_NUM), Order::Asc);

		if let Some(after) = after {
			select.and_where(Expr::col(Alias::new(SEQ_NUM)).gt(after));
		}

		let backend = self.conn.get_database_backend();

		self.conn
			.query_all(backend.build(&select))
			.await?
			.into_iter()
			.map(|row| -> Result<Event, Error> {
				Ok(Event {
					seq_num: row.try_get("", SEQ_NUM)?,
					parent_seq_num: row.try_get("", PARENT_SEQ_NUM)?,
					name: row.try_get("", NAME)?,
					args: row.try_get("", ARGS)?,
					client_id: row.try_get("", CLIENT_ID)?,
					session_id: row.try_get("", SESSION_ID)?,
				})
			})
			.collect()
	}

	/// Ends the request's use of the handle.
	///
	/// Holds no connection of its own: every statement already returned its pool
	/// connection when it finished, so this only consumes the handle and traces the end
	/// of its use. Dropping the handle has the same effect.
	pub fn close(self) {
		trace!(store_id = %self.store_id, "Closing event log handle");
	}

	fn insert_statement(
		&self,
		events: &[Event],
	) -> Result<sea_orm::sea_query::InsertStatement, Error> {
		let mut insert = Query::insert();
		insert
			.into_table(Alias::new(self.table.as_str()))
			.columns(COLUMNS.map(Alias::new));

		for event in events {
			insert
				.values([
					SimpleExpr::from(event.seq_num),
					event.parent_seq_num.into(),
					event.name.as_str().into(),
					event.args.clone().into(),
					event.client_id.as_str().into(),
					event.session_id.as_str().into(),
				])
				.map_err(|e| DbErr::Custom(e.to_string()))?;
		}

		Ok(insert)
	}

	fn map_write_error(&self, e: DbErr, lowest: i64, highest: i64) -> Error {
		if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
			Error::DuplicateSequence {
				store_id: self.store_id.clone(),
				lowest,
				highest,
				source: e,
			}
		} else {
			Error::Database(e)
		}
	}
}

