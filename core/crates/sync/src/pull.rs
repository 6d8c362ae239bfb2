use std::{collections::HashMap, fmt};

use ld_event_log::{EventLog, StoreId, TableName};
use reqwest::Url;
use secstr::SecUtf8;
use serde::{Deserialize, Serialize};
use tracing::{debug, field, instrument, Span};

use crate::Error;

/// Query parameter carrying the URI encoded JSON pull arguments.
pub const ARGS_PARAM: &str = "args";

/// Offset the upstream shape protocol uses for "from the very beginning".
pub const INITIAL_OFFSET: &str = "-1";

/// Location and credentials of the upstream shape streaming service.
#[derive(Debug, Clone)]
pub struct Upstream {
	shape_url: Url,
	source_id: Option<String>,
	source_secret: Option<SecUtf8>,
}

impl Upstream {
	pub fn new(
		host: &str,
		source_id: Option<String>,
		source_secret: Option<SecUtf8>,
	) -> Result<Self, Error> {
		let mut shape_url = Url::parse(host).map_err(|e| Error::UpstreamUrl(e.to_string()))?;

		shape_url
			.path_segments_mut()
			.map_err(|()| Error::UpstreamUrl(format!("<url={host}> can't be a base url")))?
			.pop_if_empty()
			.extend(["v1", "shape"]);

		Ok(Self {
			shape_url,
			source_id,
			source_secret,
		})
	}
}

/// Cursor into a shape previously handed out by the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeHandle {
	pub offset: String,
	pub handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullArgs {
	pub store_id: StoreId,
	#[serde(default)]
	pub handle: Option<ShapeHandle>,
}

impl PullArgs {
	pub fn from_query(params: &HashMap<String, String>) -> Result<Self, Error> {
		let raw = params
			.get(ARGS_PARAM)
			.ok_or_else(|| Error::PullArgs(format!("missing `{ARGS_PARAM}` query parameter")))?;

		serde_json::from_str(raw).map_err(|e| Error::PullArgs(e.to_string()))
	}
}

/// A pull translated into a request against the upstream shape service.
pub struct ShapeRequest {
	pub url: Url,
	pub store_id: StoreId,
	/// Set for the very first pull of a subscription, when the store may not exist yet.
	pub needs_init: bool,
}

impl ShapeRequest {
	#[must_use]
	pub fn new(upstream: &Upstream, args: PullArgs) -> Self {
		let mut url = upstream.shape_url.clone();

		{
			let mut query = url.query_pairs_mut();
			query.append_pair("table", TableName::for_store(&args.store_id).as_str());

			if let Some(source_id) = &upstream.source_id {
				query.append_pair("source_id", source_id);
			}

			if let Some(source_secret) = &upstream.source_secret {
				query.append_pair("source_secret", source_secret.unsecure());
			}

			match &args.handle {
				None => {
					query.append_pair("offset", INITIAL_OFFSET);
				}
				Some(ShapeHandle { offset, handle }) => {
					query
						.append_pair("offset", offset)
						.append_pair("handle", handle)
						.append_pair("live", "true");
				}
			}
		}

		Self {
			url,
			needs_init: args.handle.is_none(),
			store_id: args.store_id,
		}
	}
}

// The url carries the source secret, keep it out of logs.
impl fmt::Debug for ShapeRequest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ShapeRequest")
			.field("path", &self.url.path())
			.field("store_id", &self.store_id)
			.field("needs_init", &self.needs_init)
			.finish()
	}
}

/// The read endpoint: forwards pulls to the upstream shape service, creating the store's
/// table before the first read of a subscription is forwarded.
#[derive(Debug, Clone)]
pub struct PullProxy {
	log: EventLog,
	upstream: Upstream,
	client: reqwest::Client,
}

impl PullProxy {
	#[must_use]
	pub fn new(log: EventLog, upstream: Upstream) -> Self {
		Self::with_client(log, upstream, reqwest::Client::new())
	}

	#[must_use]
	pub const fn with_client(log: EventLog, upstream: Upstream, client: reqwest::Client) -> Self {
		Self {
			log,
			upstream,
			client,
		}
	}

	/// Returns the upstream response untouched, whatever its status.
	#[instrument(skip_all, fields(store_id = field::Empty, needs_init = field::Empty), err)]
	pub async fn pull(&self, params: &HashMap<String, String>) -> Result<reqwest::Response, Error> {
		let request = ShapeRequest::new(&self.upstream, PullArgs::from_query(params)?);

		let span = Span::current();
		span.record("store_id", field::display(&request.store_id));
		span.record("needs_init", request.needs_init);

		if request.needs_init {
			// Must be done before forwarding, a push right after this pull expects the table
			let store = self.log.store(&request.store_id);
			let res = store.ensure_provisioned().await;
			store.close();
			res?;
		}

		let response = self.client.get(request.url).send().await?;

		if !response.status().is_success() {
			debug!(status = %response.status(), "Upstream refused shape request;");
		}

		Ok(response)
	}
}
