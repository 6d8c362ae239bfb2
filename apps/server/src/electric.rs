use std::collections::HashMap;

use axum::{
	body::{Body, Bytes},
	extract::{Query, State},
	http::{header, HeaderName, StatusCode},
	response::Response,
	Json,
};
use ld_core_sync::PushResponse;
use tracing::instrument;

use crate::{ApiError, AppState};

/// Headers describing the hop between us and the upstream, not the shape response itself.
const HOP_BY_HOP: [HeaderName; 6] = [
	header::CONNECTION,
	header::PROXY_AUTHENTICATE,
	header::PROXY_AUTHORIZATION,
	header::TE,
	header::TRAILER,
	header::TRANSFER_ENCODING,
];

/// `GET /api/electric`: proxies the pull to the upstream shape service.
#[instrument(skip_all)]
pub async fn pull(
	State(state): State<AppState>,
	Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
	let upstream = state.pull.pull(&params).await?;

	let mut response = Response::builder().status(upstream.status());

	if let Some(headers) = response.headers_mut() {
		for (name, value) in upstream.headers() {
			if !HOP_BY_HOP.contains(name) && name.as_str() != "keep-alive" {
				headers.append(name.clone(), value.clone());
			}
		}
	}

	response
		.body(Body::from_stream(upstream.bytes_stream()))
		.map_err(Into::into)
}

/// `HEAD /api/electric`: liveness probe, touches nothing.
pub async fn probe() -> StatusCode {
	StatusCode::OK
}

/// `POST /api/electric`: appends a batch to its store.
#[instrument(skip_all, fields(bytes = body.len()))]
pub async fn push(
	State(state): State<AppState>,
	body: Bytes,
) -> Result<Json<PushResponse>, ApiError> {
	Ok(Json(state.ingress.push(&body).await?))
}
