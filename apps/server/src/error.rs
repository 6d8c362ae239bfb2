use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use ld_core_sync::Error as SyncError;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
	pub error: String,
	pub code: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
	#[error(transparent)]
	Sync(#[from] SyncError),
	#[error("failed to build proxied response: {0}")]
	Response(#[from] http::Error),
}

impl ApiError {
	fn status(&self) -> StatusCode {
		match self {
			Self::Sync(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
			Self::Sync(SyncError::Upstream(_)) => StatusCode::BAD_GATEWAY,
			Self::Sync(SyncError::RelayClosed(_)) => StatusCode::SERVICE_UNAVAILABLE,
			// Duplicate sequences included, the client has to pull before retrying
			Self::Sync(_) | Self::Response(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	fn body(&self) -> ErrorResponse {
		match self {
			Self::Sync(e) => ErrorResponse {
				error: e.client_message(),
				code: e.code().to_string(),
			},
			Self::Response(_) => ErrorResponse {
				error: "internal server error".to_string(),
				code: "internal".to_string(),
			},
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status();

		// Clients only get the code and a generic description of server side failures
		if status.is_server_error() {
			error!(error = %self, ?self, %status, "Request failed;");
		} else {
			debug!(error = %self, %status, "Request rejected;");
		}

		(status, Json(self.body())).into_response()
	}
}
