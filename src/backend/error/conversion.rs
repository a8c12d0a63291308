/**
 * Error Conversion
 *
 * Renders backend errors as HTTP responses and as socket replies. Both use
 * the same message and status:
 *
 * ```json
 * {
 *   "error": "Record 'R1' is locked by ann",
 *   "status": 409
 * }
 * ```
 */

use axum::{
    response::{IntoResponse, Response},
    Json,
};

use crate::backend::error::types::BackendError;
use crate::shared::ServerReply;

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("[Router] {}", self);
        }

        let body = serde_json::json!({
            "error": self.message(),
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

impl BackendError {
    /// Socket reply carrying this error for request `id`
    pub fn into_reply(self, id: Option<u64>) -> ServerReply {
        ServerReply::err(id, self.status_code().as_u16(), self.message())
    }
}
