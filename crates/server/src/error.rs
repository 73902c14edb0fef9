use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Outcomes of hub operations that are reported back to the issuing connection.
/// The display strings are the reasons sent on the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("User is offline")]
    PeerOffline,

    #[error("not joined")]
    NotJoined,

    #[error("cannot call yourself")]
    SelfCall,

    #[error("Failed to send message")]
    Store(String),
}

/// HTTP-facing errors
#[derive(Debug)]
pub enum Error {
    NotFound(String),
    BadRequest(String),
}

pub type Result<T> = core::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(json!({
            "error": {
                "message": error_message
            }
        }));

        (status, body).into_response()
    }
}
