use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("payload is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
    #[error("payload field has the wrong type: {0}")]
    Field(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store log line {line} is corrupt: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("store log line {line} repeats or reorders id {id}")]
    IdOutOfOrder { line: usize, id: u64 },
    #[error("failed to serialize reading: {0}")]
    Serialize(#[source] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientRequestError {
    #[error("binId query parameter is required")]
    MissingBinId,
}

impl IntoResponse for ClientRequestError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Client(#[from] ClientRequestError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        match self {
            QueryError::Client(e) => e.into_response(),
            QueryError::Store(e) => {
                tracing::error!(error = %e, "reading query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "reading store unavailable".to_string())
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("mqtt transport error: {0}")]
    Transport(#[from] rumqttc::ConnectionError),
    #[error("broker refused connection: {0:?}")]
    Refused(rumqttc::ConnectReturnCode),
    #[error("broker rejected subscription to '{0}'")]
    SubscribeRejected(String),
    #[error("subscribe request could not be queued: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("timed out after {0:?} waiting for connect and subscribe")]
    Timeout(std::time::Duration),
    #[error("failed to read TLS material at {path}: {source}")]
    Tls {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}
