//! High-level error types

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use fpgate_core::DriverError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Core(#[from] fpgate_core::Error),
    
    #[error("{0}")]
    Types(#[from] fpgate_types::Error),
    
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status reported for this error
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Core(fpgate_core::Error::Busy { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Core(fpgate_core::Error::Driver(DriverError::NotEnrolled(_))) => {
                StatusCode::NOT_FOUND
            }
            Self::Types(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<figment::Error> for Error {
    fn from(error: figment::Error) -> Self {
        Self::Config(error.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "status": status.as_u16(),
            "message": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
