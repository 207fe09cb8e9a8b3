//! API request/response types

use serde::Serialize;

/// Liveness probe answer
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub service: &'static str,
}

impl StatusResponse {
    pub fn alive() -> Self {
        Self {
            status: "alive",
            service: env!("CARGO_PKG_NAME"),
        }
    }
}

/// Webhook acknowledgement; sent for every delivery
#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub received: bool,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
