//! Liveness endpoint.

use actix_web::{HttpResponse, Responder};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
///
/// Always `{"status": "healthy", "version": "<crate version>"}`; the
/// database is not probed.
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy",
            version: "0.1.0",
        };
        let json = serde_json::to_string(&response).expect("Failed to serialize");
        assert_eq!(json, r#"{"status":"healthy","version":"0.1.0"}"#);
    }
}
