#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! billclock webhook receiver
//!
//! Accepts signed Stripe deliveries on `POST /webhook`, logs subscription and
//! schedule changes, and acknowledges everything that verifies.
//!
//! To receive events locally, forward them with the Stripe CLI:
//!
//! ```text
//! stripe listen --forward-to localhost:4242/webhook
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use billclock_billing::{log_event, WebhookVerifier};
use tower_http::trace::TraceLayer;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<WebhookVerifier>,
}

impl AppState {
    pub fn new(verifier: WebhookVerifier) -> Self {
        Self {
            verifier: Arc::new(verifier),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn webhook_error(message: impl std::fmt::Display) -> Response {
    (StatusCode::BAD_REQUEST, format!("Webhook Error: {}", message)).into_response()
}

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        tracing::warn!("Webhook delivery without signature header");
        return webhook_error("Missing stripe-signature header");
    };

    let payload = match std::str::from_utf8(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "Webhook body is not valid UTF-8");
            return webhook_error(e);
        }
    };

    let event = match state.verifier.verify_event(payload, signature) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "Rejected webhook delivery");
            return webhook_error(e);
        }
    };

    log_event(&event);

    StatusCode::OK.into_response()
}
