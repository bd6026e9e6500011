//! HTTP endpoints implemented by the x402 facilitator.
//!
//! These are the server-side handlers for processing client-submitted x402
//! payments: the protocol-critical endpoints (`/verify`, `/settle`) plus
//! discovery endpoints (`/supported`, `/discovery/resources`).
//!
//! All domain outcomes are rendered as 200 responses carrying the canonical
//! `VerifyResponse`/`SettleResponse` shape, including failures; only
//! schema-invalid input is a 4xx. Payloads are compatible with the official
//! x402 client SDKs.

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::routing::{get, post};
use axum::{Json, Router, response::IntoResponse};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::chain::Phase;
use crate::discovery::DiscoveryListFilters;
use crate::facilitator::Facilitator;
use crate::facilitator_local::FacilitatorLocal;
use crate::types::{SettleResponse, VerifyRequest, VerifyResponse};

pub fn routes() -> Router<Arc<FacilitatorLocal>> {
    Router::new()
        .route("/", get(get_root))
        .route("/verify", get(get_verify_info))
        .route("/verify", post(post_verify))
        .route("/settle", get(get_settle_info))
        .route("/settle", post(post_settle))
        .route("/supported", get(get_supported))
        .route("/health", get(get_health))
        .route("/discovery/resources", get(get_discovery_resources))
        .route("/list", get(get_list_redirect))
}

/// `GET /`: Returns a simple greeting message from the facilitator.
#[instrument(skip_all)]
pub async fn get_root() -> impl IntoResponse {
    let pkg_name = env!("CARGO_PKG_NAME");
    (StatusCode::OK, format!("Hello from {pkg_name}!"))
}

/// `GET /verify`: Returns a machine-readable description of the `/verify`
/// endpoint, for discoverability and debugging tools.
#[instrument(skip_all)]
pub async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify x402 payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /settle`: Returns a machine-readable description of the `/settle`
/// endpoint.
#[instrument(skip_all)]
pub async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle x402 payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /supported`: Lists the payment schemes and networks this
/// facilitator serves, with the SVM fee payer in `extra`.
#[instrument(skip_all)]
pub async fn get_supported(State(facilitator): State<Arc<FacilitatorLocal>>) -> impl IntoResponse {
    match facilitator.supported().await {
        Ok(supported) => (StatusCode::OK, Json(json!(supported))).into_response(),
        Err(error) => {
            tracing::error!(error = ?error, "supported listing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal"})))
                .into_response()
        }
    }
}

#[instrument(skip_all)]
pub async fn get_health(State(facilitator): State<Arc<FacilitatorLocal>>) -> impl IntoResponse {
    get_supported(State(facilitator)).await
}

/// `POST /verify`: Facilitator-side verification of a proposed x402 payment.
///
/// Responds 200 with a [`VerifyResponse`]; a failed check carries
/// `isValid=false` and the machine-readable reason.
#[instrument(skip_all)]
pub async fn post_verify(
    State(facilitator): State<Arc<FacilitatorLocal>>,
    Json(body): Json<VerifyRequest>,
) -> impl IntoResponse {
    match facilitator.verify(&body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => {
            tracing::warn!(
                error = %error,
                network = %body.payment_payload.network,
                "verification failed"
            );
            let response =
                VerifyResponse::invalid(error.reason(Phase::Verify), error.payer());
            (StatusCode::OK, Json(response)).into_response()
        }
    }
}

/// `POST /settle`: Facilitator-side execution of a valid x402 payment
/// on-chain.
///
/// Responds 200 with a [`SettleResponse`]; failures carry `success=false`,
/// the reason, and the transaction reference when one was broadcast.
#[instrument(skip_all)]
pub async fn post_settle(
    State(facilitator): State<Arc<FacilitatorLocal>>,
    Json(body): Json<VerifyRequest>,
) -> impl IntoResponse {
    match facilitator.settle(&body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => {
            tracing::warn!(
                error = %error,
                network = %body.payment_payload.network,
                "settlement failed"
            );
            let mut response = SettleResponse::failed(
                error.reason(Phase::Settle),
                error.payer(),
                body.payment_payload.network,
            );
            response.transaction = error.transaction();
            (StatusCode::OK, Json(response)).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DiscoveryQuery {
    #[serde(rename = "type")]
    resource_type: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    /// JSON object of metadata key/value equality filters.
    metadata: Option<String>,
}

/// `GET /discovery/resources`: Pages through catalogued merchant resources.
#[instrument(skip_all)]
pub async fn get_discovery_resources(
    State(facilitator): State<Arc<FacilitatorLocal>>,
    Query(query): Query<DiscoveryQuery>,
) -> impl IntoResponse {
    let metadata = match query.metadata.as_deref() {
        Some(raw) => match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw) {
            Ok(map) => Some(map),
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "metadata must be a JSON object"})),
                )
                    .into_response();
            }
        },
        None => None,
    };
    let filters = DiscoveryListFilters {
        resource_type: query.resource_type,
        metadata,
        limit: query.limit,
        offset: query.offset,
    };
    match facilitator.discovery().list(filters).await {
        Ok(page) => (
            StatusCode::OK,
            Json(json!({
                "x402Version": 1,
                "items": page.items,
                "pagination": page.pagination,
            })),
        )
            .into_response(),
        Err(error) => {
            tracing::error!(error = %error, "discovery listing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal"})))
                .into_response()
        }
    }
}

/// `GET /list`: Legacy alias, permanently redirected to the discovery
/// listing.
#[instrument(skip_all)]
pub async fn get_list_redirect() -> impl IntoResponse {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, "/discovery/resources")],
    )
}
