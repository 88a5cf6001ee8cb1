use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use ridesync_protocol::{encode_watch, StatusChangeEvent, WatchMessage};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::booking::{Booking, CancelOrigin, PaymentRelease};
use crate::context::AppContext;
use crate::route::{decode_polyline, path_length_km};
use crate::tracking::select_tracking_mode;

/// Build the axum router for the gateway.
///
/// Exposes `/health`, trip status/tracking lookups, passenger cancellation,
/// fare estimates and `/trips/{trip_id}/watch` (WebSocket status stream).
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/trips/{trip_id}/status", get(trip_status))
        .route("/trips/{trip_id}/tracking", get(trip_tracking))
        .route("/trips/{trip_id}/cancel", post(cancel_trip))
        .route("/trips/{trip_id}/watch", get(watch_trip))
        .route("/fare/estimate", post(fare_estimate))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health() -> &'static str {
    "ok"
}

async fn trip_status(State(ctx): State<AppContext>, Path(trip_id): Path<String>) -> Json<Value> {
    let status = ctx.registry.refresh_status(&trip_id);
    Json(json!({ "trip_id": trip_id, "status": status }))
}

async fn trip_tracking(
    State(ctx): State<AppContext>,
    Path(trip_id): Path<String>,
) -> Json<Value> {
    let status = ctx.registry.refresh_status(&trip_id);
    let mode = select_tracking_mode(status);
    Json(json!({
        "trip_id": trip_id,
        "status": status,
        "mode": mode,
        "watches_driver": mode.watches_driver(),
        "refresh_secs": mode.refresh_interval().map(|d| d.as_secs()),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct CancelParams {
    payment_intent_id: Option<String>,
    reason: Option<String>,
    origin: Option<CancelOrigin>,
    status: Option<String>,
    scheduled_pickup_at: Option<DateTime<Utc>>,
}

async fn cancel_trip(
    State(ctx): State<AppContext>,
    Path(trip_id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let params: CancelParams = if body.is_empty() {
        CancelParams::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(p) => p,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("invalid params: {e}") })),
                )
            }
        }
    };

    let booking = Booking {
        payment_intent_id: params.payment_intent_id,
        reason: params.reason,
        status: params.status,
        scheduled_pickup_at: params.scheduled_pickup_at,
        ..Booking::new(trip_id.clone())
    };
    let origin = params.origin.unwrap_or_default();

    match ctx.canceler.cancel_booking_detailed(&booking, origin).await {
        Ok(report) => {
            let payment = match &report.payment {
                PaymentRelease::NoReference => "none",
                PaymentRelease::Released => "released",
                PaymentRelease::Refused => "refused",
                PaymentRelease::Failed(_) => "failed",
            };
            (
                StatusCode::OK,
                Json(json!({
                    "cancelled": true,
                    "trip_id": report.trip_id,
                    "payment": payment,
                    "shadow_deleted": report.shadow_deleted,
                    "scheduled_pickup_at": report.scheduled_pickup_at,
                    "delete_after_secs": report.grace.as_secs(),
                })),
            )
        }
        Err(err) => {
            tracing::warn!(%trip_id, error = %err, "cancel request failed");
            (
                StatusCode::CONFLICT,
                Json(json!({ "cancelled": false, "trip_id": trip_id, "error": err.to_string() })),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct FareParams {
    polyline: Option<String>,
    distance_km: Option<f64>,
    #[serde(default)]
    duration_min: f64,
}

async fn fare_estimate(
    State(ctx): State<AppContext>,
    Json(params): Json<FareParams>,
) -> impl IntoResponse {
    let distance_km = match (params.polyline.as_deref(), params.distance_km) {
        (Some(encoded), _) => match decode_polyline(encoded) {
            Ok(points) => path_length_km(&points),
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("invalid polyline: {e}") })),
                )
            }
        },
        (None, Some(km)) => km,
        (None, None) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "polyline or distance_km required" })),
            )
        }
    };

    let estimate = ctx.config.fare.estimate(distance_km, params.duration_min);
    (StatusCode::OK, Json(json!(estimate)))
}

async fn watch_trip(
    State(ctx): State<AppContext>,
    Path(trip_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    tracing::debug!(%trip_id, "trip watch requested");
    ws.on_upgrade(move |socket| run_watch(socket, ctx, trip_id))
}

/// Stream one trip's status changes to a WebSocket until either side stops.
///
/// Sends an `error` message before closing when the registry stops the trip's
/// listener.
async fn run_watch(mut socket: WebSocket, ctx: AppContext, trip_id: String) {
    // Prime the cache first so the listener's initial snapshot is not
    // re-reported as a change.
    let status = ctx.registry.refresh_status(&trip_id);

    let (tx, mut rx) = mpsc::unbounded_channel::<StatusChangeEvent>();
    let subscription = ctx.registry.subscribe(&trip_id, move |event| {
        let _ = tx.send(event.clone());
    });

    let snapshot = WatchMessage::Snapshot {
        trip_id: trip_id.clone(),
        status,
    };
    if send_watch(&mut socket, &snapshot).await {
        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else {
                        // The registry dropped this subscriber (listeners stopped).
                        let stopped = WatchMessage::Error {
                            message: format!("watch for trip {trip_id} stopped"),
                        };
                        send_watch(&mut socket, &stopped).await;
                        let _ = socket.send(WsMessage::Close(None)).await;
                        break;
                    };
                    if !send_watch(&mut socket, &WatchMessage::Status(event)).await {
                        break;
                    }
                }
                msg = socket.recv() => {
                    match msg {
                        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => continue,
                    }
                }
            }
        }
    }

    subscription.unsubscribe();
    tracing::debug!(%trip_id, "trip watch closed");
}

async fn send_watch(socket: &mut WebSocket, msg: &WatchMessage) -> bool {
    let text = match encode_watch(msg) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode watch message");
            return false;
        }
    };
    socket.send(WsMessage::Text(text.into())).await.is_ok()
}
