use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::http::StatusCode;
use axum::{
    extract::{Path, Query, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use stallplass_core::payments::{Payment, PaymentRepositoryTrait};
use stallplass_core::rentals::RentalConflict;
use stallplass_reconcile::{PollingOptions, PollingSession, PollingStats};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{
    config::Config,
    distributors::{NotificationFilter, Role},
    error::{ApiError, ApiResult},
    main_lib::AppState,
};

pub async fn healthz() -> &'static str {
    "ok"
}

// Polling

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPollingBody {
    /// Defaults to the stored payment's provider reference.
    provider_order_id: Option<String>,
    #[serde(default)]
    options: Option<PollingOptions>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartPollingResponse {
    session_id: String,
}

async fn start_polling(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<String>,
    body: Option<Json<StartPollingBody>>,
) -> ApiResult<(StatusCode, Json<StartPollingResponse>)> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let provider_order_id = match body.provider_order_id {
        Some(order) => order,
        None => {
            state
                .store
                .get_payment(&payment_id)?
                .ok_or(ApiError::NotFound)?
                .provider_order_id
        }
    };
    let session_id = state
        .engine
        .start_polling(&payment_id, &provider_order_id, body.options)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartPollingResponse { session_id }),
    ))
}

async fn list_active_sessions(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<PollingSession>>> {
    Ok(Json(state.engine.get_active_sessions()))
}

async fn polling_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<PollingStats>> {
    Ok(Json(state.engine.get_polling_stats()))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<PollingSession>> {
    state
        .engine
        .get_session(&session_id)
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn stop_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.engine.stop_polling(&session_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

async fn capture_payment(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<String>,
) -> ApiResult<Json<Payment>> {
    let payment = state.engine.capture_payment(&payment_id).await?;
    Ok(Json(payment))
}

// Notifications

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Path((role, actor_id)): Path<(Role, String)>,
    Query(filter): Query<NotificationFilter>,
) -> ApiResult<Json<Value>> {
    let handle = state.distributors.resolve(role, &actor_id).await;
    Ok(Json(handle.notifications(&filter)?))
}

async fn clear_notifications(
    State(state): State<Arc<AppState>>,
    Path((role, actor_id)): Path<(Role, String)>,
) -> ApiResult<StatusCode> {
    state.distributors.resolve(role, &actor_id).await.clear();
    Ok(StatusCode::NO_CONTENT)
}

async fn unread_count(
    State(state): State<Arc<AppState>>,
    Path((role, actor_id)): Path<(Role, String)>,
) -> ApiResult<Json<Value>> {
    let handle = state.distributors.resolve(role, &actor_id).await;
    Ok(Json(json!({ "count": handle.unread_count() })))
}

async fn action_required(
    State(state): State<Arc<AppState>>,
    Path((role, actor_id)): Path<(Role, String)>,
) -> ApiResult<Json<Value>> {
    let handle = state.distributors.resolve(role, &actor_id).await;
    Ok(Json(handle.action_required()?))
}

async fn mark_as_read(
    State(state): State<Arc<AppState>>,
    Path((role, actor_id, notification_id)): Path<(Role, String, String)>,
) -> ApiResult<StatusCode> {
    let handle = state.distributors.resolve(role, &actor_id).await;
    if handle.mark_as_read(&notification_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

async fn mark_all_as_read(
    State(state): State<Arc<AppState>>,
    Path((role, actor_id)): Path<(Role, String)>,
) -> ApiResult<Json<Value>> {
    let handle = state.distributors.resolve(role, &actor_id).await;
    Ok(Json(json!({ "updated": handle.mark_all_as_read() })))
}

async fn stream_notifications(
    State(state): State<Arc<AppState>>,
    Path((role, actor_id)): Path<(Role, String)>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let handle = state.distributors.resolve(role, &actor_id).await;
    let stream = tokio_stream::StreamExt::filter_map(handle.subscribe(), |payload| {
        match SseEvent::default().event("notification").json_data(payload) {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                tracing::error!("Failed to serialize SSE notification: {}", err);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn list_conflicts(
    State(state): State<Arc<AppState>>,
    Path((role, actor_id)): Path<(Role, String)>,
) -> ApiResult<Json<Vec<RentalConflict>>> {
    match role {
        Role::Owners => {
            let owner = state.distributors.owner(&actor_id).await;
            Ok(Json(owner.get_conflicts()))
        }
        Role::Renters => Err(ApiError::BadRequest(
            "Conflicts are tracked for owners only".to_string(),
        )),
    }
}

pub fn app_router(state: Arc<AppState>, config: &Config) -> Router {
    let cors = if config.cors_allow.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins = config
            .cors_allow
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(origin) => Some(origin),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin {}", o);
                    None
                }
            })
            .collect::<Vec<_>>();
        CorsLayer::new().allow_origin(origins)
    };

    let api = Router::new()
        .route("/healthz", get(healthz))
        .route("/payments/{id}/polling", post(start_polling))
        .route("/payments/{id}/capture", post(capture_payment))
        .route("/polling", get(list_active_sessions))
        .route("/polling/stats", get(polling_stats))
        .route(
            "/polling/{session_id}",
            get(get_session).delete(stop_session),
        )
        .route("/{role}/{actor_id}/conflicts", get(list_conflicts))
        .route(
            "/{role}/{actor_id}/notifications",
            get(list_notifications).delete(clear_notifications),
        )
        .route(
            "/{role}/{actor_id}/notifications/unread-count",
            get(unread_count),
        )
        .route(
            "/{role}/{actor_id}/notifications/action-required",
            get(action_required),
        )
        .route(
            "/{role}/{actor_id}/notifications/read-all",
            post(mark_all_as_read),
        )
        .route(
            "/{role}/{actor_id}/notifications/stream",
            get(stream_notifications),
        )
        .route(
            "/{role}/{actor_id}/notifications/{notification_id}/read",
            post(mark_as_read),
        );

    Router::new()
        .nest("/api/v1", api)
        .with_state(state)
        .layer(cors)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
}
