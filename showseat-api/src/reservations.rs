use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use showseat_core::{Reservation, ReservationStatus, Seat, SeatId};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::{customer_auth_middleware, CustomerClaims};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LockSeatsRequest {
    pub seat_ids: Vec<SeatId>,
}

#[derive(Debug, Serialize)]
pub struct LockSeatsResponse {
    pub reservation_id: Uuid,
    pub hold_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct SeatResponse {
    pub id: Uuid,
    pub label: String,
}

#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub id: Uuid,
    pub showtime_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<Reservation> for ReservationResponse {
    fn from(reservation: Reservation) -> Self {
        Self {
            id: reservation.id,
            showtime_id: reservation.showtime_id,
            seat_ids: reservation.seat_ids,
            status: reservation.status,
            expires_at: reservation.expires_at,
            created_at: reservation.created_at,
        }
    }
}

impl From<Seat> for SeatResponse {
    fn from(seat: Seat) -> Self {
        Self {
            id: seat.id,
            label: seat.label,
        }
    }
}

pub fn routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/v1/showtimes/{showtime_id}/reservations", post(lock_seats))
        .route(
            "/v1/reservations/{reservation_id}",
            get(get_reservation).delete(cancel_reservation),
        )
        .route("/v1/reservations/{reservation_id}/confirm", post(confirm_reservation))
        .route_layer(from_fn_with_state(state, customer_auth_middleware));

    Router::new()
        .route("/v1/showtimes/{showtime_id}/seats", get(available_seats))
        .merge(protected)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/showtimes/{showtime_id}/reservations
pub async fn lock_seats(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(showtime_id): Path<Uuid>,
    Json(req): Json<LockSeatsRequest>,
) -> Result<(StatusCode, Json<LockSeatsResponse>), AppError> {
    let caller = claims.caller();
    let reservation_id = state
        .reservations
        .lock_seats(&caller, showtime_id, &req.seat_ids)
        .await?;

    let hold_window = state.reservations.hold_window();
    // The sweeper still covers this reservation if the trigger cannot be armed
    if let Err(e) = state.expiry.schedule_cancel(reservation_id, hold_window).await {
        tracing::warn!("Failed to schedule expiry for reservation {}: {}", reservation_id, e);
    }

    Ok((
        StatusCode::CREATED,
        Json(LockSeatsResponse {
            reservation_id,
            hold_seconds: hold_window.as_secs(),
        }),
    ))
}

/// GET /v1/showtimes/{showtime_id}/seats
pub async fn available_seats(
    State(state): State<AppState>,
    Path(showtime_id): Path<Uuid>,
) -> Result<Json<Vec<SeatResponse>>, AppError> {
    let seats = state.reservations.get_available_seats(showtime_id).await?;
    Ok(Json(seats.into_iter().map(SeatResponse::from).collect()))
}

/// GET /v1/reservations/{reservation_id}
pub async fn get_reservation(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<ReservationResponse>, AppError> {
    let reservation = state
        .reservations
        .get_reservation(reservation_id, &claims.caller())
        .await?;
    Ok(Json(reservation.into()))
}

/// POST /v1/reservations/{reservation_id}/confirm
pub async fn confirm_reservation(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<ReservationResponse>, AppError> {
    let reservation = state
        .reservations
        .confirm_reservation(reservation_id, &claims.caller())
        .await?;
    Ok(Json(reservation.into()))
}

/// DELETE /v1/reservations/{reservation_id}
pub async fn cancel_reservation(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(reservation_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .reservations
        .cancel_own_reservation(reservation_id, &claims.caller())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
