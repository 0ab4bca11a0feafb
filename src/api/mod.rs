use axum::Json;
use axum::extract::{FromRequestParts, Path, Query};
use axum::http::request::Parts;
use axum::routing::{delete, post};
use axum::{Router, extract::State, http::StatusCode, routing::get};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::repository;
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::*;
use crate::services::{AttendanceService, CourseService, SessionService};
use crate::state::AppState;

/// The authenticated caller, supplied by the upstream auth layer as the
/// `x-user-id` header. Every core operation receives this value explicitly.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(AppError::Unauthorized)?;

        Ok(Identity {
            user_id: user_id.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct SummaryParams {
    course_id: String,
    user_id: Option<String>,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/users", post(register_user))
        .route("/courses", get(list_courses).post(create_course))
        .route("/courses/{id}", delete(delete_course))
        .route("/courses/join", post(join_course))
        .route("/courses/{course_id}/session", get(session_status))
        .route("/sessions/start", post(start_session))
        .route("/sessions/end", post(end_session))
        .route("/attendance", post(submit_attendance))
        .route("/attendance/summary", get(attendance_summary))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(&state.db).await?;
    Ok(StatusCode::OK)
}

async fn register_user(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<RegisterUserRequest>,
) -> Result<Json<User>, AppError> {
    if req.role != ROLE_INSTRUCTOR && req.role != ROLE_STUDENT {
        return Err(AppError::BadRequest(format!(
            "role must be '{}' or '{}'",
            ROLE_INSTRUCTOR, ROLE_STUDENT
        )));
    }
    if req.name.trim().is_empty() {
        return Err(AppError::BadRequest("name is required".to_string()));
    }

    match repository::insert_user(&state.db, &identity.user_id, &req.name, &req.role).await {
        Ok(user) => Ok(Json(user)),
        Err(e) if repository::is_unique_violation(&e) => {
            Err(AppError::Conflict("user already registered".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

async fn list_courses(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<Vec<Course>>, AppError> {
    let courses = CourseService::new(state.db.clone())
        .list(&identity.user_id)
        .await?;
    Ok(Json(courses))
}

async fn create_course(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<NewCourseRequest>,
) -> Result<Json<Course>, AppError> {
    let course = CourseService::new(state.db.clone())
        .create(&identity.user_id, &req.name)
        .await?;
    Ok(Json(course))
}

async fn delete_course(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    CourseService::new(state.db.clone())
        .delete(&identity.user_id, &id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn join_course(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<JoinCourseRequest>,
) -> Result<Json<Course>, AppError> {
    let course = CourseService::new(state.db.clone())
        .join(&identity.user_id, &req.code)
        .await?;
    Ok(Json(course))
}

async fn start_session(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<StartSessionRequest>,
) -> Result<Json<Session>, AppError> {
    let location = resolve_location(&state, req.latitude, req.longitude)
        .await?
        .ok_or_else(|| {
            AppError::ExternalService("could not determine instructor location".to_string())
        })?;

    let session = SessionService::new(state.db.clone())
        .start(
            &identity.user_id,
            &req.course_id,
            req.duration_hours,
            location,
            Utc::now(),
        )
        .await?;
    Ok(Json(session))
}

async fn end_session(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<EndSessionRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    SessionService::new(state.db.clone())
        .end(&identity.user_id, &req.session_code, Utc::now())
        .await?;
    Ok(Json(MessageResponse {
        message: "session ended".to_string(),
    }))
}

async fn session_status(
    State(state): State<AppState>,
    _identity: Identity,
    Path(course_id): Path<String>,
) -> Result<Json<SessionStatus>, AppError> {
    let status = SessionService::new(state.db.clone())
        .status(&course_id, Utc::now())
        .await?;
    Ok(Json(status))
}

async fn submit_attendance(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<SubmitAttendanceRequest>,
) -> Result<Json<Attendance>, AppError> {
    let location = resolve_location(&state, req.latitude, req.longitude).await?;

    let attendance = AttendanceService::new(state.db.clone(), state.radius_m)
        .submit(
            &identity.user_id,
            &req.course_id,
            &req.session_code,
            location,
            Utc::now(),
        )
        .await?;
    Ok(Json(attendance))
}

async fn attendance_summary(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<SummaryParams>,
) -> Result<Json<AttendanceSummary>, AppError> {
    let student_id = params.user_id.unwrap_or(identity.user_id);
    let summary = AttendanceService::new(state.db.clone(), state.radius_m)
        .summary(&student_id, &params.course_id)
        .await?;
    Ok(Json(summary))
}

/// Coordinates supplied in the request win; otherwise fall back to the
/// injected geolocation provider. `None` means the position is unknown.
async fn resolve_location(
    state: &AppState,
    latitude: Option<f64>,
    longitude: Option<f64>,
) -> Result<Option<GeoPoint>, AppError> {
    if let (Some(latitude), Some(longitude)) = (latitude, longitude) {
        let point = GeoPoint {
            latitude,
            longitude,
        };
        if !point.in_range() {
            return Err(AppError::BadRequest(
                "latitude/longitude out of range".to_string(),
            ));
        }
        return Ok(Some(point));
    }

    // Positions from the provider get the same range check as request
    // coordinates; a bogus one counts as unresolved.
    let resolved = state.location.get_location().await?;
    Ok(resolved.filter(|point| {
        if point.in_range() {
            true
        } else {
            warn!(
                "location provider returned out-of-range position ({}, {})",
                point.latitude, point.longitude
            );
            false
        }
    }))
}
