use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::repository;
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::{Session, SessionStatus};

use super::{MAX_CODE_ATTEMPTS, generate_code, parse_timestamp};

/// Longest window a single session may stay open.
const MAX_SESSION_HOURS: i64 = 24;

/// Session lifecycle manager. A session is active from start until either an
/// explicit end call or its end time passes; expiry is observed lazily at
/// read/submit time and heals the active flag in the store.
pub struct SessionService {
    db: SqlitePool,
}

impl SessionService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn start(
        &self,
        instructor_id: &str,
        course_id: &str,
        duration_hours: i64,
        location: GeoPoint,
        now: DateTime<Utc>,
    ) -> Result<Session, AppError> {
        if !(1..=MAX_SESSION_HOURS).contains(&duration_hours) {
            return Err(AppError::BadRequest(format!(
                "duration_hours must be between 1 and {}",
                MAX_SESSION_HOURS
            )));
        }

        let course = repository::find_course_by_id(&self.db, course_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if course.instructor_id != instructor_id {
            return Err(AppError::Forbidden(
                "only the course owner can start a session".to_string(),
            ));
        }

        // One active session per course. An expired leftover is healed here;
        // an unexpired one is the caller's to end first.
        if let Some(existing) = repository::find_active_session_for_course(&self.db, course_id).await? {
            match parse_timestamp(&existing.end_time) {
                Some(end) if now > end => {
                    repository::deactivate_session(&self.db, &existing.id).await?;
                }
                _ => {
                    return Err(AppError::Conflict(
                        "an active session already exists for this course".to_string(),
                    ));
                }
            }
        }

        let start_time = now.to_rfc3339();
        let end_time = (now + Duration::hours(duration_hours)).to_rfc3339();

        for _ in 0..MAX_CODE_ATTEMPTS {
            let session = Session {
                id: Uuid::new_v4().to_string(),
                code: generate_code(),
                course_id: course_id.to_string(),
                start_time: start_time.clone(),
                end_time: end_time.clone(),
                active: true,
                latitude: location.latitude,
                longitude: location.longitude,
            };

            match repository::insert_session(&self.db, &session).await {
                Ok(()) => {
                    info!("started session {} for course {}", session.code, course_id);
                    return Ok(session);
                }
                Err(e) if repository::is_unique_violation(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        error!(
            "exhausted {} attempts to allocate a session code for course {}",
            MAX_CODE_ATTEMPTS, course_id
        );
        Err(AppError::InternalServerError)
    }

    pub async fn end(
        &self,
        instructor_id: &str,
        session_code: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let session = repository::find_session_by_code(&self.db, session_code)
            .await?
            .ok_or(AppError::NotFound)?;

        let course = repository::find_course_by_id(&self.db, &session.course_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if course.instructor_id != instructor_id {
            return Err(AppError::Forbidden(
                "only the course owner can end a session".to_string(),
            ));
        }

        // Ended is terminal; a repeat call must not move the recorded close
        // time.
        if !session.active {
            return Ok(());
        }

        repository::end_session(&self.db, &session.id, &now.to_rfc3339()).await?;
        info!("ended session {}", session_code);
        Ok(())
    }

    pub async fn status(
        &self,
        course_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionStatus, AppError> {
        repository::find_course_by_id(&self.db, course_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let Some(session) = repository::find_active_session_for_course(&self.db, course_id).await?
        else {
            return Ok(SessionStatus::inactive());
        };

        if let Some(end) = parse_timestamp(&session.end_time) {
            if now > end {
                repository::deactivate_session(&self.db, &session.id).await?;
                return Ok(SessionStatus::inactive());
            }
        }

        Ok(SessionStatus {
            active: true,
            code: Some(session.code),
            start_time: Some(session.start_time),
            end_time: Some(session.end_time),
        })
    }
}
