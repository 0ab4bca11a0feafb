use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::db::repository;
use crate::error::AppError;
use crate::geo::{self, GeoPoint};
use crate::models::{Attendance, AttendanceSummary};

use super::parse_timestamp;

/// Records at-most-one attendance per (session, student), gated on the
/// session window and the proximity check against the instructor's stored
/// location.
pub struct AttendanceService {
    db: SqlitePool,
    radius_m: f64,
}

impl AttendanceService {
    pub fn new(db: SqlitePool, radius_m: f64) -> Self {
        Self { db, radius_m }
    }

    pub async fn submit(
        &self,
        student_id: &str,
        course_id: &str,
        session_code: &str,
        location: Option<GeoPoint>,
        now: DateTime<Utc>,
    ) -> Result<Attendance, AppError> {
        repository::find_user_by_id(&self.db, student_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let session =
            repository::find_session_by_code_and_course(&self.db, session_code, course_id)
                .await?
                .ok_or(AppError::NotFound)?;

        if !session.active {
            return Err(AppError::Forbidden("session is closed".to_string()));
        }

        if let Some(end) = parse_timestamp(&session.end_time) {
            if now > end {
                repository::deactivate_session(&self.db, &session.id).await?;
                return Err(AppError::Forbidden("session has ended".to_string()));
            }
        }

        if repository::attendance_exists(&self.db, &session.id, student_id).await? {
            return Err(AppError::Conflict(
                "attendance already recorded for this session".to_string(),
            ));
        }

        // An unresolved location is a failure to verify, not a pass.
        let student_location = location.ok_or_else(|| {
            AppError::ExternalService("student location unavailable".to_string())
        })?;

        let anchor = GeoPoint {
            latitude: session.latitude,
            longitude: session.longitude,
        };
        if !geo::within_radius(&anchor, &student_location, self.radius_m) {
            return Err(AppError::Forbidden("location mismatch".to_string()));
        }

        // The unique (session_id, student_id) constraint is the safety net
        // against a double-submit race slipping past the check above.
        match repository::insert_attendance(&self.db, &session.id, student_id, now).await {
            Ok(attendance) => {
                info!(
                    "recorded attendance for student {} in session {}",
                    student_id, session_code
                );
                Ok(attendance)
            }
            Err(e) if repository::is_unique_violation(&e) => Err(AppError::Conflict(
                "attendance already recorded for this session".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn summary(
        &self,
        student_id: &str,
        course_id: &str,
    ) -> Result<AttendanceSummary, AppError> {
        repository::find_course_by_id(&self.db, course_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let total_sessions = repository::count_sessions_for_course(&self.db, course_id).await?;
        let total_attendance =
            repository::count_attended_for_student(&self.db, course_id, student_id).await?;

        let attendance_ratio = if total_sessions == 0 {
            0.0
        } else {
            total_attendance as f64 / total_sessions as f64
        };

        Ok(AttendanceSummary {
            total_attendance,
            total_sessions,
            attendance_ratio,
        })
    }
}
