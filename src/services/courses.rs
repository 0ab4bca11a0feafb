use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::repository;
use crate::error::AppError;
use crate::models::{Course, ROLE_INSTRUCTOR};

use super::{MAX_CODE_ATTEMPTS, generate_code};

pub struct CourseService {
    db: SqlitePool,
}

impl CourseService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn create(&self, instructor_id: &str, name: &str) -> Result<Course, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("course name is required".to_string()));
        }
        let user = repository::find_user_by_id(&self.db, instructor_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if user.role != ROLE_INSTRUCTOR {
            return Err(AppError::Forbidden(
                "only instructors can create courses".to_string(),
            ));
        }

        for _ in 0..MAX_CODE_ATTEMPTS {
            let course = Course {
                id: Uuid::new_v4().to_string(),
                code: generate_code(),
                name: name.to_string(),
                instructor_id: instructor_id.to_string(),
                created_at: Utc::now().to_rfc3339(),
            };

            match repository::insert_course(&self.db, &course).await {
                Ok(()) => {
                    info!("created course {} with join code {}", course.id, course.code);
                    return Ok(course);
                }
                Err(e) if repository::is_unique_violation(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        error!("exhausted {} attempts to allocate a join code", MAX_CODE_ATTEMPTS);
        Err(AppError::InternalServerError)
    }

    pub async fn join(&self, student_id: &str, code: &str) -> Result<Course, AppError> {
        repository::find_user_by_id(&self.db, student_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let course = repository::find_course_by_code(&self.db, code)
            .await?
            .ok_or(AppError::NotFound)?;

        match repository::insert_enrollment(&self.db, student_id, &course.id).await {
            Ok(()) => {
                info!("student {} joined course {}", student_id, course.id);
                Ok(course)
            }
            Err(e) if repository::is_unique_violation(&e) => Err(AppError::Conflict(
                "already joined this course".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, instructor_id: &str, course_id: &str) -> Result<(), AppError> {
        let course = repository::find_course_by_id(&self.db, course_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if course.instructor_id != instructor_id {
            return Err(AppError::Forbidden(
                "only the course owner can delete a course".to_string(),
            ));
        }

        repository::delete_course(&self.db, course_id).await?;
        info!("deleted course {} and its sessions", course_id);
        Ok(())
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Course>, AppError> {
        let courses = repository::fetch_courses_for_user(&self.db, user_id).await?;
        Ok(courses)
    }
}
