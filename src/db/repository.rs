use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{Attendance, Course, Session, User};

/// True when the error is the storage layer's unique-constraint rejection.
/// Services rely on this to turn code-collision and double-submit races into
/// domain errors instead of 500s.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub async fn insert_user(
    db: &SqlitePool,
    id: &str,
    name: &str,
    role: &str,
) -> Result<User, sqlx::Error> {
    let now = Utc::now().to_rfc3339();

    sqlx::query("INSERT INTO users (id, name, role, created_at) VALUES (?, ?, ?, ?)")
        .bind(id)
        .bind(name)
        .bind(role)
        .bind(&now)
        .execute(db)
        .await?;

    Ok(User {
        id: id.to_string(),
        name: name.to_string(),
        role: role.to_string(),
        created_at: now,
    })
}

pub async fn find_user_by_id(db: &SqlitePool, id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT id, name, role, created_at FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn insert_course(db: &SqlitePool, course: &Course) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO courses (id, code, name, instructor_id, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&course.id)
    .bind(&course.code)
    .bind(&course.name)
    .bind(&course.instructor_id)
    .bind(&course.created_at)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn find_course_by_id(db: &SqlitePool, id: &str) -> Result<Option<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>(
        "SELECT id, code, name, instructor_id, created_at FROM courses WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(db)
    .await
}

pub async fn find_course_by_code(
    db: &SqlitePool,
    code: &str,
) -> Result<Option<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>(
        "SELECT id, code, name, instructor_id, created_at FROM courses WHERE code = ?",
    )
    .bind(code)
    .fetch_optional(db)
    .await
}

/// Courses the user owns plus courses the user has joined.
pub async fn fetch_courses_for_user(
    db: &SqlitePool,
    user_id: &str,
) -> Result<Vec<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>(
        r#"
        SELECT c.id, c.code, c.name, c.instructor_id, c.created_at
        FROM courses c
        WHERE c.instructor_id = ?1
        UNION
        SELECT c.id, c.code, c.name, c.instructor_id, c.created_at
        FROM courses c
        JOIN enrollments e ON e.course_id = c.id
        WHERE e.student_id = ?1
        ORDER BY name
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await
}

/// Cascades sessions, attendance and enrollments via foreign keys.
pub async fn delete_course(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

    Ok(result > 0)
}

pub async fn insert_enrollment(
    db: &SqlitePool,
    student_id: &str,
    course_id: &str,
) -> Result<(), sqlx::Error> {
    let now = Utc::now().to_rfc3339();

    sqlx::query("INSERT INTO enrollments (student_id, course_id, joined_at) VALUES (?, ?, ?)")
        .bind(student_id)
        .bind(course_id)
        .bind(now)
        .execute(db)
        .await?;

    Ok(())
}

pub async fn insert_session(db: &SqlitePool, session: &Session) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sessions
            (id, code, course_id, start_time, end_time, active, latitude, longitude)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.id)
    .bind(&session.code)
    .bind(&session.course_id)
    .bind(&session.start_time)
    .bind(&session.end_time)
    .bind(session.active)
    .bind(session.latitude)
    .bind(session.longitude)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn find_session_by_code(
    db: &SqlitePool,
    code: &str,
) -> Result<Option<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        r#"
        SELECT id, code, course_id, start_time, end_time, active, latitude, longitude
        FROM sessions
        WHERE code = ?
        "#,
    )
    .bind(code)
    .fetch_optional(db)
    .await
}

pub async fn find_session_by_code_and_course(
    db: &SqlitePool,
    code: &str,
    course_id: &str,
) -> Result<Option<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        r#"
        SELECT id, code, course_id, start_time, end_time, active, latitude, longitude
        FROM sessions
        WHERE code = ? AND course_id = ?
        "#,
    )
    .bind(code)
    .bind(course_id)
    .fetch_optional(db)
    .await
}

pub async fn find_active_session_for_course(
    db: &SqlitePool,
    course_id: &str,
) -> Result<Option<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        r#"
        SELECT id, code, course_id, start_time, end_time, active, latitude, longitude
        FROM sessions
        WHERE course_id = ? AND active = 1
        ORDER BY start_time DESC
        LIMIT 1
        "#,
    )
    .bind(course_id)
    .fetch_optional(db)
    .await
}

/// Flip the active flag without touching the recorded end time. Used when
/// lazy expiry observes a session past its window.
pub async fn deactivate_session(db: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sessions SET active = 0 WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;

    Ok(())
}

/// Explicit end: deactivate and close the window at the given time.
pub async fn end_session(db: &SqlitePool, id: &str, end_time: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sessions SET active = 0, end_time = ? WHERE id = ?")
        .bind(end_time)
        .bind(id)
        .execute(db)
        .await?;

    Ok(())
}

pub async fn insert_attendance(
    db: &SqlitePool,
    session_id: &str,
    student_id: &str,
    now: DateTime<Utc>,
) -> Result<Attendance, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let recorded_at = now.to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO attendance (id, session_id, student_id, attended, recorded_at)
        VALUES (?, ?, ?, 1, ?)
        "#,
    )
    .bind(&id)
    .bind(session_id)
    .bind(student_id)
    .bind(&recorded_at)
    .execute(db)
    .await?;

    Ok(Attendance {
        id,
        session_id: session_id.to_string(),
        student_id: student_id.to_string(),
        attended: true,
        recorded_at,
    })
}

pub async fn attendance_exists(
    db: &SqlitePool,
    session_id: &str,
    student_id: &str,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM attendance WHERE session_id = ? AND student_id = ?",
    )
    .bind(session_id)
    .bind(student_id)
    .fetch_one(db)
    .await?;

    Ok(count > 0)
}

pub async fn count_sessions_for_course(
    db: &SqlitePool,
    course_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE course_id = ?")
        .bind(course_id)
        .fetch_one(db)
        .await
}

pub async fn count_attended_for_student(
    db: &SqlitePool,
    course_id: &str,
    student_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM attendance a
        JOIN sessions s ON a.session_id = s.id
        WHERE s.course_id = ? AND a.student_id = ? AND a.attended = 1
        "#,
    )
    .bind(course_id)
    .bind(student_id)
    .fetch_one(db)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test db");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        pool
    }

    async fn seed_instructor(pool: &SqlitePool) -> User {
        insert_user(pool, "auth0|instructor-1", "Dr. Grant", "instructor")
            .await
            .expect("Failed to insert instructor")
    }

    fn make_course(instructor_id: &str, code: &str) -> Course {
        Course {
            id: Uuid::new_v4().to_string(),
            code: code.to_string(),
            name: "Paleontology 101".to_string(),
            instructor_id: instructor_id.to_string(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_course() {
        let pool = setup_test_db().await;
        let instructor = seed_instructor(&pool).await;

        let course = make_course(&instructor.id, "1234");
        insert_course(&pool, &course).await.expect("Failed to insert course");

        let by_code = find_course_by_code(&pool, "1234")
            .await
            .expect("Failed to query course")
            .expect("Course not found");
        assert_eq!(by_code.id, course.id);
        assert_eq!(by_code.instructor_id, instructor.id);

        assert!(find_course_by_code(&pool, "0000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_course_code_unique_violation() {
        let pool = setup_test_db().await;
        let instructor = seed_instructor(&pool).await;

        insert_course(&pool, &make_course(&instructor.id, "4321"))
            .await
            .expect("Failed to insert course");

        let err = insert_course(&pool, &make_course(&instructor.id, "4321"))
            .await
            .expect_err("Duplicate code should fail");
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_attendance_unique_per_session_and_student() {
        let pool = setup_test_db().await;
        let instructor = seed_instructor(&pool).await;
        let student = insert_user(&pool, "auth0|student-1", "Alan", "student")
            .await
            .expect("Failed to insert student");

        let course = make_course(&instructor.id, "1111");
        insert_course(&pool, &course).await.expect("Failed to insert course");

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            code: "2222".to_string(),
            course_id: course.id.clone(),
            start_time: now.to_rfc3339(),
            end_time: (now + chrono::Duration::hours(1)).to_rfc3339(),
            active: true,
            latitude: 0.0,
            longitude: 0.0,
        };
        insert_session(&pool, &session).await.expect("Failed to insert session");

        insert_attendance(&pool, &session.id, &student.id, now)
            .await
            .expect("Failed to insert attendance");
        assert!(attendance_exists(&pool, &session.id, &student.id).await.unwrap());

        let err = insert_attendance(&pool, &session.id, &student.id, now)
            .await
            .expect_err("Second attendance row should fail");
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_delete_course_cascades() {
        let pool = setup_test_db().await;
        let instructor = seed_instructor(&pool).await;

        let course = make_course(&instructor.id, "7777");
        insert_course(&pool, &course).await.expect("Failed to insert course");

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            code: "8888".to_string(),
            course_id: course.id.clone(),
            start_time: now.to_rfc3339(),
            end_time: (now + chrono::Duration::hours(1)).to_rfc3339(),
            active: true,
            latitude: 0.0,
            longitude: 0.0,
        };
        insert_session(&pool, &session).await.expect("Failed to insert session");

        assert!(delete_course(&pool, &course.id).await.unwrap());
        assert!(find_session_by_code(&pool, "8888").await.unwrap().is_none());
    }
}
