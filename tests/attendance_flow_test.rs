use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use rollcall_backend::db::repository;
use rollcall_backend::error::AppError;
use rollcall_backend::geo::GeoPoint;
use rollcall_backend::services::{AttendanceService, CourseService, SessionService};

const RADIUS_M: f64 = 100.0;

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

struct Fixture {
    pool: SqlitePool,
    instructor: String,
    student: String,
    course_id: String,
}

async fn setup_course_with_student(pool: SqlitePool) -> Fixture {
    let instructor = repository::insert_user(&pool, "auth0|teach", "Dr. Grant", "instructor")
        .await
        .expect("Failed to insert instructor");
    let student = repository::insert_user(&pool, "auth0|student", "Alan", "student")
        .await
        .expect("Failed to insert student");

    let courses = CourseService::new(pool.clone());
    let course = courses
        .create(&instructor.id, "Paleontology 101")
        .await
        .expect("Failed to create course");
    courses
        .join(&student.id, &course.code)
        .await
        .expect("Failed to join course");

    Fixture {
        pool,
        instructor: instructor.id,
        student: student.id,
        course_id: course.id,
    }
}

fn origin() -> GeoPoint {
    GeoPoint {
        latitude: 0.0,
        longitude: 0.0,
    }
}

// ~500 m north of the origin, well outside the 100 m radius.
fn far_away() -> GeoPoint {
    GeoPoint {
        latitude: 0.0045,
        longitude: 0.0,
    }
}

#[tokio::test]
async fn test_submit_within_radius_records_once() {
    let pool = setup_test_db().await;
    let fx = setup_course_with_student(pool).await;
    let now = Utc::now();

    let session = SessionService::new(fx.pool.clone())
        .start(&fx.instructor, &fx.course_id, 1, origin(), now)
        .await
        .expect("Failed to start session");

    let service = AttendanceService::new(fx.pool.clone(), RADIUS_M);
    let attendance = service
        .submit(&fx.student, &fx.course_id, &session.code, Some(origin()), now)
        .await
        .expect("Submit should succeed");
    assert!(attendance.attended);
    assert_eq!(attendance.session_id, session.id);

    let summary = service
        .summary(&fx.student, &fx.course_id)
        .await
        .expect("Failed to get summary");
    assert_eq!(summary.total_attendance, 1);
    assert_eq!(summary.total_sessions, 1);
    assert_eq!(summary.attendance_ratio, 1.0);

    // Second submit conflicts and inserts nothing.
    let dup = service
        .submit(&fx.student, &fx.course_id, &session.code, Some(origin()), now)
        .await;
    assert!(matches!(dup, Err(AppError::Conflict(_))));

    let summary = service
        .summary(&fx.student, &fx.course_id)
        .await
        .expect("Failed to get summary");
    assert_eq!(summary.total_attendance, 1);
}

#[tokio::test]
async fn test_submit_out_of_radius_is_rejected() {
    let pool = setup_test_db().await;
    let fx = setup_course_with_student(pool).await;
    let now = Utc::now();

    let session = SessionService::new(fx.pool.clone())
        .start(&fx.instructor, &fx.course_id, 1, origin(), now)
        .await
        .expect("Failed to start session");

    let service = AttendanceService::new(fx.pool.clone(), RADIUS_M);
    let result = service
        .submit(&fx.student, &fx.course_id, &session.code, Some(far_away()), now)
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(msg)) if msg.contains("location")));

    let summary = service
        .summary(&fx.student, &fx.course_id)
        .await
        .expect("Failed to get summary");
    assert_eq!(summary.total_attendance, 0);
    assert_eq!(summary.total_sessions, 1);
    assert_eq!(summary.attendance_ratio, 0.0);
}

#[tokio::test]
async fn test_submit_after_end_time_is_rejected_regardless_of_proximity() {
    let pool = setup_test_db().await;
    let fx = setup_course_with_student(pool).await;

    let two_hours_ago = Utc::now() - Duration::hours(2);
    let session = SessionService::new(fx.pool.clone())
        .start(&fx.instructor, &fx.course_id, 1, origin(), two_hours_ago)
        .await
        .expect("Failed to start session");

    let service = AttendanceService::new(fx.pool.clone(), RADIUS_M);
    let result = service
        .submit(
            &fx.student,
            &fx.course_id,
            &session.code,
            Some(origin()),
            Utc::now(),
        )
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(msg)) if msg.contains("ended")));

    let summary = service
        .summary(&fx.student, &fx.course_id)
        .await
        .expect("Failed to get summary");
    assert_eq!(summary.total_attendance, 0);
}

#[tokio::test]
async fn test_submit_to_closed_session_is_rejected() {
    let pool = setup_test_db().await;
    let fx = setup_course_with_student(pool).await;
    let now = Utc::now();

    let sessions = SessionService::new(fx.pool.clone());
    let session = sessions
        .start(&fx.instructor, &fx.course_id, 1, origin(), now)
        .await
        .expect("Failed to start session");
    sessions
        .end(&fx.instructor, &session.code, now)
        .await
        .expect("Failed to end session");

    let result = AttendanceService::new(fx.pool.clone(), RADIUS_M)
        .submit(&fx.student, &fx.course_id, &session.code, Some(origin()), now)
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(msg)) if msg.contains("closed")));
}

#[tokio::test]
async fn test_submit_unknown_session_is_not_found() {
    let pool = setup_test_db().await;
    let fx = setup_course_with_student(pool).await;

    let result = AttendanceService::new(fx.pool.clone(), RADIUS_M)
        .submit(&fx.student, &fx.course_id, "0000", Some(origin()), Utc::now())
        .await;
    assert!(matches!(result, Err(AppError::NotFound)));
}

#[tokio::test]
async fn test_submit_without_location_fails_verification() {
    let pool = setup_test_db().await;
    let fx = setup_course_with_student(pool).await;
    let now = Utc::now();

    let session = SessionService::new(fx.pool.clone())
        .start(&fx.instructor, &fx.course_id, 1, origin(), now)
        .await
        .expect("Failed to start session");

    let service = AttendanceService::new(fx.pool.clone(), RADIUS_M);
    let result = service
        .submit(&fx.student, &fx.course_id, &session.code, None, now)
        .await;
    assert!(matches!(result, Err(AppError::ExternalService(_))));

    let summary = service
        .summary(&fx.student, &fx.course_id)
        .await
        .expect("Failed to get summary");
    assert_eq!(summary.total_attendance, 0);
}

#[tokio::test]
async fn test_summary_for_course_without_sessions() {
    let pool = setup_test_db().await;
    let fx = setup_course_with_student(pool).await;

    let summary = AttendanceService::new(fx.pool.clone(), RADIUS_M)
        .summary(&fx.student, &fx.course_id)
        .await
        .expect("Failed to get summary");
    assert_eq!(summary.total_attendance, 0);
    assert_eq!(summary.total_sessions, 0);
    assert_eq!(summary.attendance_ratio, 0.0);
}

#[tokio::test]
async fn test_two_students_one_session_ratios() {
    let pool = setup_test_db().await;
    let fx = setup_course_with_student(pool).await;
    let other = repository::insert_user(&fx.pool, "auth0|student-2", "Lex", "student")
        .await
        .expect("Failed to insert second student");
    let now = Utc::now();

    let session = SessionService::new(fx.pool.clone())
        .start(&fx.instructor, &fx.course_id, 1, origin(), now)
        .await
        .expect("Failed to start session");

    let service = AttendanceService::new(fx.pool.clone(), RADIUS_M);
    service
        .submit(&fx.student, &fx.course_id, &session.code, Some(origin()), now)
        .await
        .expect("Submit should succeed");
    let rejected = service
        .submit(&other.id, &fx.course_id, &session.code, Some(far_away()), now)
        .await;
    assert!(rejected.is_err());

    let present = service
        .summary(&fx.student, &fx.course_id)
        .await
        .expect("Failed to get summary");
    assert_eq!(present.attendance_ratio, 1.0);

    let absent = service
        .summary(&other.id, &fx.course_id)
        .await
        .expect("Failed to get summary");
    assert_eq!(absent.total_attendance, 0);
    assert_eq!(absent.total_sessions, 1);
    assert_eq!(absent.attendance_ratio, 0.0);
}

#[tokio::test]
async fn test_join_course_twice_conflicts() {
    let pool = setup_test_db().await;
    let fx = setup_course_with_student(pool).await;

    let course = repository::find_course_by_id(&fx.pool, &fx.course_id)
        .await
        .expect("Failed to query course")
        .expect("Course missing");

    let result = CourseService::new(fx.pool.clone())
        .join(&fx.student, &course.code)
        .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
}
