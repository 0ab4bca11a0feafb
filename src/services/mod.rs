mod attendance;
mod courses;
mod sessions;

pub use attendance::AttendanceService;
pub use courses::CourseService;
pub use sessions::SessionService;

use rand::Rng;

/// Attempts before giving up on finding an unclaimed 4-digit code.
pub(crate) const MAX_CODE_ATTEMPTS: u32 = 5;

pub(crate) fn generate_code() -> String {
    rand::thread_rng().gen_range(1000..=9999).to_string()
}

/// Parse an RFC 3339 timestamp as stored in the database.
pub(crate) fn parse_timestamp(ts: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}
