use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A time-boxed, location-anchored attendance window for a course.
///
/// Lifecycle: Created(active=true) -> Ended(active=false). The transition is
/// triggered by an explicit end call or observed lazily once the end time has
/// passed; there is no way back to active.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub code: String,
    pub course_id: String,
    pub start_time: String,
    pub end_time: String,
    pub active: bool,
    pub latitude: f64,
    pub longitude: f64,
}

fn default_duration_hours() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub course_id: String,
    #[serde(default = "default_duration_hours")]
    pub duration_hours: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndSessionRequest {
    pub session_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

impl SessionStatus {
    pub fn inactive() -> Self {
        Self {
            active: false,
            code: None,
            start_time: None,
            end_time: None,
        }
    }
}
