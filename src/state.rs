use std::sync::Arc;

use sqlx::SqlitePool;

use crate::location::LocationProvider;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub location: Arc<dyn LocationProvider>,
    pub radius_m: f64,
}
