pub mod api;
pub mod db;
pub mod error;
pub mod geo;
pub mod location;
pub mod models;
pub mod services;
pub mod state;
