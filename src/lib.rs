pub mod auth;
pub mod classifier;
pub mod config;
pub mod db;
pub mod deliverables;
pub mod error;
pub mod intake;
pub mod leads;
pub mod models;
pub mod notify;
pub mod outcome;
pub mod portal;
pub mod routes;
pub mod schema;
pub mod state;
pub mod utils;
pub mod validation;
