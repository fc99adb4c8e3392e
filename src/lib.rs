pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod providers;
pub mod reconcile;
pub mod secrets;
pub mod storage;
pub mod sync;
pub mod tokens;
