pub mod api;
pub mod db;
pub mod decode;
pub mod errors;
pub mod executor;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod server;
pub mod sessions;
