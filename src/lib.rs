pub mod api;
pub mod auth;
pub mod engine;
pub mod http;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod observability;
pub mod policy;
pub mod wal;
