pub mod aggregate;
pub mod clock;
pub mod config;
pub mod core;
pub mod export;
pub mod host;
pub mod logging;
pub mod model;
pub mod persist;
pub mod replay;
pub mod store;
pub mod summary;
pub mod tracker;
