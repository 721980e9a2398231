pub mod aggregator;
pub mod categories;
pub mod commands;
pub mod config;
pub mod ingest;
pub mod integrity;
pub mod interchange;
pub mod logging;
pub mod model;
pub mod reconciler;
pub mod remote;
pub mod scanner;
pub mod server;
pub mod store;
