/// Snapshot aggregation
pub mod aggregate;
/// Application.
pub mod app;
/// Command-line arguments
pub mod args;
/// Snapshot persistence
pub mod db;
/// Refresh cycle engine
pub mod engine;
/// Error taxonomy
pub mod error;
/// Terminal events handler
pub mod event;
/// Event handler.
pub mod handler;
/// Webhook notifications
pub mod notify;
/// Querying of Slurm state
pub mod slurm;
/// Terminal user interface
pub mod tui;
/// Widget renderer
pub mod ui;
