pub mod aggregate;
pub mod app;
pub mod config;
pub mod db;
pub mod entity;
pub mod history;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod poller;
pub mod query;
pub mod sources;
pub mod timeutil;

// Re-export commonly used types for tests
pub use entity::{Source, TrackedEntity};
pub use history::{HistoryStore, StoreError, Window};
pub use model::{Observation, State, StatusRecord};
