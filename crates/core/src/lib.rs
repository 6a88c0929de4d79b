pub mod data_source;
pub mod error;
pub mod estimation;
pub mod generation;
pub mod messages;
pub mod progress;
pub mod render;
pub mod task;
pub mod templates;
pub mod types;
