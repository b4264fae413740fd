pub mod data_source;
pub mod engine;
pub mod error;
pub mod export;
pub mod feature;
pub mod field_inference;
pub mod map_host;
pub mod project;
pub mod store;
pub mod toast;
pub mod weights;
pub mod workflow;
