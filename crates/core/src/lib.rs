pub mod config;
pub mod error;
pub mod similarity;
pub mod types;
