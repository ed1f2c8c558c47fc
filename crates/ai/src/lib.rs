pub mod classify;
pub mod fine_tune;
pub mod provider;
pub mod schema;
