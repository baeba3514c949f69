pub mod environment;
pub mod error;
pub mod fixture;
pub mod types;
