//! Data models

pub mod indicator;

pub use indicator::*;
