//! Utilities shared by the Tsudoi packages: logger setup and clock abstraction.

pub mod logger;
pub mod time;
