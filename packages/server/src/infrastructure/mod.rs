//! Infrastructure layer: wire formats and concrete collaborators.

pub mod directory;
pub mod dto;
pub mod event_bus;
