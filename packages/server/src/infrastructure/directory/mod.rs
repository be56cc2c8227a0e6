//! In-memory collaborator implementations.
//!
//! Development deployments and tests use these instead of the chat service's
//! database. `seed` fills them from a JSON file.

pub mod contact;
pub mod identity;
pub mod message;
pub mod seed;

pub use contact::InMemoryContactDirectory;
pub use identity::StaticTokenVerifier;
pub use message::InMemoryMessageDirectory;
pub use seed::{ConfigError, SeedFile};
