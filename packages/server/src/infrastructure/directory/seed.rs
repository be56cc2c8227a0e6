//! Seed file loading for the in-memory collaborators.
//!
//! ```json
//! {
//!   "users": [
//!     {
//!       "id": "3f2504e0-4f89-41d3-9a0c-0305e82c3301",
//!       "display_name": "alice",
//!       "token": "alice-token",
//!       "contacts": ["9b2f8c1a-7d3e-4a6b-8c5d-1e2f3a4b5c6d"]
//!     }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::domain::{DisplayName, UserId, UserIdentity};

use super::{InMemoryContactDirectory, StaticTokenVerifier};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse seed file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate token for user {0}")]
    DuplicateToken(UserId),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SeedUser {
    pub id: UserId,
    pub display_name: DisplayName,
    pub token: String,
    #[serde(default)]
    pub contacts: Vec<UserId>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

impl SeedFile {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let seed: SeedFile = serde_json::from_str(json)?;
        seed.validate()?;
        Ok(seed)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut tokens = std::collections::HashSet::new();
        for user in &self.users {
            if user.token.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "user {} has an empty token",
                    user.id
                )));
            }
            if !tokens.insert(user.token.as_str()) {
                return Err(ConfigError::DuplicateToken(user.id));
            }
        }
        Ok(())
    }

    /// Populate the directories; returns the number of users loaded
    pub async fn apply(
        &self,
        verifier: &StaticTokenVerifier,
        contacts: &InMemoryContactDirectory,
    ) -> usize {
        for user in &self.users {
            verifier
                .insert(
                    user.token.clone(),
                    UserIdentity {
                        user_id: user.id,
                        display_name: user.display_name.clone(),
                    },
                )
                .await;
            for contact in &user.contacts {
                contacts.add_contact(user.id, *contact).await;
            }
        }
        self.users.len()
    }
}
