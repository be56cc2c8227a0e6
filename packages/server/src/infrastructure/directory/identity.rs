//! Static token IdentityVerifier 実装
//!
//! トークン → ユーザーの固定テーブルで認証します（開発・テスト用）。
//! 本番では認証サービスを呼ぶ実装に差し替えます。

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{AuthError, IdentityVerifier, UserIdentity};

#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: Arc<Mutex<HashMap<String, UserIdentity>>>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, token: impl Into<String>, identity: UserIdentity) {
        let mut tokens = self.tokens.lock().await;
        tokens.insert(token.into(), identity);
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserIdentity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let tokens = self.tokens.lock().await;
        tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DisplayName, UserId};

    #[tokio::test]
    async fn test_known_token_resolves_identity() {
        // テスト項目: 登録済みトークンはユーザー情報に解決され、未知のトークンは InvalidToken になる
        // given (前提条件):
        let verifier = StaticTokenVerifier::new();
        let identity = UserIdentity {
            user_id: UserId::generate(),
            display_name: DisplayName::new("alice".to_string()).unwrap(),
        };
        verifier.insert("alice-token", identity.clone()).await;

        // when (操作):
        let known = verifier.verify("alice-token").await;
        let unknown = verifier.verify("mallory-token").await;
        let empty = verifier.verify("").await;

        // then (期待する結果):
        assert_eq!(known, Ok(identity));
        assert_eq!(unknown, Err(AuthError::InvalidToken));
        assert_eq!(empty, Err(AuthError::MissingToken));
    }
}
