//! 外部コラボレータの trait 定義
//!
//! ハブが必要とする外部サービス（連絡先・メッセージ送信者・認証）へのインターフェース。
//! 具体的な実装は Infrastructure 層が提供します（依存性の逆転）。
//!
//! どの呼び出しも失敗し得ます。ハブは失敗を「その機能をスキップする」として扱い、
//! 呼び出し元の操作を中断しません。

use async_trait::async_trait;

use super::{
    error::{AuthError, LookupError},
    value_object::{DisplayName, MessageId, UserId},
};

/// Contact list lookup used for presence fan-out
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    /// Users who should see `user_id`'s presence changes
    async fn contacts_of(&self, user_id: UserId) -> Result<Vec<UserId>, LookupError>;
}

/// Message author lookup used for read-receipt routing
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageDirectory: Send + Sync {
    /// Author of a persisted message, `None` if the message is unknown
    async fn sender_of(&self, message_id: MessageId) -> Result<Option<UserId>, LookupError>;

    /// Called for every delivered message, local or relayed.
    ///
    /// Directories backed by the chat service's own store can ignore it.
    async fn record_sender(&self, _message_id: MessageId, _sender: UserId) -> Result<(), LookupError> {
        Ok(())
    }
}

/// Identity attached to an authenticated connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: UserId,
    pub display_name: DisplayName,
}

/// Bearer token verification (credential issuance lives elsewhere)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserIdentity, AuthError>;
}
