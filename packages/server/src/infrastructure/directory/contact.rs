//! InMemory ContactDirectory 実装
//!
//! ドメイン層が定義する ContactDirectory trait の具体的な実装。
//! HashMap をインメモリ DB として使用します。

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{ContactDirectory, LookupError, UserId};

#[derive(Default)]
pub struct InMemoryContactDirectory {
    /// Key: user, Value: users who see the key user's presence
    contacts: Arc<Mutex<HashMap<UserId, HashSet<UserId>>>>,
}

impl InMemoryContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `contact` a recipient of `user_id`'s presence changes
    pub async fn add_contact(&self, user_id: UserId, contact: UserId) {
        if user_id == contact {
            return;
        }
        let mut contacts = self.contacts.lock().await;
        contacts.entry(user_id).or_default().insert(contact);
    }

    pub async fn remove_contact(&self, user_id: UserId, contact: UserId) {
        let mut contacts = self.contacts.lock().await;
        if let Some(set) = contacts.get_mut(&user_id) {
            set.remove(&contact);
            if set.is_empty() {
                contacts.remove(&user_id);
            }
        }
    }
}

#[async_trait]
impl ContactDirectory for InMemoryContactDirectory {
    async fn contacts_of(&self, user_id: UserId) -> Result<Vec<UserId>, LookupError> {
        let contacts = self.contacts.lock().await;
        let mut result: Vec<UserId> = contacts
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        result.sort();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_contacts_of_returns_added_contacts() {
        // テスト項目: 追加した連絡先が contacts_of で取得できる
        // given (前提条件):
        let directory = InMemoryContactDirectory::new();
        let (alice, bob, carol) = (UserId::generate(), UserId::generate(), UserId::generate());

        // when (操作):
        directory.add_contact(alice, bob).await;
        directory.add_contact(alice, carol).await;
        directory.add_contact(alice, bob).await;

        // then (期待する結果):
        let mut expected = vec![bob, carol];
        expected.sort();
        assert_eq!(directory.contacts_of(alice).await.unwrap(), expected);
        assert!(directory.contacts_of(bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_self_contact_is_ignored() {
        // テスト項目: 自分自身を連絡先に追加しても登録されない
        // given (前提条件):
        let directory = InMemoryContactDirectory::new();
        let alice = UserId::generate();

        // when (操作):
        directory.add_contact(alice, alice).await;

        // then (期待する結果):
        assert!(directory.contacts_of(alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_contact() {
        // テスト項目: 削除した連絡先は contacts_of に含まれない
        // given (前提条件):
        let directory = InMemoryContactDirectory::new();
        let (alice, bob) = (UserId::generate(), UserId::generate());
        directory.add_contact(alice, bob).await;

        // when (操作):
        directory.remove_contact(alice, bob).await;

        // then (期待する結果):
        assert!(directory.contacts_of(alice).await.unwrap().is_empty());
    }
}
