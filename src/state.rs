use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::Config;
use crate::password::{hasher_for, CredentialHasher};
use crate::storage::WardrobeStorage;

pub struct AppState {
    pub config: Config,
    pub storage: WardrobeStorage,
    pub hasher: Box<dyn CredentialHasher>,
    pub sessions: SessionTable,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let storage = WardrobeStorage::open(&config.store_path)?;
        let hasher = hasher_for(config.password_scheme, config.bcrypt_cost);

        let upgraded = storage.upgrade_plaintext_passwords(hasher.as_ref()).await?;
        if upgraded > 0 {
            tracing::info!(upgraded, scheme = ?hasher.scheme(), "re-hashed legacy plaintext passwords");
        }

        Ok(Arc::new(Self {
            config,
            storage,
            hasher,
            sessions: SessionTable::default(),
        }))
    }
}

/// Bearer tokens of logged-in users, kept in memory only.
#[derive(Default)]
pub struct SessionTable {
    tokens: RwLock<HashMap<String, String>>,
}

impl SessionTable {
    pub async fn issue(&self, user_id: &str) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.tokens
            .write()
            .await
            .insert(token.clone(), user_id.to_string());
        token
    }

    pub async fn user_id(&self, token: &str) -> Option<String> {
        self.tokens.read().await.get(token).cloned()
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.tokens.write().await.remove(token).is_some()
    }
}
