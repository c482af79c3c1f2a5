//! Authenticated identity and the provider consulted on every fetch cycle

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub type OwnerId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: OwnerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Identity {
    pub fn new(user_id: OwnerId) -> Self {
        Self {
            user_id,
            email: None,
        }
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Current session owner, or `None` when signed out.
    async fn current_user(&self) -> Option<Identity>;
}

/// Mutable session holder; the value is read fresh on every call so a
/// sign-in or sign-out is picked up by the next fetch cycle.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    current: Arc<RwLock<Option<Identity>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(identity: Identity) -> Self {
        let store = Self::new();
        store.sign_in(identity);
        store
    }

    pub fn sign_in(&self, identity: Identity) {
        info!(user_id = %identity.user_id, "Session started");
        *self.current.write() = Some(identity);
    }

    pub fn sign_out(&self) {
        if self.current.write().take().is_some() {
            info!("Session ended");
        }
    }
}

#[async_trait]
impl AuthProvider for SessionStore {
    async fn current_user(&self) -> Option<Identity> {
        self.current.read().clone()
    }
}
