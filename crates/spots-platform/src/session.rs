use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use spots_core::{PlatformCode, ServiceError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub uid: String,
    pub display_name: Option<String>,
}

impl AuthenticatedUser {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
        }
    }
}

/// Identity collaborator: who is signed in, and account removal.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    fn current_user(&self) -> Option<AuthenticatedUser>;

    /// Remove the signed-in account from the identity provider.
    async fn delete_current_user(&self) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySession {
    user: Arc<RwLock<Option<AuthenticatedUser>>>,
}

impl InMemorySession {
    pub fn signed_in(user: AuthenticatedUser) -> Self {
        let session = Self::default();
        session.sign_in(user);
        session
    }

    pub fn sign_in(&self, user: AuthenticatedUser) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user);
    }

    pub fn sign_out(&self) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[async_trait]
impl SessionProvider for InMemorySession {
    fn current_user(&self) -> Option<AuthenticatedUser> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn delete_current_user(&self) -> Result<(), ServiceError> {
        self.user
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|_| ())
            .ok_or_else(|| {
                ServiceError::platform(PlatformCode::Unauthenticated, "no user is signed in")
            })
    }
}
