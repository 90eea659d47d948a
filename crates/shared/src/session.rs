//! Session provider: who is signed in.

use crate::config::SessionConfig;
use crate::models::UserIdentity;
use parking_lot::RwLock;
use tracing::info;

/// Authentication/session collaborator consumed by the favorites flow
pub trait SessionProvider: Send + Sync {
    fn current_user(&self) -> Option<UserIdentity>;
    fn sign_in(&self, identity: UserIdentity);
    fn sign_out(&self);
}

/// In-process session, optionally seeded from the `[session]` config section
#[derive(Debug, Default)]
pub struct LocalSession {
    user: RwLock<Option<UserIdentity>>,
}

impl LocalSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: Option<&SessionConfig>) -> Self {
        let user = config.map(|c| UserIdentity {
            uid: c.uid.clone(),
            display_name: c.display_name.clone(),
            email: c.email.clone(),
            photo_url: c.photo_url.clone(),
        });

        Self {
            user: RwLock::new(user),
        }
    }
}

impl SessionProvider for LocalSession {
    fn current_user(&self) -> Option<UserIdentity> {
        self.user.read().clone()
    }

    fn sign_in(&self, identity: UserIdentity) {
        info!(uid = %identity.uid, "Signed in");
        *self.user.write() = Some(identity);
    }

    fn sign_out(&self) {
        if let Some(previous) = self.user.write().take() {
            info!(uid = %previous.uid, "Signed out");
        }
    }
}
