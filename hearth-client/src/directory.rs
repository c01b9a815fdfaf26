//! Cached user lookup backing message attribution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::models::{User, UserRef};
use crate::transport::Transport;

/// Memoizing user directory.
///
/// Wire frames carry only a `user_id`; listeners want names. The cache
/// resolves each id once and serves repeats from memory.
#[derive(Debug)]
pub struct UserCache {
    transport: Arc<dyn Transport>,
    users: Mutex<HashMap<u64, User>>,
}

impl UserCache {
    /// An empty cache backed by `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a wire `user_id` to a displayable reference.
    ///
    /// Lookup failures degrade to an id-only reference instead of failing
    /// the caller; nothing negative is cached, so a later resolve can
    /// still succeed.
    pub async fn resolve(&self, user_id: Option<u64>) -> Option<UserRef> {
        let user_id = user_id?;
        if let Some(user) = self.cached(user_id) {
            return Some(UserRef::from(&user));
        }
        match self.transport.user(user_id).await {
            Ok(user) => {
                let reference = UserRef::from(&user);
                self.insert(user);
                Some(reference)
            }
            Err(err) => {
                debug!("user {user_id} lookup failed: {err}");
                Some(UserRef {
                    id: user_id,
                    name: None,
                })
            }
        }
    }

    /// Stores a user fetched elsewhere, e.g. from a room occupant list.
    pub fn insert(&self, user: User) {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user.id, user);
    }

    fn cached(&self, user_id: u64) -> Option<User> {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned()
    }
}
