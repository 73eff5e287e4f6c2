use tracing::info;

/// Remembers which user the cached data belongs to.
#[derive(Debug, Default, Clone)]
pub struct IdentityGuard {
    last_user: Option<String>,
}

impl IdentityGuard {
    pub fn current(&self) -> Option<&str> {
        self.last_user.as_deref()
    }

    /// Record `user_id` as the active user. Returns true when it replaces a
    /// different, previously seen user; the first user ever seen is not a change.
    pub fn observe(&mut self, user_id: &str) -> bool {
        match self.last_user.as_deref() {
            Some(prev) if prev == user_id => false,
            Some(prev) => {
                info!(previous = %prev, current = %user_id, "User changed");
                self.last_user = Some(user_id.to_string());
                true
            }
            None => {
                self.last_user = Some(user_id.to_string());
                false
            }
        }
    }

    pub fn forget(&mut self) {
        self.last_user = None;
    }
}
