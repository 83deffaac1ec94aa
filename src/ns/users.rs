//! The set of currently connected client usernames.

use dashmap::DashSet;
use tracing::info;

#[derive(Debug, Default)]
pub struct ActiveUsers {
    users: DashSet<String>,
}

impl ActiveUsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the user; a duplicate login is a no-op.
    pub fn register(&self, user: &str) {
        if self.users.insert(user.to_owned()) {
            info!(%user, online = self.users.len(), "user registered");
        }
    }

    pub fn deregister(&self, user: &str) {
        if self.users.remove(user).is_some() {
            info!(%user, online = self.users.len(), "user deregistered");
        }
    }

    /// The list body sent for a LIST request: one username per line,
    /// sorted for stable output.
    pub fn render(&self) -> String {
        let mut names: Vec<String> = self.users.iter().map(|u| u.key().clone()).collect();
        names.sort();
        let mut out = String::new();
        for name in names {
            out.push_str(&name);
            out.push('\n');
        }
        out
    }
}
