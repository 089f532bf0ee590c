//! Username/password check performed at login.

use std::collections::HashMap;

use relay_settings::Credential;

/// Decides whether a login attempt succeeds.
pub trait Authenticator: Send + Sync {
    /// `true` if `username`/`password` is an accepted pair.
    fn authenticate(&self, username: &str, password: &str) -> bool;
}

/// Fixed set of credentials loaded from settings.
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    /// Build from configured credentials. Later duplicates win.
    pub fn new(credentials: &[Credential]) -> Self {
        Self {
            users: credentials
                .iter()
                .map(|c| (c.username.clone(), c.password.clone()))
                .collect(),
        }
    }
}

impl Authenticator for StaticCredentials {
    fn authenticate(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|expected| expected == password)
    }
}
