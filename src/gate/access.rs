use crate::config::{AdminBypass, SecuritySection};
use std::collections::HashSet;

/// Allow-list and admin list. First gate every request passes through.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    allowed: HashSet<String>,
    admins: HashSet<String>,
    bypass: AdminBypass,
}

impl AccessPolicy {
    pub fn from_section(section: &SecuritySection) -> Self {
        Self {
            allowed: section.allowed_users.iter().cloned().collect(),
            admins: section.admins.iter().cloned().collect(),
            bypass: section.admin_bypass.clone(),
        }
    }

    /// An empty allow-list admits everyone; admins are always admitted.
    pub fn is_allowed(&self, user: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(user) || self.admins.contains(user)
    }

    pub fn is_admin(&self, user: &str) -> bool {
        self.admins.contains(user)
    }

    pub fn bypasses_rate_limit(&self, user: &str) -> bool {
        self.bypass.rate_limit && self.is_admin(user)
    }

    pub fn bypasses_content_filter(&self, user: &str) -> bool {
        self.bypass.content_filter && self.is_admin(user)
    }
}
