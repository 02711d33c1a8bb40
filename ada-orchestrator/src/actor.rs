/// The identity an operation is performed on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user: String,
    pub is_admin: bool,
    /// Template group the user belongs to, when the identity layer knows it.
    pub group: Option<String>,
}

impl Actor {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            user: name.into(),
            is_admin: false,
            group: None,
        }
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            ..Self::user(name)
        }
    }

    /// Background jobs such as the expiry sweep.
    pub fn system() -> Self {
        Self::admin("system")
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Owners and admins may act on an entity owned by `owner`.
    pub fn owns_or_admin(&self, owner: &str) -> bool {
        self.is_admin || self.user == owner
    }

    pub fn may_use_group(&self, group_name: &str) -> bool {
        match &self.group {
            _ if self.is_admin => true,
            Some(group) => group == group_name,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_access() {
        assert!(Actor::user("alice").may_use_group("physics"));
        assert!(Actor::user("alice").with_group("physics").may_use_group("physics"));
        assert!(!Actor::user("alice").with_group("biology").may_use_group("physics"));
        assert!(Actor::admin("root").with_group("biology").may_use_group("physics"));
    }

    #[test]
    fn test_ownership() {
        assert!(Actor::user("alice").owns_or_admin("alice"));
        assert!(!Actor::user("bob").owns_or_admin("alice"));
        assert!(Actor::system().owns_or_admin("alice"));
    }
}
