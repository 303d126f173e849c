//! Local identity as supplied by the external auth provider.

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
}

impl CurrentUser {
    pub fn new(id: Uuid, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Name shown to other collaborators: the display name, else the email.
    pub fn presence_name(&self) -> &str {
        match &self.display_name {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.email,
        }
    }
}

/// Snapshot of the auth provider's state, injected into the session manager.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    pub user: Option<CurrentUser>,
    pub loading: bool,
}

impl AuthState {
    pub fn signed_in(user: CurrentUser) -> Self {
        Self {
            user: Some(user),
            loading: false,
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn loading() -> Self {
        Self {
            user: None,
            loading: true,
        }
    }

    /// The local identity, or `None` while loading or signed out.
    pub fn identity(&self) -> Option<&CurrentUser> {
        if self.loading {
            return None;
        }
        self.user.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_name_fallback() {
        let user = CurrentUser::new(Uuid::new_v4(), "sam@example.com");
        assert_eq!(user.presence_name(), "sam@example.com");

        let named = user.clone().with_display_name("Sam Rivera");
        assert_eq!(named.presence_name(), "Sam Rivera");

        let blank = user.with_display_name("  ");
        assert_eq!(blank.presence_name(), "sam@example.com");
    }

    #[test]
    fn test_identity_hidden_while_loading() {
        let user = CurrentUser::new(Uuid::new_v4(), "sam@example.com");
        let mut state = AuthState::signed_in(user.clone());
        assert_eq!(state.identity(), Some(&user));

        state.loading = true;
        assert!(state.identity().is_none());
        assert!(AuthState::signed_out().identity().is_none());
        assert!(AuthState::loading().identity().is_none());
    }
}
