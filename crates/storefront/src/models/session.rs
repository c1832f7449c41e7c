//! Session-related types.
//!
//! Authentication happens outside the engine; it leaves a [`CurrentUser`] in
//! the session. Guests get a [`SessionToken`] generated on first need.

use serde::{Deserialize, Serialize};

use larder_core::UserId;

use super::cart::SessionToken;

/// Session-stored user identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    /// User's database ID.
    pub id: UserId,
}

/// Session keys read and written by the storefront.
pub mod session_keys {
    /// Key for the current logged-in user, written by the auth layer.
    pub const CURRENT_USER: &str = "current_user";

    /// Key for the guest cart token.
    pub const CART_TOKEN: &str = "cart_token";
}

/// Explicit identity of the caller, passed into every cart resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityContext {
    pub user_id: Option<UserId>,
    pub session_token: Option<SessionToken>,
}

impl IdentityContext {
    #[must_use]
    pub const fn user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            session_token: None,
        }
    }

    #[must_use]
    pub const fn guest(token: SessionToken) -> Self {
        Self {
            user_id: None,
            session_token: Some(token),
        }
    }

    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        self.user_id.is_none() && self.session_token.is_none()
    }
}
