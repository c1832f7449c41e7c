//! Caller identity extractors.
//!
//! The auth layer (outside this crate) writes [`CurrentUser`] into the
//! session; guests are identified by a random [`SessionToken`] stored under
//! `cart_token`. Handlers never read the session directly: they take one of
//! these extractors and pass the resulting [`IdentityContext`] to the engine.

use axum::{extract::FromRequestParts, http::request::Parts};
use tower_sessions::Session;
use tracing::{Span, debug};

use crate::error::{AppError, set_sentry_user};
use crate::models::{Cart, CurrentUser, IdentityContext, SessionToken, session_keys};
use crate::services::CartIdentityResolver;

fn session_from(parts: &Parts) -> Result<Session, AppError> {
    parts
        .extensions
        .get::<Session>()
        .cloned()
        .ok_or_else(|| AppError::Internal("session layer missing".to_string()))
}

fn session_error(err: tower_sessions::session::Error) -> AppError {
    AppError::Internal(format!("session error: {err}"))
}

async fn read_context(session: &Session) -> Result<IdentityContext, AppError> {
    let user: Option<CurrentUser> = session
        .get(session_keys::CURRENT_USER)
        .await
        .map_err(session_error)?;
    let token: Option<String> = session
        .get(session_keys::CART_TOKEN)
        .await
        .map_err(session_error)?;

    let user_id = user.map(|u| u.id);
    if let Some(id) = user_id {
        Span::current().record("user_id", id.as_i64());
        set_sentry_user(&id);
    }

    Ok(IdentityContext {
        user_id,
        // Tampered or foreign values are treated as absent.
        session_token: token.as_deref().and_then(SessionToken::parse),
    })
}

/// Identity for endpoints that act on the caller's cart.
///
/// Anonymous callers get a guest token minted and stored in the session, so
/// the context always names someone.
pub struct CartIdentity {
    pub context: IdentityContext,
    session: Session,
}

impl CartIdentity {
    /// Resolve the caller's cart, merging the guest cart after login.
    ///
    /// Once a logged-in caller's guest cart has been merged the token is
    /// dropped from the session.
    ///
    /// # Errors
    ///
    /// Returns `AppError` if resolution or the session update fails.
    pub async fn resolve(&self, resolver: &CartIdentityResolver) -> Result<Cart, AppError> {
        let cart = resolver.resolve(&self.context).await?;

        if self.context.user_id.is_some() && self.context.session_token.is_some() {
            self.session
                .remove::<String>(session_keys::CART_TOKEN)
                .await
                .map_err(session_error)?;
        }

        Ok(cart)
    }
}

impl<S> FromRequestParts<S> for CartIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session = session_from(parts)?;
        let mut context = read_context(&session).await?;

        if context.is_anonymous() {
            let token = SessionToken::generate();
            session
                .insert(session_keys::CART_TOKEN, token.as_str())
                .await
                .map_err(session_error)?;
            debug!("Issued guest cart token");
            context.session_token = Some(token);
        }

        Ok(Self { context, session })
    }
}

/// Identity for read-only endpoints. Never writes to the session.
pub struct ExistingIdentity(pub IdentityContext);

impl<S> FromRequestParts<S> for ExistingIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session = session_from(parts)?;
        Ok(Self(read_context(&session).await?))
    }
}
