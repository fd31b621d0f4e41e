use crate::server::ServerError;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::TypedHeader;
use crimewatch_common::model::{
    Id,
    auth::AuthToken,
    user::{UserMarker, UserRole},
};
use crimewatch_db::DbClient;
use headers::{Authorization, authorization::Bearer};
use std::sync::Arc;
use time::OffsetDateTime;

type AuthorizationHeader = TypedHeader<Authorization<Bearer>>;

/// A user who presented a valid, unexpired bearer token.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct AuthenticatedUser {
    id: Id<UserMarker>,
    role: UserRole,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn user_id(self) -> Id<UserMarker> {
        self.id
    }

    #[must_use]
    pub fn is_admin(self) -> bool {
        self.role.is_admin()
    }

    /// Authors may act on their own content, admins on anything.
    pub fn ensure_author_or_admin(self, author: Id<UserMarker>) -> Result<(), ServerError> {
        if self.id == author || self.is_admin() {
            Ok(())
        } else {
            Err(ServerError::NotAuthor)
        }
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let request_token: AuthToken = AuthorizationHeader::from_request_parts(parts, state)
            .await
            .map_err(ServerError::InvalidAuthorizationHeader)?
            .token()
            .parse()?;

        let token_hash = request_token.hash()?;
        let db = Arc::<DbClient>::from_ref(state);

        let authentication = db
            .fetch_auth(&token_hash)
            .await?
            .filter(|authentication| authentication.user == request_token.user_id)
            .ok_or(ServerError::InvalidToken)?;

        if authentication.is_expired_at(OffsetDateTime::now_utc()) {
            return Err(ServerError::ExpiredToken);
        }

        let user = db
            .fetch_user(authentication.user)
            .await?
            .ok_or(ServerError::InvalidToken)?;

        Ok(Self {
            id: user.id,
            role: user.role,
        })
    }
}

/// An [`AuthenticatedUser`] with the admin role. Anyone else is refused with 403.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct AdminUser(AuthenticatedUser);

impl AdminUser {
    #[must_use]
    pub fn user_id(self) -> Id<UserMarker> {
        self.0.user_id()
    }
}

impl<S> FromRequestParts<S> for AdminUser
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ServerError::AdminRequired);
        }

        Ok(Self(user))
    }
}
