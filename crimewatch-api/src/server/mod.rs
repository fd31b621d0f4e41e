use axum::{
    Router,
    extract::{
        FromRef, Request,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use axum_extra::typed_header::TypedHeaderRejection;
use crimewatch_common::model::{
    Id,
    auth::{AuthTokenDecodeError, AuthTokenHashError},
    comment::CommentMarker,
    post::PostMarker,
    report::ReportMarker,
    user::UserMarker,
};
use crimewatch_db::{DbClient, DbError, DbErrorKind};
use extract::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

mod auth;
mod extract;
mod routes;

pub type ServerRouter = Router<ServerState>;

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub db_client: Arc<DbClient>,
}

pub fn routes() -> ServerRouter {
    routes::routes().fallback(fallback)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

/// The closed set of failure classes a client can observe.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Unauthorized,
    Forbidden,
    Unavailable,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DbErrorKind> for ErrorKind {
    fn from(value: DbErrorKind) -> Self {
        match value {
            DbErrorKind::NotFound => ErrorKind::NotFound,
            DbErrorKind::Conflict => ErrorKind::Conflict,
            DbErrorKind::Validation => ErrorKind::Validation,
            DbErrorKind::Transient | DbErrorKind::Timeout => ErrorKind::Unavailable,
            DbErrorKind::Internal => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Query string rejected: {0}")]
    QueryRejection(#[from] QueryRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error("Authorization header was missing or invalid: {0}")]
    InvalidAuthorizationHeader(TypedHeaderRejection),
    #[error("The provided auth token could not be decoded: {0}")]
    InvalidAuthToken(#[from] AuthTokenDecodeError),
    #[error("The auth token could not be hashed: {0}")]
    AuthTokenHash(#[from] AuthTokenHashError),
    #[error("Provided token was invalid")]
    InvalidToken,
    #[error("Provided token has expired")]
    ExpiredToken,
    #[error("This action requires an admin")]
    AdminRequired,
    #[error("Only the author or an admin may do this")]
    NotAuthor,
    #[error(transparent)]
    Database(#[from] DbError),
    #[error("Post with id {0} was not found.")]
    PostByIdNotFound(Id<PostMarker>),
    #[error("User with id {0} was not found.")]
    UserByIdNotFound(Id<UserMarker>),
    #[error("Comment with id {0} was not found.")]
    CommentByIdNotFound(Id<CommentMarker>),
    #[error("Report with id {0} was not found.")]
    ReportByIdNotFound(Id<ReportMarker>),
}

impl ServerError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PathRejection(_)
            | ServerError::PostByIdNotFound(_)
            | ServerError::UserByIdNotFound(_)
            | ServerError::CommentByIdNotFound(_)
            | ServerError::ReportByIdNotFound(_) => ErrorKind::NotFound,
            ServerError::InvalidAuthorizationHeader(_)
            | ServerError::InvalidAuthToken(_)
            | ServerError::InvalidToken
            | ServerError::ExpiredToken => ErrorKind::Unauthorized,
            ServerError::AdminRequired | ServerError::NotAuthor => ErrorKind::Forbidden,
            ServerError::QueryRejection(_) | ServerError::JsonRejection(_) => {
                ErrorKind::Validation
            }
            ServerError::JsonResponse(_) | ServerError::AuthTokenHash(_) => ErrorKind::Internal,
            ServerError::Database(err) => err.kind().into(),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.kind().status()
    }

    fn message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "Internal server error".to_owned(),
            ErrorKind::Unavailable => "The service is busy, please try again".to_owned(),
            _ => self.to_string(),
        }
    }

    fn error_sources(&self) -> Vec<ErrorSource> {
        let (path, message) = match self {
            ServerError::PathRejection(rejection) => ("path", rejection.body_text()),
            ServerError::QueryRejection(rejection) => ("query", rejection.body_text()),
            ServerError::JsonRejection(rejection) => ("body", rejection.body_text()),
            ServerError::InvalidAuthorizationHeader(rejection) => {
                ("authorization", rejection.to_string())
            }
            ServerError::InvalidAuthToken(err) => ("authorization", err.to_string()),
            ServerError::Database(DbError::DuplicateOpenReport { .. }) => {
                ("postId", "An open report by you already exists".to_owned())
            }
            _ => return Vec::new(),
        };

        vec![ErrorSource {
            path: path.to_owned(),
            message,
        }]
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
pub struct ErrorSource {
    pub path: String,
    pub message: String,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    success: bool,
    message: String,
    error_sources: Vec<ErrorSource>,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(error = %self, %status, "Replying with error");
        } else {
            warn!(error = %self, %status, "Replying with error");
        }
        debug!(error = ?self, "Error details");

        let error_response = ErrorResponse {
            success: false,
            message: self.message(),
            error_sources: self.error_sources(),
        };
        (status, Json(error_response)).into_response()
    }
}

/// Body of successful replies that carry no resource.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::server::{ErrorKind, ErrorResponse, ServerError, fallback};
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
        response::{IntoResponse, Response},
    };
    use crimewatch_common::model::{
        Id, ModelValidationError,
        report::{ReportNotPendingError, ReportStatus},
    };
    use crimewatch_db::{DbError, DbErrorKind};

    async fn body(response: Response) -> ErrorResponse {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let request = Request::builder()
            .uri("/nowhere")
            .body(Body::empty())
            .unwrap();
        let response = fallback(request).await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body(response).await;
        assert!(!body.success);
        assert!(body.message.contains("/nowhere"));
        assert!(body.error_sources.is_empty());
    }

    #[tokio::test]
    async fn duplicate_reports_conflict() {
        let err = ServerError::Database(DbError::DuplicateOpenReport {
            user: Id::from(1),
            post: Id::from(2),
        });
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body(response).await;
        assert_eq!(body.error_sources.len(), 1);
        assert_eq!(body.error_sources[0].path, "postId");
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let err = ServerError::Database(DbError::Data(
            ModelValidationError::CounterOutOfRange(-1),
        ));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(response).await.message, "Internal server error");
    }

    #[test]
    fn database_kinds_map_to_statuses() {
        let reviewed = ServerError::Database(DbError::ReportNotPending(
            Id::from(3),
            ReportNotPendingError(ReportStatus::Approved),
        ));
        assert_eq!(reviewed.status(), StatusCode::NOT_FOUND);

        let missing_post = ServerError::Database(DbError::PostNotFound(Id::from(4)));
        assert_eq!(missing_post.status(), StatusCode::NOT_FOUND);

        assert_eq!(
            ErrorKind::from(DbErrorKind::Timeout).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorKind::from(DbErrorKind::Transient),
            ErrorKind::Unavailable
        );
        assert_eq!(ServerError::AdminRequired.status(), StatusCode::FORBIDDEN);
        assert_eq!(ServerError::ExpiredToken.status(), StatusCode::UNAUTHORIZED);
    }
}
