use crate::server::ServerRouter;
use axum::Router;

mod admin;
mod comments;
mod posts;
mod reports;
mod users;
mod votes;

pub fn routes() -> ServerRouter {
    Router::new()
        .merge(users::routes())
        .merge(posts::routes())
        .merge(comments::routes())
        .merge(votes::routes())
        .merge(reports::routes())
        .merge(admin::routes())
}
