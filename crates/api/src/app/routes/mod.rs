use axum::Router;

pub mod event_stream;
pub mod jobs;
pub mod system;

pub fn router() -> Router {
    Router::new()
        .merge(jobs::router())
        .merge(system::router())
        .merge(event_stream::router())
}
