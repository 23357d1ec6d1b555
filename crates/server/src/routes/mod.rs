use axum::Router;

use crate::state::AppState;

pub mod chat;
pub mod health;
pub mod projects;
pub mod tasks;
pub mod trigger;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(trigger::router())
        .merge(chat::router())
        .merge(tasks::router())
        .merge(projects::router())
}
