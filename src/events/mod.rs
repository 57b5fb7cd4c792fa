use axum::Router;

use crate::state::AppState;

pub mod dto;
pub mod handlers;
mod repo;
pub mod repo_types;
pub mod services;

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    handlers::event_routes(max_upload_bytes)
}
