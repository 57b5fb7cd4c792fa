use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::instrument;

use super::{repo, repo_types::AuditLog};
use crate::{auth::extractors::AdminUser, db::Pagination, error::AppResult, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    pub action: Option<String>,
    pub user_id: Option<i64>,
}

pub fn audit_routes() -> Router<AppState> {
    Router::new().route("/audit-logs", get(list_audit_logs))
}

#[instrument(skip(state))]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(filter): Query<AuditFilter>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Vec<AuditLog>>> {
    let (limit, offset) = page.clamped();
    let action = filter.action.map(|a| a.to_uppercase());
    let rows = repo::list(&state.db, action.as_deref(), filter.user_id, limit, offset).await?;
    Ok(Json(rows))
}
