use axum::Router;
use sqlx::PgPool;
use tracing::warn;

use crate::state::AppState;

pub mod handlers;
mod repo;
pub mod repo_types;

pub use repo_types::{AuditAction, AuditEntry};

pub fn router() -> Router<AppState> {
    handlers::audit_routes()
}

/// Appends an audit row. Failures are logged and swallowed.
pub async fn record(db: &PgPool, entry: AuditEntry) {
    if let Err(e) = repo::insert(db, &entry).await {
        warn!(error = %e, action = entry.action.as_str(), "audit write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_match_serde() {
        for action in [
            AuditAction::LoginFailed,
            AuditAction::PasswordResetRequested,
            AuditAction::TokenCleanup,
        ] {
            let json = serde_json::to_value(action).unwrap();
            assert_eq!(json, action.as_str());
        }
    }

    #[test]
    fn entry_builder_sets_fields() {
        let e = AuditEntry::new(AuditAction::StudentCreated)
            .user(4)
            .meta(serde_json::json!({"studentId": 9}));
        assert_eq!(e.user_id, Some(4));
        assert_eq!(e.metadata["studentId"], 9);
        assert!(e.ip.is_none());
    }
}
