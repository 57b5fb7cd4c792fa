use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Register,
    LoginSuccess,
    LoginFailed,
    EmailVerified,
    PasswordResetRequested,
    PasswordReset,
    PasswordChanged,
    RoleChanged,
    StudentCreated,
    StudentUpdated,
    StudentDeleted,
    EventCreated,
    EventUpdated,
    EventDeleted,
    ParticipantRegistered,
    TokenCleanup,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Register => "REGISTER",
            AuditAction::LoginSuccess => "LOGIN_SUCCESS",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::EmailVerified => "EMAIL_VERIFIED",
            AuditAction::PasswordResetRequested => "PASSWORD_RESET_REQUESTED",
            AuditAction::PasswordReset => "PASSWORD_RESET",
            AuditAction::PasswordChanged => "PASSWORD_CHANGED",
            AuditAction::RoleChanged => "ROLE_CHANGED",
            AuditAction::StudentCreated => "STUDENT_CREATED",
            AuditAction::StudentUpdated => "STUDENT_UPDATED",
            AuditAction::StudentDeleted => "STUDENT_DELETED",
            AuditAction::EventCreated => "EVENT_CREATED",
            AuditAction::EventUpdated => "EVENT_UPDATED",
            AuditAction::EventDeleted => "EVENT_DELETED",
            AuditAction::ParticipantRegistered => "PARTICIPANT_REGISTERED",
            AuditAction::TokenCleanup => "TOKEN_CLEANUP",
        }
    }
}

/// Stored audit row. Never updated.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: i64,
    pub action: String,
    pub user_id: Option<i64>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub user_id: Option<i64>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: serde_json::Value,
}

impl AuditEntry {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            user_id: None,
            ip: None,
            user_agent: None,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn client(mut self, meta: &crate::auth::extractors::ClientMeta) -> Self {
        self.ip = meta.ip.clone();
        self.user_agent = meta.user_agent.clone();
        self
    }

    pub fn meta(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
