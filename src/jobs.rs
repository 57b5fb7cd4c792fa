use std::time::Duration;

use time::{OffsetDateTime, Time};
use tracing::{error, info};

use crate::{
    audit::{self, AuditAction, AuditEntry},
    auth::tokens::{EmailVerificationToken, PasswordResetToken},
    state::AppState,
};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Time left until the next 00:00 UTC. Exactly at midnight this is a full day.
pub fn duration_until_next_midnight(now: OffsetDateTime) -> Duration {
    let now = now.to_offset(time::UtcOffset::UTC);
    let next = now.replace_time(Time::MIDNIGHT) + time::Duration::days(1);
    Duration::try_from(next - now).unwrap_or(DAY)
}

/// Deletes used or expired reset tokens and expired verification tokens.
pub async fn purge_tokens(state: &AppState) -> anyhow::Result<(u64, u64)> {
    let reset = PasswordResetToken::purge_stale(&state.db).await?;
    let verify = EmailVerificationToken::purge_expired(&state.db).await?;
    Ok((reset, verify))
}

/// Runs [`purge_tokens`] at every 00:00 UTC.
pub fn spawn_token_cleanup(state: AppState) {
    tokio::spawn(async move {
        let first = duration_until_next_midnight(OffsetDateTime::now_utc());
        info!(in_secs = first.as_secs(), "token cleanup scheduled");
        let start = tokio::time::Instant::now() + first;
        let mut tick = tokio::time::interval_at(start, DAY);
        loop {
            tick.tick().await;
            match purge_tokens(&state).await {
                Ok((reset, verify)) => {
                    info!(reset, verify, "expired tokens purged");
                    audit::record(
                        &state.db,
                        AuditEntry::new(AuditAction::TokenCleanup).meta(serde_json::json!({
                            "passwordResetTokens": reset,
                            "emailVerificationTokens": verify,
                        })),
                    )
                    .await;
                }
                Err(e) => error!(error = ?e, "token cleanup failed"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn waits_until_next_utc_midnight() {
        assert_eq!(
            duration_until_next_midnight(datetime!(2026-03-10 23:00:00 UTC)),
            Duration::from_secs(3600)
        );
        assert_eq!(
            duration_until_next_midnight(datetime!(2026-03-10 00:00:00 UTC)),
            DAY
        );
        assert_eq!(
            duration_until_next_midnight(datetime!(2026-03-10 12:30:00.5 UTC)),
            Duration::from_millis(11 * 3600 * 1000 + 29 * 60 * 1000 + 59_500)
        );
    }

    #[test]
    fn other_offsets_are_converted_to_utc() {
        // 01:00 at +02:00 is 23:00 UTC the previous day
        assert_eq!(
            duration_until_next_midnight(datetime!(2026-03-11 01:00:00 +2)),
            Duration::from_secs(3600)
        );
    }
}
