use tracing::{info, instrument, warn};

use super::{
    dto::{RegisterParticipantRequest, RegistrationResponse},
    repo::UpsertParticipant,
    repo_types::{Participant, Registration},
};
use crate::{
    audit::{self, AuditAction, AuditEntry},
    auth::{
        extractors::ClientMeta,
        services::{is_valid_email, normalize_email},
    },
    error::{AppError, AppResult},
    events::repo_types::Event,
    state::AppState,
};

/// Trimmed, normalized request; rejects blank fields and malformed email.
pub(crate) fn validate(mut req: RegisterParticipantRequest) -> AppResult<RegisterParticipantRequest> {
    req.name = req.name.trim().to_string();
    req.phone = req.phone.trim().to_string();
    req.email = normalize_email(&req.email);
    if req.name.is_empty() {
        return Err(AppError::bad_request("name is required"));
    }
    if req.phone.is_empty() {
        return Err(AppError::bad_request("phone is required"));
    }
    if !is_valid_email(&req.email) {
        return Err(AppError::bad_request("Invalid email"));
    }
    Ok(req)
}

#[instrument(skip(state, req, client), fields(event_id = req.event_id))]
pub async fn register(
    state: &AppState,
    req: RegisterParticipantRequest,
    client: &ClientMeta,
) -> AppResult<RegistrationResponse> {
    let req = validate(req)?;

    let mut tx = state.db.begin().await?;
    if Event::find_by_id(&mut *tx, req.event_id).await?.is_none() {
        return Err(AppError::not_found(format!(
            "Event with id {} not found",
            req.event_id
        )));
    }
    let participant = Participant::upsert(
        &mut *tx,
        UpsertParticipant {
            name: &req.name,
            email: &req.email,
            phone: &req.phone,
            sex: req.sex,
        },
    )
    .await?;
    let Some(registration) = Registration::insert(&mut *tx, req.event_id, participant.id).await?
    else {
        warn!(participant_id = participant.id, "duplicate registration");
        return Err(AppError::conflict(
            "Participant is already registered for this event",
        ));
    };
    tx.commit().await?;

    audit::record(
        &state.db,
        AuditEntry::new(AuditAction::ParticipantRegistered)
            .client(client)
            .meta(serde_json::json!({
                "eventId": req.event_id,
                "participantId": participant.id,
            })),
    )
    .await;
    info!(participant_id = participant.id, "participant registered");
    Ok(RegistrationResponse {
        registration,
        participant,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participants::repo_types::Sex;

    fn req(name: &str, email: &str, phone: &str) -> RegisterParticipantRequest {
        RegisterParticipantRequest {
            event_id: 1,
            name: name.into(),
            email: email.into(),
            phone: phone.into(),
            sex: Sex::Male,
        }
    }

    #[test]
    fn normalizes_and_validates() {
        let ok = validate(req(" Alan ", " Alan@Example.COM ", " 123 ")).unwrap();
        assert_eq!(ok.name, "Alan");
        assert_eq!(ok.email, "alan@example.com");
        assert_eq!(ok.phone, "123");

        assert!(matches!(
            validate(req("  ", "a@b.co", "1")),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            validate(req("A", "not-an-email", "1")),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            validate(req("A", "a@b.co", "")),
            Err(AppError::BadRequest(_))
        ));
    }
}
