use tracing::{info, instrument};

use super::{
    dto::{EventForm, EventView},
    repo::{InsertEvent, PatchEvent},
    repo_types::Event,
};
use crate::{
    audit::{self, AuditAction, AuditEntry},
    auth::extractors::{AuthUser, ClientMeta},
    error::{AppError, AppResult},
    form::Upload,
    state::AppState,
    storage,
};

fn event_not_found(id: i64) -> AppError {
    AppError::not_found(format!("Event with id {} not found", id))
}

pub(crate) async fn load(state: &AppState, id: i64) -> AppResult<Event> {
    Event::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| event_not_found(id))
}

#[instrument(skip(state, form, poster, client), fields(actor = admin.id))]
pub async fn create(
    state: &AppState,
    admin: &AuthUser,
    form: EventForm,
    poster: Option<Upload>,
    client: &ClientMeta,
) -> AppResult<EventView> {
    let new = form.into_new()?;

    let (db, new) = (&state.db, &new);
    let event = storage::write_with_attachment(
        state.storage.as_ref(),
        "poster",
        None,
        poster,
        &new.poster,
        |reference| async move {
            Event::insert(
                db,
                InsertEvent {
                    title: &new.title,
                    focus: &new.focus,
                    description: &new.description,
                    guest_name: new.guest_name.as_deref(),
                    guest_description: new.guest_description.as_deref(),
                    date: new.date,
                    location: &new.location,
                    location_type: new.location_type,
                    poster: reference.as_deref(),
                },
            )
            .await
            .map_err(AppError::from)
        },
    )
    .await?;

    audit::record(
        &state.db,
        AuditEntry::new(AuditAction::EventCreated)
            .user(admin.id)
            .client(client)
            .meta(serde_json::json!({ "eventId": event.id })),
    )
    .await;
    info!(event_id = event.id, "event created");
    Ok(EventView::new(event, Some(0)))
}

#[instrument(skip(state, form, poster, client), fields(actor = admin.id))]
pub async fn update(
    state: &AppState,
    admin: &AuthUser,
    id: i64,
    form: EventForm,
    poster: Option<Upload>,
    client: &ClientMeta,
) -> AppResult<EventView> {
    let existing = load(state, id).await?;

    let (db, form) = (&state.db, &form);
    let event = storage::write_with_attachment(
        state.storage.as_ref(),
        "poster",
        existing.poster.as_deref(),
        poster,
        &form.poster,
        |reference| async move {
            Event::update(
                db,
                id,
                PatchEvent {
                    title: form.title.as_deref(),
                    focus: form.focus.as_deref(),
                    description: form.description.as_deref(),
                    guest_name: form.guest_name.as_deref(),
                    guest_description: form.guest_description.as_deref(),
                    date: form.date,
                    location: form.location.as_deref(),
                    location_type: form.location_type,
                    poster: reference.as_deref(),
                },
            )
            .await?
            .ok_or_else(|| event_not_found(id))
        },
    )
    .await?;

    audit::record(
        &state.db,
        AuditEntry::new(AuditAction::EventUpdated)
            .user(admin.id)
            .client(client)
            .meta(serde_json::json!({ "eventId": id })),
    )
    .await;
    info!(event_id = id, "event updated");
    let count = Event::participant_count(&state.db, id).await?;
    Ok(EventView::new(event, Some(count)))
}

#[instrument(skip(state, client), fields(actor = admin.id))]
pub async fn remove(
    state: &AppState,
    admin: &AuthUser,
    id: i64,
    client: &ClientMeta,
) -> AppResult<()> {
    let event = load(state, id).await?;
    if !Event::delete(&state.db, id).await? {
        return Err(event_not_found(id));
    }
    if let Some(poster) = &event.poster {
        storage::discard(state.storage.as_ref(), poster).await;
    }

    audit::record(
        &state.db,
        AuditEntry::new(AuditAction::EventDeleted)
            .user(admin.id)
            .client(client)
            .meta(serde_json::json!({ "eventId": id, "title": event.title })),
    )
    .await;
    info!(event_id = id, "event deleted");
    Ok(())
}

pub async fn get(state: &AppState, id: i64) -> AppResult<EventView> {
    let event = load(state, id).await?;
    let count = Event::participant_count(&state.db, id).await?;
    Ok(EventView::new(event, Some(count)))
}

pub async fn list(state: &AppState, limit: i64, offset: i64) -> AppResult<Vec<EventView>> {
    Ok(Event::list(&state.db, limit, offset)
        .await?
        .into_iter()
        .map(|e| EventView::new(e, None))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::repo_types::Role, form::FormData};

    #[tokio::test]
    async fn incomplete_event_is_rejected_before_upload() {
        let state = AppState::fake();
        let mut f = FormData::default();
        f.push_text("title", "Meetup");
        let form = EventForm::from_form(&f).unwrap();
        let poster = Upload {
            field: "poster".into(),
            file_name: Some("p.png".into()),
            content_type: "image/png".into(),
            body: bytes::Bytes::from_static(b"p"),
        };
        let admin = AuthUser {
            id: 1,
            email: "admin@example.com".into(),
            role: Role::Admin,
        };
        let err = create(&state, &admin, form, Some(poster), &ClientMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
