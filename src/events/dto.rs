use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use super::repo_types::{Event, LocationType};
use crate::{
    error::{AppError, AppResult},
    form::{FileRefInput, FormData},
    storage,
};

/// Event fields as submitted in a multipart form.
#[derive(Debug, Clone)]
pub struct EventForm {
    pub title: Option<String>,
    pub focus: Option<String>,
    pub description: Option<String>,
    pub guest_name: Option<String>,
    pub guest_description: Option<String>,
    pub date: Option<OffsetDateTime>,
    pub location: Option<String>,
    pub location_type: Option<LocationType>,
    pub poster: FileRefInput,
}

fn parse_date(form: &FormData) -> AppResult<Option<OffsetDateTime>> {
    match form.string("date") {
        None => Ok(None),
        Some(raw) => OffsetDateTime::parse(&raw, &Rfc3339)
            .map(Some)
            .map_err(|_| AppError::bad_request("date must be an RFC 3339 timestamp")),
    }
}

fn parse_location_type(form: &FormData) -> AppResult<Option<LocationType>> {
    match form.string("locationType") {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| AppError::bad_request("locationType must be ONLINE or ONSITE")),
    }
}

impl EventForm {
    pub fn from_form(form: &FormData) -> AppResult<Self> {
        Ok(Self {
            title: form.string("title"),
            focus: form.string("focus"),
            description: form.string("description"),
            guest_name: form.string("guestName"),
            guest_description: form.string("guestDescription"),
            date: parse_date(form)?,
            location: form.string("location"),
            location_type: parse_location_type(form)?,
            poster: FileRefInput::from_form(form, "poster"),
        })
    }

    pub fn into_new(self) -> AppResult<NewEvent> {
        fn required<T>(v: Option<T>, field: &str) -> AppResult<T> {
            v.ok_or_else(|| AppError::bad_request(format!("{} is required", field)))
        }
        Ok(NewEvent {
            title: required(self.title, "title")?,
            focus: required(self.focus, "focus")?,
            description: required(self.description, "description")?,
            guest_name: self.guest_name,
            guest_description: self.guest_description,
            date: required(self.date, "date")?,
            location: required(self.location, "location")?,
            location_type: required(self.location_type, "locationType")?,
            poster: self.poster,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub focus: String,
    pub description: String,
    pub guest_name: Option<String>,
    pub guest_description: Option<String>,
    pub date: OffsetDateTime,
    pub location: String,
    pub location_type: LocationType,
    pub poster: FileRefInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    #[serde(flatten)]
    pub event: Event,
    pub poster_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_count: Option<i64>,
}

impl EventView {
    pub fn new(event: Event, participant_count: Option<i64>) -> Self {
        Self {
            poster_url: event.poster.as_deref().map(storage::public_url),
            event,
            participant_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> FormData {
        let mut f = FormData::default();
        for (k, v) in pairs {
            f.push_text(*k, *v);
        }
        f
    }

    #[test]
    fn parses_complete_event() {
        let f = form(&[
            ("title", "RustConf"),
            ("focus", "Systems"),
            ("description", "Talks"),
            ("date", "2026-05-01T18:00:00Z"),
            ("location", "Hall A"),
            ("locationType", "onsite"),
        ]);
        let new = EventForm::from_form(&f).unwrap().into_new().unwrap();
        assert_eq!(new.location_type, LocationType::Onsite);
        assert_eq!(new.date.year(), 2026);
        assert!(new.guest_name.is_none());
        assert_eq!(new.poster, FileRefInput::Unchanged);
    }

    #[test]
    fn rejects_bad_date_and_location_type() {
        assert!(matches!(
            EventForm::from_form(&form(&[("date", "tomorrow")])),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            EventForm::from_form(&form(&[("locationType", "moon")])),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn missing_title_is_reported() {
        match EventForm::from_form(&form(&[])).unwrap().into_new() {
            Err(AppError::BadRequest(msg)) => assert_eq!(msg, "title is required"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
