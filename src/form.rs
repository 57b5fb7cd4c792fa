use std::collections::HashMap;
use std::str::FromStr;

use axum::extract::Multipart;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    error::{AppError, AppResult},
    storage,
};

/// A file part of a multipart form.
#[derive(Debug, Clone)]
pub struct Upload {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: String,
    pub body: Bytes,
}

/// Text parts and file parts of a multipart body, keyed by field name.
/// A repeated field keeps its last value.
#[derive(Debug, Default)]
pub struct FormData {
    text: HashMap<String, String>,
    files: HashMap<String, Upload>,
}

impl FormData {
    pub async fn read(mut mp: Multipart) -> AppResult<Self> {
        let mut form = FormData::default();
        while let Some(field) = mp
            .next_field()
            .await
            .map_err(|e| AppError::bad_request(format!("Malformed multipart body: {}", e)))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field
                        .content_type()
                        .map(str::to_string)
                        .unwrap_or_else(|| "application/octet-stream".into());
                    let body = field.bytes().await.map_err(|e| {
                        AppError::bad_request(format!("Could not read file {}: {}", name, e))
                    })?;
                    form.push_file(Upload {
                        field: name,
                        file_name: Some(file_name),
                        content_type,
                        body,
                    });
                }
                None => {
                    let value = field.text().await.map_err(|e| {
                        AppError::bad_request(format!("Could not read field {}: {}", name, e))
                    })?;
                    form.push_text(name, value);
                }
            }
        }
        debug!(fields = form.text.len(), files = form.files.len(), "multipart form read");
        Ok(form)
    }

    pub fn push_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.text.insert(name.into(), value.into());
    }

    /// Browsers submit an empty, unnamed part for an untouched file input.
    pub fn push_file(&mut self, upload: Upload) {
        let empty = upload.body.is_empty()
            && upload.file_name.as_deref().map_or(true, str::is_empty);
        if !empty {
            self.files.insert(upload.field.clone(), upload);
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.text.get(name).map(String::as_str)
    }

    pub fn take_file(&mut self, name: &str) -> Option<Upload> {
        self.files.remove(name)
    }

    /// Trimmed text; blank counts as absent.
    pub fn string(&self, name: &str) -> Option<String> {
        self.text(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub fn parse<T: FromStr>(&self, name: &str) -> AppResult<Option<T>> {
        match self.string(name) {
            None => Ok(None),
            Some(v) => v
                .parse::<T>()
                .map(Some)
                .map_err(|_| AppError::bad_request(format!("{} must be a number", name))),
        }
    }

    pub fn flag(&self, name: &str) -> AppResult<Option<bool>> {
        match self.string(name).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(None),
            Some("true") | Some("1") => Ok(Some(true)),
            Some("false") | Some("0") => Ok(Some(false)),
            Some(_) => Err(AppError::bad_request(format!("{} must be true or false", name))),
        }
    }

    /// A JSON document carried in a text part.
    pub fn json<T: DeserializeOwned>(&self, name: &str) -> AppResult<Option<T>> {
        match self.string(name) {
            None => Ok(None),
            Some(v) => serde_json::from_str(&v)
                .map(Some)
                .map_err(|e| AppError::bad_request(format!("{} is not valid JSON: {}", name, e))),
        }
    }
}

/// How a request wants an attached file reference changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRefInput {
    /// Field absent.
    Unchanged,
    /// Text value `null` or empty.
    Remove,
    /// Any other text value, used verbatim.
    Replace(String),
}

impl FileRefInput {
    pub fn from_form(form: &FormData, name: &str) -> Self {
        match form.text(name).map(str::trim) {
            None => FileRefInput::Unchanged,
            Some("") | Some("null") => FileRefInput::Remove,
            Some(v) => FileRefInput::Replace(v.to_string()),
        }
    }

    /// A literal may be an external URL or the record's current file. It
    /// may not name any other stored upload, which a later removal would
    /// delete.
    pub fn ensure_not_foreign(&self, existing: Option<&str>, field: &str) -> AppResult<()> {
        let FileRefInput::Replace(literal) = self else {
            return Ok(());
        };
        match storage::local_file_name(literal) {
            Some(name) if existing.and_then(storage::local_file_name) != Some(name) => {
                Err(AppError::bad_request(format!(
                    "{} must be an uploaded file or an external URL",
                    field
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Outcome of resolving an attachment change against the stored reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPlan {
    /// Value to store in the reference column.
    pub reference: Option<String>,
    /// Previously stored file to delete once the write has committed.
    pub discard: Option<String>,
}

/// Priority: a fresh upload, then explicit removal, then a literal
/// replacement reference, then no change.
pub fn resolve_attachment(
    existing: Option<&str>,
    uploaded: Option<&str>,
    input: &FileRefInput,
) -> AttachmentPlan {
    if let Some(new) = uploaded {
        return AttachmentPlan {
            reference: Some(new.to_string()),
            discard: existing.filter(|old| *old != new).map(str::to_string),
        };
    }
    match input {
        FileRefInput::Remove => AttachmentPlan {
            reference: None,
            discard: existing.map(str::to_string),
        },
        FileRefInput::Replace(literal) => AttachmentPlan {
            reference: Some(literal.clone()),
            discard: None,
        },
        FileRefInput::Unchanged => AttachmentPlan {
            reference: existing.map(str::to_string),
            discard: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, extract::FromRequest, http::Request};
    use serde::Deserialize;

    use super::*;

    fn form(pairs: &[(&str, &str)]) -> FormData {
        let mut f = FormData::default();
        for (k, v) in pairs {
            f.push_text(*k, *v);
        }
        f
    }

    #[test]
    fn parses_numbers_and_flags() {
        let f = form(&[("year", " 2020 "), ("grad", "TRUE"), ("bad", "x")]);
        assert_eq!(f.parse::<i32>("year").unwrap(), Some(2020));
        assert_eq!(f.parse::<i32>("missing").unwrap(), None);
        assert!(matches!(f.parse::<i32>("bad"), Err(AppError::BadRequest(_))));
        assert_eq!(f.flag("grad").unwrap(), Some(true));
        assert!(f.flag("bad").is_err());
    }

    #[test]
    fn json_field_rejects_malformed() {
        #[derive(Deserialize)]
        struct Item {
            #[allow(dead_code)]
            name: String,
        }
        let f = form(&[("ok", r#"[{"name":"a"}]"#), ("broken", "[{name:")]);
        assert_eq!(f.json::<Vec<Item>>("ok").unwrap().unwrap().len(), 1);
        match f.json::<Vec<Item>>("broken") {
            Err(AppError::BadRequest(msg)) => assert!(msg.starts_with("broken is not valid JSON")),
            _ => panic!("expected bad request"),
        }
    }

    #[test]
    fn file_ref_input_sentinels() {
        let f = form(&[("a", "null"), ("b", ""), ("c", "photo-1-2.png")]);
        assert_eq!(FileRefInput::from_form(&f, "a"), FileRefInput::Remove);
        assert_eq!(FileRefInput::from_form(&f, "b"), FileRefInput::Remove);
        assert_eq!(
            FileRefInput::from_form(&f, "c"),
            FileRefInput::Replace("photo-1-2.png".into())
        );
        assert_eq!(FileRefInput::from_form(&f, "d"), FileRefInput::Unchanged);
    }

    #[test]
    fn literal_naming_another_upload_is_rejected() {
        let other = FileRefInput::Replace("poster-1700000000000-123456789.png".into());
        assert!(matches!(
            other.ensure_not_foreign(Some("photo-1-2.png"), "photo"),
            Err(AppError::BadRequest(_))
        ));
        assert!(other.ensure_not_foreign(None, "photo").is_err());

        let own = FileRefInput::Replace("/uploads/photo-1-2.png".into());
        assert!(own.ensure_not_foreign(Some("photo-1-2.png"), "photo").is_ok());

        let remote = FileRefInput::Replace("https://cdn.example/x.png".into());
        assert!(remote.ensure_not_foreign(None, "photo").is_ok());
        assert!(FileRefInput::Remove.ensure_not_foreign(Some("a.png"), "photo").is_ok());
    }

    #[test]
    fn empty_file_parts_are_dropped() {
        let mut f = FormData::default();
        f.push_file(Upload {
            field: "photo".into(),
            file_name: Some(String::new()),
            content_type: "application/octet-stream".into(),
            body: Bytes::new(),
        });
        assert!(f.take_file("photo").is_none());
    }

    #[tokio::test]
    async fn reads_text_and_file_parts() {
        let boundary = "XBOUNDARY";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nJane Doe\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"me.png\"\r\n\
             Content-Type: image/png\r\n\r\nPNGDATA\r\n--{b}--\r\n",
            b = boundary
        );
        let req = Request::builder()
            .method("POST")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();
        let mp = Multipart::from_request(req, &()).await.unwrap();
        let mut f = FormData::read(mp).await.unwrap();
        assert_eq!(f.string("name").as_deref(), Some("Jane Doe"));
        let up = f.take_file("photo").unwrap();
        assert_eq!(up.content_type, "image/png");
        assert_eq!(up.file_name.as_deref(), Some("me.png"));
        assert_eq!(&up.body[..], b"PNGDATA");
    }

    #[test]
    fn upload_wins_and_discards_different_old_file() {
        let plan = resolve_attachment(Some("old.png"), Some("new.png"), &FileRefInput::Remove);
        assert_eq!(plan.reference.as_deref(), Some("new.png"));
        assert_eq!(plan.discard.as_deref(), Some("old.png"));

        let same = resolve_attachment(Some("a.png"), Some("a.png"), &FileRefInput::Unchanged);
        assert_eq!(same.discard, None);

        let fresh = resolve_attachment(None, Some("n.png"), &FileRefInput::Unchanged);
        assert_eq!(fresh.reference.as_deref(), Some("n.png"));
        assert_eq!(fresh.discard, None);
    }

    #[test]
    fn removal_beats_literal_and_clears_reference() {
        let plan = resolve_attachment(Some("old.png"), None, &FileRefInput::Remove);
        assert_eq!(plan, AttachmentPlan { reference: None, discard: Some("old.png".into()) });

        let nothing = resolve_attachment(None, None, &FileRefInput::Remove);
        assert_eq!(nothing, AttachmentPlan { reference: None, discard: None });
    }

    #[test]
    fn literal_replacement_is_used_verbatim_without_discard() {
        let plan = resolve_attachment(
            Some("old.png"),
            None,
            &FileRefInput::Replace("https://cdn.example/x.png".into()),
        );
        assert_eq!(plan.reference.as_deref(), Some("https://cdn.example/x.png"));
        assert_eq!(plan.discard, None);
    }

    #[test]
    fn no_input_keeps_existing() {
        let plan = resolve_attachment(Some("old.png"), None, &FileRefInput::Unchanged);
        assert_eq!(plan.reference.as_deref(), Some("old.png"));
        assert_eq!(plan.discard, None);
    }
}
