use serde::{Deserialize, Serialize};

use super::repo_types::{Participant, Registration, Sex};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterParticipantRequest {
    pub event_id: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub sex: Sex,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub registration: Registration,
    pub participant: Participant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_camel_case_and_upper_sex() {
        let req: RegisterParticipantRequest = serde_json::from_value(serde_json::json!({
            "eventId": 3,
            "name": "Ada",
            "email": "ada@example.com",
            "phone": "+1 555 0100",
            "sex": "FEMALE"
        }))
        .unwrap();
        assert_eq!(req.event_id, 3);
        assert_eq!(req.sex, Sex::Female);

        let bad = serde_json::from_value::<RegisterParticipantRequest>(serde_json::json!({
            "eventId": 3, "name": "A", "email": "a@b.c", "phone": "1", "sex": "other"
        }));
        assert!(bad.is_err());
    }
}
