//! Login payloads.
//!
//! All time fields on the wire are milliseconds. Local login storage keeps
//! microseconds; conversion happens in the engine's record codec.

use crate::record::CleartextPayload;
use crate::types::{Guid, Timestamp};
use serde::{Deserialize, Serialize};

/// Cleartext payload of a login record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoginPayload {
    /// Login GUID.
    pub id: Guid,
    /// Origin the login belongs to.
    pub hostname: String,
    /// HTTP auth realm, for HTTP auth logins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_realm: Option<String>,
    /// Form action origin, for form logins.
    #[serde(rename = "formSubmitURL", skip_serializing_if = "Option::is_none")]
    pub form_submit_url: Option<String>,
    /// Username, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password.
    pub password: String,
    /// Name of the username form field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username_field: Option<String>,
    /// Name of the password form field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_field: Option<String>,
    /// Number of times the login was used.
    pub times_used: u64,
    /// Creation time in milliseconds.
    pub time_created: Timestamp,
    /// Last use time in milliseconds.
    pub time_last_used: Timestamp,
    /// Last password change time in milliseconds.
    pub time_password_changed: Timestamp,
    /// Deletion flag.
    pub deleted: bool,
}

impl CleartextPayload for LoginPayload {
    fn id(&self) -> &Guid {
        &self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn is_valid(&self) -> bool {
        if self.id.is_empty() {
            return false;
        }
        if self.deleted {
            return true;
        }
        !self.hostname.is_empty()
            && !self.password.is_empty()
            && (self.http_realm.is_some() || self.form_submit_url.is_some())
    }

    fn tombstone(id: Guid) -> Self {
        Self {
            id,
            deleted: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form_login() -> LoginPayload {
        LoginPayload {
            id: Guid::new("loginloginlo"),
            hostname: "https://accounts.example.com".into(),
            form_submit_url: Some("https://accounts.example.com".into()),
            username: Some("alice".into()),
            password: "hunter2".into(),
            times_used: 3,
            time_created: 1_500,
            ..LoginPayload::default()
        }
    }

    #[test]
    fn wire_names() {
        let json = serde_json::to_value(form_login()).unwrap();
        assert_eq!(json["formSubmitURL"], "https://accounts.example.com");
        assert_eq!(json["timesUsed"], 3);
        assert_eq!(json["timeCreated"], 1_500);
        assert!(json.get("httpRealm").is_none());
    }

    #[test]
    fn requires_realm_or_form_target() {
        assert!(form_login().is_valid());

        let mut login = form_login();
        login.form_submit_url = None;
        assert!(!login.is_valid());

        login.http_realm = Some("Intranet".into());
        assert!(login.is_valid());
    }

    #[test]
    fn requires_hostname_and_password() {
        let mut login = form_login();
        login.password.clear();
        assert!(!login.is_valid());

        let mut login = form_login();
        login.hostname.clear();
        assert!(!login.is_valid());
    }

    #[test]
    fn tombstone_is_valid_without_fields() {
        let tombstone = LoginPayload::tombstone(Guid::new("loginloginlo"));
        assert!(tombstone.is_valid());
        assert!(tombstone.is_deleted());
    }
}
