//! User profile document and its canonical template.

use crate::error::Result;
use crate::models::{merged, Identity};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Profile document stored at `users/{uid}`.
///
/// Readers only ever see the template merged with whatever the backend
/// returned, so every field here has a usable default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub auth_data: AuthData,
    pub prefs: Prefs,
    pub data: ProfileData,
}

/// Mirror of the identity that created the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthData {
    pub uid: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "emailVerified")]
    pub email_verified: bool,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

/// User-editable settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prefs {
    pub has_completed_onboarding: bool,
    pub preferred_language: String,
    pub theme_preference: String,
    pub voice_profile: Map<String, Value>,
    /// "popup" | "redirect"
    pub last_login_method: String,
    pub last_login_time: Option<String>,
    /// Drawer swipe direction: true = right to left
    pub drawer_swipe_rtl: bool,
}

impl Default for Prefs {
    fn default() -> Self {
        Self {
            has_completed_onboarding: false,
            preferred_language: "he".to_string(),
            theme_preference: "light".to_string(),
            voice_profile: Map::new(),
            last_login_method: String::new(),
            last_login_time: None,
            drawer_swipe_rtl: true,
        }
    }
}

/// Business profile fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileData {
    pub id_number: String,
    pub passport: String,
    pub email: String,
    pub full_name: String,
    pub phone: String,
    pub business_name: String,
    /// owner | manager | employee
    pub role: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub is_admin: bool,
    pub is_developer: bool,
    pub street: String,
    pub city: String,
    pub zip: String,
    pub country: String,
}

impl Default for ProfileData {
    fn default() -> Self {
        Self {
            id_number: String::new(),
            passport: String::new(),
            email: String::new(),
            full_name: String::new(),
            phone: String::new(),
            business_name: String::new(),
            role: "owner".to_string(),
            created_at: None,
            updated_at: None,
            is_admin: false,
            is_developer: false,
            street: String::new(),
            city: String::new(),
            zip: String::new(),
            country: "Israel".to_string(),
        }
    }
}

/// Top-level subsection of the profile document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileSection {
    AuthData,
    Prefs,
    Data,
}

impl ProfileSection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileSection::AuthData => "auth_data",
            ProfileSection::Prefs => "prefs",
            ProfileSection::Data => "data",
        }
    }
}

impl std::fmt::Display for ProfileSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl UserProfile {
    /// The canonical template as a JSON document.
    pub fn template() -> Value {
        // Plain structs with string keys always serialize.
        serde_json::to_value(UserProfile::default()).unwrap_or_default()
    }

    /// Build the in-memory profile from a (possibly partial) remote document.
    pub fn from_remote(remote: &Value) -> Result<Self> {
        Ok(serde_json::from_value(merged(&Self::template(), remote))?)
    }

    /// Document written on first sign-in when none exists remotely.
    pub fn new_document(
        identity: &Identity,
        created_at: &str,
        developer_email: Option<&str>,
    ) -> Value {
        let is_developer_account = matches!(
            (identity.email.as_deref(), developer_email),
            (Some(email), Some(dev)) if email == dev
        );
        let full_name = if is_developer_account {
            "developer".to_string()
        } else {
            identity.display_name.clone().unwrap_or_default()
        };

        let overlay = json!({
            "auth_data": {
                "uid": identity.uid,
                "email": identity.email,
                "displayName": identity.display_name.clone().unwrap_or_default(),
                "emailVerified": identity.email_verified,
                "photoURL": identity.photo_url,
            },
            "data": {
                "full_name": full_name,
                "email": identity.email.clone().unwrap_or_default(),
                "created_at": created_at,
            },
        });
        merged(&Self::template(), &overlay)
    }

    /// Profile owner, if the document has been linked to an identity.
    pub fn uid(&self) -> Option<&str> {
        self.auth_data.uid.as_deref()
    }

    /// Current value of one section as JSON.
    pub fn section(&self, section: ProfileSection) -> Value {
        let value = match section {
            ProfileSection::AuthData => serde_json::to_value(&self.auth_data),
            ProfileSection::Prefs => serde_json::to_value(&self.prefs),
            ProfileSection::Data => serde_json::to_value(&self.data),
        };
        value.unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Replace one section from a JSON value (merged over the template).
    pub fn set_section(&mut self, section: ProfileSection, value: &Value) -> Result<()> {
        let template = Self::template();
        let base = template
            .get(section.as_str())
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let value = merged(&base, value);
        match section {
            ProfileSection::AuthData => self.auth_data = serde_json::from_value(value)?,
            ProfileSection::Prefs => self.prefs = serde_json::from_value(value)?,
            ProfileSection::Data => self.data = serde_json::from_value(value)?,
        }
        Ok(())
    }
}
