use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Mailbox address, also the IMAP login
    pub email: String,
    pub name: String,
    /// base64(nonce || AES-GCM ciphertext) of the app password
    #[serde(skip_serializing)]
    pub encrypted_credential: Option<String>,
    /// Free text used to personalize drafts
    pub profile: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the settings screen shows. Never includes the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub has_app_password: bool,
    pub user_profile: String,
}
