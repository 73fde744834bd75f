//! Session and token bundle types
//!
//! `TokenBundle` is the wire shape shared by the login and refresh endpoints
//! and by the persisted record. `Session` is the in-memory view: its identity
//! accessors only answer while a credential is present, so a half-cleared
//! session can never leak a stale role or user id.

use std::fmt;

use common::Credential;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// Token bundle returned by the login and refresh endpoints.
///
/// `userId` arrives as a number from some backend revisions and as a string
/// from others; both are normalized to a string.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBundle {
    /// Bearer token for API calls
    pub token: String,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_role: Option<String>,
}

impl fmt::Debug for TokenBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBundle")
            .field("token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("user_name", &self.user_name)
            .field("user_role", &self.user_role)
            .finish()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "userId must be a string or number, got {other}"
        ))),
    }
}

/// The authenticated identity.
///
/// All four fields change together: a session is built whole from a bundle
/// and replaced whole in the store. Without a credential nothing else is
/// trusted, and the accessors return `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    credential: Option<Credential>,
    user_id: Option<String>,
    display_name: Option<String>,
    role: Option<String>,
}

impl Session {
    /// The null session.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Build a session from a login bundle, replacing every field.
    ///
    /// A blank token yields the anonymous session.
    pub fn from_bundle(bundle: TokenBundle) -> Self {
        let credential = Credential::new(bundle.token);
        if credential.is_empty() {
            return Self::anonymous();
        }
        Self {
            credential: Some(credential),
            user_id: bundle.user_id,
            display_name: bundle.user_name,
            role: bundle.user_role,
        }
    }

    /// The session after a refresh: the credential always rotates, identity
    /// fields present in the bundle replace the current ones and absent
    /// fields keep them.
    pub fn refreshed(&self, bundle: TokenBundle) -> Self {
        let TokenBundle {
            token,
            user_id,
            user_name,
            user_role,
        } = bundle;
        Self::from_bundle(TokenBundle {
            token,
            user_id: user_id.or_else(|| self.user_id().map(str::to_owned)),
            user_name: user_name.or_else(|| self.display_name().map(str::to_owned)),
            user_role: user_role.or_else(|| self.role().map(str::to_owned)),
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.trusted(&self.user_id)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.trusted(&self.display_name)
    }

    pub fn role(&self) -> Option<&str> {
        self.trusted(&self.role)
    }

    /// Persistable form, `None` for the anonymous session.
    pub fn to_bundle(&self) -> Option<TokenBundle> {
        let credential = self.credential.as_ref()?;
        Some(TokenBundle {
            token: credential.expose().to_string(),
            user_id: self.user_id.clone(),
            user_name: self.display_name.clone(),
            user_role: self.role.clone(),
        })
    }

    fn trusted<'a>(&self, field: &'a Option<String>) -> Option<&'a str> {
        if self.credential.is_some() {
            field.as_deref()
        } else {
            None
        }
    }
}
