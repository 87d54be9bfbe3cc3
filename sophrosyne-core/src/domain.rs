//! Core entity and request/response types shared across the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered principal: identity plus bearer-token material.
///
/// `protected_token` is the keyed hash of the raw token a client presents —
/// never the raw bytes themselves. `token` is populated only transiently, by
/// the authentication middleware, and is zeroed before being handed to
/// handler code (see `sophrosyne-transport`'s auth layer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub protected_token: Vec<u8>,
    pub is_admin: bool,
    pub default_profile: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A named, ordered set of checks applied together to a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub check_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub const DEFAULT_NAME: &'static str = "default";

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A named upstream content classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub id: Uuid,
    pub name: String,
    pub upstream_services: Vec<String>,
    /// Inverse of `Profile.check_ids`; kept symmetric by the store.
    pub profile_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Check {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// `(principal, action, resource?)` triple submitted to the authorization engine.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub principal: AuthPrincipal,
    pub action: String,
    pub resource: Option<Resource>,
}

/// The subset of `User` the authorization engine needs — deliberately not the
/// full entity, so the engine never touches token material.
#[derive(Debug, Clone)]
pub struct AuthPrincipal {
    pub id: Uuid,
    pub is_admin: bool,
}

impl From<&User> for AuthPrincipal {
    fn from(u: &User) -> Self {
        AuthPrincipal {
            id: u.id,
            is_admin: u.is_admin,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resource {
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
}

/// Incoming scan payload. Exactly one of `text`/`image` must be set.
#[derive(Debug, Clone, Serialize, Deserialize, garde::Validate)]
pub struct ScanRequest {
    #[garde(length(min = 1))]
    pub text: Option<String>,
    #[garde(length(min = 1))]
    pub image: Option<String>,
    #[garde(length(min = 1))]
    pub profile: Option<String>,
}

impl ScanRequest {
    /// Semantic validation beyond per-field garde rules: exactly one payload kind.
    pub fn validate_semantics(&self) -> Result<(), &'static str> {
        match (&self.text, &self.image) {
            (None, None) => Err("exactly one of text or image must be set"),
            (Some(_), Some(_)) => Err("exactly one of text or image must be set"),
            _ => Ok(()),
        }
    }
}

/// Outcome of a single check within a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: bool,
    pub detail: String,
}

/// Aggregated scan outcome returned to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub result: bool,
    pub checks: std::collections::HashMap<String, CheckResult>,
}
