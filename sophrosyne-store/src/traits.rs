//! Entity store contracts (C3): `Get`/`GetBySecondaryKey`/`List`/`Create`/
//! `Update`/`Delete`, generalized from the teacher's `r2e-data::Repository`
//! trait family onto this spec's cursor-paginated, soft-delete shape.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sophrosyne_core::cursor::Cursor;
use sophrosyne_core::domain::{Check, Profile, User};
use sophrosyne_core::error::RpcError;
use uuid::Uuid;

/// A page of results plus the cursor to fetch the next one, if any.
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Cursor>,
}

pub struct NewUser {
    pub name: String,
    pub email: String,
    pub protected_token: Vec<u8>,
    pub is_admin: bool,
    pub default_profile: Option<Uuid>,
}

#[derive(Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub is_admin: Option<bool>,
    pub default_profile: Option<Option<Uuid>>,
}

pub struct NewProfile {
    pub name: String,
    pub check_ids: Vec<Uuid>,
}

#[derive(Default)]
pub struct ProfilePatch {
    pub name: Option<String>,
}

pub struct NewCheck {
    pub name: String,
    pub upstream_services: Vec<String>,
}

#[derive(Default)]
pub struct CheckPatch {
    pub name: Option<String>,
    pub upstream_services: Option<Vec<String>>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<User, RpcError>;
    async fn get_by_email(&self, email: &str) -> Result<User, RpcError>;
    async fn get_by_protected_token(&self, protected_token: &[u8]) -> Result<User, RpcError>;
    async fn list(&self, cursor: Cursor, page_size: u32) -> Result<Page<User>, RpcError>;
    async fn create(&self, new: NewUser) -> Result<User, RpcError>;
    async fn update(&self, id: Uuid, patch: UserPatch) -> Result<User, RpcError>;
    async fn delete(&self, id: Uuid) -> Result<(), RpcError>;
    /// Replace the stored protected token for `id` (rotation). Returns the
    /// updated user; the caller is responsible for handing the raw token to
    /// the client exactly once.
    async fn rotate_token(&self, id: Uuid, protected_token: Vec<u8>) -> Result<User, RpcError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Profile, RpcError>;
    async fn get_by_name(&self, name: &str) -> Result<Profile, RpcError>;
    async fn list(&self, cursor: Cursor, page_size: u32) -> Result<Page<Profile>, RpcError>;
    async fn create(&self, new: NewProfile) -> Result<Profile, RpcError>;
    async fn update(&self, id: Uuid, patch: ProfilePatch) -> Result<Profile, RpcError>;
    async fn delete(&self, id: Uuid) -> Result<(), RpcError>;
    /// Replace the full set of checks a profile runs. Updates both the
    /// profile's `check_ids` and every affected check's `profile_ids` under
    /// one write guard, so the two never observably diverge.
    async fn set_profile_checks(&self, id: Uuid, check_ids: Vec<Uuid>) -> Result<Profile, RpcError>;
}

#[async_trait]
pub trait CheckStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Check, RpcError>;
    async fn get_by_name(&self, name: &str) -> Result<Check, RpcError>;
    async fn list(&self, cursor: Cursor, page_size: u32) -> Result<Page<Check>, RpcError>;
    async fn create(&self, new: NewCheck) -> Result<Check, RpcError>;
    async fn update(&self, id: Uuid, patch: CheckPatch) -> Result<Check, RpcError>;
    async fn delete(&self, id: Uuid) -> Result<(), RpcError>;
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

#[async_trait]
impl<T: UserStore + ?Sized> UserStore for std::sync::Arc<T> {
    async fn get(&self, id: Uuid) -> Result<User, RpcError> {
        (**self).get(id).await
    }
    async fn get_by_email(&self, email: &str) -> Result<User, RpcError> {
        (**self).get_by_email(email).await
    }
    async fn get_by_protected_token(&self, protected_token: &[u8]) -> Result<User, RpcError> {
        (**self).get_by_protected_token(protected_token).await
    }
    async fn list(&self, cursor: Cursor, page_size: u32) -> Result<Page<User>, RpcError> {
        (**self).list(cursor, page_size).await
    }
    async fn create(&self, new: NewUser) -> Result<User, RpcError> {
        (**self).create(new).await
    }
    async fn update(&self, id: Uuid, patch: UserPatch) -> Result<User, RpcError> {
        (**self).update(id, patch).await
    }
    async fn delete(&self, id: Uuid) -> Result<(), RpcError> {
        (**self).delete(id).await
    }
    async fn rotate_token(&self, id: Uuid, protected_token: Vec<u8>) -> Result<User, RpcError> {
        (**self).rotate_token(id, protected_token).await
    }
}

#[async_trait]
impl<T: ProfileStore + ?Sized> ProfileStore for std::sync::Arc<T> {
    async fn get(&self, id: Uuid) -> Result<Profile, RpcError> {
        (**self).get(id).await
    }
    async fn get_by_name(&self, name: &str) -> Result<Profile, RpcError> {
        (**self).get_by_name(name).await
    }
    async fn list(&self, cursor: Cursor, page_size: u32) -> Result<Page<Profile>, RpcError> {
        (**self).list(cursor, page_size).await
    }
    async fn create(&self, new: NewProfile) -> Result<Profile, RpcError> {
        (**self).create(new).await
    }
    async fn update(&self, id: Uuid, patch: ProfilePatch) -> Result<Profile, RpcError> {
        (**self).update(id, patch).await
    }
    async fn delete(&self, id: Uuid) -> Result<(), RpcError> {
        (**self).delete(id).await
    }
    async fn set_profile_checks(&self, id: Uuid, check_ids: Vec<Uuid>) -> Result<Profile, RpcError> {
        (**self).set_profile_checks(id, check_ids).await
    }
}

#[async_trait]
impl<T: CheckStore + ?Sized> CheckStore for std::sync::Arc<T> {
    async fn get(&self, id: Uuid) -> Result<Check, RpcError> {
        (**self).get(id).await
    }
    async fn get_by_name(&self, name: &str) -> Result<Check, RpcError> {
        (**self).get_by_name(name).await
    }
    async fn list(&self, cursor: Cursor, page_size: u32) -> Result<Page<Check>, RpcError> {
        (**self).list(cursor, page_size).await
    }
    async fn create(&self, new: NewCheck) -> Result<Check, RpcError> {
        (**self).create(new).await
    }
    async fn update(&self, id: Uuid, patch: CheckPatch) -> Result<Check, RpcError> {
        (**self).update(id, patch).await
    }
    async fn delete(&self, id: Uuid) -> Result<(), RpcError> {
        (**self).delete(id).await
    }
}
