//! In-process backing implementation of the entity store contracts.
//!
//! Stands in for a connection pool (see `SPEC_FULL.md` §1): a
//! `tokio::sync::RwLock<HashMap<Uuid, Entity>>` per entity type, with a
//! parallel secondary-key map under the same lock for uniqueness. Grounded on
//! `r2e-data`'s `Entity`/`Repository` shape, generalized to this spec's
//! cursor-paginated, soft-deleted contract.

use std::collections::HashMap;

use async_trait::async_trait;
use sophrosyne_core::cursor::Cursor;
use sophrosyne_core::domain::{Check, Profile, User};
use sophrosyne_core::error::RpcError;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::traits::{
    now, CheckPatch, CheckStore, NewCheck, NewProfile, NewUser, Page, ProfilePatch, ProfileStore,
    UserPatch, UserStore,
};

/// Fetch `page_size + 1` rows starting at `cursor.position`, then trim the
/// surplus row off and use its presence to decide whether a next cursor
/// exists (§4.2/§4.3's page-size+1 algorithm).
fn paginate<T: Clone>(ordered: &[(Uuid, T)], cursor: &Cursor, page_size: u32) -> (Vec<T>, Option<Cursor>) {
    let start = cursor.position as usize;
    if start >= ordered.len() {
        return (Vec::new(), None);
    }
    let fetch_end = (start + page_size as usize + 1).min(ordered.len());
    let window = &ordered[start..fetch_end];
    let has_more = window.len() as u32 > page_size;
    let items: Vec<T> = window
        .iter()
        .take(page_size as usize)
        .map(|(_, v)| v.clone())
        .collect();
    let next = if has_more {
        Some(cursor.next(page_size as u64))
    } else {
        None
    };
    (items, next)
}

struct UserTable {
    by_id: HashMap<Uuid, User>,
    by_email: HashMap<String, Uuid>,
}

struct ProfileTable {
    by_id: HashMap<Uuid, Profile>,
    by_name: HashMap<String, Uuid>,
}

struct CheckTable {
    by_id: HashMap<Uuid, Check>,
    by_name: HashMap<String, Uuid>,
}

/// All three entity tables, wrapped so that `set_profile_checks` can take
/// both the profile and check write guards at once without deadlocking
/// against an ordinary `ProfileStore`/`CheckStore` caller (lock order is
/// always profiles-then-checks).
pub struct GatewayStore {
    users: RwLock<UserTable>,
    profiles: RwLock<ProfileTable>,
    checks: RwLock<CheckTable>,
}

impl GatewayStore {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(UserTable {
                by_id: HashMap::new(),
                by_email: HashMap::new(),
            }),
            profiles: RwLock::new(ProfileTable {
                by_id: HashMap::new(),
                by_name: HashMap::new(),
            }),
            checks: RwLock::new(CheckTable {
                by_id: HashMap::new(),
                by_name: HashMap::new(),
            }),
        }
    }

    /// Create the root principal and its default profile if they don't
    /// already exist, or replace the root principal if `recreate` is set.
    /// Returns the root user's raw token when (re)created, `None` if the
    /// root principal already existed and `recreate` was false. When
    /// `static_root_token` is set (test/dev only), its bytes are used
    /// verbatim instead of minting a fresh random token.
    pub async fn bootstrap_root(
        &self,
        name: &str,
        email: &str,
        recreate: bool,
        site_key: &[u8],
        salt: &[u8],
        static_root_token: Option<&str>,
    ) -> Option<Vec<u8>> {
        let mut users = self.users.write().await;
        if let Some(existing_id) = users.by_email.get(email).copied() {
            if !recreate {
                return None;
            }
            users.by_id.remove(&existing_id);
            users.by_email.remove(email);
        }

        let mut profiles = self.profiles.write().await;
        let default_profile_id = match profiles.by_name.get(Profile::DEFAULT_NAME) {
            Some(id) => *id,
            None => {
                let id = Uuid::new_v4();
                let ts = now();
                profiles.by_id.insert(
                    id,
                    Profile {
                        id,
                        name: Profile::DEFAULT_NAME.to_string(),
                        check_ids: Vec::new(),
                        created_at: ts,
                        updated_at: ts,
                        deleted_at: None,
                    },
                );
                profiles.by_name.insert(Profile::DEFAULT_NAME.to_string(), id);
                id
            }
        };

        let raw_token = match static_root_token {
            Some(token) => token.as_bytes().to_vec(),
            None => sophrosyne_core::token::generate_raw_token(),
        };
        let protected = sophrosyne_core::token::protect(&raw_token, site_key, salt);

        let id = Uuid::new_v4();
        let ts = now();
        users.by_id.insert(
            id,
            User {
                id,
                name: name.to_string(),
                email: email.to_string(),
                protected_token: protected,
                is_admin: true,
                default_profile: Some(default_profile_id),
                created_at: ts,
                updated_at: ts,
                deleted_at: None,
            },
        );
        users.by_email.insert(email.to_string(), id);

        Some(raw_token)
    }

    fn ordered_users(table: &UserTable) -> Vec<(Uuid, User)> {
        let mut items: Vec<(Uuid, User)> = table
            .by_id
            .values()
            .filter(|u| !u.is_deleted())
            .map(|u| (u.id, u.clone()))
            .collect();
        items.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at).then(a.0.cmp(&b.0)));
        items
    }

    fn ordered_profiles(table: &ProfileTable) -> Vec<(Uuid, Profile)> {
        let mut items: Vec<(Uuid, Profile)> = table
            .by_id
            .values()
            .filter(|p| !p.is_deleted())
            .map(|p| (p.id, p.clone()))
            .collect();
        items.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at).then(a.0.cmp(&b.0)));
        items
    }

    fn ordered_checks(table: &CheckTable) -> Vec<(Uuid, Check)> {
        let mut items: Vec<(Uuid, Check)> = table
            .by_id
            .values()
            .filter(|c| !c.is_deleted())
            .map(|c| (c.id, c.clone()))
            .collect();
        items.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at).then(a.0.cmp(&b.0)));
        items
    }
}

impl Default for GatewayStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for GatewayStore {
    async fn get(&self, id: Uuid) -> Result<User, RpcError> {
        let users = self.users.read().await;
        users
            .by_id
            .get(&id)
            .filter(|u| !u.is_deleted())
            .cloned()
            .ok_or_else(|| RpcError::NotFound(format!("user {id}")))
    }

    async fn get_by_email(&self, email: &str) -> Result<User, RpcError> {
        let users = self.users.read().await;
        let id = users
            .by_email
            .get(email)
            .ok_or_else(|| RpcError::NotFound(format!("user with email {email}")))?;
        users
            .by_id
            .get(id)
            .filter(|u| !u.is_deleted())
            .cloned()
            .ok_or_else(|| RpcError::NotFound(format!("user with email {email}")))
    }

    async fn get_by_protected_token(&self, protected_token: &[u8]) -> Result<User, RpcError> {
        let users = self.users.read().await;
        users
            .by_id
            .values()
            .find(|u| !u.is_deleted() && u.protected_token == protected_token)
            .cloned()
            .ok_or(RpcError::Unauthorized)
    }

    async fn list(&self, cursor: Cursor, page_size: u32) -> Result<Page<User>, RpcError> {
        let users = self.users.read().await;
        let ordered = Self::ordered_users(&users);
        let (items, next_cursor) = paginate(&ordered, &cursor, page_size);
        Ok(Page { items, next_cursor })
    }

    async fn create(&self, new: NewUser) -> Result<User, RpcError> {
        let mut users = self.users.write().await;
        if users.by_email.contains_key(&new.email) {
            return Err(RpcError::UniqueViolation { column: "email".into() });
        }
        let id = Uuid::new_v4();
        let ts = now();
        let user = User {
            id,
            name: new.name,
            email: new.email.clone(),
            protected_token: new.protected_token,
            is_admin: new.is_admin,
            default_profile: new.default_profile,
            created_at: ts,
            updated_at: ts,
            deleted_at: None,
        };
        users.by_id.insert(id, user.clone());
        users.by_email.insert(new.email, id);
        Ok(user)
    }

    async fn update(&self, id: Uuid, patch: UserPatch) -> Result<User, RpcError> {
        let mut users = self.users.write().await;
        if let Some(new_email) = &patch.email {
            if users.by_email.get(new_email).is_some_and(|existing| *existing != id) {
                return Err(RpcError::UniqueViolation { column: "email".into() });
            }
        }
        let old_email = users
            .by_id
            .get(&id)
            .filter(|u| !u.is_deleted())
            .map(|u| u.email.clone())
            .ok_or_else(|| RpcError::NotFound(format!("user {id}")))?;

        let user = users.by_id.get_mut(&id).expect("checked above");
        if let Some(name) = patch.name {
            user.name = name;
        }
        if let Some(email) = patch.email.clone() {
            user.email = email;
        }
        if let Some(is_admin) = patch.is_admin {
            user.is_admin = is_admin;
        }
        if let Some(default_profile) = patch.default_profile {
            user.default_profile = default_profile;
        }
        user.updated_at = now();
        let updated = user.clone();

        if let Some(new_email) = patch.email {
            if new_email != old_email {
                users.by_email.remove(&old_email);
                users.by_email.insert(new_email, id);
            }
        }

        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RpcError> {
        let mut users = self.users.write().await;
        let user = users
            .by_id
            .get_mut(&id)
            .filter(|u| !u.is_deleted())
            .ok_or_else(|| RpcError::NotFound(format!("user {id}")))?;
        user.deleted_at = Some(now());
        Ok(())
    }

    async fn rotate_token(&self, id: Uuid, protected_token: Vec<u8>) -> Result<User, RpcError> {
        let mut users = self.users.write().await;
        let user = users
            .by_id
            .get_mut(&id)
            .filter(|u| !u.is_deleted())
            .ok_or_else(|| RpcError::NotFound(format!("user {id}")))?;
        user.protected_token = protected_token;
        user.updated_at = now();
        Ok(user.clone())
    }
}

#[async_trait]
impl ProfileStore for GatewayStore {
    async fn get(&self, id: Uuid) -> Result<Profile, RpcError> {
        let profiles = self.profiles.read().await;
        profiles
            .by_id
            .get(&id)
            .filter(|p| !p.is_deleted())
            .cloned()
            .ok_or_else(|| RpcError::NotFound(format!("profile {id}")))
    }

    async fn get_by_name(&self, name: &str) -> Result<Profile, RpcError> {
        let profiles = self.profiles.read().await;
        let id = profiles
            .by_name
            .get(name)
            .ok_or_else(|| RpcError::NotFound(format!("profile {name}")))?;
        profiles
            .by_id
            .get(id)
            .filter(|p| !p.is_deleted())
            .cloned()
            .ok_or_else(|| RpcError::NotFound(format!("profile {name}")))
    }

    async fn list(&self, cursor: Cursor, page_size: u32) -> Result<Page<Profile>, RpcError> {
        let profiles = self.profiles.read().await;
        let ordered = Self::ordered_profiles(&profiles);
        let (items, next_cursor) = paginate(&ordered, &cursor, page_size);
        Ok(Page { items, next_cursor })
    }

    async fn create(&self, new: NewProfile) -> Result<Profile, RpcError> {
        let mut profiles = self.profiles.write().await;
        if profiles.by_name.contains_key(&new.name) {
            return Err(RpcError::UniqueViolation { column: "name".into() });
        }
        let id = Uuid::new_v4();
        let ts = now();
        let profile = Profile {
            id,
            name: new.name.clone(),
            check_ids: new.check_ids,
            created_at: ts,
            updated_at: ts,
            deleted_at: None,
        };
        profiles.by_id.insert(id, profile.clone());
        profiles.by_name.insert(new.name, id);
        Ok(profile)
    }

    async fn update(&self, id: Uuid, patch: ProfilePatch) -> Result<Profile, RpcError> {
        let mut profiles = self.profiles.write().await;
        if let Some(new_name) = &patch.name {
            if profiles.by_name.get(new_name).is_some_and(|existing| *existing != id) {
                return Err(RpcError::UniqueViolation { column: "name".into() });
            }
        }
        let old_name = profiles
            .by_id
            .get(&id)
            .filter(|p| !p.is_deleted())
            .map(|p| p.name.clone())
            .ok_or_else(|| RpcError::NotFound(format!("profile {id}")))?;

        let profile = profiles.by_id.get_mut(&id).expect("checked above");
        if let Some(name) = patch.name.clone() {
            profile.name = name;
        }
        profile.updated_at = now();
        let updated = profile.clone();

        if let Some(new_name) = patch.name {
            if new_name != old_name {
                profiles.by_name.remove(&old_name);
                profiles.by_name.insert(new_name, id);
            }
        }

        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RpcError> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .by_id
            .get_mut(&id)
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| RpcError::NotFound(format!("profile {id}")))?;
        profile.deleted_at = Some(now());
        Ok(())
    }

    async fn set_profile_checks(&self, id: Uuid, check_ids: Vec<Uuid>) -> Result<Profile, RpcError> {
        let mut profiles = self.profiles.write().await;
        let mut checks = self.checks.write().await;

        {
            let profile = profiles
                .by_id
                .get(&id)
                .filter(|p| !p.is_deleted())
                .ok_or_else(|| RpcError::NotFound(format!("profile {id}")))?;
            let _ = profile;
        }

        for check_id in &check_ids {
            if !checks.by_id.contains_key(check_id) {
                return Err(RpcError::NotFound(format!("check {check_id}")));
            }
        }

        let previous_check_ids = profiles.by_id.get(&id).expect("checked above").check_ids.clone();
        for removed in previous_check_ids.iter().filter(|c| !check_ids.contains(c)) {
            if let Some(check) = checks.by_id.get_mut(removed) {
                check.profile_ids.retain(|p| *p != id);
            }
        }
        for added in check_ids.iter().filter(|c| !previous_check_ids.contains(c)) {
            if let Some(check) = checks.by_id.get_mut(added) {
                if !check.profile_ids.contains(&id) {
                    check.profile_ids.push(id);
                }
            }
        }

        let profile = profiles.by_id.get_mut(&id).expect("checked above");
        profile.check_ids = check_ids;
        profile.updated_at = now();
        Ok(profile.clone())
    }
}

#[async_trait]
impl CheckStore for GatewayStore {
    async fn get(&self, id: Uuid) -> Result<Check, RpcError> {
        let checks = self.checks.read().await;
        checks
            .by_id
            .get(&id)
            .filter(|c| !c.is_deleted())
            .cloned()
            .ok_or_else(|| RpcError::NotFound(format!("check {id}")))
    }

    async fn get_by_name(&self, name: &str) -> Result<Check, RpcError> {
        let checks = self.checks.read().await;
        let id = checks
            .by_name
            .get(name)
            .ok_or_else(|| RpcError::NotFound(format!("check {name}")))?;
        checks
            .by_id
            .get(id)
            .filter(|c| !c.is_deleted())
            .cloned()
            .ok_or_else(|| RpcError::NotFound(format!("check {name}")))
    }

    async fn list(&self, cursor: Cursor, page_size: u32) -> Result<Page<Check>, RpcError> {
        let checks = self.checks.read().await;
        let ordered = Self::ordered_checks(&checks);
        let (items, next_cursor) = paginate(&ordered, &cursor, page_size);
        Ok(Page { items, next_cursor })
    }

    async fn create(&self, new: NewCheck) -> Result<Check, RpcError> {
        let mut checks = self.checks.write().await;
        if checks.by_name.contains_key(&new.name) {
            return Err(RpcError::UniqueViolation { column: "name".into() });
        }
        let id = Uuid::new_v4();
        let ts = now();
        let check = Check {
            id,
            name: new.name.clone(),
            upstream_services: new.upstream_services,
            profile_ids: Vec::new(),
            created_at: ts,
            updated_at: ts,
            deleted_at: None,
        };
        checks.by_id.insert(id, check.clone());
        checks.by_name.insert(new.name, id);
        Ok(check)
    }

    async fn update(&self, id: Uuid, patch: CheckPatch) -> Result<Check, RpcError> {
        let mut checks = self.checks.write().await;
        if let Some(new_name) = &patch.name {
            if checks.by_name.get(new_name).is_some_and(|existing| *existing != id) {
                return Err(RpcError::UniqueViolation { column: "name".into() });
            }
        }
        let old_name = checks
            .by_id
            .get(&id)
            .filter(|c| !c.is_deleted())
            .map(|c| c.name.clone())
            .ok_or_else(|| RpcError::NotFound(format!("check {id}")))?;

        let check = checks.by_id.get_mut(&id).expect("checked above");
        if let Some(name) = patch.name.clone() {
            check.name = name;
        }
        if let Some(upstream_services) = patch.upstream_services {
            check.upstream_services = upstream_services;
        }
        check.updated_at = now();
        let updated = check.clone();

        if let Some(new_name) = patch.name {
            if new_name != old_name {
                checks.by_name.remove(&old_name);
                checks.by_name.insert(new_name, id);
            }
        }

        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RpcError> {
        let mut checks = self.checks.write().await;
        let check = checks
            .by_id
            .get_mut(&id)
            .filter(|c| !c.is_deleted())
            .ok_or_else(|| RpcError::NotFound(format!("check {id}")))?;
        check.deleted_at = Some(now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor_zero() -> Cursor {
        Cursor::first(Uuid::new_v4())
    }

    #[tokio::test]
    async fn create_and_get_user_round_trips() {
        let store = GatewayStore::new();
        let created = store
            .create(NewUser {
                name: "alice".into(),
                email: "alice@example.com".into(),
                protected_token: vec![1, 2, 3],
                is_admin: false,
                default_profile: None,
            })
            .await
            .unwrap();
        let fetched = UserStore::get(&store, created.id).await.unwrap();
        assert_eq!(fetched.email, "alice@example.com");
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = GatewayStore::new();
        store
            .create(NewUser {
                name: "alice".into(),
                email: "dup@example.com".into(),
                protected_token: vec![],
                is_admin: false,
                default_profile: None,
            })
            .await
            .unwrap();
        let result = store
            .create(NewUser {
                name: "bob".into(),
                email: "dup@example.com".into(),
                protected_token: vec![],
                is_admin: false,
                default_profile: None,
            })
            .await;
        assert!(matches!(result, Err(RpcError::UniqueViolation { column }) if column == "email"));
    }

    #[tokio::test]
    async fn deleted_user_is_not_returned() {
        let store = GatewayStore::new();
        let user = store
            .create(NewUser {
                name: "carol".into(),
                email: "carol@example.com".into(),
                protected_token: vec![],
                is_admin: false,
                default_profile: None,
            })
            .await
            .unwrap();
        UserStore::delete(&store, user.id).await.unwrap();
        let result = UserStore::get(&store, user.id).await;
        assert!(matches!(result, Err(RpcError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_paginates_with_page_size_plus_one_trim() {
        let store = GatewayStore::new();
        for i in 0..5 {
            store
                .create(NewUser {
                    name: format!("user{i}"),
                    email: format!("user{i}@example.com"),
                    protected_token: vec![],
                    is_admin: false,
                    default_profile: None,
                })
                .await
                .unwrap();
        }
        let page = UserStore::list(&store, cursor_zero(), 2).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.next_cursor.is_some());

        let page2 = UserStore::list(&store, page.next_cursor.unwrap(), 2).await.unwrap();
        assert_eq!(page2.items.len(), 2);
        assert!(page2.next_cursor.is_some());

        let page3 = UserStore::list(&store, page2.next_cursor.unwrap(), 2).await.unwrap();
        assert_eq!(page3.items.len(), 1);
        assert!(page3.next_cursor.is_none());
    }

    #[tokio::test]
    async fn set_profile_checks_keeps_inverse_links_symmetric() {
        let store = GatewayStore::new();
        let profile = store
            .create(NewProfile {
                name: "moderation".into(),
                check_ids: vec![],
            })
            .await
            .unwrap();
        let check_a = store
            .create(NewCheck {
                name: "toxicity".into(),
                upstream_services: vec!["127.0.0.1:9001".into()],
            })
            .await
            .unwrap();
        let check_b = store
            .create(NewCheck {
                name: "nudity".into(),
                upstream_services: vec!["127.0.0.1:9002".into()],
            })
            .await
            .unwrap();

        let updated = store
            .set_profile_checks(profile.id, vec![check_a.id, check_b.id])
            .await
            .unwrap();
        assert_eq!(updated.check_ids, vec![check_a.id, check_b.id]);

        let a = CheckStore::get(&store, check_a.id).await.unwrap();
        assert_eq!(a.profile_ids, vec![profile.id]);

        let updated = store.set_profile_checks(profile.id, vec![check_b.id]).await.unwrap();
        assert_eq!(updated.check_ids, vec![check_b.id]);
        let a = CheckStore::get(&store, check_a.id).await.unwrap();
        assert!(a.profile_ids.is_empty());
        let b = CheckStore::get(&store, check_b.id).await.unwrap();
        assert_eq!(b.profile_ids, vec![profile.id]);
    }

    #[tokio::test]
    async fn bootstrap_root_creates_default_profile_and_admin_user() {
        let store = GatewayStore::new();
        let token = store
            .bootstrap_root("root", "root@localhost", false, b"site-key", b"salt", None)
            .await;
        assert!(token.is_some());

        let root = UserStore::get_by_email(&store, "root@localhost").await.unwrap();
        assert!(root.is_admin);
        let default_profile = ProfileStore::get_by_name(&store, Profile::DEFAULT_NAME).await.unwrap();
        assert_eq!(root.default_profile, Some(default_profile.id));
    }

    #[tokio::test]
    async fn bootstrap_root_is_idempotent_without_recreate() {
        let store = GatewayStore::new();
        store
            .bootstrap_root("root", "root@localhost", false, b"site-key", b"salt", None)
            .await;
        let second = store
            .bootstrap_root("root", "root@localhost", false, b"site-key", b"salt", None)
            .await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn bootstrap_root_uses_static_token_verbatim_when_configured() {
        let store = GatewayStore::new();
        let token = store
            .bootstrap_root(
                "root",
                "root@localhost",
                false,
                b"site-key",
                b"salt",
                Some("dev-fixed-token"),
            )
            .await
            .expect("fresh store bootstraps");
        assert_eq!(token, b"dev-fixed-token".to_vec());
    }
}
