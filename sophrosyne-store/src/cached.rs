//! Write-through cached decorators over the entity store traits (C4).
//!
//! Each decorator wraps an inner store plus two [`sophrosyne_cache::TtlCache`]
//! instances: one keyed by id, one by the entity's secondary key. Reads
//! populate the cache; writes go to the inner store first and then replace
//! (not merely invalidate) the cache entry, so a read immediately following a
//! write observes the new value without a cache round-trip.

use std::time::Duration;

use async_trait::async_trait;
use sophrosyne_cache::TtlCache;
use sophrosyne_core::cursor::Cursor;
use sophrosyne_core::domain::{Check, Profile, User};
use sophrosyne_core::error::RpcError;
use uuid::Uuid;

use crate::traits::{
    CheckPatch, CheckStore, NewCheck, NewProfile, NewUser, Page, ProfilePatch, ProfileStore,
    UserPatch, UserStore,
};

pub struct CachedUserStore<S> {
    inner: S,
    by_id: TtlCache<Uuid, User>,
    by_email: TtlCache<String, Uuid>,
}

impl<S: UserStore> CachedUserStore<S> {
    pub fn new(inner: S, ttl: Duration, cleanup_interval: Duration) -> Self {
        Self {
            inner,
            by_id: TtlCache::new(ttl, cleanup_interval),
            by_email: TtlCache::new(ttl, cleanup_interval),
        }
    }

    fn cache_put(&self, user: &User) {
        self.by_id.insert(user.id, user.clone());
        self.by_email.insert(user.email.clone(), user.id);
    }
}

#[async_trait]
impl<S: UserStore + Send + Sync> UserStore for CachedUserStore<S> {
    async fn get(&self, id: Uuid) -> Result<User, RpcError> {
        if let Some(user) = self.by_id.get(&id) {
            return Ok(user);
        }
        let user = self.inner.get(id).await?;
        self.cache_put(&user);
        Ok(user)
    }

    async fn get_by_email(&self, email: &str) -> Result<User, RpcError> {
        if let Some(id) = self.by_email.get(&email.to_string()) {
            if let Some(user) = self.by_id.get(&id) {
                return Ok(user);
            }
        }
        let user = self.inner.get_by_email(email).await?;
        self.cache_put(&user);
        Ok(user)
    }

    async fn get_by_protected_token(&self, protected_token: &[u8]) -> Result<User, RpcError> {
        // Token lookups are on the hot authentication path but keying a
        // third cache by raw token bytes would mean caching credential
        // material; left to the inner store, which itself sits behind the
        // id/email caches for every other access pattern.
        self.inner.get_by_protected_token(protected_token).await
    }

    async fn list(&self, cursor: Cursor, page_size: u32) -> Result<Page<User>, RpcError> {
        self.inner.list(cursor, page_size).await
    }

    async fn create(&self, new: NewUser) -> Result<User, RpcError> {
        let user = self.inner.create(new).await?;
        self.cache_put(&user);
        Ok(user)
    }

    async fn update(&self, id: Uuid, patch: UserPatch) -> Result<User, RpcError> {
        let user = self.inner.update(id, patch).await?;
        self.cache_put(&user);
        Ok(user)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RpcError> {
        let old = self.inner.get(id).await?;
        self.inner.delete(id).await?;
        self.by_id.remove(&id);
        self.by_email.remove(&old.email);
        Ok(())
    }

    async fn rotate_token(&self, id: Uuid, protected_token: Vec<u8>) -> Result<User, RpcError> {
        let user = self.inner.rotate_token(id, protected_token).await?;
        self.cache_put(&user);
        Ok(user)
    }
}

pub struct CachedProfileStore<S> {
    inner: S,
    by_id: TtlCache<Uuid, Profile>,
    by_name: TtlCache<String, Uuid>,
}

impl<S: ProfileStore> CachedProfileStore<S> {
    pub fn new(inner: S, ttl: Duration, cleanup_interval: Duration) -> Self {
        Self {
            inner,
            by_id: TtlCache::new(ttl, cleanup_interval),
            by_name: TtlCache::new(ttl, cleanup_interval),
        }
    }

    fn cache_put(&self, profile: &Profile) {
        self.by_id.insert(profile.id, profile.clone());
        self.by_name.insert(profile.name.clone(), profile.id);
    }
}

#[async_trait]
impl<S: ProfileStore + Send + Sync> ProfileStore for CachedProfileStore<S> {
    async fn get(&self, id: Uuid) -> Result<Profile, RpcError> {
        if let Some(profile) = self.by_id.get(&id) {
            return Ok(profile);
        }
        let profile = self.inner.get(id).await?;
        self.cache_put(&profile);
        Ok(profile)
    }

    async fn get_by_name(&self, name: &str) -> Result<Profile, RpcError> {
        if let Some(id) = self.by_name.get(&name.to_string()) {
            if let Some(profile) = self.by_id.get(&id) {
                return Ok(profile);
            }
        }
        let profile = self.inner.get_by_name(name).await?;
        self.cache_put(&profile);
        Ok(profile)
    }

    async fn list(&self, cursor: Cursor, page_size: u32) -> Result<Page<Profile>, RpcError> {
        self.inner.list(cursor, page_size).await
    }

    async fn create(&self, new: NewProfile) -> Result<Profile, RpcError> {
        let profile = self.inner.create(new).await?;
        self.cache_put(&profile);
        Ok(profile)
    }

    async fn update(&self, id: Uuid, patch: ProfilePatch) -> Result<Profile, RpcError> {
        let profile = self.inner.update(id, patch).await?;
        self.cache_put(&profile);
        Ok(profile)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RpcError> {
        let old = self.inner.get(id).await?;
        self.inner.delete(id).await?;
        self.by_id.remove(&id);
        self.by_name.remove(&old.name);
        Ok(())
    }

    async fn set_profile_checks(&self, id: Uuid, check_ids: Vec<Uuid>) -> Result<Profile, RpcError> {
        let profile = self.inner.set_profile_checks(id, check_ids).await?;
        self.cache_put(&profile);
        Ok(profile)
    }
}

pub struct CachedCheckStore<S> {
    inner: S,
    by_id: TtlCache<Uuid, Check>,
    by_name: TtlCache<String, Uuid>,
}

impl<S: CheckStore> CachedCheckStore<S> {
    pub fn new(inner: S, ttl: Duration, cleanup_interval: Duration) -> Self {
        Self {
            inner,
            by_id: TtlCache::new(ttl, cleanup_interval),
            by_name: TtlCache::new(ttl, cleanup_interval),
        }
    }

    fn cache_put(&self, check: &Check) {
        self.by_id.insert(check.id, check.clone());
        self.by_name.insert(check.name.clone(), check.id);
    }
}

#[async_trait]
impl<S: CheckStore + Send + Sync> CheckStore for CachedCheckStore<S> {
    async fn get(&self, id: Uuid) -> Result<Check, RpcError> {
        if let Some(check) = self.by_id.get(&id) {
            return Ok(check);
        }
        let check = self.inner.get(id).await?;
        self.cache_put(&check);
        Ok(check)
    }

    async fn get_by_name(&self, name: &str) -> Result<Check, RpcError> {
        if let Some(id) = self.by_name.get(&name.to_string()) {
            if let Some(check) = self.by_id.get(&id) {
                return Ok(check);
            }
        }
        let check = self.inner.get_by_name(name).await?;
        self.cache_put(&check);
        Ok(check)
    }

    async fn list(&self, cursor: Cursor, page_size: u32) -> Result<Page<Check>, RpcError> {
        self.inner.list(cursor, page_size).await
    }

    async fn create(&self, new: NewCheck) -> Result<Check, RpcError> {
        let check = self.inner.create(new).await?;
        self.cache_put(&check);
        Ok(check)
    }

    async fn update(&self, id: Uuid, patch: CheckPatch) -> Result<Check, RpcError> {
        let check = self.inner.update(id, patch).await?;
        self.cache_put(&check);
        Ok(check)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RpcError> {
        let old = self.inner.get(id).await?;
        self.inner.delete(id).await?;
        self.by_id.remove(&id);
        self.by_name.remove(&old.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::GatewayStore;

    #[tokio::test]
    async fn cached_get_reflects_update_immediately() {
        let inner = GatewayStore::new();
        let user = UserStore::create(
            &inner,
            NewUser {
                name: "dave".into(),
                email: "dave@example.com".into(),
                protected_token: vec![],
                is_admin: false,
                default_profile: None,
            },
        )
        .await
        .unwrap();

        let cached = CachedUserStore::new(inner, Duration::from_secs(60), Duration::from_secs(30));
        let fetched = UserStore::get(&cached, user.id).await.unwrap();
        assert_eq!(fetched.name, "dave");

        let updated = UserStore::update(
            &cached,
            user.id,
            UserPatch {
                name: Some("dave2".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.name, "dave2");

        let fetched_again = UserStore::get(&cached, user.id).await.unwrap();
        assert_eq!(fetched_again.name, "dave2");
    }

    #[tokio::test]
    async fn delete_evicts_secondary_email_index() {
        let inner = GatewayStore::new();
        let user = UserStore::create(
            &inner,
            NewUser {
                name: "erin".into(),
                email: "erin@example.com".into(),
                protected_token: vec![],
                is_admin: false,
                default_profile: None,
            },
        )
        .await
        .unwrap();

        let cached = CachedUserStore::new(inner, Duration::from_secs(60), Duration::from_secs(30));
        // Warm both the primary and secondary cache entries.
        UserStore::get(&cached, user.id).await.unwrap();
        UserStore::get_by_email(&cached, &user.email).await.unwrap();
        assert!(cached.by_email.get(&user.email).is_some());

        UserStore::delete(&cached, user.id).await.unwrap();

        assert!(cached.by_id.get(&user.id).is_none());
        assert!(cached.by_email.get(&user.email).is_none());
        assert!(UserStore::get(&cached, user.id).await.is_err());
    }
}
