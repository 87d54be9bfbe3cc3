//! Entity store contracts and backing implementations for users, profiles,
//! and checks (C3), plus the write-through cached decorators that sit in
//! front of them (C4).

pub mod cached;
pub mod memory;
pub mod traits;

pub use cached::{CachedCheckStore, CachedProfileStore, CachedUserStore};
pub use memory::GatewayStore;
pub use traits::{
    CheckPatch, CheckStore, NewCheck, NewProfile, NewUser, Page, ProfilePatch, ProfileStore,
    UserPatch, UserStore,
};
