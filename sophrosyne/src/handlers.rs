//! JSON-RPC method handlers: `Users::*`, `Profiles::*`, `Checks::*`,
//! `Scans::PerformScan` (§6). Every mutating or read operation is checked
//! against the loaded `PolicySet` before touching a store, using the
//! bare-verb action names (`GetUser`, `CreateProfile`, ...) baked into
//! `app::default_policies`. `grpc_services` dispatches into these same
//! functions so the two fronts share one authorization and business-logic
//! path.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sophrosyne_core::domain::{AuthPrincipal, AuthorizationRequest, Resource};
use sophrosyne_core::error::RpcError;
use sophrosyne_core::{cursor::Cursor, token};
use sophrosyne_rpc::{params_into, Router};
use sophrosyne_store::{CheckPatch, NewCheck, NewProfile, NewUser, ProfilePatch, UserPatch};
use uuid::Uuid;

use crate::app::AppCtx;

fn require(ctx: &AppCtx, action: &str, resource: Option<Resource>) -> Result<(), RpcError> {
    let req = AuthorizationRequest {
        principal: AuthPrincipal::from(ctx.principal.as_ref()),
        action: action.to_string(),
        resource,
    };
    if ctx.policies.authorize(&req) {
        Ok(())
    } else {
        Err(RpcError::Unauthorized)
    }
}

fn entity_resource(entity_type: &str, id: Option<Uuid>) -> Resource {
    Resource {
        entity_type: entity_type.to_string(),
        entity_id: id,
    }
}

fn page_value<T: Serialize>(items: Vec<T>, next_cursor: Option<Cursor>) -> Value {
    json!({
        "items": items,
        "next_cursor": next_cursor.map(|c| c.encode()),
    })
}

#[derive(Debug, Deserialize, Validate)]
struct IdParams {
    #[garde(skip)]
    id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
struct ListParams {
    #[garde(skip)]
    cursor: Option<String>,
    #[garde(range(min = 1, max = 500))]
    page_size: Option<u32>,
}

// --- Users --------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
struct CreateUserParams {
    #[garde(length(min = 1))]
    name: String,
    #[garde(length(min = 1))]
    email: String,
    #[garde(skip)]
    #[serde(default)]
    is_admin: bool,
    #[garde(skip)]
    #[serde(default)]
    default_profile: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateUserParams {
    #[garde(skip)]
    id: Uuid,
    #[garde(skip)]
    #[serde(default)]
    name: Option<String>,
    #[garde(skip)]
    #[serde(default)]
    email: Option<String>,
    #[garde(skip)]
    #[serde(default)]
    is_admin: Option<bool>,
    #[garde(skip)]
    #[serde(default)]
    default_profile: Option<Uuid>,
}

pub(crate) async fn get_user(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let p: IdParams = params_into(params)?;
    require(&ctx, "GetUser", Some(entity_resource("user", Some(p.id))))?;
    let user = ctx.users.get(p.id).await?;
    Ok(serde_json::to_value(user).expect("User always serializes"))
}

pub(crate) async fn get_users(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let p: ListParams = params_into(params)?;
    require(&ctx, "GetUsers", None)?;
    let cursor = Cursor::decode(p.cursor.as_deref(), ctx.principal.id)?;
    let page_size = p.page_size.unwrap_or(ctx.page_sizes.users);
    let page = ctx.users.list(cursor, page_size).await?;
    Ok(page_value(page.items, page.next_cursor))
}

pub(crate) async fn create_user(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let p: CreateUserParams = params_into(params)?;
    require(&ctx, "CreateUser", None)?;

    let raw_token = token::generate_raw_token();
    let protected = token::protect(&raw_token, &ctx.site_key, &ctx.salt);

    let user = ctx
        .users
        .create(NewUser {
            name: p.name,
            email: p.email,
            protected_token: protected,
            is_admin: p.is_admin,
            default_profile: p.default_profile,
        })
        .await?;

    Ok(json!({ "user": user, "token": STANDARD.encode(raw_token) }))
}

pub(crate) async fn update_user(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let p: UpdateUserParams = params_into(params)?;
    require(&ctx, "UpdateUser", Some(entity_resource("user", Some(p.id))))?;
    let user = ctx
        .users
        .update(
            p.id,
            UserPatch {
                name: p.name,
                email: p.email,
                is_admin: p.is_admin,
                default_profile: p.default_profile.map(Some),
            },
        )
        .await?;
    Ok(serde_json::to_value(user).expect("User always serializes"))
}

pub(crate) async fn delete_user(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let p: IdParams = params_into(params)?;
    require(&ctx, "DeleteUser", Some(entity_resource("user", Some(p.id))))?;
    ctx.users.delete(p.id).await?;
    Ok(Value::Null)
}

pub(crate) async fn rotate_token(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let p: IdParams = params_into(params)?;
    require(&ctx, "RotateToken", Some(entity_resource("user", Some(p.id))))?;

    let raw_token = token::generate_raw_token();
    let protected = token::protect(&raw_token, &ctx.site_key, &ctx.salt);
    let user = ctx.users.rotate_token(p.id, protected).await?;

    Ok(json!({ "user": user, "token": STANDARD.encode(raw_token) }))
}

// --- Profiles -------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
struct CreateProfileParams {
    #[garde(length(min = 1))]
    name: String,
    #[garde(skip)]
    #[serde(default)]
    check_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateProfileParams {
    #[garde(skip)]
    id: Uuid,
    #[garde(skip)]
    #[serde(default)]
    name: Option<String>,
    #[garde(skip)]
    #[serde(default)]
    check_ids: Option<Vec<Uuid>>,
}

pub(crate) async fn get_profile(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let p: IdParams = params_into(params)?;
    require(&ctx, "GetProfile", Some(entity_resource("profile", Some(p.id))))?;
    let profile = ctx.profiles.get(p.id).await?;
    Ok(serde_json::to_value(profile).expect("Profile always serializes"))
}

pub(crate) async fn get_profiles(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let p: ListParams = params_into(params)?;
    require(&ctx, "GetProfiles", None)?;
    let cursor = Cursor::decode(p.cursor.as_deref(), ctx.principal.id)?;
    let page_size = p.page_size.unwrap_or(ctx.page_sizes.profiles);
    let page = ctx.profiles.list(cursor, page_size).await?;
    Ok(page_value(page.items, page.next_cursor))
}

pub(crate) async fn create_profile(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let p: CreateProfileParams = params_into(params)?;
    require(&ctx, "CreateProfile", None)?;
    let profile = ctx
        .profiles
        .create(NewProfile {
            name: p.name,
            check_ids: p.check_ids,
        })
        .await?;
    Ok(serde_json::to_value(profile).expect("Profile always serializes"))
}

pub(crate) async fn update_profile(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let p: UpdateProfileParams = params_into(params)?;
    require(&ctx, "UpdateProfile", Some(entity_resource("profile", Some(p.id))))?;

    let mut profile = ctx
        .profiles
        .update(p.id, ProfilePatch { name: p.name })
        .await?;
    if let Some(check_ids) = p.check_ids {
        profile = ctx.profiles.set_profile_checks(p.id, check_ids).await?;
    }
    Ok(serde_json::to_value(profile).expect("Profile always serializes"))
}

pub(crate) async fn delete_profile(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let p: IdParams = params_into(params)?;
    require(&ctx, "DeleteProfile", Some(entity_resource("profile", Some(p.id))))?;
    ctx.profiles.delete(p.id).await?;
    Ok(Value::Null)
}

// --- Checks -----------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
struct CreateCheckParams {
    #[garde(length(min = 1))]
    name: String,
    #[garde(skip)]
    #[serde(default)]
    upstream_services: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateCheckParams {
    #[garde(skip)]
    id: Uuid,
    #[garde(skip)]
    #[serde(default)]
    name: Option<String>,
    #[garde(skip)]
    #[serde(default)]
    upstream_services: Option<Vec<String>>,
}

pub(crate) async fn get_check(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let p: IdParams = params_into(params)?;
    require(&ctx, "GetCheck", Some(entity_resource("check", Some(p.id))))?;
    let check = ctx.checks.get(p.id).await?;
    Ok(serde_json::to_value(check).expect("Check always serializes"))
}

pub(crate) async fn get_checks(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let p: ListParams = params_into(params)?;
    require(&ctx, "GetChecks", None)?;
    let cursor = Cursor::decode(p.cursor.as_deref(), ctx.principal.id)?;
    let page_size = p.page_size.unwrap_or(ctx.page_sizes.checks);
    let page = ctx.checks.list(cursor, page_size).await?;
    Ok(page_value(page.items, page.next_cursor))
}

pub(crate) async fn create_check(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let p: CreateCheckParams = params_into(params)?;
    require(&ctx, "CreateCheck", None)?;
    let check = ctx
        .checks
        .create(NewCheck {
            name: p.name,
            upstream_services: p.upstream_services,
        })
        .await?;
    Ok(serde_json::to_value(check).expect("Check always serializes"))
}

pub(crate) async fn update_check(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let p: UpdateCheckParams = params_into(params)?;
    require(&ctx, "UpdateCheck", Some(entity_resource("check", Some(p.id))))?;
    let check = ctx
        .checks
        .update(
            p.id,
            CheckPatch {
                name: p.name,
                upstream_services: p.upstream_services,
            },
        )
        .await?;
    Ok(serde_json::to_value(check).expect("Check always serializes"))
}

pub(crate) async fn delete_check(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let p: IdParams = params_into(params)?;
    require(&ctx, "DeleteCheck", Some(entity_resource("check", Some(p.id))))?;
    ctx.checks.delete(p.id).await?;
    Ok(Value::Null)
}

// --- Scans --------------------------------------------------------------

pub(crate) async fn perform_scan(params: Option<Value>, ctx: Arc<AppCtx>) -> Result<Value, RpcError> {
    let request: sophrosyne_core::domain::ScanRequest = params_into(params)?;
    require(&ctx, "PerformScan", None)?;
    let result = ctx
        .scan_engine
        .scan(request, &ctx.principal, ctx.cancel.clone())
        .await?;
    Ok(serde_json::to_value(result).expect("ScanResult always serializes"))
}

pub fn register(router: &mut Router<AppCtx>) {
    router.register("Users::GetUser", get_user);
    router.register("Users::GetUsers", get_users);
    router.register("Users::CreateUser", create_user);
    router.register("Users::UpdateUser", update_user);
    router.register("Users::DeleteUser", delete_user);
    router.register("Users::RotateToken", rotate_token);

    router.register("Profiles::GetProfile", get_profile);
    router.register("Profiles::GetProfiles", get_profiles);
    router.register("Profiles::CreateProfile", create_profile);
    router.register("Profiles::UpdateProfile", update_profile);
    router.register("Profiles::DeleteProfile", delete_profile);

    router.register("Checks::GetCheck", get_check);
    router.register("Checks::GetChecks", get_checks);
    router.register("Checks::CreateCheck", create_check);
    router.register("Checks::UpdateCheck", update_check);
    router.register("Checks::DeleteCheck", delete_check);

    router.register("Scans::PerformScan", perform_scan);
}
