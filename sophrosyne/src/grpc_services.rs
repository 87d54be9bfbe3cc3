//! The gRPC mirror of the JSON-RPC `Users::*`/`Profiles::*`/`Checks::*`/
//! `Scans::PerformScan` methods (§4.8, §6): one `GatewayGrpc` implements all
//! four tonic server traits and dispatches every call into the same
//! `handlers` functions the HTTP front uses, round-tripping through
//! `serde_json::Value` so there is exactly one authorization and
//! business-logic path regardless of which front a request arrives on.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use sophrosyne_core::domain::{Check, Profile, User};
use sophrosyne_store::UserStore;
use sophrosyne_transport::rpc_error_to_status;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use sophrosyne_gatewayproto as gatewayproto;

use crate::app::AppCtx;
use crate::handlers;

/// Cancels the token it holds when dropped, same idiom as
/// `sophrosyne_transport::http`'s request guard and `sophrosyne_cache`'s
/// janitor-shutdown guard. A tonic handler future is dropped without being
/// polled to completion when the client disconnects mid-call.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

pub struct GatewayGrpc {
    pub store: Arc<dyn UserStore>,
    pub site_key: Arc<Vec<u8>>,
    pub salt: Arc<Vec<u8>>,
    pub ctx_builder: Box<dyn Fn(Arc<User>, CancellationToken) -> Arc<AppCtx> + Send + Sync>,
}

impl GatewayGrpc {
    async fn ctx<T>(&self, request: &Request<T>) -> Result<(Arc<AppCtx>, CancelOnDrop), Status> {
        let user =
            sophrosyne_transport::authenticate_request(request, &self.store, &self.site_key, &self.salt)
                .await?;
        let cancel = CancellationToken::new();
        let guard = CancelOnDrop(cancel.clone());
        let ctx = (self.ctx_builder)(Arc::new(user), cancel);
        Ok((ctx, guard))
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(s).map_err(|_| Status::invalid_argument(format!("invalid uuid: {s}")))
}

fn parse_uuids(items: &[String]) -> Result<Vec<Uuid>, Status> {
    items.iter().map(|s| parse_uuid(s)).collect()
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, Status> {
    serde_json::from_value(value).map_err(|e| Status::internal(format!("decoding response: {e}")))
}

#[derive(Deserialize)]
struct PageValue<T> {
    items: Vec<T>,
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct UserTokenValue {
    user: User,
    token: String,
}

fn user_to_proto(u: User) -> gatewayproto::User {
    gatewayproto::User {
        id: u.id.to_string(),
        name: u.name,
        email: u.email,
        is_admin: u.is_admin,
        default_profile: u.default_profile.map(|id| id.to_string()),
        created_at: u.created_at.to_rfc3339(),
        updated_at: u.updated_at.to_rfc3339(),
    }
}

fn profile_to_proto(p: Profile) -> gatewayproto::Profile {
    gatewayproto::Profile {
        id: p.id.to_string(),
        name: p.name,
        check_ids: p.check_ids.iter().map(Uuid::to_string).collect(),
        created_at: p.created_at.to_rfc3339(),
        updated_at: p.updated_at.to_rfc3339(),
    }
}

fn check_to_proto(c: Check) -> gatewayproto::Check {
    gatewayproto::Check {
        id: c.id.to_string(),
        name: c.name,
        upstream_services: c.upstream_services,
        profile_ids: c.profile_ids.iter().map(Uuid::to_string).collect(),
        created_at: c.created_at.to_rfc3339(),
        updated_at: c.updated_at.to_rfc3339(),
    }
}

#[tonic::async_trait]
impl gatewayproto::user_service_server::UserService for GatewayGrpc {
    async fn get_user(&self, request: Request<gatewayproto::GetUserRequest>) -> Result<Response<gatewayproto::User>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let id = parse_uuid(&request.get_ref().id)?;
        let value = handlers::get_user(Some(json!({ "id": id })), ctx).await.map_err(rpc_error_to_status)?;
        Ok(Response::new(user_to_proto(decode(value)?)))
    }

    async fn get_users(
        &self,
        request: Request<gatewayproto::GetUsersRequest>,
    ) -> Result<Response<gatewayproto::GetUsersResponse>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let req = request.get_ref();
        let value = handlers::get_users(Some(json!({ "cursor": req.cursor, "page_size": req.page_size })), ctx)
            .await
            .map_err(rpc_error_to_status)?;
        let page: PageValue<User> = decode(value)?;
        Ok(Response::new(gatewayproto::GetUsersResponse {
            items: page.items.into_iter().map(user_to_proto).collect(),
            next_cursor: page.next_cursor,
        }))
    }

    async fn create_user(
        &self,
        request: Request<gatewayproto::CreateUserRequest>,
    ) -> Result<Response<gatewayproto::CreateUserResponse>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let req = request.into_inner();
        let default_profile = req.default_profile.as_deref().map(parse_uuid).transpose()?;
        let params = json!({
            "name": req.name,
            "email": req.email,
            "is_admin": req.is_admin,
            "default_profile": default_profile,
        });
        let value = handlers::create_user(Some(params), ctx).await.map_err(rpc_error_to_status)?;
        let decoded: UserTokenValue = decode(value)?;
        Ok(Response::new(gatewayproto::CreateUserResponse {
            user: Some(user_to_proto(decoded.user)),
            token: decoded.token,
        }))
    }

    async fn update_user(&self, request: Request<gatewayproto::UpdateUserRequest>) -> Result<Response<gatewayproto::User>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let req = request.into_inner();
        let id = parse_uuid(&req.id)?;
        let default_profile = req.default_profile.as_deref().map(parse_uuid).transpose()?;
        let params = json!({
            "id": id,
            "name": req.name,
            "email": req.email,
            "is_admin": req.is_admin,
            "default_profile": default_profile,
        });
        let value = handlers::update_user(Some(params), ctx).await.map_err(rpc_error_to_status)?;
        Ok(Response::new(user_to_proto(decode(value)?)))
    }

    async fn delete_user(
        &self,
        request: Request<gatewayproto::DeleteUserRequest>,
    ) -> Result<Response<gatewayproto::DeleteUserResponse>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let id = parse_uuid(&request.get_ref().id)?;
        handlers::delete_user(Some(json!({ "id": id })), ctx).await.map_err(rpc_error_to_status)?;
        Ok(Response::new(gatewayproto::DeleteUserResponse {}))
    }

    async fn rotate_token(
        &self,
        request: Request<gatewayproto::RotateTokenRequest>,
    ) -> Result<Response<gatewayproto::RotateTokenResponse>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let id = parse_uuid(&request.get_ref().id)?;
        let value = handlers::rotate_token(Some(json!({ "id": id })), ctx).await.map_err(rpc_error_to_status)?;
        let decoded: UserTokenValue = decode(value)?;
        Ok(Response::new(gatewayproto::RotateTokenResponse {
            user: Some(user_to_proto(decoded.user)),
            token: decoded.token,
        }))
    }
}

#[tonic::async_trait]
impl gatewayproto::profile_service_server::ProfileService for GatewayGrpc {
    async fn get_profile(&self, request: Request<gatewayproto::GetProfileRequest>) -> Result<Response<gatewayproto::Profile>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let id = parse_uuid(&request.get_ref().id)?;
        let value = handlers::get_profile(Some(json!({ "id": id })), ctx).await.map_err(rpc_error_to_status)?;
        Ok(Response::new(profile_to_proto(decode(value)?)))
    }

    async fn get_profiles(
        &self,
        request: Request<gatewayproto::GetProfilesRequest>,
    ) -> Result<Response<gatewayproto::GetProfilesResponse>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let req = request.get_ref();
        let value = handlers::get_profiles(Some(json!({ "cursor": req.cursor, "page_size": req.page_size })), ctx)
            .await
            .map_err(rpc_error_to_status)?;
        let page: PageValue<Profile> = decode(value)?;
        Ok(Response::new(gatewayproto::GetProfilesResponse {
            items: page.items.into_iter().map(profile_to_proto).collect(),
            next_cursor: page.next_cursor,
        }))
    }

    async fn create_profile(
        &self,
        request: Request<gatewayproto::CreateProfileRequest>,
    ) -> Result<Response<gatewayproto::Profile>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let req = request.into_inner();
        let check_ids = parse_uuids(&req.check_ids)?;
        let value = handlers::create_profile(Some(json!({ "name": req.name, "check_ids": check_ids })), ctx)
            .await
            .map_err(rpc_error_to_status)?;
        Ok(Response::new(profile_to_proto(decode(value)?)))
    }

    async fn update_profile(
        &self,
        request: Request<gatewayproto::UpdateProfileRequest>,
    ) -> Result<Response<gatewayproto::Profile>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let req = request.into_inner();
        let id = parse_uuid(&req.id)?;
        let check_ids = if req.update_check_ids {
            Some(parse_uuids(&req.check_ids)?)
        } else {
            None
        };
        let params = json!({ "id": id, "name": req.name, "check_ids": check_ids });
        let value = handlers::update_profile(Some(params), ctx).await.map_err(rpc_error_to_status)?;
        Ok(Response::new(profile_to_proto(decode(value)?)))
    }

    async fn delete_profile(
        &self,
        request: Request<gatewayproto::DeleteProfileRequest>,
    ) -> Result<Response<gatewayproto::DeleteProfileResponse>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let id = parse_uuid(&request.get_ref().id)?;
        handlers::delete_profile(Some(json!({ "id": id })), ctx).await.map_err(rpc_error_to_status)?;
        Ok(Response::new(gatewayproto::DeleteProfileResponse {}))
    }
}

#[tonic::async_trait]
impl gatewayproto::check_service_server::CheckService for GatewayGrpc {
    async fn get_check(&self, request: Request<gatewayproto::GetCheckRequest>) -> Result<Response<gatewayproto::Check>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let id = parse_uuid(&request.get_ref().id)?;
        let value = handlers::get_check(Some(json!({ "id": id })), ctx).await.map_err(rpc_error_to_status)?;
        Ok(Response::new(check_to_proto(decode(value)?)))
    }

    async fn get_checks(
        &self,
        request: Request<gatewayproto::GetChecksRequest>,
    ) -> Result<Response<gatewayproto::GetChecksResponse>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let req = request.get_ref();
        let value = handlers::get_checks(Some(json!({ "cursor": req.cursor, "page_size": req.page_size })), ctx)
            .await
            .map_err(rpc_error_to_status)?;
        let page: PageValue<Check> = decode(value)?;
        Ok(Response::new(gatewayproto::GetChecksResponse {
            items: page.items.into_iter().map(check_to_proto).collect(),
            next_cursor: page.next_cursor,
        }))
    }

    async fn create_check(
        &self,
        request: Request<gatewayproto::CreateCheckRequest>,
    ) -> Result<Response<gatewayproto::Check>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let req = request.into_inner();
        let params = json!({ "name": req.name, "upstream_services": req.upstream_services });
        let value = handlers::create_check(Some(params), ctx).await.map_err(rpc_error_to_status)?;
        Ok(Response::new(check_to_proto(decode(value)?)))
    }

    async fn update_check(
        &self,
        request: Request<gatewayproto::UpdateCheckRequest>,
    ) -> Result<Response<gatewayproto::Check>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let req = request.into_inner();
        let id = parse_uuid(&req.id)?;
        let upstream_services = if req.update_upstream_services {
            Some(req.upstream_services)
        } else {
            None
        };
        let params = json!({ "id": id, "name": req.name, "upstream_services": upstream_services });
        let value = handlers::update_check(Some(params), ctx).await.map_err(rpc_error_to_status)?;
        Ok(Response::new(check_to_proto(decode(value)?)))
    }

    async fn delete_check(
        &self,
        request: Request<gatewayproto::DeleteCheckRequest>,
    ) -> Result<Response<gatewayproto::DeleteCheckResponse>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let id = parse_uuid(&request.get_ref().id)?;
        handlers::delete_check(Some(json!({ "id": id })), ctx).await.map_err(rpc_error_to_status)?;
        Ok(Response::new(gatewayproto::DeleteCheckResponse {}))
    }
}

#[tonic::async_trait]
impl gatewayproto::scan_service_server::ScanService for GatewayGrpc {
    async fn perform_scan(
        &self,
        request: Request<gatewayproto::ScanRequest>,
    ) -> Result<Response<gatewayproto::ScanResponse>, Status> {
        let (ctx, _guard) = self.ctx(&request).await?;
        let req = request.into_inner();
        let (text, image) = match req.payload {
            Some(gatewayproto::scan_request::Payload::Text(t)) => (Some(t), None),
            Some(gatewayproto::scan_request::Payload::Image(i)) => (None, Some(i)),
            None => (None, None),
        };
        let params = json!({ "text": text, "image": image, "profile": req.profile });
        let value = handlers::perform_scan(Some(params), ctx).await.map_err(rpc_error_to_status)?;
        let result: sophrosyne_core::domain::ScanResult = decode(value)?;
        let checks = result
            .checks
            .into_iter()
            .map(|(name, r)| (name, gatewayproto::CheckResult { status: r.status, detail: r.detail }))
            .collect();
        Ok(Response::new(gatewayproto::ScanResponse {
            result: result.result,
            checks,
        }))
    }
}
