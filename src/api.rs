use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    middleware,
    routing::{get, patch, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;
use uuid::Uuid;

use crate::error::ApiErrorWithMeta;
use crate::facade::{PlayerStats, RedemptionOutcome, ReferralFacade, ShareLink};
use crate::registry::{OrgReferralOptions, OrgReferralUpdate};
use crate::responses::{ApiOk, RequestMeta, meta_middleware};
use crate::types::{
    AccountType, JoinRequest, JoinRequestStatus, OrganizationReferral, PlayerProfile,
    PlayerRewards,
};

/// The application state.
#[derive(Clone)]
pub struct AppState {
    /// The composed referral facade.
    pub facade: ReferralFacade,
}

/// The request to mint (or fetch) a caller's personal referral.
#[derive(Deserialize)]
pub struct CreateReferralRequest {
    /// The ID of the owning account.
    pub owner_id: String,
}

/// The request to redeem a referral code.
#[derive(Deserialize)]
pub struct RedeemRequest {
    /// The code being redeemed.
    pub code: String,
    /// The redeeming player's profile.
    #[serde(flatten)]
    pub player: PlayerProfile,
}

/// The request to mint a new organization referral code.
#[derive(Deserialize)]
pub struct CreateOrgReferralRequest {
    /// The account type of the organization.
    pub organization_type: AccountType,
    /// The display name of the organization.
    pub organization_name: String,
    /// An optional description shown to invitees.
    #[serde(default)]
    pub description: Option<String>,
    /// An optional redemption cap.
    #[serde(default)]
    pub max_usage: Option<u32>,
    /// An optional expiry timestamp.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// The request to decide a join request.
#[derive(Deserialize)]
pub struct DecideRequest {
    /// The ID of the deciding account.
    pub approver_id: String,
    /// The display name of the deciding account.
    pub approver_name: String,
    /// The reason, on rejection.
    #[serde(default)]
    pub reason: Option<String>,
}

/// The request to spend available points.
#[derive(Deserialize)]
pub struct SpendRequest {
    /// The number of points to deduct.
    pub amount: i64,
}

#[derive(Deserialize)]
pub struct ListRequestsQuery {
    #[serde(default)]
    status: Option<JoinRequestStatus>,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_currency")]
    currency: String,
}

pub fn init_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/referrals", post(create_referral_handler))
        .route("/redeem", post(redeem_handler))
        .route(
            "/organizations/{org_id}/referrals",
            get(list_org_referrals_handler).post(create_org_referral_handler),
        )
        .route(
            "/organizations/{org_id}/referrals/{referral_id}",
            patch(update_org_referral_handler),
        )
        .route(
            "/organizations/{org_id}/join-requests",
            get(list_join_requests_handler),
        )
        .route(
            "/organizations/{org_id}/join-requests/{request_id}/approve",
            post(approve_handler),
        )
        .route(
            "/organizations/{org_id}/join-requests/{request_id}/reject",
            post(reject_handler),
        )
        .route("/rewards/{player_id}", get(get_rewards_handler))
        .route("/rewards/{player_id}/spend", post(spend_handler))
        .route("/stats/{player_id}", get(stats_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}

async fn create_referral_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CreateReferralRequest>,
) -> Result<ApiOk<ShareLink>, ApiErrorWithMeta> {
    let link = st
        .facade
        .share_link(&req.owner_id)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::created("referral ready", link, meta))
}

async fn redeem_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<RedeemRequest>,
) -> Result<ApiOk<RedemptionOutcome>, ApiErrorWithMeta> {
    let outcome = st
        .facade
        .redeem(&req.code, &req.player)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("code redeemed", outcome, meta))
}

async fn create_org_referral_handler(
    State(st): State<AppState>,
    Path(org_id): Path<String>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CreateOrgReferralRequest>,
) -> Result<ApiOk<OrganizationReferral>, ApiErrorWithMeta> {
    let referral = st
        .facade
        .registry()
        .create_organization(
            &org_id,
            req.organization_type,
            &req.organization_name,
            OrgReferralOptions {
                description: req.description,
                max_usage: req.max_usage,
                expires_at: req.expires_at,
            },
        )
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::created("referral created", referral, meta))
}

async fn list_org_referrals_handler(
    State(st): State<AppState>,
    Path(org_id): Path<String>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<OrganizationReferral>>, ApiErrorWithMeta> {
    let referrals = st
        .facade
        .registry()
        .list_for_organization(&org_id)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("referrals fetched", referrals, meta))
}

async fn update_org_referral_handler(
    State(st): State<AppState>,
    Path((org_id, referral_id)): Path<(String, Uuid)>,
    Extension(meta): Extension<RequestMeta>,
    Json(update): Json<OrgReferralUpdate>,
) -> Result<ApiOk<OrganizationReferral>, ApiErrorWithMeta> {
    let referral = st
        .facade
        .registry()
        .update_organization(&org_id, referral_id, update)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("referral updated", referral, meta))
}

async fn list_join_requests_handler(
    State(st): State<AppState>,
    Path(org_id): Path<String>,
    Query(query): Query<ListRequestsQuery>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<JoinRequest>>, ApiErrorWithMeta> {
    let requests = st
        .facade
        .workflow()
        .list_for_organization(&org_id, query.status)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("join requests fetched", requests, meta))
}

async fn approve_handler(
    State(st): State<AppState>,
    Path((org_id, request_id)): Path<(String, Uuid)>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<DecideRequest>,
) -> Result<ApiOk<JoinRequest>, ApiErrorWithMeta> {
    let request = st
        .facade
        .workflow()
        .approve(&org_id, request_id, &req.approver_id, &req.approver_name)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("join request approved", request, meta))
}

async fn reject_handler(
    State(st): State<AppState>,
    Path((org_id, request_id)): Path<(String, Uuid)>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<DecideRequest>,
) -> Result<ApiOk<JoinRequest>, ApiErrorWithMeta> {
    let request = st
        .facade
        .workflow()
        .reject(
            &org_id,
            request_id,
            &req.approver_id,
            &req.approver_name,
            req.reason,
        )
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("join request rejected", request, meta))
}

async fn get_rewards_handler(
    State(st): State<AppState>,
    Path(player_id): Path<String>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<PlayerRewards>, ApiErrorWithMeta> {
    let rewards = st
        .facade
        .ledger()
        .get_or_create(&player_id)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("rewards fetched", rewards, meta))
}

async fn spend_handler(
    State(st): State<AppState>,
    Path(player_id): Path<String>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<SpendRequest>,
) -> Result<ApiOk<PlayerRewards>, ApiErrorWithMeta> {
    let rewards = st
        .facade
        .ledger()
        .spend(&player_id, req.amount)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("points spent", rewards, meta))
}

async fn stats_handler(
    State(st): State<AppState>,
    Path(player_id): Path<String>,
    Query(query): Query<StatsQuery>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<PlayerStats>, ApiErrorWithMeta> {
    let stats = st
        .facade
        .stats(&player_id, &query.currency)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("stats fetched", stats, meta))
}
