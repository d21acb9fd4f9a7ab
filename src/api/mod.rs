// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::Role,
    blockchain::NetworkInfo,
    models::{
        CampaignContractInfo, CampaignContractResponse, CampaignSubmission, ContributeRequest, CreateCampaignRequest, IdentityResponse,
        LoginRequest, LoginResponse, MilestoneRequest, NonceResponse, PreparedCallResponse,
        RegisterRequest, RegisterResponse, TrackTransactionRequest, TransactionListResponse,
    },
    state::AppState,
    storage::{CampaignRecord, CampaignStatus, Profile, StoredTransaction, TxStatus, TxType},
};

pub mod auth;
pub mod blockchain;
pub mod health;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/auth/nonce", get(auth::get_nonce))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me))
        .route("/blockchain/campaigns", post(blockchain::create_campaign))
        .route(
            "/blockchain/campaigns/{address}/sync",
            post(blockchain::sync_campaign),
        )
        .route(
            "/blockchain/campaigns/{address}/contract",
            get(blockchain::campaign_contract),
        )
        .route(
            "/blockchain/campaigns/{address}/contribute",
            post(blockchain::contribute),
        )
        .route(
            "/blockchain/campaigns/{address}/refund",
            post(blockchain::refund),
        )
        .route(
            "/blockchain/campaigns/{address}/milestones/{index}/complete",
            post(blockchain::complete_milestone),
        )
        .route(
            "/blockchain/campaigns/{address}/milestones/{index}/withdraw",
            post(blockchain::withdraw_milestone_funds),
        )
        .route(
            "/blockchain/transactions",
            get(blockchain::list_transactions),
        )
        .route(
            "/blockchain/transactions/{tx_hash}",
            get(blockchain::get_transaction),
        )
        .route(
            "/blockchain/transactions/{tx_hash}/track",
            post(blockchain::track_transaction),
        )
        .route("/blockchain/network", get(blockchain::network_info));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .nest("/v1", v1_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        auth::get_nonce,
        auth::register,
        auth::login,
        auth::me,
        blockchain::create_campaign,
        blockchain::sync_campaign,
        blockchain::campaign_contract,
        blockchain::contribute,
        blockchain::refund,
        blockchain::complete_milestone,
        blockchain::withdraw_milestone_funds,
        blockchain::track_transaction,
        blockchain::list_transactions,
        blockchain::get_transaction,
        blockchain::network_info
    ),
    components(
        schemas(
            Role,
            Profile,
            NonceResponse,
            RegisterRequest,
            RegisterResponse,
            LoginRequest,
            LoginResponse,
            IdentityResponse,
            CreateCampaignRequest,
            MilestoneRequest,
            CampaignSubmission,
            CampaignRecord,
            CampaignStatus,
            CampaignContractInfo,
            CampaignContractResponse,
            ContributeRequest,
            PreparedCallResponse,
            TrackTransactionRequest,
            TransactionListResponse,
            StoredTransaction,
            TxType,
            TxStatus,
            NetworkInfo,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Auth", description = "Wallet signature authentication"),
        (name = "Blockchain", description = "Campaign contracts and transaction tracking")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::signature::tests::{sign, test_signer};
    use crate::state::tests::test_state;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const CAMPAIGN: &str = "0xa16e02e87b7454126e5e10d957a927a7f5b5d2be";
    const TX_HASH: &str = "0x5555555555555555555555555555555555555555555555555555555555555555";

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    fn get_req(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_req(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Register the test wallet with `role` and log in over HTTP.
    async fn login_as(app: &Router, role: &str, profile: Value) -> String {
        let signer = test_signer();
        let address = format!("{:#x}", signer.address());

        let response = send(
            app,
            post_req(
                "/v1/auth/register",
                None,
                json!({ "wallet_address": address, "role": role, "profile": profile }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let nonce = json_body(response).await["nonce"].as_str().unwrap().to_string();

        let response = send(
            app,
            post_req(
                "/v1/auth/login",
                None,
                json!({ "wallet_address": address, "role": role, "signature": sign(&signer, &nonce) }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn liveness_is_ok() {
        let (state, _dir) = test_state();
        let app = router(state);
        let response = send(&app, get_req("/health/live", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_unreachable_ledger() {
        let (state, _dir) = test_state();
        let app = router(state);
        let response = send(&app, get_req("/health", None)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = json_body(response).await;
        assert_eq!(body["checks"]["database"], "ok");
        assert_eq!(body["checks"]["ledger"], "unavailable");
    }

    #[tokio::test]
    async fn login_flow_over_http() {
        let (state, _dir) = test_state();
        let app = router(state);
        let token = login_as(&app, "investor", json!({ "kind": "investor", "name": "Ada" })).await;

        let response = send(&app, get_req("/v1/auth/me", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["address"], format!("{:#x}", test_signer().address()));
        assert_eq!(body["role"], "investor");
        assert!(body.get("nonce").is_none());
    }

    #[tokio::test]
    async fn replayed_login_is_rejected() {
        let (state, _dir) = test_state();
        let app = router(state);
        let signer = test_signer();
        let address = format!("{:#x}", signer.address());

        let response = send(
            &app,
            post_req(
                "/v1/auth/register",
                None,
                json!({ "wallet_address": address, "profile": { "kind": "basic" } }),
            ),
        )
        .await;
        let nonce = json_body(response).await["nonce"].as_str().unwrap().to_string();
        let login = json!({ "wallet_address": address, "signature": sign(&signer, &nonce) });

        let first = send(&app, post_req("/v1/auth/login", None, login.clone())).await;
        assert_eq!(first.status(), StatusCode::OK);
        let replay = send(&app, post_req("/v1/auth/login", None, login)).await;
        assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(replay).await["error_code"], "unauthenticated");
    }

    #[tokio::test]
    async fn unregistered_login_is_not_found() {
        let (state, _dir) = test_state();
        let app = router(state);
        let response = send(
            &app,
            post_req(
                "/v1/auth/login",
                None,
                json!({ "wallet_address": "0x2222222222222222222222222222222222222222", "signature": "0x00" }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn nonce_rejects_malformed_address() {
        let (state, _dir) = test_state();
        let app = router(state);
        let response = send(&app, get_req("/v1/auth/nonce?wallet_address=0x123", None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(
            &app,
            get_req(
                "/v1/auth/nonce?wallet_address=0x2222222222222222222222222222222222222222&role=startup",
                None,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["nonce"].as_str().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn protected_routes_require_bearer() {
        let (state, _dir) = test_state();
        let app = router(state);
        let response = send(&app, get_req("/v1/auth/me", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error_code"], "missing_auth_header");
    }

    #[tokio::test]
    async fn contribute_returns_call_data() {
        let (state, _dir) = test_state();
        let app = router(state);
        let token = login_as(&app, "investor", json!({ "kind": "investor", "name": "Ada" })).await;

        let response = send(
            &app,
            post_req(
                &format!("/v1/blockchain/campaigns/{CAMPAIGN}/contribute"),
                Some(&token),
                json!({ "amount": "0.5" }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["to"].as_str().unwrap().to_lowercase(), CAMPAIGN);
        assert_eq!(body["value"], "500000000000000000");
        assert!(body["data"].as_str().unwrap().starts_with("0x"));

        let response = send(
            &app,
            post_req(
                &format!("/v1/blockchain/campaigns/{CAMPAIGN}/contribute"),
                Some(&token),
                json!({ "amount": "0" }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn campaign_creation_requires_startup_and_service_key() {
        let (state, _dir) = test_state();
        let app = router(state);
        let request = json!({ "title": "Solar", "goal": "10", "duration_secs": 86400 });

        let investor = login_as(&app, "investor", json!({ "kind": "investor", "name": "Ada" })).await;
        let response = send(
            &app,
            post_req("/v1/blockchain/campaigns", Some(&investor), request.clone()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let startup = login_as(&app, "startup", json!({ "kind": "startup", "name": "Sun Co" })).await;
        let response = send(
            &app,
            post_req("/v1/blockchain/campaigns", Some(&startup), request),
        )
        .await;
        // test state has no service signing key
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["error_code"], "ledger_unavailable");
    }

    #[tokio::test]
    async fn tracked_transaction_appears_in_history() {
        let (state, _dir) = test_state();
        let app = router(state);
        let token = login_as(&app, "investor", json!({ "kind": "investor", "name": "Ada" })).await;

        let response = send(
            &app,
            post_req(
                &format!("/v1/blockchain/transactions/{TX_HASH}/track"),
                Some(&token),
                json!({ "tx_type": "contribution", "to": CAMPAIGN, "amount": "1" }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(json_body(response).await["status"], "pending");

        let response = send(
            &app,
            get_req(&format!("/v1/blockchain/transactions/{TX_HASH}"), Some(&token)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(
            &app,
            get_req("/v1/blockchain/transactions?tx_type=contribution", Some(&token)),
        )
        .await;
        let body = json_body(response).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["transactions"][0]["tx_hash"], TX_HASH);

        let response = send(
            &app,
            get_req(
                "/v1/blockchain/transactions/0x9999999999999999999999999999999999999999999999999999999999999999",
                Some(&token),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn network_info_is_unavailable_without_node() {
        let (state, _dir) = test_state();
        let app = router(state);
        let response = send(&app, get_req("/v1/blockchain/network", None)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn campaign_sync_and_contract_routes() {
        let (state, _dir) = test_state();
        let app = router(state.clone());

        let uri = format!("/v1/blockchain/campaigns/{CAMPAIGN}/sync");
        let response = send(&app, post_req(&uri, None, json!({}))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let token = login_as(&app, "investor", json!({ "kind": "investor", "name": "Ada" })).await;
        let response = send(&app, post_req(&uri, Some(&token), json!({}))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let mut campaign = crate::storage::CampaignRecord::new(
            "0x1111111111111111111111111111111111111111",
            "Solar",
            alloy::primitives::U256::from(500),
        );
        campaign.address = Some(CAMPAIGN.to_string());
        state.campaigns.insert_campaign(&campaign).unwrap();
        let response = send(&app, post_req(&uri, Some(&token), json!({}))).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        // public read, no node behind it
        let response = send(
            &app,
            get_req(&format!("/v1/blockchain/campaigns/{CAMPAIGN}/contract"), None),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let response = send(&app, get_req("/v1/blockchain/campaigns/0x12/contract", None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
