//! HTTP API tests on the dev-mode stack (in-memory chain, mock coprocessor)

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use num_bigint::BigUint;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use credit_gateway::chain::DevChain;
use credit_gateway::routes::create_routes;
use credit_gateway::services::resolver::HARDHAT_CHAIN_ID;
use credit_gateway::services::{
    BackendConfigResolver, DefaultBackendFactory, DeploymentMode, InputVerifierSigner,
};
use credit_gateway::state::AppState;
use credit_gateway::types::{Address, WEI_PER_ETH};

const ACCOUNT: &str = "0x00000000000000000000000000000000000000a1";
const CONTRACT: Address = Address([0xcc; 20]);

fn app() -> (Router, Arc<DevChain>) {
    let signer = Arc::new(InputVerifierSigner::new(&[21u8; 32]));
    let chain = Arc::new(
        DevChain::new(HARDHAT_CHAIN_ID, CONTRACT).with_input_verifier(signer.public_key()),
    );
    let account: Address = ACCOUNT.parse().unwrap();
    chain.fund(account, 400, BigUint::from(WEI_PER_ETH) * 12u32);

    let factory = Arc::new(DefaultBackendFactory::new(reqwest::Client::new(), signer, true));
    let resolver = Arc::new(BackendConfigResolver::new(DeploymentMode::Strict, None, factory));
    let state = AppState::new(chain.clone(), chain.clone(), resolver, true);
    (create_routes(state), chain)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app();
    let (status, body) = call(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["dev_mode"], true);
    assert_eq!(body["in_flight_submissions"], 0);
}

#[tokio::test]
async fn test_reputation_endpoint() {
    let (app, _) = app();
    let (status, body) = call(&app, Method::GET, &format!("/api/v1/reputation/{ACCOUNT}"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "measured");
    assert_eq!(body["metrics"]["balance_eth"], "12.0");
    assert_eq!(body["metrics"]["scores"]["balance_score"], 100);
    assert_eq!(body["metrics"]["scores"]["transaction_count_score"], 86);
    assert_eq!(body["metrics"]["onchain_score"], 95);
    assert_eq!(body["metrics"]["observables"]["balance_wei"], "12000000000000000000");

    let (status, body) = call(&app, Method::GET, "/api/v1/reputation/0x1234", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_submit_then_evaluate() {
    let (app, chain) = app();
    chain.set_approve_on_evaluate(false);

    let (status, receipt) = call(
        &app,
        Method::POST,
        "/api/v1/credit/submit",
        Some(json!({ "account": ACCOUNT, "income": 75, "repayment_rate": 95, "loan_history": 80 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{receipt}");
    assert_eq!(receipt["chain_id"], HARDHAT_CHAIN_ID);
    assert_eq!(receipt["degraded"], Value::Null);

    let (_, body) = call(&app, Method::GET, &format!("/api/v1/credit/status/{ACCOUNT}"), None).await;
    assert_eq!(body["status"], json!({ "state": "submitted" }));

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/credit/evaluate",
        Some(json!({ "account": ACCOUNT })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!({ "state": "evaluated", "approved": false }));

    let (_, body) = call(&app, Method::GET, "/status", None).await;
    assert_eq!(body["total_submissions"], 1);
    assert_eq!(body["degraded_submissions"], 0);
    assert_eq!(body["total_evaluations"], 1);
    assert_eq!(body["active_chain_id"], HARDHAT_CHAIN_ID);
    assert_eq!(body["backend_generation"], 1);
}

#[tokio::test]
async fn test_incomplete_form() {
    let (app, chain) = app();
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/credit/submit",
        Some(json!({ "account": ACCOUNT, "income": 75 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INCOMPLETE_FORM");
    assert_eq!(body["stage"], "assembling_inputs");
    assert_eq!(body["details"]["missing"], json!(["repayment_rate", "loan_history"]));
    assert_eq!(chain.transactions_sent(), 0);
}

#[tokio::test]
async fn test_evaluate_without_submission() {
    let (app, chain) = app();
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/credit/evaluate",
        Some(json!({ "account": ACCOUNT })),
    )
    .await;

    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["code"], "NO_CREDIT_DATA");
    assert_eq!(body["stage"], "reading_status");
    assert_eq!(chain.transactions_sent(), 0);
}

#[tokio::test]
async fn test_network_and_unsupported_chain() {
    let (app, chain) = app();
    let (status, body) = call(&app, Method::GET, "/api/v1/network", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "hardhat");
    assert_eq!(body["mode"], "mock");

    chain.set_chain_id(1);
    let (status, body) = call(&app, Method::GET, "/api/v1/network", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "UNSUPPORTED_NETWORK");
    assert_eq!(body["details"]["chain_id"], 1);
}

#[tokio::test]
async fn test_cancel_when_idle() {
    let (app, _) = app();
    let (status, body) = call(&app, Method::DELETE, &format!("/api/v1/credit/submit/{ACCOUNT}"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], false);
}
