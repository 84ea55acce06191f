use calpilot::config::Config;
use calpilot::qa::DRY_RUN_ANSWER;
use calpilot::server::{self, AppState};
use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;

fn sample_calls() -> Value {
    json!([
        {
            "id": "call-1",
            "created_at_utc": "2024-03-15T14:30:00Z",
            "call_metadata": {
                "duration": 3660,
                "title": "Pricing discussion with Acme",
                "parties": [
                    {"name": "Alice", "email": "alice@acme.com"},
                    {"name": "Bob", "email": "bob@globex.io"}
                ]
            },
            "transcript": {"text": "We talked about pricing today. The budget is tight."},
            "inference_results": {"call_summary": "Acme wants a discount."}
        },
        {
            "id": "call-2",
            "created_at_utc": "2024-04-02T09:00:00Z",
            "call_metadata": {
                "duration": 45,
                "title": "Onboarding",
                "parties": [{"name": "Carol", "email": "carol@initech.com"}]
            },
            "transcript": {"text": "Onboarding went well."}
        }
    ])
}

/// Start the API on an ephemeral port. Returns the base URL.
async fn start_server() -> (TempDir, String) {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("calls.json");
    fs::write(&path, sample_calls().to_string()).unwrap();

    let config = Config::for_testing(&path);
    let state = AppState::from_config(&config).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, state));

    (tmp, format!("http://{}", addr))
}

#[tokio::test]
async fn test_health() {
    let (_tmp, base) = start_server().await;
    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_get_call() {
    let (_tmp, base) = start_server().await;
    let resp = reqwest::get(format!("{}/api/call/call-1", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], "call-1");
    assert_eq!(body["formatted_date"], "March 15, 2024");
    assert_eq!(body["duration_label"], "1h 1m");
    assert_eq!(body["call_metadata"]["duration"], 3660);
    assert_eq!(body["companies"], json!(["acme", "globex"]));
    assert_eq!(
        body["keywords"]["pricing"],
        json!(["we talked about pricing today."])
    );
    // Unknown party fields survive.
    assert_eq!(body["call_metadata"]["parties"][0]["name"], "Alice");
}

#[tokio::test]
async fn test_get_call_not_found() {
    let (_tmp, base) = start_server().await;
    let resp = reqwest::get(format!("{}/api/call/nope", base)).await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Call not found");
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_search() {
    let (_tmp, base) = start_server().await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{}/api/calls/search", base))
        .query(&[("query", "pricing")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let results = body.as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["id"], "call-1");

    let body: Value = client
        .get(format!("{}/api/calls/search", base))
        .query(&[("company", "initech"), ("date_from", "2024-04-01")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body.as_array().unwrap().len(), 1);

    let body: Value = client
        .get(format!("{}/api/calls/search", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_summary() {
    let (_tmp, base) = start_server().await;
    let resp = reqwest::get(format!("{}/api/call/call-2/summary", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["duration_label"], "45s");
    assert_eq!(body["participant_count"], 1);
    assert_eq!(body["summary"], "");

    let resp = reqwest::get(format!("{}/api/call/nope/summary", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_companies_routes() {
    let (_tmp, base) = start_server().await;
    for path in ["/api/companies", "/api/analytics/companies"] {
        let body: Value = reqwest::get(format!("{}{}", base, path))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, json!(["acme", "globex", "initech"]));
    }
}

#[tokio::test]
async fn test_ask_dry_run() {
    let (_tmp, base) = start_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/ask", base))
        .json(&json!({"call_id": "call-1", "question": "What was the budget?"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["answer"], DRY_RUN_ANSWER);
    assert_eq!(body["call_id"], "call-1");
    assert_eq!(body["question"], "What was the budget?");
}

#[tokio::test]
async fn test_ask_bad_requests() {
    let (_tmp, base) = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/ask", base))
        .json(&json!({"call_id": "call-1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "bad_request");
    assert!(body["error"].as_str().unwrap().contains("question"));

    let resp = client
        .post(format!("{}/api/ask", base))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/ask", base))
        .json(&json!({"call_id": "nope", "question": "Anything?"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_refresh() {
    let (tmp, base) = start_server().await;
    let mut calls = sample_calls();
    calls.as_array_mut().unwrap().pop();
    fs::write(tmp.path().join("calls.json"), calls.to_string()).unwrap();

    let resp = reqwest::Client::new()
        .post(format!("{}/api/calls/refresh", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Cache refreshed successfully");
    assert_eq!(body["count"], 1);

    let resp = reqwest::get(format!("{}/api/call/call-2", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_refresh_reports_malformed_store() {
    let (tmp, base) = start_server().await;
    fs::write(tmp.path().join("calls.json"), "[broken").unwrap();

    let resp = reqwest::Client::new()
        .post(format!("{}/api/calls/refresh", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "internal");
}
