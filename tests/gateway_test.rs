mod common;

use axum::http::StatusCode;
use branchpass_token::{CredentialCodec, HandoffCodec, SigningKeys, TokenTimeConfig};
use chrono::Utc;
use common::*;
use std::error::Error;

#[tokio::test]
async fn test_alice_logs_in_on_home_branch_but_cannot_switch() -> Result<(), Box<dyn Error>> {
    let config = deployment(8080);
    let busan = app(&config, SigningKeys::generate());

    let response = send(&busan, login_request("alice", "alice-pw", "10.0.5.1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["activeBranchId"], 5);
    assert_eq!(body["activeBranchName"], "Busan");
    assert_eq!(body["homeBranchId"], 5);
    assert_eq!(body["redirectUrl"], "http://10.0.5.1:8080/");
    assert_eq!(body["mustChangePassword"], false);
    let credential = body["credential"].as_str().unwrap().to_string();

    let response = send(
        &busan,
        get("/branch/switch/7", "10.0.5.1", Some(&credential)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"], "forbidden");

    Ok(())
}

#[tokio::test]
async fn test_root_switches_from_busan_to_daegu() -> Result<(), Box<dyn Error>> {
    let config = deployment(8080);
    let keys = SigningKeys::generate();
    let busan = app(&config, keys.clone());
    let daegu = app(&config, keys.clone());

    let response = send(&busan, login_request("root", "root-pw", "10.0.5.1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["activeBranchId"], 5);
    assert_eq!(body["homeBranchId"], 0);
    let credential = body["credential"].as_str().unwrap().to_string();

    let response = send(
        &busan,
        get("/branch/switch/7", "10.0.5.1", Some(&credential)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let switch_url = location(&response);
    assert!(switch_url.starts_with("http://10.0.7.1:8080/auth/switchLogin?switch_token="));

    let consume_path = path_and_query(&switch_url);
    let response = send(&daegu, get(&consume_path, "10.0.7.1", None)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let landing = location(&response);
    assert!(landing.starts_with("http://10.0.7.1:8080/?token="));

    let new_credential = query_param(&landing, "token").unwrap();
    let claims = CredentialCodec::new(keys, 3600).decode(&new_credential)?;
    assert_eq!(claims.subject, "root");
    assert_eq!(claims.active_branch.id, 7);
    assert_eq!(claims.home_branch.id, 0);

    // The same token a second time.
    let response = send(&daegu, get(&consume_path, "10.0.7.1", None)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        "http://10.0.7.1:8080/?switchError=invalid"
    );

    // The new credential works on Daegu.
    let response = send(&daegu, get("/session", "10.0.7.1", Some(&new_credential))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["activeBranch"]["id"], 7);

    Ok(())
}

#[tokio::test]
async fn test_handoff_redeemed_on_wrong_branch_is_forbidden() {
    let config = deployment(8080);
    let keys = SigningKeys::generate();
    let busan = app(&config, keys.clone());

    let root = json_body(send(&busan, login_request("root", "root-pw", "10.0.5.1")).await).await;
    let credential = root["credential"].as_str().unwrap();
    let switch = send(&busan, get("/branch/switch/7", "10.0.5.1", Some(credential))).await;
    let switch_url = location(&switch);

    // Delivered to Busan instead of Daegu.
    let response = send(&busan, get(&path_and_query(&switch_url), "10.0.5.1", None)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        "http://10.0.5.1:8080/?switchError=forbidden"
    );
}

#[tokio::test]
async fn test_expired_handoff_lands_with_expired() {
    let config = deployment(8080);
    let keys = SigningKeys::generate();
    let daegu = app(&config, keys.clone());

    let stale = HandoffCodec::new(keys, 30)
        .mint_with_time(
            "root",
            7,
            "ref",
            "stale-nonce",
            TokenTimeConfig {
                start_time: Some(Utc::now().timestamp() - 300),
                duration: 30,
            },
        )
        .unwrap();

    let uri = format!("/auth/switchLogin?switch_token={}", stale.token);
    let response = send(&daegu, get(&uri, "10.0.7.1", None)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        "http://10.0.7.1:8080/?switchError=expired"
    );
}

#[tokio::test]
async fn test_consume_without_or_with_wrong_token() {
    let config = deployment(8080);
    let keys = SigningKeys::generate();
    let daegu = app(&config, keys.clone());

    let response = send(&daegu, get("/auth/switchLogin", "10.0.7.1", None)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        "http://10.0.7.1:8080/?switchError=invalid"
    );

    // A credential where a handoff token belongs.
    let root = json_body(send(&daegu, login_request("root", "root-pw", "10.0.7.1")).await).await;
    let uri = format!(
        "/auth/switchLogin?switch_token={}",
        root["credential"].as_str().unwrap()
    );
    let response = send(&daegu, get(&uri, "10.0.7.1", None)).await;
    assert_eq!(
        location(&response),
        "http://10.0.7.1:8080/?switchError=invalid"
    );
}

#[tokio::test]
async fn test_locality_guard_on_authenticated_route() {
    let config = deployment(8080);
    let keys = SigningKeys::generate();
    let instance = app(&config, keys);

    let login = send(&instance, login_request("alice", "alice-pw", "10.0.5.1")).await;
    let alice = json_body(login).await;
    let alice = alice["credential"].as_str().unwrap().to_string();
    let root = json_body(send(&instance, login_request("root", "root-pw", "10.0.5.1")).await).await;
    let root = root["credential"].as_str().unwrap().to_string();

    let at_home = send(&instance, get("/session", "10.0.5.1", Some(&alice))).await;
    assert_eq!(at_home.status(), StatusCode::OK);
    assert_eq!(json_body(at_home).await["subject"], "alice");

    let abroad = send(&instance, get("/session", "10.0.7.1", Some(&alice))).await;
    assert_eq!(abroad.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(abroad).await["error"], "forbidden");

    let unaffiliated = send(&instance, get("/session", "192.0.2.10", Some(&alice))).await;
    assert_eq!(unaffiliated.status(), StatusCode::FORBIDDEN);

    for served_from in ["10.0.0.1", "10.0.5.1", "10.0.7.1", "192.0.2.10"] {
        let response = send(&instance, get("/session", served_from, Some(&root))).await;
        assert_eq!(response.status(), StatusCode::OK, "root on {served_from}");
    }
}

#[tokio::test]
async fn test_login_failures() {
    let config = deployment(8080);
    let instance = app(&config, SigningKeys::generate());

    let response = send(&instance, login_request("alice", "wrong", "10.0.5.1")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"], "unauthenticated");
    assert!(body["message"].is_string());

    let response = send(&instance, login_request("alice", "alice-pw", "10.0.7.1")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_switch_request_failures() {
    let config = deployment(8080);
    let instance = app(&config, SigningKeys::generate());

    let response = send(&instance, get("/branch/switch/7", "10.0.5.1", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&instance, get("/branch/switch/7", "10.0.5.1", Some("garbage"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let root = json_body(send(&instance, login_request("root", "root-pw", "10.0.5.1")).await).await;
    let root = root["credential"].as_str().unwrap();
    let response = send(&instance, get("/branch/switch/42", "10.0.5.1", Some(root))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "not_found");
}

#[tokio::test]
async fn test_session_requires_credential() {
    let config = deployment(8080);
    let instance = app(&config, SigningKeys::generate());

    let response = send(&instance, get("/session", "10.0.5.1", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&instance, get("/session", "10.0.5.1", Some("garbage"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_credential_expiry_matches_ttl() {
    let config = deployment(8080);
    let keys = SigningKeys::generate();
    let instance = app(&config, keys.clone());

    let login = send(&instance, login_request("alice", "alice-pw", "10.0.5.1")).await;
    let body = json_body(login).await;
    let claims = CredentialCodec::new(keys, config.credential_ttl)
        .decode(body["credential"].as_str().unwrap())
        .unwrap();
    assert_eq!(claims.subject, "alice");
    assert_eq!(claims.expires_at, claims.issued_at + config.credential_ttl);
}
