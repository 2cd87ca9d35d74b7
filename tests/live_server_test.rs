mod common;

use std::error::Error;

use branchpass::serve;
use branchpass_token::SigningKeys;
use common::*;
use serde_json::json;
use tokio::net::TcpListener;

// The server sees a loopback socket; the interface list maps it to Busan.
#[tokio::test]
async fn test_live_server_substitutes_loopback_address() -> Result<(), Box<dyn Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let config = deployment(port);
    let state = instance(
        &config,
        SigningKeys::generate(),
        vec!["10.0.5.1".parse()?],
    );
    let server = tokio::spawn(serve(listener, state));

    let base = format!("http://127.0.0.1:{port}");
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;

    let response = client
        .post(format!("{base}/login"))
        .json(&json!({ "userId": "alice", "secret": "alice-pw" }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["activeBranchId"], 5);
    assert_eq!(body["redirectUrl"], format!("http://10.0.5.1:{port}/"));
    let credential = body["credential"].as_str().unwrap().to_string();

    let response = client
        .get(format!("{base}/session"))
        .bearer_auth(&credential)
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    // A forwarded host naming Daegu moves the request off alice's branch.
    let response = client
        .get(format!("{base}/session"))
        .bearer_auth(&credential)
        .header("x-forwarded-host", "10.0.7.1")
        .send()
        .await?;
    assert_eq!(response.status(), 403);

    let response = client
        .get(format!("{base}/auth/switchLogin"))
        .send()
        .await?;
    assert_eq!(response.status(), 302);
    assert_eq!(
        response.headers()["location"].to_str()?,
        format!("http://10.0.5.1:{port}/?switchError=invalid")
    );

    server.abort();
    Ok(())
}
