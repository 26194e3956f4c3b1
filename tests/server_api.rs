//! HTTP API served on an ephemeral port, driven with reqwest

mod common;

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use apphost::capabilities::{
    sign_message, AppBroadcast, AppStore, BroadcastKind, PeerNetwork, PortCheckRequest,
};
use apphost::progress::ProgressMessage;
use apphost::server::{create_router, AppState};
use chrono::Utc;
use common::{single_spec, TestNode, NODE_KEY};
use reqwest::{Client, StatusCode};
use tokio::time::sleep;
use tokio_test::assert_ok;

fn find_available_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn start_server(node: &TestNode) -> String {
    let port = find_available_port();
    let app = create_router(AppState::new(node.agent.clone()));
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    sleep(Duration::from_millis(100)).await;
    format!("http://127.0.0.1:{}", port)
}

fn parse_lines(body: &str) -> Vec<ProgressMessage> {
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn test_health_and_status() {
    let node = TestNode::new();
    let base_url = start_server(&node).await;
    let client = Client::new();

    let response = assert_ok!(client.get(format!("{}/health", base_url)).send().await);
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .get(format!("{}/v1/status", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status: serde_json::Value = response.json().await.unwrap();
    assert_eq!(status["specs"]["cpuCores"], 8.0);
    assert_eq!(status["progress"]["installing"], false);
    assert_eq!(status["dos"]["score"], 0);
}

#[tokio::test]
async fn test_install_list_and_remove() {
    let node = TestNode::new();
    let base_url = start_server(&node).await;
    let client = Client::new();

    let response = client
        .post(format!("{}/v1/apps", base_url))
        .json(&single_spec("web"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/x-ndjson"
    );
    let lines = parse_lines(&response.text().await.unwrap());
    assert!(lines.len() > 1);
    let last = lines.last().unwrap();
    assert_eq!(last.status, "success");
    assert_eq!(lines.iter().filter(|l| l.is_terminal()).count(), 1);

    let apps: Vec<serde_json::Value> = client
        .get(format!("{}/v1/apps", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0]["name"], "web");

    let response = client
        .get(format!("{}/v1/apps/apphostweb/monitoring", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .delete(format!("{}/v1/apps/web", base_url))
        .send()
        .await
        .unwrap();
    let lines = parse_lines(&response.text().await.unwrap());
    assert_eq!(lines.last().unwrap().status, "success");
    assert!(node.store.installed_apps().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_unknown_app_reports_not_found() {
    let node = TestNode::new();
    let base_url = start_server(&node).await;

    let response = Client::new()
        .delete(format!("{}/v1/apps/nothing", base_url))
        .send()
        .await
        .unwrap();
    let lines = parse_lines(&response.text().await.unwrap());

    assert_eq!(lines.len(), 1);
    let data = lines[0].data.as_ref().unwrap();
    assert_eq!(data["message"], "Application nothing not found");
    assert_eq!(data["code"], 404);
}

#[tokio::test]
async fn test_signed_broadcast_updates_run_locations() {
    let node = TestNode::new();
    let base_url = start_server(&node).await;
    let client = Client::new();

    let timestamp = Utc::now().timestamp();
    let running_since = Some(Utc::now());
    let message = AppBroadcast::message_for(
        BroadcastKind::Running,
        "web",
        "198.51.100.7",
        running_since,
        timestamp,
    );
    let broadcast = AppBroadcast {
        kind: BroadcastKind::Running,
        app: "web".to_string(),
        ip: "198.51.100.7".to_string(),
        running_since,
        message: None,
        timestamp,
        signature: sign_message(&message, NODE_KEY),
    };
    let response = client
        .post(format!("{}/v1/broadcast", base_url))
        .json(&broadcast)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let locations = node.store.run_locations("web").await.unwrap();
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].ip, "198.51.100.7");

    // an older start time would rank this copy first for eviction
    let backdated = AppBroadcast {
        running_since: Some(Utc::now() - chrono::Duration::days(30)),
        ..broadcast.clone()
    };
    let response = client
        .post(format!("{}/v1/broadcast", base_url))
        .json(&backdated)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        node.store.run_locations("web").await.unwrap()[0].running_since,
        broadcast.running_since
    );

    let forged = AppBroadcast {
        kind: BroadcastKind::Removed,
        signature: sign_message(&message, "another-key"),
        ..broadcast
    };
    let response = client
        .post(format!("{}/v1/broadcast", base_url))
        .json(&forged)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(node.store.run_locations("web").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_port_check_connects_back() {
    let node = TestNode::new();
    let base_url = start_server(&node).await;

    let open = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open_port = open.local_addr().unwrap().port();
    let network: Arc<dyn PeerNetwork> = node.network.clone();
    let request = PortCheckRequest::signed("127.0.0.1", vec![open_port], network.as_ref());

    let response = Client::new()
        .post(format!("{}/v1/ports/check", base_url))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "success");
}
