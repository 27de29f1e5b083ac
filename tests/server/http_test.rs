//! Drive the relay server over real HTTP with a mock CLI behind it.

use std::net::SocketAddr;
use std::time::Duration;

use claude_relay::config::RelayConfig;
use claude_relay::server::RelayServer;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::mock::MockCli;

struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
    _mock: MockCli,
}

impl TestServer {
    async fn start(mock: MockCli) -> Self {
        let mut config = RelayConfig::default();
        config.cli.binary = mock.path().to_path_buf();
        config.retry.max_retries = 1;
        config.retry.delays_ms = vec![10];
        config.queue.capacity = 3;

        let server = RelayServer::from_config(&config).unwrap();
        let shutdown = server.shutdown_token();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(server.serve(listener));

        Self {
            addr,
            shutdown,
            task,
            _mock: mock,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not shut down")
            .expect("server task panicked");
        tokio_test::assert_ok!(result);
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn post_json(url: &str, body: &Value) -> (u16, Value) {
    let response = client()
        .post(url)
        .json(body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn claude_endpoint_returns_completion() {
    let server = TestServer::start(MockCli::replying(r#"{"result":"hi"}"#)).await;

    let (status, body) = post_json(&server.url("/api/claude"), &json!({"text": "hello"})).await;

    assert_eq!(status, 200);
    assert_eq!(body, json!({"completion": "hi"}));
    server.stop().await;
}

#[tokio::test]
async fn claude_endpoint_rejects_missing_text() {
    let server = TestServer::start(MockCli::replying(r#"{"result":"hi"}"#)).await;

    let (status, body) = post_json(&server.url("/api/claude"), &json!({"prompt": "hello"})).await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({"error": "Missing text field"}));

    let response = client()
        .post(server.url("/api/claude"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    server.stop().await;
}

#[tokio::test]
async fn claude_endpoint_maps_overload_to_503() {
    let mock = MockCli::overloaded_then(100, "{}");
    let server = TestServer::start(mock).await;

    let (status, body) = post_json(&server.url("/api/claude"), &json!({"text": "hello"})).await;

    assert_eq!(status, 503);
    assert_eq!(
        body,
        json!({"error": "Service overloaded, please try again later"})
    );
    server.stop().await;
}

#[tokio::test]
async fn claude_endpoint_maps_fatal_to_500() {
    let server = TestServer::start(MockCli::new("echo 'not logged in' >&2\nexit 1")).await;

    let (status, body) = post_json(&server.url("/api/claude"), &json!({"text": "hello"})).await;

    assert_eq!(status, 500);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("not logged in"), "{error}");
    server.stop().await;
}

#[tokio::test]
async fn health_endpoint() {
    let server = TestServer::start(MockCli::new("exit 0")).await;

    let response = client().get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].is_string());

    server.stop().await;
}

#[tokio::test]
async fn message_queue_round_trip() {
    let server = TestServer::start(MockCli::new("exit 0")).await;

    for (i, message) in ["one", "two", "three", "four"].iter().enumerate() {
        let (status, body) = post_json(&server.url("/send"), &json!({"message": message})).await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({"success": true, "id": i + 1}));
    }

    let (status, body) = post_json(&server.url("/send"), &json!({})).await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({"error": "No message provided"}));

    let peek: Value = client()
        .get(server.url("/messages?mark_as_read=false"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<u64> = peek["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 3, 4]);

    let taken: Value = client()
        .get(server.url("/messages"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(taken["messages"].as_array().unwrap().len(), 3);

    let after: Value = client()
        .get(server.url("/messages"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after, json!({"messages": []}));

    server.stop().await;
}
