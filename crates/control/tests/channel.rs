use std::net::SocketAddr;
use std::sync::Arc;

use control::{
    ControlError, ControlMessage, ControlPlane, HttpControlClient, LocalControlPlane,
    control_router,
};
use registry::FunctionRegistry;

async fn start(registry: Arc<FunctionRegistry>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, control_router(registry)).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn http_client_drives_remote_registry() {
    let registry = Arc::new(FunctionRegistry::new());
    let addr = start(Arc::clone(&registry)).await;
    let client = HttpControlClient::new(format!("http://{}", addr));

    client
        .send(&ControlMessage::upsert("echo", vec!["10.0.0.1".into(), "10.0.0.2".into()]))
        .await
        .unwrap();
    assert_eq!(registry.lookup("echo").unwrap().len(), 2);

    client.send(&ControlMessage::delete("echo")).await.unwrap();
    assert!(!registry.contains("echo"));

    let err = client.send(&ControlMessage::delete("echo")).await.unwrap_err();
    assert!(matches!(err, ControlError::Rejected { status: 404, .. }));
}

#[tokio::test]
async fn receiver_rejects_bad_input() {
    let addr = start(Arc::new(FunctionRegistry::new())).await;
    let url = format!("http://{}", addr);
    let http = reqwest::Client::new();

    let malformed = http.post(&url).body("{not json").send().await.unwrap();
    assert_eq!(malformed.status().as_u16(), 400);

    let future = http
        .post(&url)
        .body(r#"{"version":7,"name":"echo","ips":["a"]}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(future.status().as_u16(), 400);

    let get = http.get(&url).send().await.unwrap();
    assert_eq!(get.status().as_u16(), 405);

    let legacy = http
        .post(&url)
        .body(r#"{"name":"/echo","ips":["10.0.0.9"]}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(legacy.status().as_u16(), 200);
    assert_eq!(legacy.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn unreachable_receiver_is_an_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = HttpControlClient::new(format!("http://{}", addr));
    let err = client
        .send(&ControlMessage::upsert("echo", vec!["a".into()]))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Unreachable(_)));
}

#[tokio::test]
async fn local_channel_keeps_the_same_contract() {
    let registry = Arc::new(FunctionRegistry::new());
    let local = LocalControlPlane::new(Arc::clone(&registry));
    local
        .send(&ControlMessage::upsert("echo", vec!["a".into()]))
        .await
        .unwrap();
    assert!(registry.contains("echo"));
    let err = local.send(&ControlMessage::delete("ghost")).await.unwrap_err();
    assert_eq!(err.status(), 404);
}
