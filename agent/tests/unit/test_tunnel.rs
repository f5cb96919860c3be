//! Reverse ssh tunnel handler tests

use serde_json::json;

use k3s_edge_agent::orchestrator::Request;

use crate::fakes::{FakeControlPlane, FakeImageRuntime, Harness};

fn request(request_id: &str, kind: &str, params: serde_json::Value) -> Request {
    let mut payload = params;
    payload["request_id"] = json!(request_id);
    payload["request"] = json!(kind);
    Request::parse(payload).unwrap()
}

#[tokio::test]
async fn test_start_reverse_ssh_connection() {
    let harness = Harness::with_tunnel_log(
        FakeControlPlane::default(),
        FakeImageRuntime::default(),
        "debug1: Authentication succeeded (publickey).\nAllocated port 40231 for remote forward to localhost:22\n",
    );

    harness
        .engine
        .handle(&request(
            "r-1",
            "start_reverse_ssh_connection",
            json!({"ssh_host": "relay.example.com", "ssh_user": "edge", "ssh_port": 2222}),
        ))
        .await;

    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Completed");
    assert_eq!(result["result"], json!({"allocated_port": 40231}));

    let params = std::fs::read_to_string(harness.home.path().join("tunnel/tunnel.env")).unwrap();
    assert_eq!(
        params,
        "SSH_HOST=relay.example.com\nSSH_PORT=2222\nSSH_USER=edge\nREMOTE_PORT=0\nLOCAL_PORT=22\n"
    );
    assert_eq!(harness.services.actions(), vec!["restart reverse-ssh-tunnel"]);
}

#[tokio::test]
async fn test_start_reverse_ssh_connection_reports_log_on_failure() {
    let harness = Harness::with_tunnel_log(
        FakeControlPlane::default(),
        FakeImageRuntime::default(),
        "ssh: connect to host relay.example.com port 22: Connection refused\n",
    );

    harness
        .engine
        .handle(&request(
            "r-1",
            "start_reverse_ssh_connection",
            json!({"ssh_host": "relay.example.com", "ssh_user": "edge"}),
        ))
        .await;

    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Failed");
    assert_eq!(
        result["reason"],
        "ssh: connect to host relay.example.com port 22: Connection refused"
    );
}

#[tokio::test]
async fn test_stale_tunnel_log_is_not_matched() {
    let harness = Harness::new(FakeControlPlane::default(), FakeImageRuntime::default());
    std::fs::write(
        harness.home.path().join("tunnel/tunnel.log"),
        "Allocated port 39999 for remote forward to localhost:22\n",
    )
    .unwrap();

    harness
        .engine
        .handle(&request(
            "r-1",
            "start_reverse_ssh_connection",
            json!({"ssh_host": "relay.example.com", "ssh_user": "edge"}),
        ))
        .await;

    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Failed");
    assert_eq!(
        result["reason"],
        "reverse ssh connection did not report an allocated port"
    );
}

#[tokio::test]
async fn test_stop_reverse_ssh_connection() {
    let harness = Harness::new(FakeControlPlane::default(), FakeImageRuntime::default());

    harness
        .engine
        .handle(&request("r-1", "stop_reverse_ssh_connection", json!({})))
        .await;

    assert_eq!(harness.publisher.result_of("r-1")["status"], "Completed");
    assert_eq!(harness.services.actions(), vec!["stop reverse-ssh-tunnel"]);
}

#[tokio::test]
async fn test_get_ssh_public_key() {
    let harness = Harness::new(FakeControlPlane::default(), FakeImageRuntime::default());

    harness.engine.handle(&request("r-1", "get_ssh_public_key", json!({}))).await;
    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Failed");
    assert!(result["reason"].as_str().unwrap().starts_with("ssh public key not found at "));

    std::fs::write(
        harness.home.path().join("id_rsa.pub"),
        "ssh-rsa AAAAB3NzaC1yc2E edge@device\n",
    )
    .unwrap();
    harness.engine.handle(&request("r-2", "get_ssh_public_key", json!({}))).await;
    assert_eq!(
        harness.publisher.result_of("r-2")["result"],
        json!({"public_key": "ssh-rsa AAAAB3NzaC1yc2E edge@device"})
    );
}
