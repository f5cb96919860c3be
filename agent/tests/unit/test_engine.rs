//! Command handler tests against in-memory collaborators

use std::time::Duration;

use serde_json::{json, Value};

use k3s_edge_agent::orchestrator::Request;

use crate::fakes::{serve_archive, FakeControlPlane, FakeImageRuntime, Harness};

fn request(request_id: &str, kind: &str, params: Value) -> Request {
    let mut payload = params;
    payload["request_id"] = json!(request_id);
    payload["request"] = json!(kind);
    Request::parse(payload).unwrap()
}

fn deployment(name: &str, namespace: &str, image: &str, pull_policy: &str) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {
            "replicas": 2,
            "selector": {"matchLabels": {"app": name}},
            "template": {
                "metadata": {"labels": {"app": name}},
                "spec": {"containers": [
                    {"name": name, "image": image, "imagePullPolicy": pull_policy}
                ]}
            }
        }
    })
}

/// Wait for spawned reporters to observe their stop signal
async fn settle_reporters(harness: &Harness) {
    for _ in 0..50 {
        if harness.engine.reporter().active_reporters() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_deploy_app_healthy() {
    let harness = Harness::new(FakeControlPlane::default(), FakeImageRuntime::default());

    let definition = deployment("web", "edge", "nginx:1.27", "IfNotPresent");
    harness
        .engine
        .handle(&request("r-1", "deploy_app", json!({"deployment_definition": definition})))
        .await;

    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Completed");
    assert_eq!(result["request"], "deploy_app");
    assert_eq!(result["result"]["app_name"], "web");
    assert_eq!(result["result"]["namespace"], "edge");
    assert_eq!(result["result"]["status"], "Healthy");
    assert_eq!(result["result"]["replicas"]["desired"], 2);
    assert!(harness.cluster.namespaces().contains(&"edge".to_string()));
}

#[tokio::test]
async fn test_deploy_app_unhealthy_is_failed_with_state() {
    let cluster = FakeControlPlane::default();
    cluster.set_pod_phase("Pending");
    let harness = Harness::new(cluster, FakeImageRuntime::default());

    let definition = deployment("web", "default", "nginx:1.27", "IfNotPresent");
    harness
        .engine
        .handle(&request("r-1", "deploy_app", json!({"deployment_definition": definition})))
        .await;

    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Failed");
    assert_eq!(result["reason"], "app status is Pending");
    assert_eq!(result["result"]["status"], "Pending");
}

#[tokio::test]
async fn test_deploy_app_requires_local_images() {
    let harness = Harness::new(
        FakeControlPlane::default(),
        FakeImageRuntime::with_images(&["sensor:1.0"]),
    );

    let missing = deployment("collector", "default", "collector:2.1", "Never");
    harness
        .engine
        .handle(&request("r-1", "deploy_app", json!({"deployment_definition": missing})))
        .await;
    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Failed");
    assert_eq!(
        result["reason"],
        "image(s) specified in the deployment definition is not found in the system!"
    );
    assert!(harness.cluster.deployment("default", "collector").is_none());

    let present = deployment("sensor", "default", "docker.io/library/sensor:1.0", "Never");
    harness
        .engine
        .handle(&request("r-2", "deploy_app", json!({"deployment_definition": present})))
        .await;
    assert_eq!(harness.publisher.result_of("r-2")["status"], "Completed");
}

#[tokio::test]
async fn test_deploy_app_validation() {
    let harness = Harness::new(FakeControlPlane::default(), FakeImageRuntime::default());

    harness.engine.handle(&request("r-1", "deploy_app", json!({}))).await;
    assert_eq!(
        harness.publisher.result_of("r-1")["reason"],
        "deployment_definition is not specified in the request!"
    );

    let mut invalid = deployment("web", "default", "nginx:1.27", "IfNotPresent");
    invalid["spec"]["template"]["spec"]["containers"] = json!([]);
    harness
        .engine
        .handle(&request("r-2", "deploy_app", json!({"deployment_definition": invalid})))
        .await;
    let reason = harness.publisher.result_of("r-2")["reason"].as_str().unwrap().to_string();
    assert!(reason.starts_with("create deployment validation has failed, "));
}

#[tokio::test]
async fn test_deploy_existing_app_reports_control_plane_error() {
    let harness = Harness::new(
        FakeControlPlane::default().with_app("default", "web", 1, "nginx:1.27"),
        FakeImageRuntime::default(),
    );

    let definition = deployment("web", "default", "nginx:1.27", "IfNotPresent");
    harness
        .engine
        .handle(&request("r-1", "deploy_app", json!({"deployment_definition": definition})))
        .await;

    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Failed");
    assert_eq!(
        result["reason"],
        "status: 409, reason: AlreadyExists, message: deployments.apps \"web\" already exists"
    );
}

#[tokio::test]
async fn test_start_and_stop_app() {
    let harness = Harness::new(
        FakeControlPlane::default().with_app("default", "web", 0, "nginx:1.27"),
        FakeImageRuntime::default(),
    );

    harness
        .engine
        .handle(&request("r-1", "start_app", json!({"app_name": "web", "replicas": 2})))
        .await;
    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Completed");
    assert_eq!(result["result"]["status"], "Healthy");
    assert_eq!(result["result"]["pods"].as_array().unwrap().len(), 2);

    harness
        .engine
        .handle(&request("r-2", "stop_app", json!({"app_name": "web"})))
        .await;
    let result = harness.publisher.result_of("r-2");
    assert_eq!(result["status"], "Completed");
    assert_eq!(result["result"]["status"], "Stopped");
    assert_eq!(harness.cluster.patches().len(), 2);

    // stopping a stopped app patches nothing
    harness
        .engine
        .handle(&request("r-3", "stop_app", json!({"app_name": "web"})))
        .await;
    assert_eq!(harness.publisher.result_of("r-3")["status"], "Completed");
    assert_eq!(harness.cluster.patches().len(), 2);
}

#[tokio::test]
async fn test_start_app_validation_and_missing_app() {
    let harness = Harness::new(FakeControlPlane::default(), FakeImageRuntime::default());

    harness
        .engine
        .handle(&request("r-1", "start_app", json!({"app_name": "web", "replicas": 0})))
        .await;
    assert_eq!(
        harness.publisher.result_of("r-1")["reason"],
        "replicas is not specified/valid in the request"
    );

    harness
        .engine
        .handle(&request("r-2", "start_app", json!({"app_name": "web", "replicas": 1})))
        .await;
    assert_eq!(
        harness.publisher.result_of("r-2")["reason"],
        "application not found in the system"
    );

    harness
        .engine
        .handle(&request("r-3", "stop_app", json!({"app_name": "web"})))
        .await;
    assert_eq!(harness.publisher.result_of("r-3")["reason"], "The specified app is not found");

    settle_reporters(&harness).await;
    assert_eq!(harness.engine.reporter().active_reporters(), 0);
    assert!(harness.engine.reporter().store().is_empty());
}

#[tokio::test]
async fn test_get_app_status() {
    let harness = Harness::new(
        FakeControlPlane::default().with_app("edge", "web", 1, "nginx:1.27"),
        FakeImageRuntime::default(),
    );

    harness
        .engine
        .handle(&request("r-1", "get_app_status", json!({"app_name": "web", "namespace": "edge"})))
        .await;
    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Completed");
    assert_eq!(result["result"]["status"], "Healthy");
    assert_eq!(result["result"]["cpu_usage"], 0.0);
    assert!(result["result"].get("logs").is_none());

    harness
        .engine
        .handle(&request("r-2", "get_app_status", json!({"app_name": "web"})))
        .await;
    assert_eq!(
        harness.publisher.result_of("r-2")["reason"],
        "specified app not found in the system"
    );
}

#[tokio::test]
async fn test_get_app_status_and_logs() {
    let harness = Harness::new(
        FakeControlPlane::default().with_app("default", "web", 1, "nginx:1.27"),
        FakeImageRuntime::default(),
    );

    harness
        .engine
        .handle(&request("r-1", "get_app_status_and_logs", json!({"app_name": "web"})))
        .await;
    let result = harness.publisher.result_of("r-1");
    assert_eq!(
        result["result"]["logs"],
        json!([{"pod": "web-0", "container": "web", "logs": ["web-0 started", "web-0 ready"]}])
    );

    // no previous instance: the tail is empty, the request still completes
    harness
        .engine
        .handle(&request(
            "r-2",
            "get_app_status_and_logs",
            json!({"app_name": "web", "previous_logs": true, "tail_n_lines": 10}),
        ))
        .await;
    let result = harness.publisher.result_of("r-2");
    assert_eq!(result["status"], "Completed");
    assert_eq!(result["result"]["logs"][0]["logs"], json!([]));
}

#[tokio::test]
async fn test_update_app_strips_immutable_fields() {
    let harness = Harness::new(
        FakeControlPlane::default().with_app("default", "web", 1, "nginx:1.27"),
        FakeImageRuntime::default(),
    );

    let definition = deployment("web", "default", "nginx:1.28", "IfNotPresent");
    harness
        .engine
        .handle(&request("r-1", "update_app", json!({"deployment_definition": definition})))
        .await;

    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Completed");

    let patches = harness.cluster.patches();
    assert_eq!(patches.len(), 1);
    let spec = &patches[0].1["spec"];
    assert!(spec.get("selector").is_none());
    assert!(spec["template"].get("metadata").is_none());
    assert_eq!(spec["template"]["spec"]["containers"][0]["image"], "nginx:1.28");
    assert_eq!(
        harness.cluster.deployment("default", "web").unwrap().containers[0].image,
        "nginx:1.28"
    );
}

#[tokio::test]
async fn test_update_missing_app() {
    let harness = Harness::new(FakeControlPlane::default(), FakeImageRuntime::default());

    let definition = deployment("web", "default", "nginx:1.28", "IfNotPresent");
    harness
        .engine
        .handle(&request("r-1", "update_app", json!({"deployment_definition": definition})))
        .await;
    assert_eq!(harness.publisher.result_of("r-1")["reason"], "deployment not found!");
    assert!(harness.cluster.patches().is_empty());
}

#[tokio::test]
async fn test_scale_patch_is_best_effort() {
    let cluster = FakeControlPlane::default().with_app("default", "web", 1, "nginx:1.27");
    cluster.freeze();
    let harness = Harness::new(cluster, FakeImageRuntime::default());

    harness
        .engine
        .handle(&request("r-1", "scale_patch_app", json!({"app_name": "web", "replicas": 3})))
        .await;

    // the pods never follow, the request still completes with the observed state
    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Completed");
    assert_eq!(result["result"]["replicas"]["desired"], 3);
    assert_eq!(result["result"]["pods"].as_array().unwrap().len(), 1);

    harness
        .engine
        .handle(&request("r-2", "scale_patch_app", json!({"app_name": "web", "replicas": -1})))
        .await;
    assert_eq!(
        harness.publisher.result_of("r-2")["reason"],
        "replicas is not specified or incorrect value is specified"
    );
}

#[tokio::test]
async fn test_scale_patch_of_missing_app_fails() {
    let harness = Harness::new(FakeControlPlane::default(), FakeImageRuntime::default());

    harness
        .engine
        .handle(&request("r-1", "scale_patch_app", json!({"app_name": "web", "replicas": 1})))
        .await;
    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Failed");
    assert!(result["reason"].as_str().unwrap().starts_with("status: 404"));
}

#[tokio::test]
async fn test_image_patch_app() {
    let harness = Harness::new(
        FakeControlPlane::default().with_app("default", "web", 2, "nginx:1.27"),
        FakeImageRuntime::default(),
    );

    harness
        .engine
        .handle(&request(
            "r-1",
            "image_patch_app",
            json!({"app_name": "web", "container_name": "web", "new_image": "nginx:1.28"}),
        ))
        .await;

    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Completed");
    assert_eq!(result["result"]["pods"][0]["containers"][0]["image"], "nginx:1.28");
    assert_eq!(result["result"]["pods"][1]["containers"][0]["image"], "nginx:1.28");

    let patches = harness.cluster.patches();
    assert_eq!(
        patches[0].1,
        json!({"spec": {"template": {"spec": {"containers": [
            {"name": "web", "image": "nginx:1.28", "imagePullPolicy": "IfNotPresent"}
        ]}}}})
    );

    harness
        .engine
        .handle(&request("r-2", "image_patch_app", json!({"app_name": "web", "new_image": "nginx:1.29"})))
        .await;
    assert_eq!(
        harness.publisher.result_of("r-2")["reason"],
        "app_name/container_name/new_image is/are not specified!"
    );
}

#[tokio::test]
async fn test_delete_app() {
    let harness = Harness::new(
        FakeControlPlane::default().with_app("default", "web", 1, "nginx:1.27"),
        FakeImageRuntime::default(),
    );

    harness
        .engine
        .handle(&request("r-1", "delete_app", json!({"app_name": "web"})))
        .await;

    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Completed");
    assert!(result.get("result").is_none());
    assert!(harness.cluster.deployment("default", "web").is_none());
}

#[tokio::test]
async fn test_delete_image_in_use_guard() {
    let harness = Harness::new(
        FakeControlPlane::default().with_app("default", "web", 1, "docker.io/library/nginx:1.27"),
        FakeImageRuntime::with_images(&["nginx:1.27", "redis:7"]),
    );

    harness
        .engine
        .handle(&request("r-1", "delete_image", json!({"image": "nginx:1.27"})))
        .await;
    assert_eq!(harness.publisher.result_of("r-1")["reason"], "The specified image is in use!");
    assert!(harness.images.removed().is_empty());

    harness
        .engine
        .handle(&request("r-2", "delete_image", json!({"image": "redis:7"})))
        .await;
    assert_eq!(harness.publisher.result_of("r-2")["status"], "Completed");

    harness
        .engine
        .handle(&request("r-3", "delete_image", json!({"image": "nginx:1.27", "force": true})))
        .await;
    assert_eq!(harness.publisher.result_of("r-3")["status"], "Completed");
    assert_eq!(harness.images.removed(), vec!["redis:7", "nginx:1.27"]);
}

#[tokio::test]
async fn test_delete_all_apps_and_images() {
    let harness = Harness::new(
        FakeControlPlane::default()
            .with_app("default", "web", 1, "nginx:1.27")
            .with_app("edge", "collector", 1, "collector:2.1")
            .with_app("kube-system", "coredns", 1, "coredns:1.11"),
        FakeImageRuntime::with_images(&["nginx:1.27", "collector:2.1"]),
    );

    harness
        .engine
        .handle(&request("r-1", "delete_all_apps_and_images", json!({})))
        .await;

    assert_eq!(harness.publisher.result_of("r-1")["status"], "Completed");
    assert!(harness.cluster.deployment("default", "web").is_none());
    assert!(harness.cluster.deployment("edge", "collector").is_none());
    assert!(harness.cluster.deployment("kube-system", "coredns").is_some());
    assert!(harness.images.images().is_empty());
}

/// Files left behind in the engine's scratch directory
fn scratch_files(harness: &Harness) -> usize {
    std::fs::read_dir(harness.home.path().join("tmp"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

fn progress_statuses(harness: &Harness, request_id: &str) -> Vec<String> {
    harness
        .publisher
        .messages()
        .iter()
        .filter(|m| m["request_id"] == request_id)
        .map(|m| m["status"].as_str().unwrap().to_string())
        .filter(|status| status != "Completed" && status != "Failed")
        .collect()
}

#[tokio::test]
async fn test_import_image_downloads_and_imports() {
    let server = serve_archive("200 OK", b"archive-bytes", Duration::from_millis(40)).await;
    let harness = Harness::new(
        FakeControlPlane::default(),
        FakeImageRuntime::with_images(&["nginx:1.27"]).with_import_delay(Duration::from_millis(40)),
    );

    harness
        .engine
        .handle(&request(
            "r-1",
            "import_image",
            json!({"download_url": server.url, "auth_user": "edge", "auth_password": "secret"}),
        ))
        .await;

    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Completed");
    assert_eq!(result["result"], json!({"images": ["nginx:1.27"]}));

    let imported = harness.images.imported();
    assert_eq!(imported.len(), 1);
    assert_eq!(imported[0].1, b"archive-bytes".to_vec());
    assert!(!imported[0].0.exists());
    assert_eq!(scratch_files(&harness), 0);

    let head = server.request.await.unwrap();
    assert!(head.starts_with("GET /images/web.tar"));
    assert!(head.lines().any(|line| {
        line.to_ascii_lowercase().starts_with("authorization:") && line.ends_with("Basic ZWRnZTpzZWNyZXQ=")
    }));

    let statuses = progress_statuses(&harness, "r-1");
    let first_import = statuses.iter().position(|s| s == "Importing").unwrap();
    assert_eq!(statuses[0], "Downloading");
    assert!(statuses[first_import..].iter().all(|s| s == "Importing"));

    let messages = harness.publisher.messages();
    assert_eq!(messages.last().unwrap()["status"], "Completed");
    settle_reporters(&harness).await;
    assert!(harness.engine.reporter().store().is_empty());
    assert_eq!(harness.publisher.messages().len(), messages.len());
}

#[tokio::test]
async fn test_import_image_http_error_is_failed() {
    let server = serve_archive("404 Not Found", b"", Duration::ZERO).await;
    let harness = Harness::new(FakeControlPlane::default(), FakeImageRuntime::default());

    harness
        .engine
        .handle(&request("r-1", "import_image", json!({"download_url": server.url})))
        .await;

    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Failed");
    assert_eq!(result["reason"], "failed to download the file, error code: 404");
    assert_eq!(harness.publisher.messages().last().unwrap()["status"], "Failed");

    assert!(harness.images.imported().is_empty());
    assert_eq!(scratch_files(&harness), 0);
    settle_reporters(&harness).await;
    assert_eq!(harness.engine.reporter().active_reporters(), 0);
    assert!(harness.engine.reporter().store().is_empty());
}

#[tokio::test]
async fn test_import_image_unreachable_url_is_failed() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/images/web.tar", listener.local_addr().unwrap());
    drop(listener);
    let harness = Harness::new(FakeControlPlane::default(), FakeImageRuntime::default());

    harness
        .engine
        .handle(&request("r-1", "import_image", json!({"download_url": url})))
        .await;

    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Failed");
    assert!(result["reason"]
        .as_str()
        .unwrap()
        .starts_with("failed to download the file, "));
    assert!(harness.images.imported().is_empty());
    settle_reporters(&harness).await;
    assert!(harness.engine.reporter().store().is_empty());
}

#[tokio::test]
async fn test_import_image_runtime_failure_removes_archive() {
    let server = serve_archive("200 OK", b"not-an-archive", Duration::ZERO).await;
    let harness = Harness::new(
        FakeControlPlane::default(),
        FakeImageRuntime::default().failing_import("ctr: unrecognized image format"),
    );

    harness
        .engine
        .handle(&request("r-1", "import_image", json!({"download_url": server.url})))
        .await;

    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Failed");
    assert_eq!(result["reason"], "ctr: unrecognized image format");

    let imported = harness.images.imported();
    assert_eq!(imported.len(), 1);
    assert!(!imported[0].0.exists());
    assert_eq!(scratch_files(&harness), 0);
    settle_reporters(&harness).await;
    assert!(harness.engine.reporter().store().is_empty());
}

#[tokio::test]
async fn test_import_image_requires_download_url() {
    let harness = Harness::new(FakeControlPlane::default(), FakeImageRuntime::default());

    harness.engine.handle(&request("r-1", "import_image", json!({}))).await;

    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Failed");
    assert_eq!(result["reason"], "download_url is not specified in the request");
    assert_eq!(harness.publisher.messages().len(), 1);
}

#[tokio::test]
async fn test_get_imported_images() {
    let harness = Harness::new(
        FakeControlPlane::default(),
        FakeImageRuntime::with_images(&["nginx:1.27", "redis:7"]),
    );

    harness.engine.handle(&request("r-1", "get_imported_images", json!({}))).await;
    assert_eq!(
        harness.publisher.result_of("r-1")["result"],
        json!({"images": ["nginx:1.27", "redis:7"]})
    );
}

#[tokio::test]
async fn test_get_apps_and_resources_status() {
    let cluster = FakeControlPlane::default()
        .with_app("default", "web", 1, "nginx:1.27")
        .with_app("kube-system", "coredns", 1, "coredns:1.11");
    let harness = Harness::new(cluster.with_app("edge", "idle", 0, "idle:1.0"), FakeImageRuntime::default());

    harness
        .engine
        .handle(&request("r-1", "get_apps_and_resources_status", json!({})))
        .await;

    let result = harness.publisher.result_of("r-1");
    assert_eq!(result["status"], "Completed");
    let status = &result["result"];
    assert_eq!(status["apps"].as_array().unwrap().len(), 2);
    assert_eq!(status["app_counts"], json!({"total": 2, "Healthy": 1, "Stopped": 1}));
    assert!(status["resources"]["cpu"]["count"].as_u64().unwrap() > 0);
    assert!(status["resources"]["memory"]["total"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_broadcast_status() {
    let harness = Harness::new(
        FakeControlPlane::default().with_app("default", "web", 1, "nginx:1.27"),
        FakeImageRuntime::default(),
    );

    harness.engine.broadcast_status().await.unwrap();

    let messages = harness.publisher.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["status_update"], "apps_and_resources_status");
    assert_eq!(messages[0]["status"]["app_counts"]["total"], 1);
    assert!(messages[0].get("request_id").is_none());
}

#[tokio::test]
async fn test_reporters_are_released_after_every_request() {
    let harness = Harness::new(
        FakeControlPlane::default().with_app("default", "web", 1, "nginx:1.27"),
        FakeImageRuntime::default(),
    );

    harness
        .engine
        .handle(&request("r-1", "scale_patch_app", json!({"app_name": "web", "replicas": 2})))
        .await;
    harness
        .engine
        .handle(&request("r-2", "scale_patch_app", json!({"app_name": "missing", "replicas": 2})))
        .await;

    settle_reporters(&harness).await;
    assert_eq!(harness.engine.reporter().active_reporters(), 0);
    assert!(harness.engine.reporter().store().is_empty());

    // no progress message is published after a request's terminal result
    let messages = harness.publisher.messages();
    for request_id in ["r-1", "r-2"] {
        let position = messages
            .iter()
            .position(|m| m["request_id"] == request_id && m["status"] != "Patching")
            .unwrap();
        assert!(messages[position + 1..]
            .iter()
            .all(|m| m["request_id"] != request_id));
    }
}
