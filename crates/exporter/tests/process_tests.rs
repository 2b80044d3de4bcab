//! Process-level tests running the exporter binary against a fake API server

use axum::{extract::Path, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::net::SocketAddr;
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::{Child, Command};

/// Serve `GET /api/v1/namespaces/kube-system` with the given annotations
async fn start_fake_apiserver(annotations: BTreeMap<&'static str, &'static str>) -> SocketAddr {
    let namespace = json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": "kube-system",
            "annotations": annotations,
        },
    });

    let app = Router::new().route(
        "/api/v1/namespaces/:name",
        get(move |Path(name): Path<String>| {
            let namespace = namespace.clone();
            async move {
                if name == "kube-system" {
                    (StatusCode::OK, Json(namespace))
                } else {
                    (StatusCode::NOT_FOUND, Json(not_found(&name)))
                }
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

fn not_found(name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Status",
        "status": "Failure",
        "message": format!("namespaces \"{name}\" not found"),
        "reason": "NotFound",
        "code": 404,
    })
}

fn write_kubeconfig(server: SocketAddr) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"apiVersion: v1
kind: Config
clusters:
- name: fake
  cluster:
    server: http://{server}
contexts:
- name: fake
  context:
    cluster: fake
    user: fake
current-context: fake
users:
- name: fake
  user: {{}}
"#
    )
    .unwrap();
    file
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn spawn_exporter(kubeconfig: &NamedTempFile, listen: &str, extra: &[&str]) -> Child {
    Command::new(env!("CARGO_BIN_EXE_addon-exporter"))
        .arg("--in-cluster=false")
        .arg("--kubeconfig")
        .arg(kubeconfig.path())
        .arg("--listen-address")
        .arg(listen)
        .arg("--refresh-interval-secs")
        .arg("1")
        .args(extra)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap()
}

#[tokio::test]
async fn test_malformed_annotation_terminates_process() {
    let server = start_fake_apiserver(BTreeMap::from([
        ("addons.k8s.io/dns", r#"{"channel":"stable","version":"1.2.3","id":""}"#),
        ("addons.k8s.io/core", "{not json"),
    ]))
    .await;
    let kubeconfig = write_kubeconfig(server);

    let mut child = spawn_exporter(&kubeconfig, "127.0.0.1:0", &[]);

    let status = tokio::time::timeout(Duration::from_secs(30), child.wait())
        .await
        .expect("exporter should exit on a malformed addon annotation")
        .unwrap();
    assert!(!status.success());
}

#[tokio::test]
async fn test_missing_namespace_terminates_process() {
    let server = start_fake_apiserver(BTreeMap::new()).await;
    let kubeconfig = write_kubeconfig(server);

    let mut child = spawn_exporter(&kubeconfig, "127.0.0.1:0", &["--namespace", "missing"]);

    let status = tokio::time::timeout(Duration::from_secs(30), child.wait())
        .await
        .expect("exporter should exit when the namespace is absent")
        .unwrap();
    assert!(!status.success());
}

#[tokio::test]
async fn test_skip_policy_serves_remaining_addons() {
    let server = start_fake_apiserver(BTreeMap::from([
        ("addons.k8s.io/dns", r#"{"channel":"stable","version":"1.2.3","id":""}"#),
        ("addons.k8s.io/core", "{not json"),
        ("scheduler.alpha.kubernetes.io/node-selector", "role=system"),
    ]))
    .await;
    let kubeconfig = write_kubeconfig(server);
    let listen = format!("127.0.0.1:{}", free_port());

    let mut child = spawn_exporter(&kubeconfig, &listen, &["--decode-failures", "skip"]);

    let url = format!("http://{listen}/metrics");
    let mut scraped = None;
    for _ in 0..100 {
        if let Ok(response) = reqwest::get(&url).await {
            let text = response.text().await.unwrap_or_default();
            if text.contains("kops_channel_updated{") {
                scraped = Some(text);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    assert!(child.try_wait().unwrap().is_none(), "exporter should keep running");
    child.kill().await.unwrap();

    let text = scraped.expect("exporter never published addon metrics");
    assert!(text.contains("kops_channel_updated{name=\"dns\"} 11593946"));
    assert!(!text.contains("name=\"core\""));
    assert!(!text.contains("node-selector"));
}
