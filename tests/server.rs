//! HTTP API tests: the router is served on a free local port and driven
//! with reqwest.

use apivault::config::Config;
use apivault::registry::SchemaRegistry;
use apivault::server::router;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

const PETSTORE: &str = r#"{
  "openapi": "3.0.0",
  "info": { "title": "Petstore", "version": "1.0.0" },
  "paths": { "/pets": { "get": { "responses": { "200": { "description": "ok" } } } } }
}"#;

const PETSTORE_V2_YAML: &str = r#"
openapi: 3.0.0
info:
  title: Petstore
  version: 1.1.0
paths:
  /pets:
    get:
      responses:
        "200":
          description: ok
  /pets/{id}:
    get:
      responses:
        "200":
          description: ok
"#;

struct TestServer {
    base: String,
    handle: tokio::task::JoinHandle<()>,
    tmp: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn start_server(max_upload_bytes: usize) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let cfg = Config::rooted_at(tmp.path());
    let registry = Arc::new(
        SchemaRegistry::open(&cfg)
            .await
            .unwrap()
            .with_max_upload_bytes(max_upload_bytes),
    );
    let app = router(registry, max_upload_bytes);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    let base = format!("http://127.0.0.1:{}", port);
    wait_for_server(&base).await;
    TestServer {
        base,
        handle,
        tmp,
    }
}

async fn wait_for_server(base: &str) {
    let client = reqwest::Client::new();
    let url = format!("{}/api/health", base);
    for _ in 0..50 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("Server did not become ready within 5 seconds");
}

fn upload_form(application: &str, service: Option<&str>, file_name: &str, body: &str) -> Form {
    let mut form = Form::new().text("application", application.to_string());
    if let Some(s) = service {
        form = form.text("service", s.to_string());
    }
    form.part(
        "spec",
        Part::bytes(body.as_bytes().to_vec()).file_name(file_name.to_string()),
    )
}

async fn post_upload(server: &TestServer, form: Form) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}/api/schemas/upload", server.base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

async fn get_json(server: &TestServer, path: &str) -> (u16, Value) {
    let resp = reqwest::get(format!("{}{}", server.base, path))
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn test_health() {
    let server = start_server(1024 * 1024).await;
    let (status, body) = get_json(&server, "/api/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "API is healthy");
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_upload_and_query_flow() {
    let server = start_server(1024 * 1024).await;

    let (status, body) = post_upload(
        &server,
        upload_form("petstore", None, "petstore.json", PETSTORE),
    )
    .await;
    assert_eq!(status, 201, "body: {}", body);
    assert_eq!(body["message"], "Schema uploaded successfully");
    assert_eq!(body["data"]["version"], 1);
    assert_eq!(body["data"]["is_new_version"], true);
    assert_eq!(body["data"]["metadata"]["title"], "Petstore");

    let (status, body) = post_upload(
        &server,
        upload_form("petstore", None, "petstore.json", PETSTORE),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Schema unchanged, no new version created");
    assert_eq!(body["data"]["version"], 1);
    assert_eq!(body["data"]["is_new_version"], false);

    let (status, body) = post_upload(
        &server,
        upload_form("petstore", None, "petstore.yaml", PETSTORE_V2_YAML),
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(body["data"]["version"], 2);

    let (status, body) = get_json(&server, "/api/schemas/latest/petstore").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["version"], 2);
    assert_eq!(body["data"]["schema_type"], "yaml");
    assert_eq!(body["data"]["schema"]["info"]["version"], "1.1.0");
    assert!(body["data"].get("file_path").is_none());

    let (status, body) = get_json(&server, "/api/schemas/version/petstore/1").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["schema"]["info"]["version"], "1.0.0");

    let (status, body) = get_json(&server, "/api/schemas/versions/petstore").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["total_versions"], 2);
    let versions = body["data"]["versions"].as_array().unwrap();
    assert_eq!(versions[0]["version"], 2);
    assert_eq!(versions[0]["is_latest"], true);
    assert_eq!(versions[1]["is_latest"], false);
    assert!(versions[0].get("schema").is_none());

    let (status, body) = get_json(&server, "/api/applications").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"][0]["name"], "petstore");
}

#[tokio::test]
async fn test_service_scoped_routes() {
    let server = start_server(1024 * 1024).await;

    let (status, _) = post_upload(
        &server,
        upload_form("shop", Some("cart"), "cart.json", PETSTORE),
    )
    .await;
    assert_eq!(status, 201);

    let (status, body) = get_json(&server, "/api/schemas/latest/shop/cart").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["service"], "cart");

    let (status, _) = get_json(&server, "/api/schemas/latest/shop").await;
    assert_eq!(status, 404, "application namespace is separate");

    let (status, body) = get_json(&server, "/api/schemas/version/shop/1/cart").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["version"], 1);

    let (status, body) = get_json(&server, "/api/schemas/versions/shop/cart").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["total_versions"], 1);

    let (status, body) = get_json(&server, "/api/applications/shop/services").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["services"][0]["name"], "cart");

    let (status, body) = get_json(&server, "/api/stats").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["database"]["schema_versions"], 1);
    assert_eq!(body["data"]["file_system"]["total_services"], 1);
}

#[tokio::test]
async fn test_upload_errors() {
    let server = start_server(512).await;

    let (status, body) = post_upload(&server, upload_form("", None, "a.json", PETSTORE)).await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(body["error"]["message"], "Application name is required");

    let form = Form::new().text("application", "petstore");
    let (status, body) = post_upload(&server, form).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["message"], "Schema file is required");

    let (status, body) =
        post_upload(&server, upload_form("petstore", None, "a.xml", "<x/>")).await;
    assert_eq!(status, 400);
    assert_eq!(
        body["error"]["message"],
        "Unsupported file format. Only JSON and YAML files are supported."
    );

    let invalid = r#"{"openapi":"3.0.0","info":{"title":"T"},"paths":{}}"#;
    let (status, body) =
        post_upload(&server, upload_form("petstore", None, "a.json", invalid)).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "validation_failed");
    assert_eq!(body["error"]["message"], "Schema validation failed");
    assert!(body["error"]["details"]
        .as_str()
        .unwrap()
        .contains("info.version"));

    let big = format!(
        r#"{{"openapi":"3.0.0","info":{{"title":"{}","version":"1"}},"paths":{{}}}}"#,
        "x".repeat(1024)
    );
    let (status, body) = post_upload(&server, upload_form("petstore", None, "a.json", &big)).await;
    assert_eq!(status, 400);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("File too large"));

    let (_, body) = get_json(&server, "/api/applications").await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_storage_failure_hides_cause() {
    let server = start_server(1024 * 1024).await;
    // A plain file where the application directory should go.
    std::fs::write(server.tmp.path().join("schemas/blocked"), "x").unwrap();

    let (status, body) = post_upload(
        &server,
        upload_form("blocked", None, "petstore.json", PETSTORE),
    )
    .await;
    assert_eq!(status, 500);
    assert_eq!(body["error"]["code"], "internal");
    assert_eq!(body["error"]["message"], "Internal server error");
    assert_eq!(body["error"]["details"], "storage operation failed");
    let text = body.to_string();
    assert!(!text.contains("os error"), "leaked cause: {}", text);

    let (_, body) = get_json(&server, "/api/applications").await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_query_errors() {
    let server = start_server(1024 * 1024).await;

    let (status, body) = get_json(&server, "/api/schemas/latest/nope").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(body["error"]["message"], "Schema not found");

    post_upload(
        &server,
        upload_form("petstore", None, "petstore.json", PETSTORE),
    )
    .await;

    let (status, body) = get_json(&server, "/api/schemas/version/petstore/5").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["message"], "Schema version not found");

    for bad in ["0", "-1", "abc"] {
        let (status, body) =
            get_json(&server, &format!("/api/schemas/version/petstore/{}", bad)).await;
        assert_eq!(status, 400, "version '{}'", bad);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    let (status, body) = get_json(&server, "/api/schemas/versions/nope").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["total_versions"], 0);

    let (status, body) = get_json(&server, "/api/nothing/here").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["message"], "Route not found");
}

#[tokio::test]
async fn test_run_check() {
    let server = start_server(1024 * 1024).await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/tests/run", server.base);

    post_upload(
        &server,
        upload_form("petstore", None, "petstore.json", PETSTORE),
    )
    .await;

    let resp = client
        .post(&url)
        .json(&json!({ "application": "petstore" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["schema_version"], 1);
    assert_eq!(body["data"]["summary"]["passed"], 1);
    assert_eq!(body["data"]["summary"]["failed"], 0);
    assert_eq!(body["data"]["schema_metadata"]["title"], "Petstore");
    assert!(body["data"]["schema_content"]
        .as_str()
        .unwrap()
        .contains("Petstore"));

    let resp = client.post(&url).json(&json!({})).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "application is required in body");

    let resp = client
        .post(&url)
        .json(&json!({ "application": "unknown" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
