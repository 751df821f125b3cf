use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use outfit_service::{
    config::Config, password::Scheme, routes, state::AppState, storage::WardrobeStorage,
};
use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "outfit-test-boundary";

struct TestApp {
    _dir: TempDir,
    config: Config,
    router: Router,
}

impl TestApp {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = Config {
            port: 0,
            store_path: dir.path().join("wardrobe.json"),
            upload_dir: dir.path().join("uploads"),
            backup_dir: dir.path().join("backups"),
            password_scheme: Scheme::Bcrypt,
            bcrypt_cost: 4,
        };
        let state = AppState::new(config.clone()).await.unwrap();
        TestApp {
            _dir: dir,
            config,
            router: routes::router(state),
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn json(&self, method: &str, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let (status, bytes) = self
            .send(builder.body(Body::from(body.to_string())).unwrap())
            .await;
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let (status, bytes) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn signup_and_login(&self, username: &str) -> String {
        let credentials = json!({ "username": username, "password": "pw" });
        let (status, _) = self.json("POST", "/users", None, credentials.clone()).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = self.json("POST", "/sessions", None, credentials).await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    async fn upload(&self, token: &str, category: &str, file_name: &str, bytes: &[u8]) -> (StatusCode, Value) {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"category\"\r\n\r\n{category}\r\n\
                 --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                b = BOUNDARY
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        let request = Request::builder()
            .method("POST")
            .uri("/items")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, bytes) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn upload_id(&self, token: &str, category: &str, file_name: &str) -> String {
        let (status, item) = self.upload(token, category, file_name, b"image-bytes").await;
        assert_eq!(status, StatusCode::CREATED, "{item}");
        item["id"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn registration_conflicts_and_bad_logins() {
    let app = TestApp::new().await;
    app.signup_and_login("alice").await;

    let (status, _) = app
        .json("POST", "/users", None, json!({ "username": "alice", "password": "x" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .json("POST", "/sessions", None, json!({ "username": "alice", "password": "wrong" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .json("POST", "/users", None, json!({ "username": "", "password": "x" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json("POST", "/users", None, json!({ "username": "wardrobe.json", "password": "x" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn requests_without_token_are_rejected() {
    let app = TestApp::new().await;
    let (status, _) = app.get("/items", "not-a-token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_revokes_token() {
    let app = TestApp::new().await;
    let token = app.signup_and_login("alice").await;

    let (status, _) = app.json("DELETE", "/sessions", Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get("/items", &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn upload_rejects_bad_category_and_extension() {
    let app = TestApp::new().await;
    let token = app.signup_and_login("alice").await;

    let (status, _) = app.upload(&token, "hat", "hat.png", b"x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.upload(&token, "top", "notes.txt", b"x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn suggestion_and_feedback_flow() {
    let app = TestApp::new().await;
    let token = app.signup_and_login("alice").await;

    let t1 = app.upload_id(&token, "top", "t1.png").await;
    let t2 = app.upload_id(&token, "top", "t2.png").await;
    let b1 = app.upload_id(&token, "bottom", "b1.jpg").await;

    let (status, body) = app
        .json(
            "POST",
            "/suggestions",
            Some(&token),
            json!({ "include_shoes": false, "include_accessory": false }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let suggestion = &body["suggestion"];
    let top = suggestion["top"].as_str().unwrap();
    assert!(top == t1 || top == t2);
    assert_eq!(suggestion["bottom"], b1.as_str());
    assert!(suggestion["shoes"].is_null());
    assert_eq!(body["outfit"]["bottom"]["id"], b1.as_str());

    let (status, body) = app
        .json("POST", "/dislikes", Some(&token), suggestion.clone())
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["outcome"], "recorded");

    let (status, body) = app
        .json("POST", "/dislikes", Some(&token), suggestion.clone())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "already_existed");

    let (status, _) = app
        .json("POST", "/favorites", Some(&token), suggestion.clone())
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, dislikes) = app.get("/dislikes", &token).await;
    let records = dislikes["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["outfit"]["bottom"]["id"], b1.as_str());

    let id = records[0]["id"].as_str().unwrap();
    let (status, _) = app
        .json("DELETE", &format!("/dislikes/{}", id), Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, dislikes) = app.get("/dislikes", &token).await;
    assert!(dislikes["records"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn fully_disliked_wardrobe_gets_no_suggestion() {
    let app = TestApp::new().await;
    let token = app.signup_and_login("alice").await;
    let t1 = app.upload_id(&token, "top", "t1.png").await;
    let b1 = app.upload_id(&token, "bottom", "b1.png").await;

    let (status, _) = app
        .json("POST", "/dislikes", Some(&token), json!({ "top": t1, "bottom": b1 }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .json(
            "POST",
            "/suggestions",
            Some(&token),
            json!({ "include_shoes": false, "include_accessory": false }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["suggestion"].is_null());
    assert!(body["outfit"].is_null());
}

#[tokio::test]
async fn empty_wardrobe_gets_no_suggestion() {
    let app = TestApp::new().await;
    let token = app.signup_and_login("alice").await;

    let (status, body) = app.json("POST", "/suggestions", Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["suggestion"].is_null());
}

#[tokio::test]
async fn feedback_on_another_users_item_is_not_found() {
    let app = TestApp::new().await;
    let alice = app.signup_and_login("alice").await;
    let bob = app.signup_and_login("bob").await;
    let t1 = app.upload_id(&alice, "top", "t1.png").await;
    let b1 = app.upload_id(&alice, "bottom", "b1.png").await;

    let (status, _) = app
        .json("POST", "/dislikes", Some(&bob), json!({ "top": t1, "bottom": b1 }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .json("POST", "/dislikes", Some(&alice), json!({ "top": b1, "bottom": t1 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn files_on_disk_are_indexed_as_uncategorized() {
    let app = TestApp::new().await;
    let token = app.signup_and_login("alice").await;

    let user_dir = app.config.upload_dir.join("alice");
    fs::create_dir_all(&user_dir).unwrap();
    fs::write(user_dir.join("found.png"), b"png").unwrap();

    let (status, body) = app.get("/items", &token).await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["category"], "uncategorized");

    let id = items[0]["id"].as_str().unwrap();
    let (status, item) = app
        .json("PATCH", &format!("/items/{}", id), Some(&token), json!({ "category": "shoes" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["category"], "shoes");

    let (_, body) = app.get("/items", &token).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn delete_item_removes_file() {
    let app = TestApp::new().await;
    let token = app.signup_and_login("alice").await;
    let id = app.upload_id(&token, "top", "t1.png").await;
    let file = app.config.upload_dir.join("alice").join("t1.png");
    assert!(file.exists());

    let (status, _) = app
        .json("DELETE", &format!("/items/{}", id), Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!file.exists());

    let (status, _) = app
        .json("DELETE", &format!("/items/{}", id), Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn item_image_serves_bytes() {
    let app = TestApp::new().await;
    let token = app.signup_and_login("alice").await;
    let (_, item) = app.upload(&token, "top", "t1.png", b"png-bytes").await;
    let id = item["id"].as_str().unwrap();

    let request = Request::builder()
        .uri(format!("/items/{}/image", id))
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, bytes) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"png-bytes");
}

#[tokio::test]
async fn backup_and_restore_round_trip() {
    let app = TestApp::new().await;
    let token = app.signup_and_login("alice").await;
    let t1 = app.upload_id(&token, "top", "t1.png").await;
    app.upload_id(&token, "bottom", "b1.png").await;

    let request = Request::builder()
        .method("POST")
        .uri("/backups")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, archive) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(archive.starts_with(b"PK"));

    let store_before = fs::read(&app.config.store_path).unwrap();
    let t1_path = app.config.upload_dir.join("alice").join("t1.png");

    // Lose an item and its file after the backup was taken.
    let (status, _) = app
        .json("DELETE", &format!("/items/{}", t1), Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!t1_path.exists());

    let request = Request::builder()
        .method("POST")
        .uri("/backups/restore")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/zip")
        .body(Body::from(archive))
        .unwrap();
    let (status, bytes) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(report["store_replaced"], true);
    assert_eq!(report["user_dirs"], json!(["alice"]));

    assert_eq!(fs::read(&app.config.store_path).unwrap(), store_before);
    assert_eq!(fs::read(&t1_path).unwrap(), b"image-bytes");

    // Neither the uploaded archive nor the staging directory outlives the request.
    let left: Vec<String> = fs::read_dir(&app.config.backup_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(left, vec!["outfit_backup.zip".to_string()]);

    let (_, body) = app.get("/items", &token).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 2);

    let reopened = WardrobeStorage::open(&app.config.store_path).unwrap();
    let owner = body["items"][0]["user_id"].as_str().unwrap();
    assert!(reopened.get_item(&t1, owner).await.unwrap().is_some());
}
