use axum::http::StatusCode;
use kidpoints_server::{server, storage};
use kidpoints_shared::jwt;
use reqwest::Client;
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;

const SIGNUP_PATH: &str = "/api/v1/auth/signup";
const LOGIN_PATH: &str = "/api/v1/auth/login";

struct TestServer {
    base: String,
    client: Client,
    handle: tokio::task::JoinHandle<()>,
    _tempdir: tempfile::TempDir,
}

impl TestServer {
    async fn spawn() -> Option<Self> {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let (addr, handle) = match start_server(&db_path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                eprintln!("Skipping test due to sandbox restrictions: {e}");
                return None;
            }
            Err(e) => panic!("failed to start server: {e}"),
        };
        Some(Self {
            base: format!("http://{}", addr),
            client: Client::new(),
            handle,
            _tempdir: dir,
        })
    }

    /// Registers an owner account and returns `(token, family_id)`.
    async fn signup_owner(&self, email: &str, name: &str, family_name: &str) -> (String, String) {
        let body = self
            .request_expect(
                "POST",
                SIGNUP_PATH,
                None,
                Some(json!({
                    "email": email,
                    "password": "secret123",
                    "name": name,
                    "family_name": family_name,
                })),
                StatusCode::OK,
            )
            .await;
        let token = body
            .get("token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .expect("token missing from signup response");
        let family_id = jwt::family_id_from_token(&token).expect("family in token");
        (token, family_id)
    }

    async fn login(&self, login: &str, password: &str) -> String {
        let body = self
            .request_expect(
                "POST",
                LOGIN_PATH,
                None,
                Some(json!({"login": login, "password": password})),
                StatusCode::OK,
            )
            .await;
        body.get("token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .expect("token missing from auth response")
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let url = format!("{}{}", self.base, path);
        let mut req = match method {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PATCH" => self.client.patch(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            other => panic!("unsupported method {other}"),
        };
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        let text = resp.text().await.unwrap();
        let val = if text.is_empty() {
            json!(null)
        } else {
            serde_json::from_str(&text).unwrap_or(json!({"raw": text}))
        };
        (status, val)
    }

    async fn request_expect(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
        expected: StatusCode,
    ) -> Value {
        let (status, value) = self.request(method, path, token, body).await;
        assert_eq!(
            status, expected,
            "{method} {path} returned {status:?} with body {value:?}",
        );
        value
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn start_server(
    tmp_db: &Path,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
    let config = server::AppConfig {
        jwt_secret: "testsecret".into(),
        listen_port: None,
        dev_cors_origin: None,
        push: None,
    };

    let store = storage::Store::connect_sqlite(tmp_db.to_str().unwrap())
        .await
        .expect("db");

    let state = server::AppState::new(config, store);
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Ok((addr, handle))
}

fn family_path(family_id: &str, suffix: &str) -> String {
    format!(
        "/api/v1/family/{}/{}",
        family_id,
        suffix.trim_start_matches('/')
    )
}

#[tokio::test]
async fn public_endpoints_work() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    server
        .request_expect("GET", "/healthz", None, None, StatusCode::OK)
        .await;
    let (token, family_id) = server.signup_owner("mom@example.com", "Mom", "Smith").await;
    assert!(!token.is_empty());
    assert!(!family_id.is_empty());

    // Email login works with the same password.
    let token2 = server.login("mom@example.com", "secret123").await;
    assert!(!token2.is_empty());

    // Wrong password is rejected without detail.
    server
        .request_expect(
            "POST",
            LOGIN_PATH,
            None,
            Some(json!({"login": "mom@example.com", "password": "wrongpass1"})),
            StatusCode::UNAUTHORIZED,
        )
        .await;

    // Duplicate signup is a conflict.
    server
        .request_expect(
            "POST",
            SIGNUP_PATH,
            None,
            Some(json!({
                "email": "mom@example.com",
                "password": "secret123",
                "name": "Mom",
                "family_name": "Smith",
            })),
            StatusCode::CONFLICT,
        )
        .await;

    // Weak passwords are rejected up front.
    server
        .request_expect(
            "POST",
            SIGNUP_PATH,
            None,
            Some(json!({
                "email": "dad@example.com",
                "password": "short1",
                "name": "Dad",
                "family_name": "Smith",
            })),
            StatusCode::BAD_REQUEST,
        )
        .await;
}

#[tokio::test]
async fn logout_invalidates_session() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let (token, family_id) = server.signup_owner("mom@example.com", "Mom", "Smith").await;
    server
        .request_expect(
            "GET",
            &family_path(&family_id, "me"),
            Some(&token),
            None,
            StatusCode::OK,
        )
        .await;
    server
        .request_expect(
            "POST",
            "/api/v1/auth/logout",
            Some(&token),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    server
        .request_expect(
            "GET",
            &family_path(&family_id, "me"),
            Some(&token),
            None,
            StatusCode::UNAUTHORIZED,
        )
        .await;
}

#[tokio::test]
async fn family_management() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let (owner_token, family_id) = server.signup_owner("mom@example.com", "Mom", "Smith").await;

    let me = server
        .request_expect(
            "GET",
            &family_path(&family_id, "me"),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(me.get("role").and_then(|v| v.as_str()).unwrap(), "owner");
    assert_eq!(
        me.get("family_id").and_then(|v| v.as_str()).unwrap(),
        family_id
    );

    // Child account: login + synthetic email.
    let child = server
        .request_expect(
            "POST",
            &family_path(&family_id, "children"),
            Some(&owner_token),
            Some(json!({"login": "alice", "password": "kidpass99", "name": "Alice"})),
            StatusCode::OK,
        )
        .await;
    let child_id = child.get("id").and_then(|v| v.as_str()).unwrap().to_string();
    assert_eq!(child.get("role").and_then(|v| v.as_str()).unwrap(), "child");
    assert_eq!(
        child.get("email").and_then(|v| v.as_str()).unwrap(),
        "alice@child.local"
    );

    // Children sign in by bare login.
    let child_token = server.login("alice", "kidpass99").await;
    let child_me = server
        .request_expect(
            "GET",
            &family_path(&family_id, "me"),
            Some(&child_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(
        child_me.get("id").and_then(|v| v.as_str()).unwrap(),
        child_id
    );

    // Duplicate login is a conflict.
    server
        .request_expect(
            "POST",
            &family_path(&family_id, "children"),
            Some(&owner_token),
            Some(json!({"login": "alice", "password": "kidpass99", "name": "Alice II"})),
            StatusCode::CONFLICT,
        )
        .await;

    // Owner attaches a co-parent admin.
    let admin = server
        .request_expect(
            "POST",
            &family_path(&family_id, "admins"),
            Some(&owner_token),
            Some(json!({"email": "dad@example.com", "password": "secret456", "name": "Dad"})),
            StatusCode::OK,
        )
        .await;
    let admin_id = admin.get("id").and_then(|v| v.as_str()).unwrap().to_string();
    assert_eq!(admin.get("role").and_then(|v| v.as_str()).unwrap(), "admin");

    let admin_token = server.login("dad@example.com", "secret456").await;

    // A non-owner admin cannot attach further admins.
    server
        .request_expect(
            "POST",
            &family_path(&family_id, "admins"),
            Some(&admin_token),
            Some(json!({"email": "uncle@example.com", "password": "secret789", "name": "Uncle"})),
            StatusCode::FORBIDDEN,
        )
        .await;

    let profiles = server
        .request_expect(
            "GET",
            &family_path(&family_id, "profiles"),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(profiles.as_array().unwrap().len(), 3);

    // Rename the child, change the login.
    let updated = server
        .request_expect(
            "PATCH",
            &family_path(&family_id, &format!("profiles/{child_id}")),
            Some(&admin_token),
            Some(json!({"name": "Alice K", "login": "alice-k"})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(
        updated.get("name").and_then(|v| v.as_str()).unwrap(),
        "Alice K"
    );
    assert_eq!(
        updated.get("login").and_then(|v| v.as_str()).unwrap(),
        "alice-k"
    );

    // Admins cannot touch the owner profile.
    server
        .request_expect(
            "PATCH",
            &family_path(
                &family_id,
                &format!("profiles/{}", me.get("id").unwrap().as_str().unwrap()),
            ),
            Some(&admin_token),
            Some(json!({"name": "Hacked"})),
            StatusCode::FORBIDDEN,
        )
        .await;

    // Only the owner removes admins; nobody removes the owner.
    server
        .request_expect(
            "DELETE",
            &family_path(&family_id, &format!("profiles/{admin_id}")),
            Some(&admin_token),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .request_expect(
            "DELETE",
            &family_path(
                &family_id,
                &format!("profiles/{}", me.get("id").unwrap().as_str().unwrap()),
            ),
            Some(&owner_token),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .request_expect(
            "DELETE",
            &family_path(&family_id, &format!("profiles/{admin_id}")),
            Some(&owner_token),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    let profiles = server
        .request_expect(
            "GET",
            &family_path(&family_id, "profiles"),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(profiles.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn event_type_seed_and_crud() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let (owner_token, family_id) = server.signup_owner("mom@example.com", "Mom", "Smith").await;

    let types = server
        .request_expect(
            "GET",
            &family_path(&family_id, "event-types"),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    let types = types.as_array().unwrap().clone();
    assert_eq!(types.len(), 8);
    assert_eq!(
        types[0].get("name").and_then(|v| v.as_str()).unwrap(),
        "School attendance"
    );
    assert!(
        types
            .iter()
            .filter(|t| t.get("is_deduction").unwrap().as_bool().unwrap())
            .count()
            == 2
    );
    // Ordered by sort_order.
    let orders: Vec<i64> = types
        .iter()
        .map(|t| t.get("sort_order").unwrap().as_i64().unwrap())
        .collect();
    let mut sorted = orders.clone();
    sorted.sort_unstable();
    assert_eq!(orders, sorted);

    // New custom template appends after the current maximum.
    let custom = server
        .request_expect(
            "POST",
            &family_path(&family_id, "event-types"),
            Some(&owner_token),
            Some(json!({
                "name": "Reading",
                "default_points": 5,
                "is_deduction": false,
                "icon": "📚",
            })),
            StatusCode::OK,
        )
        .await;
    let custom_id = custom.get("id").and_then(|v| v.as_str()).unwrap().to_string();
    assert_eq!(custom.get("sort_order").unwrap().as_i64().unwrap(), 102);

    let updated = server
        .request_expect(
            "PATCH",
            &family_path(&family_id, &format!("event-types/{custom_id}")),
            Some(&owner_token),
            Some(json!({"default_points": 7})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(updated.get("default_points").unwrap().as_i64().unwrap(), 7);
    assert_eq!(
        updated.get("name").and_then(|v| v.as_str()).unwrap(),
        "Reading"
    );

    // Drag-reorder writes the whole batch.
    let reorder: Vec<Value> = types
        .iter()
        .rev()
        .enumerate()
        .map(|(i, t)| json!({"id": t.get("id").unwrap(), "sort_order": i as i64}))
        .collect();
    server
        .request_expect(
            "POST",
            &family_path(&family_id, "event-types/reorder"),
            Some(&owner_token),
            Some(json!(reorder)),
            StatusCode::NO_CONTENT,
        )
        .await;
    let after = server
        .request_expect(
            "GET",
            &family_path(&family_id, "event-types"),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(
        after.as_array().unwrap()[0]
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap(),
        "Purchase"
    );

    server
        .request_expect(
            "DELETE",
            &family_path(&family_id, &format!("event-types/{custom_id}")),
            Some(&owner_token),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    server
        .request_expect(
            "DELETE",
            &family_path(&family_id, &format!("event-types/{custom_id}")),
            Some(&owner_token),
            None,
            StatusCode::NOT_FOUND,
        )
        .await;
}

#[tokio::test]
async fn event_lifecycle_and_balance() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let (owner_token, family_id) = server.signup_owner("mom@example.com", "Mom", "Smith").await;
    let child = server
        .request_expect(
            "POST",
            &family_path(&family_id, "children"),
            Some(&owner_token),
            Some(json!({"login": "alice", "password": "kidpass99", "name": "Alice"})),
            StatusCode::OK,
        )
        .await;
    let child_id = child.get("id").and_then(|v| v.as_str()).unwrap().to_string();
    let child_token = server.login("alice", "kidpass99").await;

    let types = server
        .request_expect(
            "GET",
            &family_path(&family_id, "event-types"),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    let good_grade = types
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t.get("name").unwrap() == "Good grade")
        .unwrap()
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    // Admin entry is approved immediately.
    let recorded = server
        .request_expect(
            "POST",
            &family_path(&family_id, &format!("children/{child_id}/events")),
            Some(&owner_token),
            Some(json!({
                "event_type_id": good_grade,
                "points": 15,
                "note": "math test",
                "date": "2025-06-02",
            })),
            StatusCode::OK,
        )
        .await;
    assert_eq!(
        recorded.get("status").and_then(|v| v.as_str()).unwrap(),
        "approved"
    );
    let recorded_id = recorded
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let balance = server
        .request_expect(
            "GET",
            &family_path(&family_id, &format!("children/{child_id}/balance")),
            Some(&child_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(balance.get("balance").unwrap().as_i64().unwrap(), 15);

    // Child submission is pending and does not count yet.
    let request = server
        .request_expect(
            "POST",
            &family_path(&family_id, &format!("children/{child_id}/events")),
            Some(&child_token),
            Some(json!({
                "custom_name": "Washed dishes",
                "points": 5,
                "date": "2025-06-03",
            })),
            StatusCode::OK,
        )
        .await;
    assert_eq!(
        request.get("status").and_then(|v| v.as_str()).unwrap(),
        "pending"
    );
    let request_id = request
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let balance = server
        .request_expect(
            "GET",
            &family_path(&family_id, &format!("children/{child_id}/balance")),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(balance.get("balance").unwrap().as_i64().unwrap(), 15);

    let count = server
        .request_expect(
            "GET",
            &family_path(&family_id, "events/pending/count"),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(count.get("count").unwrap().as_i64().unwrap(), 1);

    let pending = server
        .request_expect(
            "GET",
            &family_path(&family_id, "events/pending"),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(
        pending.as_array().unwrap()[0]
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap(),
        request_id
    );

    // Approve: points land in the balance, badge count drops.
    server
        .request_expect(
            "POST",
            &family_path(&family_id, &format!("events/{request_id}/approve")),
            Some(&owner_token),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    // Second tap is a no-op.
    server
        .request_expect(
            "POST",
            &family_path(&family_id, &format!("events/{request_id}/approve")),
            Some(&owner_token),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;

    let balance = server
        .request_expect(
            "GET",
            &family_path(&family_id, &format!("children/{child_id}/balance")),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(balance.get("balance").unwrap().as_i64().unwrap(), 20);
    let count = server
        .request_expect(
            "GET",
            &family_path(&family_id, "events/pending/count"),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(count.get("count").unwrap().as_i64().unwrap(), 0);

    // Rejected requests keep their history but never touch the balance.
    let request2 = server
        .request_expect(
            "POST",
            &family_path(&family_id, &format!("children/{child_id}/events")),
            Some(&child_token),
            Some(json!({
                "custom_name": "Extra screen time",
                "points": -3,
                "date": "2025-06-04",
            })),
            StatusCode::OK,
        )
        .await;
    let request2_id = request2
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    server
        .request_expect(
            "POST",
            &family_path(&family_id, &format!("events/{request2_id}/reject")),
            Some(&owner_token),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    let balance = server
        .request_expect(
            "GET",
            &family_path(&family_id, &format!("children/{child_id}/balance")),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(balance.get("balance").unwrap().as_i64().unwrap(), 20);

    let rejected = server
        .request_expect(
            "GET",
            &family_path(
                &family_id,
                &format!("children/{child_id}/events?status=rejected"),
            ),
            Some(&child_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(rejected.as_array().unwrap().len(), 1);

    // Admin edit changes the live points.
    let edited = server
        .request_expect(
            "PATCH",
            &family_path(&family_id, &format!("events/{recorded_id}")),
            Some(&owner_token),
            Some(json!({"points": 10})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(edited.get("points").unwrap().as_i64().unwrap(), 10);
    let balance = server
        .request_expect(
            "GET",
            &family_path(&family_id, &format!("children/{child_id}/balance")),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(balance.get("balance").unwrap().as_i64().unwrap(), 15);

    // Date filters bound the history.
    let history = server
        .request_expect(
            "GET",
            &family_path(
                &family_id,
                &format!("children/{child_id}/events?from=2025-06-03&to=2025-06-04"),
            ),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(history.as_array().unwrap().len(), 2);
    // Newest first.
    assert_eq!(
        history.as_array().unwrap()[0]
            .get("date")
            .and_then(|v| v.as_str())
            .unwrap(),
        "2025-06-04"
    );

    // Deleting the admin entry takes its points with it.
    server
        .request_expect(
            "DELETE",
            &family_path(&family_id, &format!("events/{recorded_id}")),
            Some(&owner_token),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    let balance = server
        .request_expect(
            "GET",
            &family_path(&family_id, &format!("children/{child_id}/balance")),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(balance.get("balance").unwrap().as_i64().unwrap(), 5);

    // Template and free-form name are mutually exclusive.
    server
        .request_expect(
            "POST",
            &family_path(&family_id, &format!("children/{child_id}/events")),
            Some(&owner_token),
            Some(json!({
                "event_type_id": good_grade,
                "custom_name": "Both",
                "points": 1,
                "date": "2025-06-05",
            })),
            StatusCode::BAD_REQUEST,
        )
        .await;
    server
        .request_expect(
            "POST",
            &family_path(&family_id, &format!("children/{child_id}/events")),
            Some(&owner_token),
            Some(json!({"points": 1, "date": "2025-06-05"})),
            StatusCode::BAD_REQUEST,
        )
        .await;
    server
        .request_expect(
            "POST",
            &family_path(&family_id, &format!("children/{child_id}/events")),
            Some(&owner_token),
            Some(json!({"custom_name": "Bad date", "points": 1, "date": "05.06.2025"})),
            StatusCode::BAD_REQUEST,
        )
        .await;
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let (_owner_token, family_id) = server.signup_owner("mom@example.com", "Mom", "Smith").await;

    let cases: Vec<(&str, String, Option<Value>)> = vec![
        ("GET", family_path(&family_id, "me"), None),
        ("GET", family_path(&family_id, "profiles"), None),
        (
            "POST",
            family_path(&family_id, "children"),
            Some(json!({"login": "x", "password": "y", "name": "z"})),
        ),
        ("GET", family_path(&family_id, "event-types"), None),
        ("GET", family_path(&family_id, "events/pending"), None),
        ("GET", family_path(&family_id, "events/pending/count"), None),
        ("GET", family_path(&family_id, "children/someone/balance"), None),
        (
            "POST",
            family_path(&family_id, "push/subscriptions"),
            Some(json!({"endpoint": "https://push/x", "keys": {"p256dh": "a", "auth": "b"}})),
        ),
        ("GET", family_path(&family_id, "notification-settings"), None),
    ];

    for (method, path, body) in cases.iter() {
        server
            .request_expect(method, path, None, body.clone(), StatusCode::UNAUTHORIZED)
            .await;
    }
}

#[tokio::test]
async fn role_and_family_access_control() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let (owner_token, family_id) = server.signup_owner("mom@example.com", "Mom", "Smith").await;
    let (other_token, other_family) = server
        .signup_owner("stranger@example.com", "Stranger", "Others")
        .await;

    let child = server
        .request_expect(
            "POST",
            &family_path(&family_id, "children"),
            Some(&owner_token),
            Some(json!({"login": "alice", "password": "kidpass99", "name": "Alice"})),
            StatusCode::OK,
        )
        .await;
    let child_id = child.get("id").and_then(|v| v.as_str()).unwrap().to_string();
    let sibling = server
        .request_expect(
            "POST",
            &family_path(&family_id, "children"),
            Some(&owner_token),
            Some(json!({"login": "bob", "password": "kidpass99", "name": "Bob"})),
            StatusCode::OK,
        )
        .await;
    let sibling_id = sibling
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    let child_token = server.login("alice", "kidpass99").await;

    // A request scoped to someone else's family is rejected outright.
    server
        .request_expect(
            "GET",
            &family_path(&other_family, "profiles"),
            Some(&owner_token),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .request_expect(
            "GET",
            &family_path(&family_id, "profiles"),
            Some(&other_token),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;

    let child_cases: Vec<(&str, String, Option<Value>)> = vec![
        ("GET", family_path(&family_id, "profiles"), None),
        (
            "POST",
            family_path(&family_id, "children"),
            Some(json!({"login": "eve", "password": "kidpass99", "name": "Eve"})),
        ),
        (
            "POST",
            family_path(&family_id, "admins"),
            Some(json!({"email": "e@example.com", "password": "secret123", "name": "Eve"})),
        ),
        (
            "POST",
            family_path(&family_id, "event-types"),
            Some(json!({"name": "Cheat", "default_points": 100, "is_deduction": false})),
        ),
        ("GET", family_path(&family_id, "events/pending"), None),
        ("GET", family_path(&family_id, "events/pending/count"), None),
        (
            "GET",
            family_path(&family_id, &format!("children/{sibling_id}/events")),
            None,
        ),
        (
            "POST",
            family_path(&family_id, &format!("children/{sibling_id}/events")),
            Some(json!({"custom_name": "Sneaky", "points": 50, "date": "2025-06-01"})),
        ),
        (
            "GET",
            family_path(&family_id, &format!("children/{sibling_id}/balance")),
            None,
        ),
        (
            "POST",
            family_path(&family_id, "events/some-id/approve"),
            None,
        ),
        (
            "PATCH",
            family_path(&family_id, "events/some-id"),
            Some(json!({"points": 1})),
        ),
        ("DELETE", family_path(&family_id, "events/some-id"), None),
    ];
    for (method, path, body) in child_cases.iter() {
        server
            .request_expect(
                method,
                path,
                Some(&child_token),
                body.clone(),
                StatusCode::FORBIDDEN,
            )
            .await;
    }

    // The child keeps full access to its own data.
    server
        .request_expect(
            "GET",
            &family_path(&family_id, &format!("children/{child_id}/balance")),
            Some(&child_token),
            None,
            StatusCode::OK,
        )
        .await;
    server
        .request_expect(
            "GET",
            &family_path(&family_id, "event-types"),
            Some(&child_token),
            None,
            StatusCode::OK,
        )
        .await;

    // Cross-family object access looks like a missing object, not a leak.
    let foreign_event = server
        .request_expect(
            "POST",
            &family_path(&family_id, &format!("children/{child_id}/events")),
            Some(&owner_token),
            Some(json!({"custom_name": "Chores", "points": 5, "date": "2025-06-01"})),
            StatusCode::OK,
        )
        .await;
    let foreign_event_id = foreign_event
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    server
        .request_expect(
            "PATCH",
            &family_path(&other_family, &format!("events/{foreign_event_id}")),
            Some(&other_token),
            Some(json!({"points": 500})),
            StatusCode::NOT_FOUND,
        )
        .await;
}

#[tokio::test]
async fn push_subscriptions_and_settings_roundtrip() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let (owner_token, family_id) = server.signup_owner("mom@example.com", "Mom", "Smith").await;

    let sub = server
        .request_expect(
            "POST",
            &family_path(&family_id, "push/subscriptions"),
            Some(&owner_token),
            Some(json!({
                "endpoint": "https://push.example.com/sub/1",
                "keys": {"p256dh": "key-p256dh", "auth": "key-auth"},
            })),
            StatusCode::OK,
        )
        .await;
    assert!(sub.get("subscribed").unwrap().as_bool().unwrap());

    // Subscribing the same endpoint again refreshes, not duplicates.
    server
        .request_expect(
            "POST",
            &family_path(&family_id, "push/subscriptions"),
            Some(&owner_token),
            Some(json!({
                "endpoint": "https://push.example.com/sub/1",
                "keys": {"p256dh": "key-p256dh-2", "auth": "key-auth-2"},
            })),
            StatusCode::OK,
        )
        .await;

    // Settings default to everything enabled.
    let settings = server
        .request_expect(
            "GET",
            &family_path(&family_id, "notification-settings"),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert!(settings.get("child_requests").unwrap().as_bool().unwrap());
    assert!(settings.get("sound").unwrap().as_bool().unwrap());

    let updated = server
        .request_expect(
            "PUT",
            &family_path(&family_id, "notification-settings"),
            Some(&owner_token),
            Some(json!({
                "child_requests": true,
                "request_results": false,
                "direct_changes": true,
                "sound": false,
                "vibration": true,
            })),
            StatusCode::OK,
        )
        .await;
    assert!(!updated.get("request_results").unwrap().as_bool().unwrap());
    assert!(!updated.get("sound").unwrap().as_bool().unwrap());

    let reread = server
        .request_expect(
            "GET",
            &family_path(&family_id, "notification-settings"),
            Some(&owner_token),
            None,
            StatusCode::OK,
        )
        .await;
    assert!(!reread.get("request_results").unwrap().as_bool().unwrap());

    server
        .request_expect(
            "POST",
            &family_path(&family_id, "push/subscriptions/unsubscribe"),
            Some(&owner_token),
            Some(json!({"endpoint": "https://push.example.com/sub/1"})),
            StatusCode::NO_CONTENT,
        )
        .await;
}

#[tokio::test]
async fn sse_streams_pending_count() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let (owner_token, family_id) = server.signup_owner("mom@example.com", "Mom", "Smith").await;
    let child = server
        .request_expect(
            "POST",
            &family_path(&family_id, "children"),
            Some(&owner_token),
            Some(json!({"login": "alice", "password": "kidpass99", "name": "Alice"})),
            StatusCode::OK,
        )
        .await;
    let child_id = child.get("id").and_then(|v| v.as_str()).unwrap().to_string();
    let child_token = server.login("alice", "kidpass99").await;

    let sse_url = kidpoints_shared::api::endpoints::sse(&server.base);

    // A bad token never opens a stream.
    let resp = server
        .client
        .get(format!("{sse_url}?token=garbage"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let mut stream = server
        .client
        .get(format!("{sse_url}?token={owner_token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);

    // A pending submission must show up on the owner's stream.
    server
        .request_expect(
            "POST",
            &family_path(&family_id, &format!("children/{child_id}/events")),
            Some(&child_token),
            Some(json!({"custom_name": "Washed dishes", "points": 5, "date": "2025-06-01"})),
            StatusCode::OK,
        )
        .await;

    let received = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let mut buf = String::new();
        while let Some(chunk) = stream.chunk().await.unwrap() {
            buf.push_str(&String::from_utf8_lossy(&chunk));
            if buf.contains("pending_count") {
                break;
            }
        }
        buf
    })
    .await
    .expect("no SSE event within timeout");
    assert!(received.contains("\"type\":\"pending_count\""));
    assert!(received.contains("\"count\":1"));
}
