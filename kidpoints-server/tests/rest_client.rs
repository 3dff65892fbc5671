//! Drives the server through the shared typed REST client instead of
//! raw JSON requests.

use kidpoints_server::{server, storage};
use kidpoints_shared::api::{
    self, AuthReq, CreateChildReq, CreateEventReq, CreateEventTypeReq, EventListQuery,
    NotificationSettingsDto, PushKeysDto, PushSubscribeReq, PushUnsubscribeReq, SignupReq, rest,
};
use kidpoints_shared::auth::Role;
use kidpoints_shared::domain::EventStatus;
use kidpoints_shared::jwt;
use std::io::ErrorKind;

struct TestServer {
    base: String,
    handle: tokio::task::JoinHandle<()>,
    _tempdir: tempfile::TempDir,
}

impl TestServer {
    async fn spawn() -> Option<Self> {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let config = server::AppConfig {
            jwt_secret: "testsecret".into(),
            listen_port: None,
            dev_cors_origin: None,
            push: None,
        };
        let store = storage::Store::connect_sqlite(db_path.to_str().unwrap())
            .await
            .expect("db");
        let state = server::AppState::new(config, store);
        let app = server::router(state);

        let listener =
            match tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await {
                Ok(l) => l,
                Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                    eprintln!("Skipping test due to sandbox restrictions: {e}");
                    return None;
                }
                Err(e) => panic!("failed to bind: {e}"),
            };
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Some(Self {
            base: format!("http://{}", addr),
            handle,
            _tempdir: dir,
        })
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn typed_client_full_scenario() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let base = server.base.clone();

    let auth = rest::signup(
        &base,
        &SignupReq {
            email: "mom@example.com".into(),
            password: "secret123".into(),
            name: "Mom".into(),
            family_name: "Smith".into(),
        },
    )
    .await
    .expect("signup");
    let family_id = jwt::family_id_from_token(&auth.token).expect("family in token");

    let me = rest::me(&base, &family_id, &auth.token).await.expect("me");
    assert_eq!(me.role, Role::Owner);

    let child = rest::create_child(
        &base,
        &family_id,
        &auth.token,
        &CreateChildReq {
            login: "alice".into(),
            password: "kidpass99".into(),
            name: "Alice".into(),
        },
    )
    .await
    .expect("create child");
    assert_eq!(child.role, Role::Child);
    assert_eq!(child.login.as_deref(), Some("alice"));

    let child_auth = rest::login(
        &base,
        &AuthReq {
            login: "alice".into(),
            password: "kidpass99".into(),
        },
    )
    .await
    .expect("child login");

    // Seeded templates arrive in sort order.
    let types = rest::list_event_types(&base, &family_id, &auth.token)
        .await
        .expect("list types");
    assert_eq!(types.len(), 8);
    assert!(types.windows(2).all(|w| w[0].sort_order <= w[1].sort_order));

    let custom = rest::create_event_type(
        &base,
        &family_id,
        &auth.token,
        &CreateEventTypeReq {
            name: "Reading".into(),
            default_points: 5,
            is_deduction: false,
            icon: Some("📚".into()),
            sort_order: None,
        },
    )
    .await
    .expect("create type");

    // Admin entry lands approved; child request stays pending.
    let recorded = rest::create_event(
        &base,
        &family_id,
        &child.id,
        &auth.token,
        &CreateEventReq {
            event_type_id: Some(custom.id.clone()),
            custom_name: None,
            points: 5,
            note: "bedtime story".into(),
            date: "2025-06-02".into(),
        },
    )
    .await
    .expect("record event");
    assert_eq!(recorded.status, EventStatus::Approved);

    let request = rest::create_event(
        &base,
        &family_id,
        &child.id,
        &child_auth.token,
        &CreateEventReq {
            event_type_id: None,
            custom_name: Some("Washed dishes".into()),
            points: 3,
            note: String::new(),
            date: "2025-06-03".into(),
        },
    )
    .await
    .expect("submit request");
    assert_eq!(request.status, EventStatus::Pending);

    let count = rest::pending_count(&base, &family_id, &auth.token)
        .await
        .expect("pending count");
    assert_eq!(count.count, 1);

    rest::approve_event(&base, &family_id, &request.id, &auth.token)
        .await
        .expect("approve");

    let balance = rest::child_balance(&base, &family_id, &child.id, &child_auth.token)
        .await
        .expect("balance");
    assert_eq!(balance.balance, 8);

    let history = rest::list_child_events(
        &base,
        &family_id,
        &child.id,
        &child_auth.token,
        &EventListQuery {
            from: Some("2025-06-03".into()),
            to: None,
            status: Some(EventStatus::Approved),
        },
    )
    .await
    .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, request.id);

    // Push subscription + settings round-trip.
    let sub = rest::push_subscribe(
        &base,
        &family_id,
        &auth.token,
        &PushSubscribeReq {
            endpoint: "https://push.example.com/sub/1".into(),
            keys: PushKeysDto {
                p256dh: "key-p256dh".into(),
                auth: "key-auth".into(),
            },
        },
    )
    .await
    .expect("subscribe");
    assert!(sub.subscribed);

    let settings = rest::get_notification_settings(&base, &family_id, &auth.token)
        .await
        .expect("settings");
    assert!(settings.sound);

    let updated = rest::put_notification_settings(
        &base,
        &family_id,
        &auth.token,
        &NotificationSettingsDto {
            sound: false,
            ..NotificationSettingsDto::default()
        },
    )
    .await
    .expect("update settings");
    assert!(!updated.sound);

    rest::push_unsubscribe(
        &base,
        &family_id,
        &auth.token,
        &PushUnsubscribeReq {
            endpoint: "https://push.example.com/sub/1".into(),
        },
    )
    .await
    .expect("unsubscribe");

    // Typed errors carry the status code.
    let err = rest::me(&base, &family_id, "not-a-token")
        .await
        .expect_err("bad token must fail");
    match err {
        rest::RestError::Status { status, .. } => {
            assert_eq!(status, api::rest::StatusCode::UNAUTHORIZED.as_u16())
        }
        other => panic!("unexpected error: {other}"),
    }
}
