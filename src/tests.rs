//! Integration tests for the forum backend.

use std::sync::Arc;

use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::auth::USER_HEADER;
use crate::config::Config;
use crate::db::{init_database, Repository};
use crate::forum::NotificationPolicy;
use crate::{create_router, AppState};

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_settings(Some("test-api-key".to_string()), NotificationPolicy::default()).await
    }

    async fn with_settings(psk: Option<String>, notifications: NotificationPolicy) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");

        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool, notifications));

        let config = Config {
            api_psk: psk.clone(),
            db_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            avatar_base_url: "https://avatars.test".to_string(),
            notifications,
        };

        let state = AppState {
            repo,
            config: Arc::new(config),
        };

        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let mut client_builder = Client::builder();
        if let Some(key) = psk {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, user: &str, path: &str) -> RequestBuilder {
        self.client.get(self.url(path)).header(USER_HEADER, user)
    }

    fn post(&self, user: &str, path: &str) -> RequestBuilder {
        self.client.post(self.url(path)).header(USER_HEADER, user)
    }

    fn put(&self, user: &str, path: &str) -> RequestBuilder {
        self.client.put(self.url(path)).header(USER_HEADER, user)
    }

    fn delete(&self, user: &str, path: &str) -> RequestBuilder {
        self.client.delete(self.url(path)).header(USER_HEADER, user)
    }

    /// Register a user and return their id.
    async fn register(&self, username: &str) -> String {
        let resp = self
            .client
            .post(self.url("/api/users"))
            .json(&json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "passwordHash": "$argon2id$opaque"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "registering {}", username);
        let body: Value = resp.json().await.unwrap();
        body["data"]["id"].as_str().unwrap().to_string()
    }

    /// Start a thread with an opening post and return its id.
    async fn open_thread(&self, user: &str, title: &str, topic: Option<&str>) -> String {
        let resp = self
            .post(user, "/api/threads")
            .json(&json!({ "title": title, "body": "Opening post", "topic": topic }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        body["data"]["id"].as_str().unwrap().to_string()
    }

    async fn reply(&self, user: &str, thread_id: &str, body: &str) -> Value {
        let resp = self
            .post(user, &format!("/api/threads/{}/posts", thread_id))
            .json(&json!({ "body": body }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }

    async fn notifications(&self, user: &str) -> Value {
        let resp = self.get(user, "/api/me/notifications").send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        body["data"].clone()
    }
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_router_serves_health_without_a_listener() {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.sqlite");
    let pool = init_database(&db_path).await.unwrap();
    let config = Config {
        api_psk: Some("secret-key".to_string()),
        db_path,
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        log_level: "warn".to_string(),
        avatar_base_url: "https://avatars.test".to_string(),
        notifications: NotificationPolicy::default(),
    };
    let app = create_router(AppState {
        repo: Arc::new(Repository::new(pool, config.notifications)),
        config: Arc::new(config),
    });

    let resp = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = app
        .oneshot(Request::get("/api/threads").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_auth_missing_psk() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/topics"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_auth_bearer_psk() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/topics"))
        .header("authorization", "Bearer test-api-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = Client::new()
        .get(fixture.url("/api/topics"))
        .header("x-api-key", "wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_acting_user_is_required() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/threads"))
        .json(&json!({ "title": "Hello", "body": "World" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = fixture
        .post("no-such-user", "/api/threads")
        .json(&json!({ "title": "Hello", "body": "World" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_register_and_profile() {
    let fixture = TestFixture::new().await;
    let alice = fixture.register("alice").await;

    let resp = fixture
        .client
        .post(fixture.url("/api/users"))
        .json(&json!({
            "username": "alice",
            "email": "other@example.com",
            "passwordHash": "x"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "DUPLICATE_NAME");

    let resp = fixture
        .client
        .post(fixture.url("/api/users"))
        .json(&json!({ "username": "al", "email": "al@example.com", "passwordHash": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = fixture
        .put(&alice, "/api/me")
        .json(&json!({ "aboutMe": "Hi, I'm Alice" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    fixture.open_thread(&alice, "Hello", None).await;

    let resp = fixture.get(&alice, "/api/users/alice").send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["aboutMe"], "Hi, I'm Alice");
    assert_eq!(body["data"]["postCount"], 1);
    assert!(body["data"]["avatarUrl"]
        .as_str()
        .unwrap()
        .starts_with("https://avatars.test/"));
    assert!(body["data"].get("email").is_none());
    assert!(body["data"].get("passwordHash").is_none());
}

#[tokio::test]
async fn test_alice_and_bob_notification_flow() {
    let fixture = TestFixture::new().await;
    let alice = fixture.register("alice").await;
    let bob = fixture.register("bobby").await;

    // alice opens a thread and is its only subscriber
    let resp = fixture
        .post(&alice, "/api/threads")
        .json(&json!({ "title": "Hello", "body": "World" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let thread_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["name"], "Hello");
    assert_eq!(body["data"]["subscribers"], json!([alice]));
    assert_eq!(fixture.notifications(&alice).await["hasUnseen"], false);

    // bob replies with an empty title
    let resp = fixture
        .post(&bob, &format!("/api/threads/{}/posts", thread_id))
        .json(&json!({ "title": "", "body": "Reply" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["position"], 1);

    let alice_alerts = fixture.notifications(&alice).await;
    assert_eq!(alice_alerts["hasUnseen"], true);
    assert_eq!(alice_alerts["threads"][0]["targetId"], thread_id);
    assert_eq!(alice_alerts["threads"][0]["name"], "Hello");
    assert_eq!(fixture.notifications(&bob).await["hasUnseen"], false);

    let resp = fixture
        .get(&alice, &format!("/api/threads/{}", thread_id))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["name"], "Hello");
    assert_eq!(body["data"]["posts"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["posts"][1]["author"], "bobby");
    let subscribers = body["data"]["subscribers"].as_array().unwrap();
    assert!(subscribers.contains(&json!(alice)));
    assert!(subscribers.contains(&json!(bob)));

    // alice reads the thread
    let resp = fixture
        .post(&alice, &format!("/api/threads/{}/seen", thread_id))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"], true);
    assert_eq!(fixture.notifications(&alice).await["hasUnseen"], false);

    // alice replies; bob is flagged
    fixture.reply(&alice, &thread_id, "Thanks").await;
    assert_eq!(fixture.notifications(&bob).await["hasUnseen"], true);
}

#[tokio::test]
async fn test_self_reply_respects_author_policy() {
    let fixture = TestFixture::new().await;
    let alice = fixture.register("alice").await;
    let thread_id = fixture.open_thread(&alice, "Hello", None).await;
    fixture.reply(&alice, &thread_id, "Me again").await;
    assert_eq!(fixture.notifications(&alice).await["hasUnseen"], true);

    let quiet = TestFixture::with_settings(
        Some("test-api-key".to_string()),
        NotificationPolicy {
            notify_author: false,
            topic_fanout: true,
        },
    )
    .await;
    let alice = quiet.register("alice").await;
    let thread_id = quiet.open_thread(&alice, "Hello", None).await;
    quiet.reply(&alice, &thread_id, "Me again").await;
    assert_eq!(quiet.notifications(&alice).await["hasUnseen"], false);
}

#[tokio::test]
async fn test_untitled_first_post_is_rejected() {
    let fixture = TestFixture::new().await;
    let alice = fixture.register("alice").await;

    let resp = fixture
        .post(&alice, "/api/threads")
        .json(&json!({ "body": "No title here" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "INVALID_FIRST_POST");

    let resp = fixture.get(&alice, "/api/threads").send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_empty_thread_is_opened_by_first_post() {
    let fixture = TestFixture::new().await;
    let alice = fixture.register("alice").await;

    let resp = fixture
        .post(&alice, "/api/threads")
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let thread_id = body["data"]["id"].as_str().unwrap().to_string();
    assert!(body["data"]["name"].is_null());

    let resp = fixture
        .post(&alice, &format!("/api/threads/{}/posts", thread_id))
        .json(&json!({ "body": "untitled" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "INVALID_FIRST_POST");

    let resp = fixture
        .post(&alice, &format!("/api/threads/{}/posts", thread_id))
        .json(&json!({ "title": "Now titled", "body": "text" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["position"], 0);

    let resp = fixture
        .get(&alice, &format!("/api/threads/{}", thread_id))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["name"], "Now titled");
    assert_eq!(body["data"]["subscribers"], json!([alice]));
}

#[tokio::test]
async fn test_topic_names_are_unique() {
    let fixture = TestFixture::new().await;
    let alice = fixture.register("alice").await;

    let resp = fixture
        .post(&alice, "/api/topics")
        .json(&json!({ "name": "rust" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let topic_id = body["data"]["id"].clone();

    let resp = fixture
        .post(&alice, "/api/topics")
        .json(&json!({ "name": "rust" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "DUPLICATE_NAME");

    // get-or-create converges on the existing row
    for _ in 0..2 {
        let resp = fixture.put(&alice, "/api/topics/rust").send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"]["id"], topic_id);
    }

    // threads tagged with the same name share the topic
    fixture.open_thread(&alice, "One", Some("rust")).await;
    fixture.open_thread(&alice, "Two", Some("rust")).await;

    let resp = fixture.get(&alice, "/api/topics").send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    let topics = body["data"].as_array().unwrap();
    assert_eq!(topics.len(), 1);
    assert_eq!(topics[0]["threadCount"], 2);
}

#[tokio::test]
async fn test_topic_subscribers_are_flagged_by_posts() {
    let fixture = TestFixture::new().await;
    let alice = fixture.register("alice").await;
    let bob = fixture.register("bobby").await;

    fixture.put(&bob, "/api/topics/rust").send().await.unwrap();
    let resp = fixture
        .post(&bob, "/api/topics/rust/subscription")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["changed"], true);

    let resp = fixture
        .post(&bob, "/api/topics/rust/subscription")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["changed"], false);

    fixture.open_thread(&alice, "Ownership", Some("rust")).await;

    let alerts = fixture.notifications(&bob).await;
    assert_eq!(alerts["hasUnseen"], true);
    assert_eq!(alerts["topics"][0]["name"], "rust");

    let resp = fixture
        .post(&bob, "/api/topics/rust/seen")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(fixture.notifications(&bob).await["hasUnseen"], false);

    let resp = fixture
        .delete(&bob, "/api/topics/rust/subscription")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["subscribed"], false);
    assert_eq!(body["data"]["changed"], true);

    let resp = fixture.get(&bob, "/api/me/subscriptions").send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["topics"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_thread_subscription_toggles() {
    let fixture = TestFixture::new().await;
    let alice = fixture.register("alice").await;
    let carol = fixture.register("carol").await;
    let thread_id = fixture.open_thread(&alice, "Hello", None).await;
    let path = format!("/api/threads/{}/subscription", thread_id);

    let resp = fixture.post(&carol, &path).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["changed"], true);
    let resp = fixture.post(&carol, &path).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["changed"], false);

    fixture.reply(&alice, &thread_id, "ping").await;
    assert_eq!(fixture.notifications(&carol).await["hasUnseen"], true);

    let resp = fixture.delete(&carol, &path).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["changed"], true);
    let resp = fixture.delete(&carol, &path).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["changed"], false);

    assert_eq!(fixture.notifications(&carol).await["hasUnseen"], false);
}

#[tokio::test]
async fn test_group_threads_hidden_from_outsiders() {
    let fixture = TestFixture::new().await;
    let alice = fixture.register("alice").await;
    let bob = fixture.register("bobby").await;
    let mallory = fixture.register("mallory").await;

    let resp = fixture
        .post(&alice, "/api/groups")
        .json(&json!({ "name": "Rustaceans", "description": "Crab club" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let group_id = body["data"]["id"].as_str().unwrap().to_string();

    let resp = fixture
        .post(&alice, &format!("/api/groups/{}/members", group_id))
        .json(&json!({ "username": "bobby" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = fixture
        .post(&alice, "/api/threads")
        .json(&json!({ "title": "Secret", "body": "Members only", "groupId": group_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let thread_id = body["data"]["id"].as_str().unwrap().to_string();
    let post_id = body["data"]["posts"][0]["id"].as_str().unwrap().to_string();

    let thread_path = format!("/api/threads/{}", thread_id);
    assert_eq!(
        fixture.get(&bob, &thread_path).send().await.unwrap().status(),
        200
    );
    assert_eq!(
        fixture.get(&mallory, &thread_path).send().await.unwrap().status(),
        404
    );
    assert_eq!(
        fixture
            .get(&mallory, &format!("/api/posts/{}", post_id))
            .send()
            .await
            .unwrap()
            .status(),
        404
    );
    assert_eq!(
        fixture
            .get(&mallory, &format!("/api/groups/{}", group_id))
            .send()
            .await
            .unwrap()
            .status(),
        404
    );

    let resp = fixture
        .post(&mallory, &format!("/api/threads/{}/posts", thread_id))
        .json(&json!({ "body": "let me in" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // group threads stay off the public listing
    let resp = fixture.get(&mallory, "/api/threads").send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    let resp = fixture
        .get(&mallory, "/api/users/alice/posts")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    let resp = fixture
        .get(&bob, &format!("/api/groups/{}", group_id))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["members"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["threads"][0]["name"], "Secret");

    // bob subscribes, then leaves; the subscription goes with him
    fixture
        .post(&bob, &format!("/api/threads/{}/subscription", thread_id))
        .send()
        .await
        .unwrap();
    let resp = fixture
        .delete(&bob, &format!("/api/groups/{}/membership", group_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        fixture.get(&bob, &thread_path).send().await.unwrap().status(),
        404
    );
    let resp = fixture.get(&bob, "/api/me/subscriptions").send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["threads"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_only_authors_edit() {
    let fixture = TestFixture::new().await;
    let alice = fixture.register("alice").await;
    let bob = fixture.register("bobby").await;
    let thread_id = fixture.open_thread(&alice, "Hello", Some("rust")).await;
    let reply = fixture.reply(&bob, &thread_id, "Reply").await;
    let reply_id = reply["data"]["id"].as_str().unwrap().to_string();

    let thread_path = format!("/api/threads/{}", thread_id);
    let resp = fixture
        .put(&bob, &thread_path)
        .json(&json!({ "title": "Hijacked" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = fixture
        .put(&alice, &thread_path)
        .json(&json!({ "title": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "INVALID_FIRST_POST");

    let resp = fixture
        .put(&alice, &thread_path)
        .json(&json!({ "title": "Hello, again", "topic": "general" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["name"], "Hello, again");
    assert_eq!(body["data"]["topic"], "general");
    assert_eq!(body["data"]["posts"][0]["title"], "Hello, again");

    // the old topic still exists for other threads
    let resp = fixture.get(&alice, "/api/topics/rust").send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let resp = fixture
        .put(&alice, &thread_path)
        .json(&json!({ "body": "x", "expectedVersion": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VERSION_MISMATCH");
    assert!(body["error"]["details"]["currentVersion"].as_i64().unwrap() > 1);

    let post_path = format!("/api/posts/{}", reply_id);
    let resp = fixture
        .put(&alice, &post_path)
        .json(&json!({ "body": "Not yours" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = fixture
        .put(&bob, &post_path)
        .json(&json!({ "body": "Edited reply" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["body"], "Edited reply");
    assert!(body["data"]["editedAt"].is_string());
}

#[tokio::test]
async fn test_concurrent_replies_keep_positions_dense() {
    let fixture = TestFixture::new().await;
    let alice = fixture.register("alice").await;
    let bob = fixture.register("bobby").await;
    let thread_id = fixture.open_thread(&alice, "Race", None).await;

    let (a, b) = tokio::join!(
        fixture.reply(&alice, &thread_id, "from alice"),
        fixture.reply(&bob, &thread_id, "from bob"),
    );
    let mut positions = vec![
        a["data"]["position"].as_i64().unwrap(),
        b["data"]["position"].as_i64().unwrap(),
    ];
    positions.sort();
    assert_eq!(positions, vec![1, 2]);

    let resp = fixture
        .get(&alice, &format!("/api/threads/{}", thread_id))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["posts"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_topic_paths_are_trimmed_like_topic_names() {
    let fixture = TestFixture::new().await;
    let alice = fixture.register("alice").await;

    let resp = fixture.put(&alice, "/api/topics/rust").send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    let topic_id = body["data"]["id"].clone();

    let resp = fixture
        .get(&alice, "/api/topics/%20rust%20")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["id"], topic_id);

    let resp = fixture
        .get(&alice, "/api/topics/%20rust%20/threads")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = fixture
        .post(&alice, "/api/topics/%20rust%20/subscription")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["changed"], true);

    let resp = fixture
        .post(&alice, "/api/topics/rust/subscription")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["changed"], false);

    let resp = fixture
        .post(&alice, "/api/topics/rust%20/seen")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = fixture
        .delete(&alice, "/api/topics/%20rust/subscription")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["changed"], true);

    let resp = fixture.get(&alice, "/api/topics/%20%20").send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_validation_rejects_oversized_post() {
    let fixture = TestFixture::new().await;
    let alice = fixture.register("alice").await;
    let thread_id = fixture.open_thread(&alice, "Hello", None).await;

    let resp = fixture
        .post(&alice, &format!("/api/threads/{}/posts", thread_id))
        .json(&json!({ "body": "x".repeat(1001) }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let resp = fixture
        .get(&alice, "/api/threads/does-not-exist")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
