use jsonwebtoken::{EncodingKey, Header, encode};
use reqwest::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;

use budgetsync_server::config::AppConfig;
use budgetsync_server::identity::IdentityVerifier;
use budgetsync_server::storage::Db;
use budgetsync_server::{AppState, build_router};

const SECRET: &str = "integration-secret";

/// A server on an ephemeral port plus a client pointed at it.
struct TestContext {
    base_url: String,
    http: reqwest::Client,
}

/// A caller with a signed token; onboarded by [`TestContext::onboard`].
struct TestUser {
    email: String,
    token: String,
}

impl TestContext {
    async fn start() -> Self {
        let config = AppConfig::from_lookup(|key| match key {
            "AUTH_JWT_SECRET" => Some(SECRET.to_string()),
            _ => None,
        })
        .unwrap();
        let state = AppState {
            db: Db::open_in_memory().unwrap(),
            config,
            identity: IdentityVerifier::with_secret(SECRET),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        Self {
            base_url: format!("http://{addr}"),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn user(&self, name: &str) -> TestUser {
        let email = format!("{name}-{}@example.com", &Uuid::new_v4().to_string()[..8]);
        self.user_with_claim(Some(&email))
    }

    /// A caller whose token carries `email`, or no email claim at all.
    fn user_with_claim(&self, email: Option<&str>) -> TestUser {
        let mut claims = json!({
            "sub": format!("test|{}", Uuid::new_v4()),
            "exp": chrono::Utc::now().timestamp() + 3600,
        });
        if let Some(email) = email {
            claims["email"] = json!(email);
        }
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        TestUser {
            email: email.unwrap_or_default().to_string(),
            token,
        }
    }

    async fn onboard(&self, name: &str) -> TestUser {
        let user = self.user(name);
        let (status, _) = self.post(&user, "/auth/onboarding", json!({"name": name})).await;
        assert_eq!(status, StatusCode::CREATED);
        user
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> (StatusCode, Value) {
        let resp = req.send().await.unwrap();
        let status = resp.status();
        let body = resp.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn get(&self, user: &TestUser, path: &str) -> (StatusCode, Value) {
        self.send(self.http.get(self.url(path)).bearer_auth(&user.token)).await
    }

    async fn post(&self, user: &TestUser, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(self.http.post(self.url(path)).bearer_auth(&user.token).json(&body))
            .await
    }

    async fn put(&self, user: &TestUser, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(self.http.put(self.url(path)).bearer_auth(&user.token).json(&body))
            .await
    }

    async fn delete(&self, user: &TestUser, path: &str) -> (StatusCode, Value) {
        self.send(self.http.delete(self.url(path)).bearer_auth(&user.token)).await
    }

    async fn create_budget(&self, user: &TestUser, month: &str) -> String {
        let (status, body) = self
            .post(user, "/budgets", json!({"month": month, "totalLimit": 1000}))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["id"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn health_needs_no_token() {
    let ctx = TestContext::start().await;
    let resp = ctx
        .http
        .get(format!("{}/health", ctx.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn missing_or_bad_token_is_unauthorized() {
    let ctx = TestContext::start().await;
    let (status, body) = ctx.send(ctx.http.get(ctx.url("/budgets"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = ctx
        .send(ctx.http.get(ctx.url("/budgets")).bearer_auth("not.a.jwt"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn onboarding_once_per_identity() {
    let ctx = TestContext::start().await;
    let user = ctx.user("alice");

    let (status, body) = ctx.get(&user, "/auth/me").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "user not onboarded");
    let (status, _) = ctx.get(&user, "/users/me").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = ctx
        .post(&user, "/auth/onboarding", json!({"currency": "EUR"}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["email"], user.email.as_str());
    assert_eq!(body["data"]["currency"], "EUR");

    let (status, body) = ctx.post(&user, "/auth/onboarding", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");

    let (status, body) = ctx.get(&user, "/auth/me").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], user.email.as_str());
}

#[tokio::test]
async fn one_budget_per_month() {
    let ctx = TestContext::start().await;
    let alice = ctx.onboard("alice").await;
    let id = ctx.create_budget(&alice, "2025-03").await;

    let (status, _) = ctx
        .post(&alice, "/budgets", json!({"month": "2025-03-01", "totalLimit": 5}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = ctx.get(&alice, "/budgets/month/2025-03").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], id.as_str());
    assert_eq!(body["data"]["permission"], "owner");
    assert_eq!(body["data"]["remaining"], json!(1000.0));
}

#[tokio::test]
async fn sharing_grants_and_revokes_access() {
    let ctx = TestContext::start().await;
    let alice = ctx.onboard("alice").await;
    let bob = ctx.onboard("bob").await;
    let budget = ctx.create_budget(&alice, "2025-04").await;

    let (status, _) = ctx.get(&bob, &format!("/budgets/{budget}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = ctx
        .post(
            &alice,
            "/sharing/invite",
            json!({"budgetId": budget, "recipientEmail": bob.email.to_uppercase(), "permission": "view"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let invitation = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = ctx
        .post(
            &bob,
            "/sharing/invite",
            json!({"budgetId": budget, "recipientEmail": "x@example.com", "permission": "view"}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = ctx.get(&bob, "/sharing/invitations").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = ctx
        .put(
            &bob,
            &format!("/sharing/invitations/{invitation}/respond"),
            json!({"status": "accepted"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "accepted");

    let (status, body) = ctx.get(&bob, &format!("/budgets/{budget}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["permission"], "view");

    let (status, _) = ctx
        .put(&bob, &format!("/budgets/{budget}"), json!({"totalLimit": 1}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = ctx.get(&bob, "/sharing/shared-with-me").await;
    let shared = body["data"].as_array().unwrap();
    assert_eq!(shared.len(), 1);
    let access = shared[0]["accessId"].as_str().unwrap().to_string();

    let (status, _) = ctx.delete(&bob, &format!("/sharing/access/{access}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = ctx.delete(&alice, &format!("/sharing/access/{access}")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = ctx.get(&bob, &format!("/budgets/{budget}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn self_declared_email_does_not_unlock_invitations() {
    let ctx = TestContext::start().await;
    let alice = ctx.onboard("alice").await;
    let budget = ctx.create_budget(&alice, "2025-05").await;
    let victim_email = format!("victim-{}@example.com", &Uuid::new_v4().to_string()[..8]);

    let (status, body) = ctx
        .post(
            &alice,
            "/sharing/invite",
            json!({"budgetId": budget, "recipientEmail": victim_email, "permission": "edit"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let invitation = body["data"]["id"].as_str().unwrap().to_string();

    let mallory = ctx.user_with_claim(None);
    let (status, body) = ctx
        .post(&mallory, "/auth/onboarding", json!({"email": victim_email}))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["emailVerified"], false);

    let (status, _) = ctx.get(&mallory, "/sharing/invitations").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = ctx
        .put(
            &mallory,
            &format!("/sharing/invitations/{invitation}/respond"),
            json!({"status": "accepted"}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = ctx.get(&mallory, &format!("/budgets/{budget}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The address's real owner is not locked out by the squatter.
    let victim = ctx.user_with_claim(Some(&victim_email));
    let (status, body) = ctx.post(&victim, "/auth/onboarding", json!({})).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["emailVerified"], true);
    let (status, body) = ctx
        .put(
            &victim,
            &format!("/sharing/invitations/{invitation}/respond"),
            json!({"status": "accepted"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn private_categories_stay_with_their_owner() {
    let ctx = TestContext::start().await;
    let alice = ctx.onboard("alice").await;
    let bob = ctx.onboard("bob").await;
    let (status, body) = ctx.post(&alice, "/categories", json!({"name": "Hobbies"})).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let category = body["data"]["id"].as_str().unwrap().to_string();
    let bob_budget = ctx.create_budget(&bob, "2025-06").await;

    let (status, _) = ctx
        .post(
            &bob,
            &format!("/budgets/{bob_budget}/categories"),
            json!({"categoryId": category, "limitAmount": 50}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = ctx
        .post(
            &bob,
            "/transactions",
            json!({"categoryId": category, "amount": 9.5, "transactionDate": "2025-06-02"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = ctx.get(&bob, &format!("/analytics/category/{category}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = ctx
        .post(
            &alice,
            "/transactions",
            json!({"categoryId": category, "amount": 9.5, "transactionDate": "2025-06-02"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
}

#[tokio::test]
async fn sync_push_replay_and_resolution() {
    let ctx = TestContext::start().await;
    let alice = ctx.onboard("alice").await;
    let id = Uuid::new_v4().to_string();
    let push = json!({"operations": [{
        "table": "categories",
        "recordId": id,
        "operation": "create",
        "localData": {"name": "Pets", "color": "#aa5500"},
    }]});

    let (status, body) = ctx.post(&alice, "/sync/push", push.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["results"][0]["status"], "success");
    assert!(body["data"]["syncedAt"].is_string());

    let (_, body) = ctx.post(&alice, "/sync/push", push).await;
    let result = &body["data"]["results"][0];
    assert_eq!(result["status"], "conflict");
    let operation = result["operationId"].as_str().unwrap().to_string();

    let (_, body) = ctx.get(&alice, "/sync/status").await;
    assert_eq!(body["data"]["conflicts"], 1);
    assert!(body["data"]["lastSyncTime"].is_string());

    let (status, body) = ctx
        .post(
            &alice,
            "/sync/resolve-conflict",
            json!({"operationId": operation, "resolution": "merge"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = ctx
        .post(
            &alice,
            "/sync/resolve-conflict",
            json!({"operationId": operation, "resolution": "server"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "resolved");

    let (_, body) = ctx.get(&alice, "/sync/operations?status=conflict").await;
    assert!(body["data"].as_array().unwrap().is_empty());

    // Rows stamped in the current millisecond wait for the next pull.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let (status, body) = ctx.post(&alice, "/sync/pull", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["hasMore"], false);
    let categories = body["data"]["changes"]["categories"].as_array().unwrap();
    assert!(categories.iter().any(|c| c["id"] == id.as_str()));
}

#[tokio::test]
async fn malformed_json_gets_error_envelope() {
    let ctx = TestContext::start().await;
    let alice = ctx.onboard("alice").await;
    let (status, body) = ctx
        .send(
            ctx.http
                .post(ctx.url("/budgets"))
                .bearer_auth(&alice.token)
                .header("content-type", "application/json")
                .body("{not json"),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "bad_request");
}
