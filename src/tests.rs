//! Integration tests for the wiki backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::Config;
use crate::db::init_database;
use crate::test_support::EchoRenderer;
use crate::{build_state, create_router};

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");

        // Initialize database
        let pool = init_database(&db_path).await.expect("Failed to init DB");

        // Create config
        let vars: HashMap<&str, String> = HashMap::from([
            ("WIKI_DB_PATH", db_path.display().to_string()),
            ("WIKI_BIND_ADDR", "127.0.0.1:0".to_string()),
            ("WIKI_LOG_LEVEL", "warn".to_string()),
        ]);
        let config = Config::from_lookup(|name| vars.get(name).cloned()).expect("Invalid config");

        let state = build_state(config, pool, Arc::new(EchoRenderer::new()));
        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        TestFixture {
            client: Client::new(),
            base_url,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self.client.post(self.url(path)).json(&body).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn create_document(&self, slug: &str, title: &str, extra: Value) -> Value {
        let mut body = json!({
            "slug": slug,
            "title": title,
            "revision": {
                "content": format!("<p>{}</p>", title),
                "creator": "alice",
                "isApproved": true,
                "tags": ["Guide"]
            }
        });
        if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (key, value) in extra {
                body.insert(key.clone(), value.clone());
            }
        }
        let (status, json) = self.post("/api/documents", body).await;
        assert_eq!(status, StatusCode::OK, "create failed: {}", json);
        json["data"].clone()
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
async fn test_create_document_renders_immediately() {
    let fixture = TestFixture::new().await;

    let doc = fixture.create_document("Web/CSS", "CSS", json!({})).await;
    assert_eq!(doc["locale"], "en-US");
    assert_eq!(doc["category"], 0);
    assert_eq!(doc["html"], "<p>CSS</p>");
    assert_eq!(doc["renderedHtml"], r#"<div class="rendered"><p>CSS</p></div>"#);
    assert_eq!(doc["json"]["tags"], json!(["Guide"]));

    let (status, found) = fixture.get("/api/docs/en-US/Web/CSS").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["data"]["id"], doc["id"]);

    let (status, rendered) = fixture
        .get(&format!("/api/documents/{}/rendered", doc["id"]))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rendered["data"]["html"], doc["renderedHtml"]);
}

#[tokio::test]
async fn test_error_envelopes() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture.get("/api/documents/9999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, body) = fixture
        .post(
            "/api/documents",
            json!({
                "slug": "bad slug",
                "title": "Bad",
                "revision": { "content": "x", "creator": "alice" }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    fixture.create_document("Web", "Web", json!({})).await;
    let (status, body) = fixture
        .post(
            "/api/documents",
            json!({
                "slug": "Web",
                "title": "Again",
                "revision": { "content": "x", "creator": "alice" }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_revision_review_flow() {
    let fixture = TestFixture::new().await;
    let doc = fixture.create_document("Web", "Web", json!({})).await;
    let id = doc["id"].as_i64().unwrap();

    let (status, saved) = fixture
        .post(
            &format!("/api/documents/{}/revisions", id),
            json!({ "content": "<p>Draft</p>", "creator": "bob" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["data"]["promoted"], false);
    let draft_id = saved["data"]["revision"]["id"].as_i64().unwrap();

    let (_, pick) = fixture
        .get(&format!("/api/documents/{}/current-revision?reviewedOnly=true", id))
        .await;
    assert_eq!(pick["data"]["source"], "current");
    assert_ne!(pick["data"]["revision"]["id"], draft_id);

    let (status, reviewed) = fixture
        .post(
            &format!("/api/revisions/{}/review", draft_id),
            json!({ "approve": true, "reviewer": "carol" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reviewed["data"]["promoted"], true);
    assert_eq!(reviewed["data"]["revision"]["reviewer"], "carol");

    let (_, doc) = fixture.get(&format!("/api/documents/{}", id)).await;
    assert_eq!(doc["data"]["currentRevisionId"], draft_id);
    assert_eq!(
        doc["data"]["renderedHtml"],
        r#"<div class="rendered"><p>Draft</p></div>"#
    );

    let (_, history) = fixture.get(&format!("/api/documents/{}/revisions", id)).await;
    assert_eq!(history["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_deferred_document_renders_in_background() {
    let fixture = TestFixture::new().await;
    let doc = fixture
        .create_document("Slow", "Slow", json!({ "deferRendering": true }))
        .await;

    let path = format!("/api/documents/{}/rendered", doc["id"]);
    let mut rendered = None;
    for _ in 0..40 {
        let (status, body) = fixture.get(&path).await;
        if status == StatusCode::OK {
            rendered = Some(body);
            break;
        }
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "RENDERED_CONTENT_NOT_AVAILABLE");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let rendered = rendered.expect("deferred render never completed");
    assert_eq!(
        rendered["data"]["html"],
        r#"<div class="rendered"><p>Slow</p></div>"#
    );
}

#[tokio::test]
async fn test_translation_endpoints() {
    let fixture = TestFixture::new().await;
    let source = fixture.create_document("Web", "Web", json!({})).await;
    let id = source["id"].as_i64().unwrap();

    let (status, translation) = fixture
        .post(
            &format!("/api/documents/{}/translations", id),
            json!({
                "locale": "fr",
                "title": "Toile",
                "revision": { "content": "<p>Toile</p>", "creator": "alice", "isApproved": true }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(translation["data"]["parentId"], id);
    assert_eq!(translation["data"]["isLocalizable"], false);
    let fr_id = translation["data"]["id"].as_i64().unwrap();

    let (_, others) = fixture.get(&format!("/api/documents/{}/translations", id)).await;
    assert_eq!(others["data"][0]["id"], fr_id);

    let (_, outdated) = fixture.get(&format!("/api/documents/{}/outdated", fr_id)).await;
    assert_eq!(outdated["data"]["majorlyOutdated"], false);

    fixture
        .post(
            &format!("/api/documents/{}/revisions", id),
            json!({
                "content": "<p>Rewritten</p>",
                "creator": "alice",
                "isApproved": true,
                "significance": 30
            }),
        )
        .await;
    let (_, outdated) = fixture.get(&format!("/api/documents/{}/outdated", fr_id)).await;
    assert_eq!(outdated["data"]["majorlyOutdated"], true);
}

#[tokio::test]
async fn test_topic_tree_endpoints() {
    let fixture = TestFixture::new().await;
    let root = fixture
        .create_document("Learn", "Learn", json!({ "category": 20 }))
        .await;
    let root_id = root["id"].as_i64().unwrap();
    let child = fixture
        .create_document("Learn/HTML", "HTML", json!({ "parentTopicId": root_id }))
        .await;
    let child_id = child["id"].as_i64().unwrap();
    assert_eq!(child["category"], 20);

    let (_, descendants) = fixture
        .get(&format!("/api/documents/{}/descendants?depth=1", root_id))
        .await;
    assert_eq!(descendants["data"][0]["id"], child_id);

    let (_, is_child) = fixture
        .get(&format!("/api/documents/{}/is-child-of/{}", child_id, root_id))
        .await;
    assert_eq!(is_child["data"], true);

    let resp = fixture
        .client
        .put(fixture.url(&format!("/api/documents/{}/parent-topic", root_id)))
        .json(&json!({ "parentTopicId": child_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = fixture
        .client
        .delete(fixture.url(&format!("/api/documents/{}", root_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let (status, stub) = fixture
        .post(
            &format!("/api/documents/{}/translation-parent", child_id),
            json!({ "locale": "de", "creator": "alice" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stub["data"]["slug"], "Learn");
    assert_eq!(stub["data"]["locale"], "de");
    assert_eq!(stub["data"]["parentId"], root_id);
    assert!(stub["data"]["renderedHtml"]
        .as_str()
        .unwrap()
        .starts_with(r#"<div class="rendered">"#));
}

#[tokio::test]
async fn test_move_leaves_redirect() {
    let fixture = TestFixture::new().await;
    let parent = fixture.create_document("parent", "Parent", json!({})).await;
    let parent_id = parent["id"].as_i64().unwrap();
    fixture
        .create_document("parent/child", "Child", json!({ "parentTopicId": parent_id }))
        .await;

    let (_, conflicts) = fixture
        .get(&format!(
            "/api/documents/{}/move-conflicts?slug=new-prefix/parent",
            parent_id
        ))
        .await;
    assert_eq!(conflicts["data"], json!([]));

    let (status, report) = fixture
        .post(
            &format!("/api/documents/{}/move", parent_id),
            json!({ "slug": "new-prefix/parent", "user": "alice" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["data"]["moved"].as_array().unwrap().len(), 2);
    assert_eq!(report["data"]["redirects"].as_array().unwrap().len(), 2);

    let (_, child) = fixture.get("/api/docs/en-US/new-prefix/parent/child").await;
    assert_eq!(child["data"]["title"], "Child");

    let (_, redirect) = fixture.get("/api/docs/en-US/parent").await;
    assert_eq!(redirect["data"]["isRedirect"], true);
    let redirect_id = redirect["data"]["id"].as_i64().unwrap();

    let (_, target) = fixture
        .get(&format!("/api/documents/{}/redirect-target", redirect_id))
        .await;
    assert_eq!(target["data"]["id"], parent_id);
}

#[tokio::test]
async fn test_move_conflict_changes_nothing() {
    let fixture = TestFixture::new().await;
    let parent = fixture.create_document("parent", "Parent", json!({})).await;
    let parent_id = parent["id"].as_i64().unwrap();
    fixture
        .create_document("parent/child", "Child", json!({ "parentTopicId": parent_id }))
        .await;
    let blocker = fixture.create_document("other/child", "Blocker", json!({})).await;

    let (status, body) = fixture
        .post(
            &format!("/api/documents/{}/move", parent_id),
            json!({ "slug": "other", "user": "alice" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "MOVE_CONFLICT");
    assert_eq!(body["error"]["details"]["conflicts"][0]["id"], blocker["id"]);

    let (_, doc) = fixture.get(&format!("/api/documents/{}", parent_id)).await;
    assert_eq!(doc["data"]["slug"], "parent");
    let (status, _) = fixture.get("/api/docs/en-US/other").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
