//! End-to-end tests: the engine over the REST client against a mock server.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lifefeed::engine::{DeleteOutcome, EditOutcome, FetchOutcome, PinOutcome};
use lifefeed::model::{FeedContext, ItemId, ItemType};
use lifefeed::source::HttpSource;
use lifefeed::FeedEngine;

fn feed_item(id: &str, source_id: &str, item_type: &str, title: &str, pinned: bool) -> serde_json::Value {
    json!({
        "id": id,
        "type": item_type,
        "source_id": source_id,
        "title": title,
        "created_at": "2024-01-01T10:00:00Z",
        "updated_at": "2024-01-01T10:00:00Z",
        "pinned": pinned,
        "feed_context": "main",
        "extra_fields": {}
    })
}

async fn mount_feed(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/feed"))
        .and(query_param("context", "main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                feed_item("f-1", "w-1", "weight", "Morning weigh-in", false),
                feed_item("f-2", "n-1", "notes", "Groceries", false),
            ],
            "nextCursor": null
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed/pinned"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

async fn loaded_engine(server: &MockServer) -> FeedEngine {
    let source = HttpSource::new(reqwest::Client::new(), &server.uri())
        .unwrap()
        .with_retry_delay(Duration::from_millis(1))
        .with_max_retries(1);
    let engine = FeedEngine::from_source(Arc::new(source)).build();
    engine.open_feed(&FeedContext::main()).unwrap();
    engine.load_pinned(&FeedContext::main()).await.unwrap();
    let outcome = engine.fetch_next_page(&FeedContext::main()).await.unwrap();
    assert_eq!(
        outcome,
        FetchOutcome::Appended {
            added: 2,
            has_next_page: false
        }
    );
    engine
}

fn titles(engine: &FeedEngine) -> Vec<String> {
    engine
        .unpinned_feed(&FeedContext::main())
        .into_iter()
        .map(|item| item.title)
        .collect()
}

#[tokio::test]
async fn test_pin_round_trip() {
    let server = MockServer::start().await;
    mount_feed(&server).await;
    Mock::given(method("POST"))
        .and(path("/feed/pin"))
        .and(body_partial_json(json!({ "id": "f-2", "type": "notes" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(feed_item("f-2", "n-1", "notes", "Groceries", true)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = loaded_engine(&server).await;
    let outcome = engine
        .toggle_pin(&ItemId::from("f-2"), ItemType::Notes, &FeedContext::main())
        .await
        .unwrap();
    assert_eq!(outcome, PinOutcome::Confirmed { pinned: true });
    assert_eq!(engine.pinned_feed(&FeedContext::main()).len(), 1);
    assert_eq!(titles(&engine), vec!["Morning weigh-in"]);
}

#[tokio::test]
async fn test_server_error_on_delete_restores_item() {
    let server = MockServer::start().await;
    mount_feed(&server).await;
    Mock::given(method("DELETE"))
        .and(path("/weight/w-1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let engine = loaded_engine(&server).await;
    let err = engine.delete_item("w-1", ItemType::Weight).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(titles(&engine), vec!["Morning weigh-in", "Groceries"]);
}

#[tokio::test]
async fn test_gone_record_on_delete_counts_as_deleted() {
    let server = MockServer::start().await;
    mount_feed(&server).await;
    Mock::given(method("DELETE"))
        .and(path("/weight/w-1"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let engine = loaded_engine(&server).await;
    let outcome = engine.delete_item("w-1", ItemType::Weight).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::AlreadyGone);
    assert_eq!(titles(&engine), vec!["Groceries"]);
}

#[tokio::test]
async fn test_edit_sends_source_id_and_conflict_is_superseded() {
    let server = MockServer::start().await;
    mount_feed(&server).await;
    Mock::given(method("PUT"))
        .and(path("/notes"))
        .and(body_partial_json(json!({ "source_id": "n-1", "title": "Shopping" })))
        .respond_with(ResponseTemplate::new(409))
        .expect(1)
        .mount(&server)
        .await;

    let engine = loaded_engine(&server).await;
    let outcome = engine
        .edit_and_save(
            &ItemId::from("f-2"),
            &FeedContext::main(),
            json!({ "title": "Shopping" }),
        )
        .await
        .unwrap();
    assert_eq!(outcome, EditOutcome::Superseded);
    assert_eq!(titles(&engine), vec!["Morning weigh-in", "Groceries"]);
}

#[tokio::test]
async fn test_saved_edit_moves_to_top() {
    let server = MockServer::start().await;
    mount_feed(&server).await;
    Mock::given(method("PUT"))
        .and(path("/notes"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(feed_item("f-2", "n-1", "notes", "Shopping", false)),
        )
        .mount(&server)
        .await;

    let engine = loaded_engine(&server).await;
    engine
        .edit_and_save(
            &ItemId::from("f-2"),
            &FeedContext::main(),
            json!({ "title": "Shopping" }),
        )
        .await
        .unwrap();
    assert_eq!(titles(&engine), vec!["Shopping", "Morning weigh-in"]);
}

#[tokio::test]
async fn test_detail_hydrated_from_type_endpoint() {
    let server = MockServer::start().await;
    mount_feed(&server).await;
    Mock::given(method("GET"))
        .and(path("/weight/w-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "weight",
            "source_id": "w-1",
            "updated_at": "2024-01-01T10:00:00Z",
            "body": { "kg": 72.4 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = loaded_engine(&server).await;
    let record = engine
        .get_full_session(ItemType::Weight, "w-1")
        .await
        .unwrap();
    assert_eq!(record.body["kg"], 72.4);
    engine
        .get_full_session(ItemType::Weight, "w-1")
        .await
        .unwrap();
}
