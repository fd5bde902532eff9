//! Integration tests for the subscription lifecycle (preview, subscribe,
//! rename, unsubscribe), the unified listing, and the periodic loop.

mod common;

use std::time::Duration;

use common::{personal_feed, rss, test_db, Canned, StaticFetcher, PRINCIPAL};
use feedsync::feed::{FetchSettings, Fetcher, Intermediary, RelayFetcher};
use feedsync::storage::{EntryQuery, FeedStore, Ownership};
use feedsync::sync::{
    CancelHandle, NewSubscription, SyncError, SyncErrorKind, SyncScope, Syncer,
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FEED_URL: &str = "https://news.example.com/rss";

fn subscription(url: &str) -> NewSubscription {
    NewSubscription {
        url: url.to_string(),
        name: String::new(),
        alias: None,
        scope: SyncScope::Personal,
    }
}

// ============================================================================
// Preview
// ============================================================================

#[tokio::test]
async fn test_preview_does_not_register_or_namespace() {
    let fetcher = StaticFetcher::new().with(
        FEED_URL,
        Canned::Document(rss(&[("a", "First"), ("b", "Second")])),
    );
    let syncer = Syncer::new(test_db().await, fetcher);

    let entries = syncer.preview(FEED_URL).await.unwrap();
    let ids: Vec<_> = entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(entries[0].feed_id, "");
    assert_eq!(entries[0].integration_name, "News");
    assert_eq!(entries[0].ownership, Ownership::User(PRINCIPAL.into()));

    let feeds = syncer
        .store()
        .feeds_in_scope(&Ownership::User(PRINCIPAL.into()))
        .await
        .unwrap();
    assert!(feeds.is_empty());
}

#[tokio::test]
async fn test_preview_rejects_private_urls() {
    let syncer = Syncer::new(test_db().await, StaticFetcher::new());
    let err = syncer.preview("http://192.168.0.10/rss").await.unwrap_err();
    assert_eq!(err.kind(), SyncErrorKind::InvalidUrl);
    assert_eq!(syncer.fetcher().calls(), 0);
}

// ============================================================================
// Subscribe
// ============================================================================

#[tokio::test]
async fn test_subscribe_registers_and_imports() {
    let fetcher = StaticFetcher::new().with(
        FEED_URL,
        Canned::Document(rss(&[("a", "First"), ("b", "Second")])),
    );
    let syncer = Syncer::new(test_db().await, fetcher);

    let subscribed = syncer
        .subscribe(NewSubscription {
            alias: Some("  daily ".into()),
            ..subscription(FEED_URL)
        })
        .await
        .unwrap();

    let feed = &subscribed.feed;
    assert_eq!(feed.url, FEED_URL);
    assert_eq!(feed.title, "News");
    assert_eq!(feed.integration_name, "News");
    assert_eq!(feed.integration_alias.as_deref(), Some("daily"));
    assert_eq!(feed.ownership, Ownership::User(PRINCIPAL.into()));
    assert!(feed.last_fetched.is_some());
    assert!(uuid::Uuid::parse_str(&feed.id).is_ok());

    assert_eq!(subscribed.report.new_entries.len(), 2);
    assert_eq!(
        subscribed.report.new_entries[0].id,
        format!("{}-a", feed.id)
    );
    assert_eq!(
        subscribed.report.new_entries[0].integration_alias.as_deref(),
        Some("daily")
    );

    // A later sync of the unchanged feed finds nothing new
    let report = syncer.sync_feed(&feed.id).await.unwrap();
    assert!(report.new_entries.is_empty());
}

#[tokio::test]
async fn test_subscribe_into_group_scope() {
    let fetcher = StaticFetcher::new().with(FEED_URL, Canned::Document(rss(&[("a", "First")])));
    let syncer = Syncer::new(test_db().await, fetcher);

    let subscribed = syncer
        .subscribe(NewSubscription {
            name: "Team news".into(),
            scope: SyncScope::Group("editors".into()),
            ..subscription(FEED_URL)
        })
        .await
        .unwrap();

    assert_eq!(subscribed.feed.integration_name, "Team news");
    assert_eq!(
        subscribed.feed.ownership,
        Ownership::Group("editors".into())
    );
    assert_eq!(
        subscribed.report.new_entries[0].ownership,
        Ownership::Group("editors".into())
    );
}

#[tokio::test]
async fn test_subscribe_invalid_url_registers_nothing() {
    let syncer = Syncer::new(test_db().await, StaticFetcher::new());

    for url in ["not a url", "ftp://news.example.com/rss", "http://localhost/rss"] {
        let err = syncer.subscribe(subscription(url)).await.unwrap_err();
        assert_eq!(err.kind(), SyncErrorKind::InvalidUrl, "{url}");
    }
    assert_eq!(syncer.fetcher().calls(), 0);
}

#[tokio::test]
async fn test_subscribe_unreachable_feed_registers_nothing() {
    let fetcher = StaticFetcher::new().with(FEED_URL, Canned::Status(503));
    let syncer = Syncer::new(test_db().await, fetcher);

    let err = syncer.subscribe(subscription(FEED_URL)).await.unwrap_err();
    assert_eq!(err.kind(), SyncErrorKind::Network);

    let feeds = syncer
        .store()
        .feeds_in_scope(&Ownership::User(PRINCIPAL.into()))
        .await
        .unwrap();
    assert!(feeds.is_empty());
}

// ============================================================================
// Rename / Unsubscribe
// ============================================================================

#[tokio::test]
async fn test_rename_updates_feed_and_unknown_is_not_found() {
    let db = test_db().await;
    db.insert_feed(&personal_feed("f1", FEED_URL)).await.unwrap();
    let syncer = Syncer::new(db, StaticFetcher::new());

    syncer.rename("f1", " Renamed ", Some("")).await.unwrap();
    let feed = syncer.store().feed("f1").await.unwrap();
    assert_eq!(feed.integration_name, "Renamed");
    assert_eq!(feed.integration_alias, None);

    let err = syncer.rename("missing", "x", None).await.unwrap_err();
    assert_eq!(err.kind(), SyncErrorKind::NotFound);
}

#[tokio::test]
async fn test_unsubscribe_cascades_to_entries() {
    let fetcher = StaticFetcher::new().with(
        FEED_URL,
        Canned::Document(rss(&[("a", "First"), ("b", "Second")])),
    );
    let syncer = Syncer::new(test_db().await, fetcher);
    let subscribed = syncer.subscribe(subscription(FEED_URL)).await.unwrap();
    let feed_id = subscribed.feed.id;

    let removed = syncer.unsubscribe(&feed_id).await.unwrap();
    assert_eq!(removed, 2);

    assert!(syncer.store().entry_ids(&feed_id).await.unwrap().is_empty());
    let page = syncer
        .store()
        .entries(&EntryQuery::new(Ownership::User(PRINCIPAL.into())))
        .await
        .unwrap();
    assert_eq!(page.total, 0);

    let err = syncer.unsubscribe(&feed_id).await.unwrap_err();
    assert_eq!(err.kind(), SyncErrorKind::NotFound);
    let err = syncer.sync_feed(&feed_id).await.unwrap_err();
    assert_eq!(err.kind(), SyncErrorKind::NotFound);
}

// ============================================================================
// Unified listing
// ============================================================================

#[tokio::test]
async fn test_listing_merges_feeds_and_filters() {
    let db = test_db().await;
    db.insert_feed(&personal_feed("f1", FEED_URL)).await.unwrap();
    db.insert_feed(&personal_feed("f2", "https://other.example.com/rss"))
        .await
        .unwrap();
    let fetcher = StaticFetcher::new()
        .with(
            FEED_URL,
            Canned::Document(rss(&[("a", "Rust release"), ("b", "Weather")])),
        )
        .with(
            "https://other.example.com/rss",
            Canned::Document(rss(&[("c", "rust tips")])),
        );
    let syncer = Syncer::new(db, fetcher);
    syncer.sync_all(SyncScope::Personal).await.unwrap();

    let owner = Ownership::User(PRINCIPAL.into());
    let all = syncer
        .store()
        .entries(&EntryQuery::new(owner.clone()))
        .await
        .unwrap();
    assert_eq!(all.total, 3);

    let only_f2 = syncer
        .store()
        .entries(&EntryQuery {
            feed_id: Some("f2".into()),
            ..EntryQuery::new(owner.clone())
        })
        .await
        .unwrap();
    assert_eq!(only_f2.total, 1);
    assert_eq!(only_f2.entries[0].id, "f2-c");

    let rust = syncer
        .store()
        .entries(&EntryQuery {
            search: Some("Rust".into()),
            limit: 1,
            ..EntryQuery::new(owner.clone())
        })
        .await
        .unwrap();
    assert_eq!(rust.total, 2);
    assert_eq!(rust.entries.len(), 1);

    let other_user = syncer
        .store()
        .entries(&EntryQuery::new(Ownership::User("bob".into())))
        .await
        .unwrap();
    assert_eq!(other_user.total, 0);
}

// ============================================================================
// Periodic loop
// ============================================================================

#[tokio::test]
async fn test_periodic_loop_runs_until_cancelled() {
    let db = test_db().await;
    db.insert_feed(&personal_feed("f1", FEED_URL)).await.unwrap();
    let fetcher = StaticFetcher::new().with(FEED_URL, Canned::Document(rss(&[("a", "First")])));
    let syncer = Syncer::new(db, fetcher);

    let (handle, token) = CancelHandle::new();
    let (batches, ()) = tokio::join!(
        syncer.run_periodic(SyncScope::Personal, Duration::from_millis(20), token),
        async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            handle.cancel();
        }
    );

    assert!(batches >= 2, "expected several batches, got {batches}");
    assert_eq!(syncer.fetcher().calls() as u64, batches);
    assert_eq!(syncer.store().entry_ids("f1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_periodic_loop_cancelled_before_start_runs_nothing() {
    let syncer = Syncer::new(test_db().await, StaticFetcher::new());
    let (handle, token) = CancelHandle::new();
    handle.cancel();

    let batches = syncer
        .run_periodic(SyncScope::Personal, Duration::from_millis(10), token)
        .await;
    assert_eq!(batches, 0);
}

// ============================================================================
// Relayed fetching end to end
// ============================================================================

#[tokio::test]
async fn test_sync_through_relay_envelope() {
    let server = MockServer::start().await;
    let origin = "https://blocked.example.com/rss";

    Mock::given(path("/first"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(path("/wrapped"))
        .and(query_param("url", origin))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "contents": rss(&[("a", "Via relay")]),
        })))
        .mount(&server)
        .await;

    let relays = vec![
        Intermediary {
            name: "first".into(),
            url_prefix: format!("{}/first?url=", server.uri()),
            envelope: None,
        },
        Intermediary {
            name: "wrapped".into(),
            url_prefix: format!("{}/wrapped?url=", server.uri()),
            envelope: Some("contents".into()),
        },
    ];
    let settings = FetchSettings {
        timeout: Duration::from_secs(2),
        backoff: Duration::from_millis(10),
        ..FetchSettings::default()
    };
    let fetcher = Fetcher::Relay(RelayFetcher::new(reqwest::Client::new(), settings, relays));

    let db = test_db().await;
    db.insert_feed(&personal_feed("f1", origin)).await.unwrap();
    let syncer = Syncer::new(db, fetcher);

    let report = syncer.sync_feed("f1").await.unwrap();
    assert_eq!(report.new_entries.len(), 1);
    assert_eq!(report.new_entries[0].title, "Via relay");
}

#[tokio::test]
async fn test_sync_fails_when_every_route_fails() {
    let server = MockServer::start().await;
    let origin = format!("{}/feed.xml", server.uri());

    Mock::given(path("/relay-a"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/relay-b"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let relays = ["relay-a", "relay-b"]
        .into_iter()
        .map(|name| Intermediary {
            name: name.into(),
            url_prefix: format!("{}/{name}?url=", server.uri()),
            envelope: None,
        })
        .collect();
    let settings = FetchSettings {
        timeout: Duration::from_secs(2),
        backoff: Duration::from_millis(10),
        ..FetchSettings::default()
    };
    let fetcher = Fetcher::Relay(RelayFetcher::new(reqwest::Client::new(), settings, relays));

    let db = test_db().await;
    db.insert_feed(&personal_feed("f1", &origin)).await.unwrap();
    let syncer = Syncer::new(db, fetcher);

    let err = syncer.sync_feed("f1").await.unwrap_err();
    assert_eq!(err.kind(), SyncErrorKind::AllRoutesFailed);
    match &err {
        SyncError::AllRoutesFailed { url, failures } => {
            assert_eq!(url, &origin);
            let routes: Vec<_> = failures.iter().map(|f| f.route.as_str()).collect();
            assert_eq!(routes, vec!["relay-a", "relay-b", "direct"]);
        }
        other => panic!("Expected AllRoutesFailed, got {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("503") && message.contains("502") && message.contains("404"));

    let feed = syncer.store().feed("f1").await.unwrap();
    assert_eq!(feed.last_fetched, None);
    assert!(syncer.store().entry_ids("f1").await.unwrap().is_empty());
}
