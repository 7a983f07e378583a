//! End-to-end fetches through the reqwest transport against a mock upstream.

use std::time::Duration;

use listing_scraper::{ListingScraper, ListingTarget, ScraperError, UserActivity};
use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn scraper(server: &MockServer) -> ListingScraper {
    ListingScraper::builder()
        .with_api_base(server.uri())
        .with_user_agent("listing-scraper-tests/1.0")
        .with_request_delay(Duration::ZERO)
        .with_backoff_unit(Duration::from_millis(10))
        .build()
        .unwrap()
}

fn page(prefix: &str, count: usize, after: Option<&str>) -> Value {
    let children: Vec<Value> = (0..count)
        .map(|n| json!({"kind": "t3", "data": {"id": format!("{prefix}{n}"), "title": "post", "score": n}}))
        .collect();
    json!({"kind": "Listing", "data": {"children": children, "after": after}})
}

#[tokio::test]
async fn comment_thread_round_trip() {
    let server = MockServer::start().await;
    let body = json!([
        {"kind": "Listing", "data": {"children": [
            {"kind": "t3", "data": {"id": "abc123", "title": "A post", "author": "op", "is_self": true}}
        ], "after": null}},
        {"kind": "Listing", "data": {"children": [
            {"kind": "t1", "data": {
                "id": "c1", "author": "alice", "body": "top level", "score": 5,
                "parent_id": "t3_abc123",
                "replies": {"kind": "Listing", "data": {"children": [
                    {"kind": "t1", "data": {
                        "id": "c2", "author": "bob", "body": "nested", "score": 2,
                        "parent_id": "t1_c1", "replies": ""
                    }}
                ], "after": null}}
            }}
        ], "after": null}}
    ]);

    Mock::given(method("GET"))
        .and(path("/r/rust/comments/abc123.json"))
        .and(query_param("sort", "best"))
        .and(query_param("raw_json", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let thread = scraper(&server)
        .fetch_comments("rust", "abc123", "best")
        .await
        .unwrap();

    assert_eq!(thread.post.as_ref().and_then(|p| p.title.as_deref()), Some("A post"));
    assert_eq!(thread.comments.len(), 1);
    assert_eq!(thread.comments[0].replies.len(), 1);
    assert_eq!(thread.comments[0].replies[0].author.as_deref(), Some("bob"));
    assert_eq!(thread.comments[0].replies[0].depth, 1);
}

#[tokio::test]
async fn pagination_follows_cursor_with_exact_limits() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/r/rust/new.json"))
        .and(query_param("limit", "100"))
        .and(query_param("after", "t3_page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page("b", 100, Some("t3_page3"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/rust/new.json"))
        .and(query_param("limit", "30"))
        .and(query_param("after", "t3_page3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page("c", 30, Some("t3_page4"))))
        .expect(1)
        .mount(&server)
        .await;
    // Lowest priority: matches the first request, which carries no cursor.
    Mock::given(method("GET"))
        .and(path("/r/rust/new.json"))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page("a", 100, Some("t3_page2"))))
        .with_priority(10)
        .expect(1)
        .mount(&server)
        .await;

    let target = ListingTarget::subreddit("r/Rust", "new").unwrap();
    let items = scraper(&server).fetch_listing(target, 230).await.unwrap();

    assert_eq!(items.len(), 230);
    assert_eq!(items[0].id(), Some("a0"));
    assert_eq!(items[229].id(), Some("c29"));
}

#[tokio::test]
async fn rate_limit_is_retried_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user/someone/comments.json"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/someone/comments.json"))
        .and(query_param("sort", "new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "Listing",
            "data": {"after": null, "children": [
                {"kind": "t1", "data": {"id": "c9", "body": "hi", "author": "someone"}},
                {"kind": "t3", "data": {"id": "p9"}}
            ]}
        })))
        .mount(&server)
        .await;

    let scraper = scraper(&server);
    let target = ListingTarget::user("u/someone", UserActivity::Comments, "new").unwrap();
    let items = scraper.fetch_listing(target, 25).await.unwrap();

    assert_eq!(items.len(), 1);
    assert!(items[0].as_comment().is_some());
    let metrics = scraper.metrics();
    assert_eq!(metrics.rate_limited, 1);
    assert_eq!(metrics.retries, 1);
}

#[tokio::test]
async fn server_errors_are_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r/rust/hot.json"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let target = ListingTarget::subreddit("rust", "hot").unwrap();
    let err = scraper(&server).fetch_listing(target, 10).await.unwrap_err();
    assert!(matches!(err, ScraperError::PermanentHttp { status: 503 }));
}
