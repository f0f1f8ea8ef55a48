// End-to-end forwarding scenarios.
//
// Each test feeds one stream line through the real post model, decision
// engine, and forwarder, with a recording publisher on the destination side
// and a temp-dir dedup store. Media downloads go to a mock HTTP server.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, FixedOffset};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mirrorbird::dedup::DedupStore;
use mirrorbird::forward::compose::{Composer, SPOILER_BANNER};
use mirrorbird::forward::decision::{Action, DecisionEngine, REPOST_TEXT_BUDGET};
use mirrorbird::forward::orchestrator::Forwarder;
use mirrorbird::publish::{IdentitySanitizer, PublishError, Published, Publisher, Sanitizer};
use mirrorbird::subscriptions::{Subscription, Subscriptions};
use mirrorbird::twitter::client::TwitterClient;
use mirrorbird::twitter::post::Post;
use mirrorbird::twitter::stream::StreamEvent;

// ============================================================
// Harness
// ============================================================

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Send { text: String, images: usize },
    Repost { text: String, target: String },
    Comment { text: String, target: String },
}

#[derive(Default)]
struct RecordingPublisher {
    calls: Mutex<Vec<Call>>,
    /// Reject this many calls as forbidden content before accepting.
    rejections: AtomicU32,
    /// Fail every call with a non-content error.
    broken: bool,
}

impl RecordingPublisher {
    fn rejecting(times: u32) -> Self {
        Self {
            rejections: AtomicU32::new(times),
            ..Self::default()
        }
    }

    fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self, call: Call) -> Result<(), PublishError> {
        self.calls.lock().unwrap().push(call);
        if self.broken {
            return Err(PublishError::Other(anyhow::anyhow!("destination is down")));
        }
        let pending = self.rejections.load(Ordering::SeqCst);
        if pending > 0 {
            self.rejections.store(pending - 1, Ordering::SeqCst);
            return Err(PublishError::RejectedContent {
                code: 4126050,
                message: "content contains forbidden words".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn send(&self, text: &str, media: &[PathBuf]) -> Result<Published, PublishError> {
        assert!(
            media.iter().all(|p| p.exists()),
            "images must exist while the send is in flight"
        );
        self.check(Call::Send {
            text: text.to_string(),
            images: media.len(),
        })?;
        let count = self.calls.lock().unwrap().len();
        Ok(Published {
            destination_post_id: format!("dest-{count}"),
        })
    }

    async fn repost(&self, text: &str, destination_post_id: &str) -> Result<(), PublishError> {
        self.check(Call::Repost {
            text: text.to_string(),
            target: destination_post_id.to_string(),
        })
    }

    async fn comment(&self, text: &str, destination_post_id: &str) -> Result<(), PublishError> {
        self.check(Call::Comment {
            text: text.to_string(),
            target: destination_post_id.to_string(),
        })
    }
}

struct Harness {
    forwarder: Forwarder,
    engine: DecisionEngine,
    dedup: Arc<DedupStore>,
    publisher: Arc<RecordingPublisher>,
    media_dir: PathBuf,
    _dir: tempfile::TempDir,
}

fn subscriptions() -> Arc<Subscriptions> {
    Arc::new(Subscriptions::new([
        Subscription {
            username: "revue_staff".to_string(),
            name: "少女歌剧官方".to_string(),
        },
        Subscription {
            username: "koyama_momoyo".to_string(),
            name: "小山百代".to_string(),
        },
    ]))
}

fn composer(subscriptions: &Arc<Subscriptions>) -> Composer {
    Composer::new(
        subscriptions.clone(),
        FixedOffset::east_opt(8 * 3600).unwrap(),
        "劇場版スタァライトネタバレ",
        "https://t.bilibili.com/",
    )
}

fn harness_with(publisher: RecordingPublisher, sanitizer: Arc<dyn Sanitizer>, api: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let subs = subscriptions();
    let dedup = Arc::new(DedupStore::new(
        dir.path().join("forwarded.json"),
        Duration::days(7),
    ));
    let publisher = Arc::new(publisher);
    let media_dir = dir.path().join("media");

    let forwarder = Forwarder::new(
        DecisionEngine::new(subs.clone(), dedup.clone(), composer(&subs)),
        dedup.clone(),
        publisher.clone(),
        sanitizer,
        TwitterClient::new(api, "token").unwrap(),
        media_dir.clone(),
    );
    Harness {
        forwarder,
        engine: DecisionEngine::new(subs.clone(), dedup.clone(), composer(&subs)),
        dedup,
        publisher,
        media_dir,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(
        RecordingPublisher::default(),
        Arc::new(IdentitySanitizer),
        "http://127.0.0.1:9",
    )
}

fn post(event: serde_json::Value) -> Post {
    let mut posts = StreamEvent::parse(event.to_string().as_bytes())
        .unwrap()
        .into_posts();
    posts.remove(0)
}

fn users() -> serde_json::Value {
    json!([
        {"id": "1", "username": "revue_staff", "name": "Revue Starlight"},
        {"id": "2", "username": "koyama_momoyo", "name": "Momoyo"},
        {"id": "3", "username": "fan_account", "name": "A Fan"}
    ])
}

/// `author` quotes (or replies to, or retweets) post 900 by `referenced_author`.
fn referencing(kind: &str, author: &str, referenced_author: &str, text: &str) -> Post {
    post(json!({
        "data": {
            "id": "901", "text": text, "author_id": author,
            "created_at": "2024-03-01T12:00:00.000Z",
            "referenced_tweets": [{"type": kind, "id": "900"}]
        },
        "includes": {
            "users": users(),
            "tweets": [{"id": "900", "text": "the original post", "author_id": referenced_author}]
        }
    }))
}

// ============================================================
// Scenario A: original post
// ============================================================

#[tokio::test]
async fn scenario_a_original_post_is_sent_and_recorded() {
    let h = harness();
    let p = post(json!({
        "data": {
            "id": "100", "text": "hi https://t.co/x", "author_id": "1",
            "created_at": "2024-03-01T12:00:00.000Z",
            "entities": {"urls": [{
                "start": 3, "end": 18, "url": "https://t.co/x",
                "expanded_url": "https://long.example/page"
            }]}
        },
        "includes": {"users": users()}
    }));
    assert_eq!(p.text(), "hi https://long.example/page");

    let decision = h.engine.decide(&p).await.unwrap();
    assert_eq!(decision.action, Action::Send { link_to: None });
    assert_eq!(
        decision.text,
        "少女歌剧官方于2024-03-01 20:00:00发推：\nhi https://long.example/page"
    );

    let action = h.forwarder.forward(p).await.unwrap();
    assert_eq!(action, Action::Send { link_to: None });
    assert_eq!(
        h.publisher.calls(),
        vec![Call::Send {
            text: decision.text,
            images: 0
        }]
    );
    assert_eq!(h.dedup.lookup("100").await.unwrap().as_deref(), Some("dest-1"));
}

// ============================================================
// Scenario B: quote of a mirrored post
// ============================================================

#[tokio::test]
async fn scenario_b_quote_of_mirrored_post_reposts() {
    let h = harness();
    h.dedup.record("900", "555").await.unwrap();
    let p = referencing("quoted", "2", "1", "so good");

    let action = h.forwarder.forward(p).await.unwrap();
    assert_eq!(
        action,
        Action::Repost {
            destination_post_id: "555".to_string()
        }
    );
    assert_eq!(
        h.publisher.calls(),
        vec![Call::Repost {
            text: "小山百代于2024-03-01 20:00:00转发了少女歌剧官方的推特：\nso good".to_string(),
            target: "555".to_string()
        }]
    );
    // Reposts return no destination id, so nothing new is recorded.
    assert_eq!(h.dedup.lookup("901").await.unwrap(), None);
}

#[tokio::test]
async fn long_repost_falls_back_to_send_with_link() {
    let h = harness();
    h.dedup.record("900", "555").await.unwrap();
    let long_text = "あ".repeat(REPOST_TEXT_BUDGET);
    let p = referencing("quoted", "2", "1", &long_text);

    let decision = h.engine.decide(&p).await.unwrap();
    assert_eq!(
        decision.action,
        Action::Send {
            link_to: Some("555".to_string())
        }
    );
    assert!(decision.text.ends_with("原推：\nhttps://t.bilibili.com/555"));

    h.forwarder.forward(p).await.unwrap();
    assert!(matches!(h.publisher.calls()[0], Call::Send { .. }));
    assert_eq!(h.dedup.lookup("901").await.unwrap().as_deref(), Some("dest-1"));
}

#[tokio::test]
async fn repost_exactly_at_budget_stays_a_repost() {
    let h = harness();
    h.dedup.record("900", "555").await.unwrap();
    // Header "小山百代于2024-03-01 20:00:00" plus "转发了少女歌剧官方的推特：\n".
    let fixed = "小山百代于2024-03-01 20:00:00转发了少女歌剧官方的推特：\n"
        .chars()
        .count();
    let p = referencing("quoted", "2", "1", &"x".repeat(REPOST_TEXT_BUDGET - fixed));

    let decision = h.engine.decide(&p).await.unwrap();
    assert_eq!(decision.text.chars().count(), REPOST_TEXT_BUDGET);
    assert!(matches!(decision.action, Action::Repost { .. }));
}

#[tokio::test]
async fn quote_of_subscribed_but_unmirrored_post_sends_standalone() {
    let h = harness();
    let p = referencing("quoted", "2", "1", "look");

    let decision = h.engine.decide(&p).await.unwrap();
    assert_eq!(decision.action, Action::Send { link_to: None });
    assert!(decision.text.ends_with("原推：\nthe original post"));
}

#[tokio::test]
async fn quote_of_unsubscribed_author_ignores_dedup() {
    let h = harness();
    h.dedup.record("900", "555").await.unwrap();
    let p = referencing("quoted", "1", "3", "a fan said this");

    let decision = h.engine.decide(&p).await.unwrap();
    assert_eq!(decision.action, Action::Send { link_to: None });
    assert!(decision.text.contains("转发了A Fan的推特"));
}

// ============================================================
// Scenario C: replies
// ============================================================

#[tokio::test]
async fn scenario_c_reply_to_unsubscribed_author_aborts() {
    let h = harness();
    let p = referencing("replied_to", "1", "3", "thanks!");

    let action = h.forwarder.forward(p).await.unwrap();
    assert_eq!(action, Action::Abort);
    assert!(h.publisher.calls().is_empty());
}

#[tokio::test]
async fn reply_to_unmirrored_subscribed_post_aborts() {
    let h = harness();
    let p = referencing("replied_to", "2", "1", "replying");
    assert_eq!(h.forwarder.forward(p).await.unwrap(), Action::Abort);
    assert!(h.publisher.calls().is_empty());
}

#[tokio::test]
async fn reply_to_mirrored_post_comments() {
    let h = harness();
    h.dedup.record("900", "555").await.unwrap();
    let p = referencing("replied_to", "1", "1", "and one more thing");

    h.forwarder.forward(p).await.unwrap();
    assert_eq!(
        h.publisher.calls(),
        vec![Call::Comment {
            text: "少女歌剧官方于2024-03-01 20:00:00回复：\nand one more thing".to_string(),
            target: "555".to_string()
        }]
    );
}

#[tokio::test]
async fn retweet_aborts() {
    let h = harness();
    h.dedup.record("900", "555").await.unwrap();
    let p = referencing("retweeted", "2", "1", "RT @revue_staff: the original post");
    assert_eq!(h.forwarder.forward(p).await.unwrap(), Action::Abort);
    assert!(h.publisher.calls().is_empty());
}

// ============================================================
// Spoilers, media, and failures
// ============================================================

#[tokio::test]
async fn spoiler_hashtag_adds_banner() {
    let h = harness();
    let p = post(json!({
        "data": {
            "id": "100", "text": "ネタバレ #劇場版スタァライトネタバレ", "author_id": "1",
            "entities": {"hashtags": [{"start": 5, "end": 19, "tag": "劇場版スタァライトネタバレ"}]}
        },
        "includes": {"users": users()}
    }));
    let decision = h.engine.decide(&p).await.unwrap();
    assert!(decision.text.starts_with(SPOILER_BANNER));
}

#[tokio::test]
async fn quote_with_media_of_mirrored_post_sends_photos_and_link() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/one.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    // The second photo was not in the stream's includes.
    Mock::given(method("GET"))
        .and(path("/2/tweets/901"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"id": "901", "text": "x"},
            "includes": {"media": [
                {"media_key": "3_2", "type": "photo", "url": format!("{}/media/two.png", server.uri())}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/two.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness_with(
        RecordingPublisher::default(),
        Arc::new(IdentitySanitizer),
        &server.uri(),
    );
    h.dedup.record("900", "555").await.unwrap();
    let p = post(json!({
        "data": {
            "id": "901", "text": "photos!", "author_id": "2",
            "referenced_tweets": [{"type": "quoted", "id": "900"}],
            "attachments": {"media_keys": ["3_1", "3_2", "7_3"]}
        },
        "includes": {
            "users": users(),
            "tweets": [{"id": "900", "text": "orig", "author_id": "1"}],
            "media": [
                {"media_key": "3_1", "type": "photo", "url": format!("{}/media/one.jpg", server.uri())},
                {"media_key": "7_3", "type": "video"}
            ]
        }
    }));

    let action = h.forwarder.forward(p).await.unwrap();
    assert_eq!(
        action,
        Action::Send {
            link_to: Some("555".to_string())
        }
    );
    match &h.publisher.calls()[0] {
        Call::Send { text, images } => {
            assert_eq!(*images, 2, "videos are not downloaded");
            assert!(text.ends_with("https://t.bilibili.com/555"));
        }
        other => panic!("expected a send, got {other:?}"),
    }
    assert_eq!(h.dedup.lookup("901").await.unwrap().as_deref(), Some("dest-1"));

    let leftover = std::fs::read_dir(&h.media_dir).unwrap().count();
    assert_eq!(leftover, 0, "downloads are removed after the forward");
}

struct Bleep;

impl Sanitizer for Bleep {
    fn sanitize(&self, text: &str) -> String {
        text.replace("forbidden", "f*******")
    }
}

#[tokio::test]
async fn rejected_content_is_retried_sanitized() {
    let h = harness_with(
        RecordingPublisher::rejecting(1),
        Arc::new(Bleep),
        "http://127.0.0.1:9",
    );
    let p = post(json!({
        "data": {"id": "100", "text": "a forbidden word", "author_id": "1"},
        "includes": {"users": users()}
    }));

    h.forwarder.forward(p).await.unwrap();
    let calls = h.publisher.calls();
    assert_eq!(calls.len(), 2);
    match (&calls[0], &calls[1]) {
        (Call::Send { text: first, .. }, Call::Send { text: second, .. }) => {
            assert!(first.ends_with("a forbidden word"));
            assert!(second.ends_with("a f******* word"));
        }
        other => panic!("expected two sends, got {other:?}"),
    }
    assert!(h.dedup.lookup("100").await.unwrap().is_some());
}

#[tokio::test]
async fn failed_publish_records_nothing_and_handle_survives() {
    let h = harness_with(
        RecordingPublisher::broken(),
        Arc::new(IdentitySanitizer),
        "http://127.0.0.1:9",
    );
    let p = post(json!({
        "data": {"id": "100", "text": "hello", "author_id": "1"},
        "includes": {"users": users()}
    }));

    assert!(h.forwarder.forward(p.clone()).await.is_err());
    // The stream callback swallows the same failure.
    h.forwarder.handle(p).await;

    assert_eq!(h.publisher.calls().len(), 2);
    assert_eq!(h.dedup.lookup("100").await.unwrap(), None);
}

#[tokio::test]
async fn failed_photo_download_skips_the_post() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let h = harness_with(
        RecordingPublisher::default(),
        Arc::new(IdentitySanitizer),
        &server.uri(),
    );
    let p = post(json!({
        "data": {"id": "100", "text": "pic", "author_id": "1",
                 "attachments": {"media_keys": ["3_1"]}},
        "includes": {
            "users": users(),
            "media": [{"media_key": "3_1", "type": "photo",
                       "url": format!("{}/media/missing.jpg", server.uri())}]
        }
    }));

    assert!(h.forwarder.forward(p).await.is_err());
    assert!(h.publisher.calls().is_empty());
    assert_eq!(h.dedup.lookup("100").await.unwrap(), None);
}
