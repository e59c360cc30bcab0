use bytes::Bytes;
use chrono::Duration;
use futures_util::StreamExt;
use mcq_pipeline::clients::MockClient;
use mcq_pipeline::config::Limits;
use mcq_pipeline::orchestrate::{Frame, GenerateRequest, Orchestrator, StaticIdentity};
use mcq_pipeline::quota::{InMemoryUsageStore, Tier, UsageStore};
use std::sync::Arc;

const TOKEN: &str = "valid-token";
const USER: &str = "user-1";

/// One vendor stream record carrying the given text fragment.
fn sse_chunk(text: &str) -> Bytes {
    let envelope = serde_json::json!({
        "candidates": [{ "content": { "parts": [{ "text": text }] } }]
    });
    Bytes::from(format!("data: {envelope}\n\n"))
}

fn three_valid_one_malformed() -> Vec<Bytes> {
    vec![sse_chunk(concat!(
        r#"{"q":"What does photosynthesis convert?","o":["Light to chemical energy","Heat","Sound","Mass"],"a":0}"#,
        "\n",
        "{malformed line\n",
        r#"{"q":"Where does it occur?","o":["Mitochondria","Chloroplasts","Nucleus","Vacuole"],"a":1}"#,
        "\n",
        r#"{"q":"What pigment is involved?","o":["Hemoglobin","Keratin","Chlorophyll","Melanin"],"a":2}"#,
        "\n",
    ))]
}

fn text_request(content: &str, target_count: Option<u32>) -> GenerateRequest {
    GenerateRequest {
        text_content: Some(content.to_string()),
        target_count,
        ..GenerateRequest::default()
    }
}

struct Fixture {
    orchestrator: Orchestrator,
    client: MockClient,
    store: Arc<InMemoryUsageStore>,
}

fn fixture(client: MockClient, limits: Limits, dev_mode: bool) -> Fixture {
    let store = Arc::new(InMemoryUsageStore::new());
    let identity = Arc::new(StaticIdentity::new().with_token(TOKEN, USER));
    let orchestrator = Orchestrator::new(
        Arc::new(client.clone()),
        identity,
        store.clone(),
        limits,
        dev_mode,
    );
    Fixture {
        orchestrator,
        client,
        store,
    }
}

async fn run(fx: &Fixture, bearer: &str, request: GenerateRequest) -> Vec<Frame> {
    fx.orchestrator.generate(bearer, request).collect().await
}

fn mcq_frames(frames: &[Frame]) -> usize {
    frames.iter().filter(|f| matches!(f, Frame::Mcq { .. })).count()
}

#[tokio::test]
async fn cold_cache_cloud_path_streams_three_records() {
    let fx = fixture(
        MockClient::streaming(three_valid_one_malformed()),
        Limits::default(),
        false,
    );
    let material = "Photosynthesis converts light energy into chemical energy...";
    let frames = run(&fx, TOKEN, text_request(material, Some(3))).await;

    assert_eq!(frames[0], Frame::Meta { total: 3, cached: false });
    assert_eq!(mcq_frames(&frames), 3);
    assert_eq!(*frames.last().unwrap(), Frame::Done { count: 3 });
    assert_eq!(fx.client.stream_calls(), 1);
    assert_eq!(fx.store.read_usage(USER).await.unwrap().uploads_today, 1);
}

#[tokio::test]
async fn warm_cache_serves_identical_set_without_charging() {
    let fx = fixture(
        MockClient::streaming(three_valid_one_malformed()),
        Limits::default(),
        false,
    );
    let material = "Photosynthesis converts light energy into chemical energy...";

    let first = run(&fx, TOKEN, text_request(material, Some(3))).await;
    let second = run(&fx, TOKEN, text_request(material, Some(3))).await;

    assert_eq!(second[0], Frame::Meta { total: 3, cached: true });
    let first_mcqs: Vec<_> = first.iter().filter(|f| matches!(f, Frame::Mcq { .. })).collect();
    let second_mcqs: Vec<_> = second.iter().filter(|f| matches!(f, Frame::Mcq { .. })).collect();
    assert_eq!(first_mcqs, second_mcqs);

    // Cache hits are free: one transport call, one increment.
    assert_eq!(fx.client.stream_calls(), 1);
    assert_eq!(fx.store.read_usage(USER).await.unwrap().uploads_today, 1);
}

#[tokio::test]
async fn expired_cache_entry_regenerates() {
    let limits = Limits {
        cache_ttl: Duration::zero(),
        ..Limits::default()
    };
    let fx = fixture(MockClient::streaming(three_valid_one_malformed()), limits, false);
    let material = "Photosynthesis converts light energy into chemical energy...";

    run(&fx, TOKEN, text_request(material, Some(3))).await;
    let second = run(&fx, TOKEN, text_request(material, Some(3))).await;

    assert_eq!(second[0], Frame::Meta { total: 3, cached: false });
    assert_eq!(fx.client.stream_calls(), 2);
}

#[tokio::test]
async fn daily_quota_exhausted_never_touches_transport() {
    let fx = fixture(
        MockClient::streaming(three_valid_one_malformed()),
        Limits::default(),
        false,
    );
    fx.store
        .set_uploads_today(USER, Limits::default().base_daily_limit);

    let frames = run(&fx, TOKEN, text_request("material", Some(3))).await;
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        Frame::Error { message } => assert!(message.contains("daily"), "{message}"),
        other => panic!("expected error frame, got {other:?}"),
    }
    assert_eq!(fx.client.total_calls(), 0);
}

#[tokio::test]
async fn global_quota_exhausted_rejects_before_auth() {
    let limits = Limits {
        global_ceiling: 0,
        ..Limits::default()
    };
    let fx = fixture(MockClient::streaming(three_valid_one_malformed()), limits, false);

    let frames = run(&fx, "wrong-token", text_request("material", Some(3))).await;
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        Frame::Error { message } => assert!(message.contains("monthly"), "{message}"),
        other => panic!("expected error frame, got {other:?}"),
    }
    assert_eq!(fx.client.total_calls(), 0);
}

#[tokio::test]
async fn invalid_credential_is_rejected_before_quota_charge() {
    let fx = fixture(
        MockClient::streaming(three_valid_one_malformed()),
        Limits::default(),
        false,
    );
    let frames = run(&fx, "wrong-token", text_request("material", Some(3))).await;
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        Frame::Error { message } => assert!(message.contains("sign in"), "{message}"),
        other => panic!("expected error frame, got {other:?}"),
    }
    assert_eq!(fx.client.total_calls(), 0);
    assert_eq!(fx.orchestrator.quota().global().count(), 0);
}

#[tokio::test]
async fn missing_content_and_missing_mime_are_distinct_rejections() {
    let fx = fixture(MockClient::default(), Limits::default(), false);

    let frames = run(&fx, TOKEN, GenerateRequest::default()).await;
    match &frames[0] {
        Frame::Error { message } => assert!(message.contains("text content or file data"), "{message}"),
        other => panic!("expected error frame, got {other:?}"),
    }

    let file_without_mime = GenerateRequest {
        file_data: Some("aGVsbG8=".to_string()),
        ..GenerateRequest::default()
    };
    let frames = run(&fx, TOKEN, file_without_mime).await;
    match &frames[0] {
        Frame::Error { message } => assert!(message.contains("mime type"), "{message}"),
        other => panic!("expected error frame, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_generation_is_an_error_and_writes_no_cache() {
    let fx = fixture(
        MockClient::streaming(vec![sse_chunk("{nope\nstill not json\n")]),
        Limits::default(),
        false,
    );
    let frames = run(&fx, TOKEN, text_request("material", Some(3))).await;

    assert_eq!(frames[0], Frame::Meta { total: 3, cached: false });
    assert_eq!(mcq_frames(&frames), 0);
    match frames.last().unwrap() {
        Frame::Error { message } => assert!(message.starts_with("No MCQs generated"), "{message}"),
        other => panic!("expected error frame, got {other:?}"),
    }
    assert!(fx.orchestrator.cache().is_empty());
    // The pre-generation charge is deliberately not refunded.
    assert_eq!(fx.store.read_usage(USER).await.unwrap().uploads_today, 1);
}

#[tokio::test]
async fn transport_failure_maps_to_generic_message_in_production() {
    let fx = fixture(MockClient::unavailable(500, "boom"), Limits::default(), false);
    let frames = run(&fx, TOKEN, text_request("material", Some(3))).await;
    match frames.last().unwrap() {
        Frame::Error { message } => {
            assert!(message.contains("unavailable"), "{message}");
            assert!(!message.contains("boom"), "{message}");
        }
        other => panic!("expected error frame, got {other:?}"),
    }
    assert!(fx.orchestrator.cache().is_empty());
}

#[tokio::test]
async fn transport_failure_includes_detail_in_dev_mode() {
    let fx = fixture(MockClient::unavailable(500, "boom"), Limits::default(), true);
    let frames = run(&fx, TOKEN, text_request("material", Some(3))).await;
    match frames.last().unwrap() {
        Frame::Error { message } => assert!(message.contains("boom"), "{message}"),
        other => panic!("expected error frame, got {other:?}"),
    }
}

#[tokio::test]
async fn early_stop_at_requested_count() {
    let fx = fixture(
        MockClient::streaming(three_valid_one_malformed()),
        Limits::default(),
        false,
    );
    let frames = run(&fx, TOKEN, text_request("material", Some(1))).await;
    assert_eq!(frames[0], Frame::Meta { total: 1, cached: false });
    assert_eq!(mcq_frames(&frames), 1);
    assert_eq!(*frames.last().unwrap(), Frame::Done { count: 1 });
}

#[tokio::test]
async fn target_count_is_clamped_and_defaulted() {
    let limits = Limits::default();
    for (requested, resolved) in [
        (Some(0), 1usize),
        (Some(1), 1),
        (Some(40), 40),
        (Some(41), 40),
        (None, limits.default_count as usize),
    ] {
        let fx = fixture(
            MockClient::streaming(three_valid_one_malformed()),
            limits,
            false,
        );
        let frames = run(&fx, TOKEN, text_request("material", requested)).await;
        assert_eq!(
            frames[0],
            Frame::Meta { total: resolved, cached: false },
            "requested {requested:?}"
        );
    }
}

#[tokio::test]
async fn fewer_records_than_requested_is_success_not_error() {
    let fx = fixture(
        MockClient::streaming(three_valid_one_malformed()),
        Limits::default(),
        false,
    );
    let frames = run(&fx, TOKEN, text_request("material", Some(10))).await;
    assert_eq!(frames[0], Frame::Meta { total: 10, cached: false });
    assert_eq!(mcq_frames(&frames), 3);
    assert_eq!(*frames.last().unwrap(), Frame::Done { count: 3 });
}

#[tokio::test]
async fn non_streaming_backend_falls_back_to_labeled_blocks() {
    let raw = "\
Q1: What gas do plants absorb?
A: Oxygen
B: Carbon dioxide
C: Nitrogen
D: Helium
Answer: B
";
    let fx = fixture(MockClient::blocking(raw), Limits::default(), false);
    let frames = run(&fx, TOKEN, text_request("material", Some(5))).await;

    assert_eq!(fx.client.ask_calls(), 1);
    assert_eq!(mcq_frames(&frames), 1);
    assert_eq!(*frames.last().unwrap(), Frame::Done { count: 1 });
}

#[tokio::test]
async fn elevated_tier_hits_rolling_window_after_charges() {
    let limits = Limits {
        window_hourly_ceiling: 1,
        ..Limits::default()
    };
    let fx = fixture(MockClient::streaming(three_valid_one_malformed()), limits, false);
    fx.store.set_tier(USER, Tier::Elevated);

    // Distinct material so the second request is not a free cache hit.
    run(&fx, TOKEN, text_request("material one", Some(3))).await;
    let frames = run(&fx, TOKEN, text_request("material two", Some(3))).await;

    match &frames[0] {
        Frame::Error { message } => assert!(message.contains("hourly"), "{message}"),
        other => panic!("expected error frame, got {other:?}"),
    }
    assert_eq!(fx.client.stream_calls(), 1);
}

#[tokio::test]
async fn concurrent_identical_requests_share_one_generation() {
    let fx = fixture(
        MockClient::streaming(three_valid_one_malformed()),
        Limits::default(),
        false,
    );
    let request = || text_request("material", Some(3));
    let (first, second) = tokio::join!(
        run(&fx, TOKEN, request()),
        run(&fx, TOKEN, request()),
    );

    // One side generates, the other waits on the fingerprint guard and is
    // then served from cache. Exactly one model call either way.
    assert_eq!(fx.client.stream_calls(), 1);
    let cached: Vec<bool> = [&first, &second]
        .iter()
        .map(|frames| match &frames[0] {
            Frame::Meta { cached, .. } => *cached,
            other => panic!("expected meta frame, got {other:?}"),
        })
        .collect();
    assert_eq!(cached.iter().filter(|&&c| c).count(), 1, "{cached:?}");

    assert_eq!(mcq_frames(&first), 3);
    assert_eq!(mcq_frames(&second), 3);
    // The coalesced request is a cache hit and is not charged.
    assert_eq!(fx.store.read_usage(USER).await.unwrap().uploads_today, 1);
}

#[tokio::test]
async fn abandoned_stream_releases_cleanly() {
    let fx = fixture(
        MockClient::streaming(three_valid_one_malformed()),
        Limits::default(),
        false,
    );
    let mut frames = fx.orchestrator.generate(TOKEN, text_request("material", Some(3)));
    // Consume only the meta frame, then walk away.
    let first = frames.next().await;
    assert!(matches!(first, Some(Frame::Meta { .. })));
    drop(frames);

    // A later identical request must not deadlock on the single-flight
    // guard the abandoned stream held.
    let replay = run(&fx, TOKEN, text_request("material", Some(3))).await;
    assert!(matches!(replay.last().unwrap(), Frame::Done { .. }));
}
