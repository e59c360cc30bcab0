use bytes::Bytes;
use futures_util::{pin_mut, stream, StreamExt};
use mcq_pipeline::core::RawByteStream;
use mcq_pipeline::streaming::stream_lines;

fn sse_record(fragments: &[&str]) -> String {
    let parts: Vec<_> = fragments
        .iter()
        .map(|t| serde_json::json!({ "text": t }))
        .collect();
    let envelope = serde_json::json!({
        "candidates": [{ "content": { "parts": parts } }]
    });
    format!("data: {envelope}\n\n")
}

async fn collect_lines(chunks: Vec<Bytes>) -> Vec<String> {
    let byte_stream: RawByteStream = Box::pin(stream::iter(chunks.into_iter().map(Ok)));
    let lines = stream_lines(byte_stream);
    pin_mut!(lines);
    let mut out = Vec::new();
    while let Some(item) = lines.next().await {
        out.push(item.expect("stream line"));
    }
    out
}

#[tokio::test]
async fn reassembles_lines_from_fragments() {
    let body = format!(
        "{}{}",
        sse_record(&["first line\nsec"]),
        sse_record(&["ond line\n"])
    );
    let lines = collect_lines(vec![Bytes::from(body)]).await;
    assert_eq!(lines, vec!["first line", "second line"]);
}

#[tokio::test]
async fn line_sequence_is_invariant_under_chunk_splits() {
    // One record whose fragment contains a multi-byte character, so some
    // splits land mid-character and mid-JSON-record.
    let body = format!(
        "{}{}",
        sse_record(&["caf\u{e9} rules\n", "and a second"]),
        sse_record(&[" half\n"])
    );
    let expected = collect_lines(vec![Bytes::from(body.clone())]).await;
    assert_eq!(expected, vec!["caf\u{e9} rules", "and a second half"]);

    for chunk_size in [1usize, 2, 3, 7, 64] {
        let chunks: Vec<Bytes> = body
            .as_bytes()
            .chunks(chunk_size)
            .map(Bytes::copy_from_slice)
            .collect();
        let lines = collect_lines(chunks).await;
        assert_eq!(lines, expected, "chunk size {chunk_size}");
    }
}

#[tokio::test]
async fn malformed_records_are_skipped_as_noise() {
    let body = format!(
        "{}data: {{not json\n\n{}",
        sse_record(&["one\n"]),
        sse_record(&["two\n"])
    );
    let lines = collect_lines(vec![Bytes::from(body)]).await;
    assert_eq!(lines, vec!["one", "two"]);
}

#[tokio::test]
async fn non_data_lines_are_ignored() {
    let body = format!(
        "event: message\nretry: 500\n{}\n",
        sse_record(&["hello\n"])
    );
    let lines = collect_lines(vec![Bytes::from(body)]).await;
    assert_eq!(lines, vec!["hello"]);
}

#[tokio::test]
async fn trailing_partial_line_is_flushed_once() {
    let body = sse_record(&["complete\nunterminated tail"]);
    let lines = collect_lines(vec![Bytes::from(body)]).await;
    assert_eq!(lines, vec!["complete", "unterminated tail"]);
}

#[tokio::test]
async fn end_sentinel_stops_the_stream() {
    let body = format!("{}data: [DONE]\n\n{}", sse_record(&["kept\n"]), sse_record(&["dropped\n"]));
    let lines = collect_lines(vec![Bytes::from(body)]).await;
    assert_eq!(lines, vec!["kept"]);
}

#[tokio::test]
async fn empty_stream_yields_nothing() {
    let lines = collect_lines(vec![]).await;
    assert!(lines.is_empty());
}
