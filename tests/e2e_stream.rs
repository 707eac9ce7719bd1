//! End-to-end stream session tests.
//!
//! These tests run sessions through the channel sink the gateway uses and
//! read the client side the way an HTTP body would.

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use deltagate::stream::{
    ChannelSink, LifecycleState, StreamSession, DONE_FRAME, TERMINAL_WRITE_TIMEOUT,
};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

fn chunk(content: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({"choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]})
    )
}

async fn drain(mut rx: mpsc::Receiver<Bytes>) -> String {
    let mut out = Vec::new();
    while let Some(frame) = rx.recv().await {
        out.extend_from_slice(&frame);
    }
    String::from_utf8(out).unwrap()
}

fn contents(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|f| f.strip_prefix("data: "))
        .filter_map(|p| serde_json::from_str::<Value>(p).ok())
        .filter_map(|v| {
            v.pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
                .map(String::from)
        })
        .collect()
}

/// Test byte chunking that splits lines and characters does not matter
#[tokio::test]
async fn test_arbitrary_chunking_same_output() {
    let stream = format!("{}{}{}data: [DONE]\n\n", chunk("Grüß"), chunk("Grüß dich"), chunk("Grüß dich!"));
    let bytes = stream.into_bytes();

    let mut outputs = Vec::new();
    for size in [1usize, 3, 7, 64, bytes.len()] {
        let pieces: Vec<Result<Bytes, Infallible>> = bytes
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let (sink, rx) = ChannelSink::new(4);
        let session = StreamSession::new(sink, Duration::from_secs(60));
        let reader = tokio::spawn(drain(rx));
        let report = session.run(futures::stream::iter(pieces)).await;
        assert_eq!(report.outcome, LifecycleState::Completed);
        outputs.push(reader.await.unwrap());
    }

    for output in &outputs {
        assert_eq!(contents(output), vec!["Grüß", " dich", "!"]);
        // upstream's sentinel passes through, then the session's own
        assert_eq!(output.matches("data: [DONE]\n\n").count(), 2);
        assert!(output.ends_with("data: [DONE]\n\n"));
    }
}

/// Test a silent upstream is cut off with one timeout frame then [DONE]
#[tokio::test(start_paused = true)]
async fn test_silent_upstream_times_out() {
    let (sink, rx) = ChannelSink::new(4);
    let session = StreamSession::new(sink, Duration::from_secs(60));
    let reader = tokio::spawn(drain(rx));

    let upstream = futures::stream::once(async { Ok::<_, Infallible>(Bytes::from(chunk("Hi"))) })
        .chain(futures::stream::pending());
    let report = session.run(upstream).await;

    let body = reader.await.unwrap();
    let frames: Vec<&str> = body.split_inclusive("\n\n").collect();
    assert_eq!(frames.len(), 3);
    assert_eq!(contents(frames[0]), vec!["Hi"]);
    assert!(frames[1].contains("\"error\":true"));
    assert!(frames[1].contains("timed out"));
    assert_eq!(frames[2].as_bytes(), DONE_FRAME);
    assert_eq!(report.outcome, LifecycleState::TimedOut);
    assert!(report.elapsed >= Duration::from_secs(60));
}

/// Test a client that goes away ends the session without panicking
#[tokio::test]
async fn test_client_disconnect_fails_session() {
    let (sink, rx) = ChannelSink::new(1);
    drop(rx);
    let session = StreamSession::new(sink, Duration::from_secs(60));

    let upstream = futures::stream::iter(vec![
        Ok::<_, Infallible>(Bytes::from(chunk("a"))),
        Ok(Bytes::from(chunk("ab"))),
    ]);
    let report = session.run(upstream).await;

    assert_eq!(report.outcome, LifecycleState::Failed);
    assert_eq!(report.frames_written, 0);
}

/// Test a client that stops reading cannot hold the session past its deadline
#[tokio::test(start_paused = true)]
async fn test_stalled_client_is_cut_off() {
    let (sink, mut rx) = ChannelSink::new(1);
    let session = StreamSession::new(sink, Duration::from_secs(5));

    let deltas: Vec<Result<Bytes, Infallible>> = (1..=9)
        .map(|n| Ok(Bytes::from(chunk(&"x".repeat(n)))))
        .collect();
    let upstream = futures::stream::iter(deltas).chain(futures::stream::pending());

    let report = tokio::time::timeout(Duration::from_secs(600), session.run(upstream))
        .await
        .expect("session must end even though the client never reads");

    assert_eq!(report.outcome, LifecycleState::TimedOut);
    assert!(report.elapsed <= Duration::from_secs(5) + TERMINAL_WRITE_TIMEOUT * 2);

    // only the frame that fit in the channel; the sink is closed
    let first = rx.recv().await.unwrap();
    assert_eq!(contents(std::str::from_utf8(&first).unwrap()), vec!["x"]);
    assert_eq!(rx.recv().await, None);
}

/// Test a slow client that resumes reading still gets the terminal frames
#[tokio::test(start_paused = true)]
async fn test_slow_client_receives_terminal_frames() {
    let (sink, rx) = ChannelSink::new(1);
    let session = StreamSession::new(sink, Duration::from_secs(5));

    let deltas: Vec<Result<Bytes, Infallible>> = (1..=4)
        .map(|n| Ok(Bytes::from(chunk(&"x".repeat(n)))))
        .collect();
    let upstream = futures::stream::iter(deltas).chain(futures::stream::pending());

    let reader = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(6)).await;
        drain(rx).await
    });
    let report = session.run(upstream).await;
    let body = reader.await.unwrap();

    assert_eq!(report.outcome, LifecycleState::TimedOut);
    assert_eq!(contents(&body), vec!["x"]);
    assert!(body.contains("timed out"));
    assert!(body.ends_with("data: [DONE]\n\n"));
    assert_eq!(body.matches("[DONE]").count(), 1);
}

/// Test many sessions racing their deadlines each terminate exactly once
#[tokio::test(start_paused = true)]
async fn test_deadline_race_many_sessions() {
    let mut handles = Vec::new();
    for i in 0..32u64 {
        let (sink, rx) = ChannelSink::new(8);
        let session = StreamSession::new(sink, Duration::from_millis(100));
        let upstream = futures::stream::once(async move {
            // half finish just before the deadline, half at it
            tokio::time::sleep(Duration::from_millis(99 + i % 2)).await;
            Ok::<_, Infallible>(Bytes::from(chunk("x")))
        });
        let reader = tokio::spawn(drain(rx));
        handles.push(tokio::spawn(async move {
            let report = session.run(upstream).await;
            (report, reader.await.unwrap())
        }));
    }

    for handle in handles {
        let (report, body) = handle.await.unwrap();
        assert_eq!(body.matches("[DONE]").count(), 1);
        assert!(body.ends_with("data: [DONE]\n\n"));
        match report.outcome {
            LifecycleState::Completed => assert!(!body.contains("\"error\"")),
            LifecycleState::TimedOut => assert_eq!(body.matches("\"error\":true").count(), 1),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
