/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method};
use tokio::sync::{mpsc, oneshot};

use g3_mux_h2::{
    ClassifyError, ContentTypeClassifier, FrameEvent, FramePayload, HeadersFrame, RequestPseudo,
    StreamClass, classify_stream,
};

fn request_headers(content_type: Option<&'static str>) -> FramePayload {
    let mut fields = HeaderMap::new();
    if let Some(v) = content_type {
        fields.insert(http::header::CONTENT_TYPE, HeaderValue::from_static(v));
    }
    FramePayload::Headers(HeadersFrame::request(
        RequestPseudo {
            method: Method::POST,
            scheme: Some("https".to_string()),
            authority: None,
            path: "/test.Echo/Hello".to_string(),
        },
        fields,
        false,
    ))
}

fn data_frame(payload: &'static [u8]) -> FramePayload {
    FramePayload::Data {
        data: Bytes::from_static(payload),
        end_stream: false,
    }
}

struct Driver {
    src_tx: mpsc::Sender<FramePayload>,
    down_rx: mpsc::Receiver<FrameEvent>,
    decision: g3_mux_h2::DecisionFuture<StreamClass>,
    gate_tx: Option<oneshot::Sender<Result<StreamClass, ClassifyError>>>,
    handle: tokio::task::JoinHandle<Result<(), ClassifyError>>,
}

/// Spawn a classify driver whose decision function waits for a gated result
/// and falls back to media-type based classification when gated with `Ok`.
fn spawn_driver() -> Driver {
    let (src_tx, mut src_rx) = mpsc::channel::<FramePayload>(16);
    let (down_tx, down_rx) = mpsc::channel::<FrameEvent>(16);
    let (gate_tx, gate_rx) = oneshot::channel::<Result<StreamClass, ClassifyError>>();

    let mut classifier = ContentTypeClassifier::new();
    classifier.attach().unwrap();
    let decision = classifier.decision().unwrap();

    let handle = tokio::spawn(async move {
        classify_stream(
            classifier,
            &mut src_rx,
            move |media_type| async move {
                match gate_rx.await {
                    Ok(Ok(_)) => Ok(match media_type {
                        Some(m) if m.is_grpc() => StreamClass::Grpc,
                        _ => StreamClass::Http2,
                    }),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(ClassifyError::ChannelClosed),
                }
            },
            &down_tx,
        )
        .await
    });

    Driver {
        src_tx,
        down_rx,
        decision,
        gate_tx: Some(gate_tx),
        handle,
    }
}

#[tokio::test]
async fn grpc_frames_replayed_in_order() {
    let mut d = spawn_driver();

    d.src_tx
        .send(request_headers(Some("application/grpc")))
        .await
        .unwrap();
    d.src_tx.send(data_frame(b"one")).await.unwrap();
    d.src_tx.send(data_frame(b"two")).await.unwrap();

    // let the frames arrive while the decision is still pending
    tokio::time::sleep(Duration::from_millis(10)).await;
    d.gate_tx.take().unwrap().send(Ok(StreamClass::Grpc)).unwrap();

    assert_eq!(d.decision.await, Ok(StreamClass::Grpc));

    match d.down_rx.recv().await {
        Some(FrameEvent::Frame(FramePayload::Headers(h))) => {
            assert_eq!(h.content_type(), Some("application/grpc"));
        }
        other => panic!("expected replayed headers, got {other:?}"),
    }
    assert_eq!(
        d.down_rx.recv().await,
        Some(FrameEvent::Frame(data_frame(b"one")))
    );
    assert_eq!(
        d.down_rx.recv().await,
        Some(FrameEvent::Frame(data_frame(b"two")))
    );
    assert_eq!(d.down_rx.recv().await, Some(FrameEvent::ReadComplete));

    // later frames pass through unchanged once the classifier detached
    d.src_tx.send(data_frame(b"three")).await.unwrap();
    assert_eq!(
        d.down_rx.recv().await,
        Some(FrameEvent::Frame(data_frame(b"three")))
    );

    drop(d.src_tx);
    assert_eq!(d.handle.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn plain_http2_without_content_type() {
    let mut d = spawn_driver();

    d.src_tx.send(request_headers(None)).await.unwrap();
    d.gate_tx.take().unwrap().send(Ok(StreamClass::Http2)).unwrap();

    assert_eq!(d.decision.await, Ok(StreamClass::Http2));
    assert!(matches!(
        d.down_rx.recv().await,
        Some(FrameEvent::Frame(FramePayload::Headers(_)))
    ));
    assert_eq!(d.down_rx.recv().await, Some(FrameEvent::ReadComplete));

    drop(d.src_tx);
    assert_eq!(d.handle.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn plain_http2_with_text_content_type() {
    let mut d = spawn_driver();

    d.src_tx
        .send(request_headers(Some("text/plain")))
        .await
        .unwrap();
    d.gate_tx.take().unwrap().send(Ok(StreamClass::Http2)).unwrap();
    assert_eq!(d.decision.await, Ok(StreamClass::Http2));

    drop(d.src_tx);
    assert_eq!(d.handle.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn trailers_are_not_reclassified() {
    let mut d = spawn_driver();

    d.src_tx
        .send(request_headers(Some("application/grpc")))
        .await
        .unwrap();
    d.gate_tx.take().unwrap().send(Ok(StreamClass::Grpc)).unwrap();
    assert_eq!(d.decision.await, Ok(StreamClass::Grpc));

    assert!(matches!(
        d.down_rx.recv().await,
        Some(FrameEvent::Frame(FramePayload::Headers(_)))
    ));
    assert_eq!(d.down_rx.recv().await, Some(FrameEvent::ReadComplete));

    // a trailers block after classification is forwarded, not classified
    let mut trailers = HeaderMap::new();
    trailers.insert("grpc-status", HeaderValue::from_static("0"));
    d.src_tx
        .send(FramePayload::Headers(HeadersFrame::trailers(trailers)))
        .await
        .unwrap();
    match d.down_rx.recv().await {
        Some(FrameEvent::Frame(FramePayload::Headers(h))) => {
            assert!(h.pseudo.is_none());
            assert!(h.end_stream);
        }
        other => panic!("expected forwarded trailers, got {other:?}"),
    }

    drop(d.src_tx);
    assert_eq!(d.handle.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn window_update_before_headers_is_dropped() {
    let mut d = spawn_driver();

    d.src_tx
        .send(FramePayload::WindowUpdate { size_increment: 64 })
        .await
        .unwrap();
    d.src_tx
        .send(request_headers(Some("application/grpc")))
        .await
        .unwrap();
    d.gate_tx.take().unwrap().send(Ok(StreamClass::Grpc)).unwrap();
    assert_eq!(d.decision.await, Ok(StreamClass::Grpc));

    // the first thing downstream sees is the replayed headers frame
    assert!(matches!(
        d.down_rx.recv().await,
        Some(FrameEvent::Frame(FramePayload::Headers(_)))
    ));
    assert_eq!(d.down_rx.recv().await, Some(FrameEvent::ReadComplete));

    drop(d.src_tx);
    assert_eq!(d.handle.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn pre_headers_frames_pass_through() {
    let mut d = spawn_driver();

    d.src_tx
        .send(FramePayload::Other { frame_type: 8 })
        .await
        .unwrap();
    assert_eq!(
        d.down_rx.recv().await,
        Some(FrameEvent::Frame(FramePayload::Other { frame_type: 8 }))
    );

    drop(d.src_tx);
    // source closed before any headers arrived
    assert_eq!(d.handle.await.unwrap(), Err(ClassifyError::ChannelClosed));
    assert_eq!(d.decision.await, Err(ClassifyError::ChannelClosed));
}

#[tokio::test]
async fn decision_failure_drains_with_error() {
    let mut d = spawn_driver();

    d.src_tx
        .send(request_headers(Some("application/grpc")))
        .await
        .unwrap();
    d.src_tx.send(data_frame(b"payload")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    d.gate_tx
        .take()
        .unwrap()
        .send(Err(ClassifyError::DecisionFailed("boom".to_string())))
        .unwrap();

    assert_eq!(
        d.decision.await,
        Err(ClassifyError::DecisionFailed("boom".to_string()))
    );

    // error first, then the buffered frames are still drained
    assert_eq!(
        d.down_rx.recv().await,
        Some(FrameEvent::Error(ClassifyError::DecisionFailed(
            "boom".to_string()
        )))
    );
    assert!(matches!(
        d.down_rx.recv().await,
        Some(FrameEvent::Frame(FramePayload::Headers(_)))
    ));
    assert_eq!(
        d.down_rx.recv().await,
        Some(FrameEvent::Frame(data_frame(b"payload")))
    );
    assert_eq!(d.down_rx.recv().await, Some(FrameEvent::ReadComplete));

    assert_eq!(
        d.handle.await.unwrap(),
        Err(ClassifyError::DecisionFailed("boom".to_string()))
    );
}

#[tokio::test]
async fn peer_reset_while_decision_pending() {
    let mut d = spawn_driver();

    d.src_tx
        .send(request_headers(Some("application/grpc")))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // peer goes away, the gate never fires
    drop(d.src_tx);

    assert_eq!(d.decision.await, Err(ClassifyError::ChannelClosed));
    assert_eq!(d.handle.await.unwrap(), Err(ClassifyError::ChannelClosed));

    // no frames were delivered downstream
    assert_eq!(d.down_rx.recv().await, None);
}
