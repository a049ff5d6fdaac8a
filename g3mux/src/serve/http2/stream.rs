/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use bytes::Bytes;
use h2::RecvStream;
use h2::server::SendResponse;
use http::Request;
use log::debug;
use tokio::sync::mpsc;

use g3_mux_h2::{
    ContentTypeClassifier, FrameEvent, FramePayload, HeadersFrame, RequestPseudo, StreamClass,
    classify_stream,
};

use crate::module::grpc::GrpcEngine;
use crate::module::http::{H2Stream, H2StreamEngine, PlainHttp2Engine};
use crate::serve::ServerTaskError;

use super::split::ProtocolSplitAdapter;

const STREAM_CHANNEL_SIZE: usize = 16;

/// Decompose one accepted h2 request into the frame sequence the classifier
/// works on, releasing connection flow control as DATA frames are taken off
/// the wire.
async fn feed_frames(req: Request<RecvStream>, tx: mpsc::Sender<FramePayload>) {
    let (parts, mut body) = req.into_parts();
    let pseudo = RequestPseudo {
        method: parts.method,
        scheme: parts.uri.scheme_str().map(|s| s.to_string()),
        authority: parts.uri.authority().map(|a| a.as_str().to_string()),
        path: parts
            .uri
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
    };
    let end_stream = body.is_end_stream();
    let headers = HeadersFrame::request(pseudo, parts.headers, end_stream);
    if tx.send(FramePayload::Headers(headers)).await.is_err() {
        return;
    }

    while let Some(r) = body.data().await {
        match r {
            Ok(data) => {
                let _ = body.flow_control().release_capacity(data.len());
                let end_stream = body.is_end_stream();
                if tx.send(FramePayload::Data { data, end_stream }).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!("h2 stream recv failed: {e}");
                return;
            }
        }
    }

    match body.trailers().await {
        Ok(Some(trailers)) => {
            let _ = tx
                .send(FramePayload::Headers(HeadersFrame::trailers(trailers)))
                .await;
        }
        Ok(None) => {}
        Err(e) => debug!("h2 stream trailers recv failed: {e}"),
    }
}

/// Stream task for connections negotiated as `h2`: classify on the request
/// content-type, then hand the frames to the selected engine.
pub(crate) async fn run_classified(
    req: Request<RecvStream>,
    send_response: SendResponse<Bytes>,
    grpc: Arc<GrpcEngine>,
    http2: Arc<PlainHttp2Engine>,
) -> Result<(), ServerTaskError> {
    let (src_tx, mut src_rx) = mpsc::channel(STREAM_CHANNEL_SIZE);
    let feeder = tokio::spawn(feed_frames(req, src_tx));

    let mut classifier = ContentTypeClassifier::new();
    classifier.attach()?;
    let decision = classifier.decision()?;

    let (down_tx, down_rx) = mpsc::channel(STREAM_CHANNEL_SIZE);
    let adapter = ProtocolSplitAdapter::new(grpc, http2);
    let stream = H2Stream {
        events: down_rx,
        send_response,
    };
    let dispatch = tokio::spawn(adapter.dispatch(decision, stream));

    let drive_r = classify_stream(
        classifier,
        &mut src_rx,
        |media_type| async move {
            Ok(match media_type {
                Some(m) if m.is_grpc() => StreamClass::Grpc,
                _ => StreamClass::Http2,
            })
        },
        &down_tx,
    )
    .await;
    drop(down_tx);

    let dispatch_r = dispatch
        .await
        .map_err(|_| ServerTaskError::StreamHandlerGone);
    feeder.abort();
    // an engine failure explains the classifier sink closing, report it first
    dispatch_r??;
    drive_r?;
    Ok(())
}

/// Stream task for connections negotiated as `grpc-exp`: no classification,
/// every stream goes straight to the gRPC engine.
pub(crate) async fn run_grpc(
    req: Request<RecvStream>,
    send_response: SendResponse<Bytes>,
    grpc: Arc<GrpcEngine>,
) -> Result<(), ServerTaskError> {
    let (src_tx, mut src_rx) = mpsc::channel(STREAM_CHANNEL_SIZE);
    let feeder = tokio::spawn(feed_frames(req, src_tx));

    let (down_tx, down_rx) = mpsc::channel(STREAM_CHANNEL_SIZE);
    let stream = H2Stream {
        events: down_rx,
        send_response,
    };
    let engine = tokio::spawn(async move {
        let value = grpc.setup(stream).await?;
        grpc.handle(value).await;
        Ok::<(), ServerTaskError>(())
    });

    while let Some(frame) = src_rx.recv().await {
        if down_tx.send(FrameEvent::Frame(frame)).await.is_err() {
            break;
        }
    }
    drop(down_tx);

    let r = engine.await.map_err(|_| ServerTaskError::StreamHandlerGone);
    feeder.abort();
    r?
}
