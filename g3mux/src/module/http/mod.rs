/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use async_trait::async_trait;
use bytes::Bytes;
use h2::server::SendResponse;
use http::{Response, StatusCode};
use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use g3_mux_h2::{ClassifyError, FrameEvent, FramePayload, HeadersFrame};

use crate::serve::{ServerTaskError, TlsServerStream};

/// Server side view of one HTTP/2 stream, with the request frames already
/// split out of the connection by the stream fan-out code.
pub struct H2Stream {
    pub events: mpsc::Receiver<FrameEvent>,
    pub send_response: SendResponse<Bytes>,
}

/// Wait for the request HEADERS frame on a stream's event channel.
///
/// Connection level noise forwarded before the first HEADERS is skipped,
/// but a DATA frame in that position is a protocol error.
pub(crate) async fn recv_headers(
    events: &mut mpsc::Receiver<FrameEvent>,
) -> Result<HeadersFrame, ServerTaskError> {
    loop {
        match events.recv().await {
            Some(FrameEvent::Frame(FramePayload::Headers(headers))) => return Ok(headers),
            Some(FrameEvent::Frame(FramePayload::Data { .. })) => {
                return Err(ServerTaskError::UnexpectedFramePart("DATA"));
            }
            Some(FrameEvent::Frame(_)) => {}
            Some(FrameEvent::Error(e)) => return Err(e.into()),
            Some(FrameEvent::ReadComplete) => {}
            None => return Err(ClassifyError::ChannelClosed.into()),
        }
    }
}

impl H2Stream {
    pub async fn recv_request_headers(&mut self) -> Result<HeadersFrame, ServerTaskError> {
        recv_headers(&mut self.events).await
    }

    /// Consume and drop the remaining request frames so the peer is not
    /// stalled on flow control after we have already responded.
    pub async fn drain(&mut self) {
        while self.events.recv().await.is_some() {}
    }
}

/// Per-stream application endpoint for streams multiplexed over one
/// HTTP/2 connection.
#[async_trait]
pub trait H2StreamEngine: Send + Sync + 'static {
    type Value: Send + 'static;

    /// Inspect the stream head and build the per-call state. Errors here are
    /// stream fatal but leave the connection running.
    async fn setup(&self, stream: H2Stream) -> Result<Self::Value, ServerTaskError>;

    async fn handle(&self, value: Self::Value);
}

/// Connection endpoint for clients that negotiated `http/1.1` or sent
/// no ALPN extension at all.
#[async_trait]
pub trait Http1Engine: Send + Sync + 'static {
    type Value: Send + 'static;

    async fn setup(&self, conn: TlsServerStream) -> Result<Self::Value, ServerTaskError>;

    async fn handle(&self, value: Self::Value);
}

/// Built-in engine for plain HTTP/2 streams. It answers every request with
/// a fixed status code and an empty body.
pub struct PlainHttp2Engine {
    status: StatusCode,
}

impl Default for PlainHttp2Engine {
    fn default() -> Self {
        PlainHttp2Engine {
            status: StatusCode::NOT_FOUND,
        }
    }
}

impl PlainHttp2Engine {
    pub fn with_status(status: StatusCode) -> Self {
        PlainHttp2Engine { status }
    }
}

pub struct PlainH2Call {
    headers: HeadersFrame,
    stream: H2Stream,
}

#[async_trait]
impl H2StreamEngine for PlainHttp2Engine {
    type Value = PlainH2Call;

    async fn setup(&self, mut stream: H2Stream) -> Result<Self::Value, ServerTaskError> {
        let headers = stream.recv_request_headers().await?;
        Ok(PlainH2Call { headers, stream })
    }

    async fn handle(&self, mut value: Self::Value) {
        if let Some(pseudo) = &value.headers.pseudo {
            debug!("{} {} -> {}", pseudo.method, pseudo.path, self.status);
        }
        let response = Response::builder()
            .status(self.status)
            .body(())
            .unwrap_or_default();
        if let Err(e) = value
            .stream
            .send_response
            .send_response(response, true)
            .map_err(ServerTaskError::SendResponseFailed)
        {
            debug!("failed to send h2 response: {e}");
            return;
        }
        value.stream.drain().await;
    }
}

/// Built-in engine for HTTP/1.1 connections. This gateway only serves over
/// HTTP/2, so all it does is tell the client to come back with h2.
pub struct UpgradeRequiredEngine;

const UPGRADE_REQUIRED_RSP: &[u8] = b"HTTP/1.1 426 Upgrade Required\r\n\
connection: close\r\n\
upgrade: h2\r\n\
content-length: 0\r\n\
\r\n";

#[async_trait]
impl Http1Engine for UpgradeRequiredEngine {
    type Value = TlsServerStream;

    async fn setup(&self, conn: TlsServerStream) -> Result<Self::Value, ServerTaskError> {
        Ok(conn)
    }

    async fn handle(&self, mut conn: Self::Value) {
        if let Err(e) = conn.write_all(UPGRADE_REQUIRED_RSP).await {
            debug!("failed to write http/1.1 upgrade response: {e}");
            return;
        }
        let _ = conn.shutdown().await;
    }
}
