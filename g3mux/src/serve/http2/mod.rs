/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::future::poll_fn;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tokio::time::{Instant, interval_at, timeout};

use crate::config::MuxServerConfig;
use crate::module::grpc::GrpcEngine;
use crate::module::http::PlainHttp2Engine;
use crate::serve::ServerTaskError;

mod split;
mod stream;

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(30);

/// How streams accepted on this connection get routed to engines.
#[derive(Clone, Copy)]
pub(crate) enum StreamDispatch {
    /// `h2` connections: classify each stream on its content-type.
    Classify,
    /// `grpc-exp` connections: the peer already promised gRPC.
    GrpcOnly,
}

/// One accepted HTTP/2 connection, fanning streams out to per-stream tasks
/// and supervising them until both sides are done.
pub(crate) struct H2ConnectionTask {
    config: Arc<MuxServerConfig>,
    grpc: Arc<GrpcEngine>,
    http2: Arc<PlainHttp2Engine>,
    dispatch: StreamDispatch,
    peer_addr: SocketAddr,
}

impl H2ConnectionTask {
    pub(crate) fn new(
        config: Arc<MuxServerConfig>,
        grpc: Arc<GrpcEngine>,
        http2: Arc<PlainHttp2Engine>,
        dispatch: StreamDispatch,
        peer_addr: SocketAddr,
    ) -> Self {
        H2ConnectionTask {
            config,
            grpc,
            http2,
            dispatch,
            peer_addr,
        }
    }

    pub(crate) async fn into_running<S>(self, tls_stream: S) -> Result<(), ServerTaskError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let h2_config = &self.config.h2;

        let mut builder = h2::server::Builder::new();
        builder
            .max_frame_size(h2_config.max_frame_size)
            .max_header_list_size(h2_config.max_header_list_size)
            .max_concurrent_streams(h2_config.max_concurrent_streams);

        let mut connection =
            match timeout(h2_config.handshake_timeout, builder.handshake::<_, Bytes>(tls_stream))
                .await
            {
                Ok(Ok(c)) => c,
                Ok(Err(e)) => return Err(ServerTaskError::ClientHandshakeFailed(e)),
                Err(_) => return Err(ServerTaskError::ClientHandshakeTimeout),
            };

        let mut stream_tasks: JoinSet<Result<(), ServerTaskError>> = JoinSet::new();
        let max_age_at = h2_config.max_age.map(|d| Instant::now() + d);
        let tick = h2_config.idle_timeout.unwrap_or(DEFAULT_TICK_INTERVAL);
        let mut ticker = interval_at(Instant::now() + tick, tick);
        let mut was_idle = false;
        let mut closing = false;

        loop {
            tokio::select! {
                biased;

                r = stream_tasks.join_next(), if !stream_tasks.is_empty() => {
                    match r {
                        Some(Ok(Ok(_))) | None => {}
                        Some(Ok(Err(e))) => debug!("{} stream failed: {e}", self.peer_addr),
                        Some(Err(e)) => warn!("{} stream task join failed: {e}", self.peer_addr),
                    }
                }
                r = connection.accept() => {
                    match r {
                        Some(Ok((req, send_response))) => {
                            was_idle = false;
                            match self.dispatch {
                                StreamDispatch::Classify => {
                                    stream_tasks.spawn(stream::run_classified(
                                        req,
                                        send_response,
                                        self.grpc.clone(),
                                        self.http2.clone(),
                                    ));
                                }
                                StreamDispatch::GrpcOnly => {
                                    stream_tasks.spawn(stream::run_grpc(
                                        req,
                                        send_response,
                                        self.grpc.clone(),
                                    ));
                                }
                            }
                        }
                        Some(Err(e)) => {
                            // connection level error, cancel all streams as
                            // their frames can no longer make progress
                            stream_tasks.shutdown().await;
                            if let Some(io) = e.get_io()
                                && io.kind() == std::io::ErrorKind::NotConnected
                            {
                                return Ok(());
                            }
                            return Err(ServerTaskError::ClientConnectionBroken(e));
                        }
                        None => {
                            // client sent its last stream, wait for ours
                            self.wait_stream_tasks(&mut stream_tasks).await;
                            let _ = poll_fn(|cx| connection.poll_closed(cx)).await;
                            return Ok(());
                        }
                    }
                }
                _ = ticker.tick() => {
                    if closing {
                        continue;
                    }
                    if max_age_at.map(|at| Instant::now() >= at).unwrap_or(false) {
                        info!("{} connection reached max age, closing", self.peer_addr);
                        connection.graceful_shutdown();
                        closing = true;
                    } else if h2_config.idle_timeout.is_some() && stream_tasks.is_empty() {
                        if was_idle {
                            debug!("{} connection idle, closing", self.peer_addr);
                            connection.graceful_shutdown();
                            closing = true;
                        } else {
                            was_idle = true;
                        }
                    }
                }
            }
        }
    }

    async fn wait_stream_tasks(&self, stream_tasks: &mut JoinSet<Result<(), ServerTaskError>>) {
        let peer_addr = self.peer_addr;
        let wait_all = async {
            while let Some(r) = stream_tasks.join_next().await {
                match r {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => debug!("{peer_addr} stream failed: {e}"),
                    Err(e) => warn!("{peer_addr} stream task join failed: {e}"),
                }
            }
        };
        if timeout(self.config.h2.graceful_close_timeout, wait_all)
            .await
            .is_err()
        {
            warn!("{peer_addr} timeout to wait stream tasks, aborting them");
            stream_tasks.shutdown().await;
        }
    }
}
