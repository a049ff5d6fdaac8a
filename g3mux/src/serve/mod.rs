/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;

use crate::config::{MuxConfig, MuxServerConfig};
use crate::module::grpc::{GrpcEngine, GrpcServiceRegistry};
use crate::module::http::{Http1Engine, PlainHttp2Engine, UpgradeRequiredEngine};

mod error;
pub use error::ServerTaskError;

pub mod negotiation;
use negotiation::{NegotiatedProtocol, negotiate};

mod http2;
use http2::{H2ConnectionTask, StreamDispatch};

pub type TlsServerStream = tokio_rustls::server::TlsStream<TcpStream>;

/// The TLS terminated listener. One task per connection, the protocol lane
/// picked by ALPN right after the handshake.
pub struct MuxServer {
    config: Arc<MuxServerConfig>,
    tls_acceptor: TlsAcceptor,
    http1: Arc<UpgradeRequiredEngine>,
    http2: Arc<PlainHttp2Engine>,
    grpc: Arc<GrpcEngine>,
}

impl MuxServer {
    pub fn new(config: MuxConfig, registry: GrpcServiceRegistry) -> anyhow::Result<Self> {
        let MuxConfig { server, grpc } = config;
        let tls_config = server
            .build_tls_config()
            .context("failed to build tls server config")?;
        Ok(MuxServer {
            config: Arc::new(server),
            tls_acceptor: TlsAcceptor::from(tls_config),
            http1: Arc::new(UpgradeRequiredEngine),
            http2: Arc::new(PlainHttp2Engine::default()),
            grpc: Arc::new(GrpcEngine::new(Arc::new(registry), Arc::new(grpc))),
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.listen)
            .await
            .context(format!("failed to listen on {}", self.config.listen))?;
        info!("listening on {}", self.config.listen);

        let server = Arc::new(self);
        loop {
            tokio::select! {
                biased;

                _ = tokio::signal::ctrl_c() => {
                    info!("exit on SIGINT");
                    return Ok(());
                }
                r = listener.accept() => {
                    match r {
                        Ok((stream, peer_addr)) => {
                            let server = server.clone();
                            tokio::spawn(async move {
                                server.run_connection(stream, peer_addr).await;
                            });
                        }
                        Err(e) => warn!("accept failed: {e}"),
                    }
                }
            }
        }
    }

    async fn run_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let tls_stream = match timeout(
            self.config.tls_accept_timeout,
            self.tls_acceptor.accept(stream),
        )
        .await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                debug!("{peer_addr} tls handshake failed: {e}");
                return;
            }
            Err(_) => {
                debug!("{peer_addr} timeout to finish tls handshake");
                return;
            }
        };

        let outcome = negotiate(
            tls_stream,
            |conn| self.http1.setup(conn),
            |conn| {
                let task = self.h2_task(StreamDispatch::Classify, peer_addr);
                async move { Ok((task, conn)) }
            },
            |conn| {
                let task = self.h2_task(StreamDispatch::GrpcOnly, peer_addr);
                async move { Ok((task, conn)) }
            },
        )
        .await;

        match outcome {
            Ok(NegotiatedProtocol::Http1(value)) => self.http1.handle(value).await,
            Ok(NegotiatedProtocol::Http2((task, conn)))
            | Ok(NegotiatedProtocol::GrpcExp((task, conn))) => {
                if let Err(e) = task.into_running(conn).await {
                    debug!("{peer_addr} connection closed: {e}");
                }
            }
            Err(e) => debug!("{peer_addr} negotiation failed: {e}"),
        }
    }

    fn h2_task(&self, dispatch: StreamDispatch, peer_addr: SocketAddr) -> H2ConnectionTask {
        H2ConnectionTask::new(
            self.config.clone(),
            self.grpc.clone(),
            self.http2.clone(),
            dispatch,
            peer_addr,
        )
    }
}
