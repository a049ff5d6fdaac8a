/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::future::Future;

use log::debug;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use g3_mux_h2::AlpnProtocol;

use super::ServerTaskError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("client negotiated unsupported alpn protocol {0:?}")]
    InvalidAlpnToken(String),
}

/// Read side of a finished TLS handshake, as far as negotiation cares.
pub trait AlpnSession {
    fn negotiated_alpn(&self) -> Option<&[u8]>;
}

impl<S> AlpnSession for tokio_rustls::server::TlsStream<S> {
    fn negotiated_alpn(&self) -> Option<&[u8]> {
        self.get_ref().1.alpn_protocol()
    }
}

pub enum NegotiatedProtocol<V1, V2, V3> {
    Http1(V1),
    Http2(V2),
    GrpcExp(V3),
}

/// Map the negotiated ALPN token to a protocol lane. No token at all is an
/// HTTP/1.1 client, an unrecognized token is a protocol violation.
pub fn select_protocol(alpn: Option<&[u8]>) -> Result<AlpnProtocol, NegotiationError> {
    match alpn {
        Some(token) => AlpnProtocol::from_buf(token).ok_or_else(|| {
            NegotiationError::InvalidAlpnToken(String::from_utf8_lossy(token).into_owned())
        }),
        None => Ok(AlpnProtocol::Http11),
    }
}

/// Run exactly one of the three lane initializers against the finished TLS
/// connection, based on the negotiated ALPN token.
///
/// On an unsupported token the connection is shut down before the error is
/// returned, and no initializer runs.
pub async fn negotiate<C, F1, Fut1, V1, F2, Fut2, V2, F3, Fut3, V3>(
    mut conn: C,
    http1_init: F1,
    http2_init: F2,
    grpc_init: F3,
) -> Result<NegotiatedProtocol<V1, V2, V3>, ServerTaskError>
where
    C: AlpnSession + AsyncWrite + Unpin,
    F1: FnOnce(C) -> Fut1,
    Fut1: Future<Output = Result<V1, ServerTaskError>>,
    F2: FnOnce(C) -> Fut2,
    Fut2: Future<Output = Result<V2, ServerTaskError>>,
    F3: FnOnce(C) -> Fut3,
    Fut3: Future<Output = Result<V3, ServerTaskError>>,
{
    let protocol = match select_protocol(conn.negotiated_alpn()) {
        Ok(p) => p,
        Err(e) => {
            debug!("close connection on negotiation failure: {e}");
            let _ = conn.shutdown().await;
            return Err(e.into());
        }
    };
    match protocol {
        AlpnProtocol::Http11 => Ok(NegotiatedProtocol::Http1(http1_init(conn).await?)),
        AlpnProtocol::Http2 => Ok(NegotiatedProtocol::Http2(http2_init(conn).await?)),
        AlpnProtocol::GrpcExp => Ok(NegotiatedProtocol::GrpcExp(grpc_init(conn).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    struct FakeSession {
        alpn: Option<Vec<u8>>,
    }

    impl FakeSession {
        fn new(alpn: Option<&[u8]>) -> Self {
            FakeSession {
                alpn: alpn.map(|v| v.to_vec()),
            }
        }
    }

    impl AlpnSession for FakeSession {
        fn negotiated_alpn(&self) -> Option<&[u8]> {
            self.alpn.as_deref()
        }
    }

    impl AsyncWrite for FakeSession {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<Result<usize, io::Error>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Result<(), io::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn run_negotiate(alpn: Option<&[u8]>) -> Result<&'static str, ServerTaskError> {
        let conn = FakeSession::new(alpn);
        let r = negotiate(
            conn,
            |_conn| async move { Ok("http1") },
            |_conn| async move { Ok("http2") },
            |_conn| async move { Ok("grpc") },
        )
        .await?;
        Ok(match r {
            NegotiatedProtocol::Http1(v) => v,
            NegotiatedProtocol::Http2(v) => v,
            NegotiatedProtocol::GrpcExp(v) => v,
        })
    }

    #[test]
    fn select_known_tokens() {
        assert_eq!(select_protocol(Some(b"h2")), Ok(AlpnProtocol::Http2));
        assert_eq!(
            select_protocol(Some(b"grpc-exp")),
            Ok(AlpnProtocol::GrpcExp)
        );
        assert_eq!(
            select_protocol(Some(b"http/1.1")),
            Ok(AlpnProtocol::Http11)
        );
        assert_eq!(select_protocol(None), Ok(AlpnProtocol::Http11));
    }

    #[test]
    fn select_unknown_token() {
        assert_eq!(
            select_protocol(Some(b"spdy/3")),
            Err(NegotiationError::InvalidAlpnToken("spdy/3".to_string()))
        );
    }

    #[tokio::test]
    async fn negotiate_each_lane() {
        assert_eq!(run_negotiate(Some(b"http/1.1")).await.unwrap(), "http1");
        assert_eq!(run_negotiate(None).await.unwrap(), "http1");
        assert_eq!(run_negotiate(Some(b"h2")).await.unwrap(), "http2");
        assert_eq!(run_negotiate(Some(b"grpc-exp")).await.unwrap(), "grpc");
    }

    #[tokio::test]
    async fn negotiate_violation_closes() {
        match run_negotiate(Some(b"spdy/3")).await {
            Err(ServerTaskError::Negotiation(NegotiationError::InvalidAlpnToken(t))) => {
                assert_eq!(t, "spdy/3");
            }
            other => panic!("unexpected negotiation result: {other:?}"),
        }
    }
}
