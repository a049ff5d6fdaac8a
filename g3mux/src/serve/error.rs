/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use thiserror::Error;

use g3_mux_h2::ClassifyError;

use super::negotiation::NegotiationError;

#[derive(Debug, Error)]
pub enum ServerTaskError {
    #[error("alpn negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),
    #[error("h2 handshake with client failed: {0}")]
    ClientHandshakeFailed(h2::Error),
    #[error("timeout in h2 handshake with client")]
    ClientHandshakeTimeout,
    #[error("client connection broken: {0}")]
    ClientConnectionBroken(h2::Error),
    #[error("stream classification failed: {0}")]
    Classify(#[from] ClassifyError),
    #[error("expected a HEADERS frame but got {0}")]
    UnexpectedFramePart(&'static str),
    #[error("failed to send response: {0}")]
    SendResponseFailed(h2::Error),
    #[error("stream handler task vanished")]
    StreamHandlerGone,
    #[error("io failed: {0}")]
    Io(#[from] std::io::Error),
}
