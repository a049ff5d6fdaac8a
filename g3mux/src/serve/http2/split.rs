/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use g3_mux_h2::{DecisionFuture, StreamClass};

use crate::module::http::{H2Stream, H2StreamEngine};
use crate::serve::ServerTaskError;

/// Route one classified stream to the gRPC or the plain HTTP/2 engine.
pub(crate) struct ProtocolSplitAdapter<G, H>
where
    G: H2StreamEngine,
    H: H2StreamEngine,
{
    grpc: Arc<G>,
    http2: Arc<H>,
}

impl<G, H> ProtocolSplitAdapter<G, H>
where
    G: H2StreamEngine,
    H: H2StreamEngine,
{
    pub(crate) fn new(grpc: Arc<G>, http2: Arc<H>) -> Self {
        ProtocolSplitAdapter { grpc, http2 }
    }

    pub(crate) async fn dispatch(
        self,
        decision: DecisionFuture<StreamClass>,
        stream: H2Stream,
    ) -> Result<(), ServerTaskError> {
        match decision.await {
            Ok(StreamClass::Grpc) => {
                let value = self.grpc.setup(stream).await?;
                self.grpc.handle(value).await;
                Ok(())
            }
            Ok(StreamClass::Http2) => {
                let value = self.http2.setup(stream).await?;
                self.http2.handle(value).await;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
