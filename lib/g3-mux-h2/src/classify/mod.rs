/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Per-stream content-type classification for HTTP/2 connections that carry
//! both gRPC and plain HTTP traffic behind a single negotiated `h2` token.
//!
//! One classifier instance attaches to one inbound stream. It reads as far as
//! the first HEADERS frame, hands the parsed media type to an async decision
//! function, buffers every frame that arrives while the decision is pending,
//! and then replays the buffer one frame at a time to the selected downstream
//! handler. Frame order is preserved across all state transitions.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::{FramePayload, MediaType};

mod state;
use state::ClassifierState;
pub use state::{DecisionAction, RecvFrameAction, UnbufferAction};

mod drive;
pub use drive::classify_stream;

/// How a classified stream is to be handled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamClass {
    Grpc,
    Http2,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("operation not valid for the current classifier state")]
    InvalidOperationForState,
    #[error("channel closed before classification finished")]
    ChannelClosed,
    #[error("classification decision failed: {0}")]
    DecisionFailed(String),
    #[error("downstream sink closed")]
    SinkClosed,
}

/// What the classifier emits towards the downstream stream handler.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    Frame(FramePayload),
    /// The decision function failed, surfaced before the buffer is drained.
    Error(ClassifyError),
    /// The replay buffer ran empty and the classifier left the pipeline.
    ReadComplete,
}

/// Single-resolution future for the classification outcome.
///
/// Obtained from [`ContentTypeClassifier::decision`] after the classifier has
/// been attached. If the classifier is dropped or its stream task cancelled
/// before a decision was made, this resolves to [`ClassifyError::ChannelClosed`].
pub struct DecisionFuture<D> {
    rx: oneshot::Receiver<Result<D, ClassifyError>>,
}

impl<D> Future for DecisionFuture<D> {
    type Output = Result<D, ClassifyError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(r)) => Poll::Ready(r),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ClassifyError::ChannelClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The action the driver has to take after the decision function resolved.
pub enum Resolution {
    /// Decision succeeded, buffered frames wait for replay.
    Unbuffer,
    /// Decision succeeded with an empty buffer, the classifier detached.
    Detached,
    /// Decision failed, surface the error and still drain the buffer.
    ErrorThenUnbuffer(ClassifyError),
    /// Decision failed with an empty buffer, surface the error and detach.
    ErrorThenDetached(ClassifyError),
    /// The stream already finished, nothing to do.
    Ignored,
}

pub struct ContentTypeClassifier<D> {
    state: ClassifierState,
    decision_tx: Option<oneshot::Sender<Result<D, ClassifyError>>>,
    decision_rx: Option<oneshot::Receiver<Result<D, ClassifyError>>>,
}

impl<D> Default for ContentTypeClassifier<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> ContentTypeClassifier<D> {
    pub fn new() -> Self {
        ContentTypeClassifier {
            state: ClassifierState::Initial,
            decision_tx: None,
            decision_rx: None,
        }
    }

    /// Bind the classifier to a stream's handler chain. This creates the
    /// decision promise and may be called only once.
    pub fn attach(&mut self) -> Result<(), ClassifyError> {
        if self.decision_tx.is_some() || self.decision_rx.is_some() {
            return Err(ClassifyError::InvalidOperationForState);
        }
        let (tx, rx) = oneshot::channel();
        self.decision_tx = Some(tx);
        self.decision_rx = Some(rx);
        Ok(())
    }

    /// Take the decision future. Calling this before [`attach`] is a
    /// programming error and fails instead of handing out stale data.
    ///
    /// [`attach`]: Self::attach
    pub fn decision(&mut self) -> Result<DecisionFuture<D>, ClassifyError> {
        let rx = self
            .decision_rx
            .take()
            .ok_or(ClassifyError::InvalidOperationForState)?;
        Ok(DecisionFuture { rx })
    }

    pub fn recv_frame(&mut self, frame: FramePayload) -> RecvFrameAction {
        self.state.recv_frame(frame)
    }

    /// Feed the outcome of the decision function back in. Settles the decision
    /// promise exactly once and reports what the driver has to do next.
    pub fn decision_resolved(
        &mut self,
        result: Result<D, ClassifyError>,
    ) -> Result<Resolution, ClassifyError> {
        let error = result.as_ref().err().cloned();
        let action = self.state.decision_resolved()?;
        if matches!(action, DecisionAction::Ignore) {
            return Ok(Resolution::Ignored);
        }
        self.settle(result);
        Ok(match (action, error) {
            (DecisionAction::StartUnbuffering, None) => Resolution::Unbuffer,
            (DecisionAction::Detach, None) => Resolution::Detached,
            (DecisionAction::StartUnbuffering, Some(e)) => Resolution::ErrorThenUnbuffer(e),
            (DecisionAction::Detach, Some(e)) => Resolution::ErrorThenDetached(e),
            (DecisionAction::Ignore, _) => unreachable!(),
        })
    }

    pub fn unbuffer(&mut self) -> Result<UnbufferAction, ClassifyError> {
        self.state.unbuffer()
    }

    /// The peer went away. Fails a still pending decision promise with
    /// [`ClassifyError::ChannelClosed`].
    pub fn channel_inactive(&mut self) {
        if self.state.channel_inactive() {
            self.settle(Err(ClassifyError::ChannelClosed));
        }
    }

    /// Forced removal from the handler chain. A no-op once finished, otherwise
    /// the decision promise fails with [`ClassifyError::InvalidOperationForState`].
    pub fn detach(&mut self) {
        if self.state.channel_inactive() {
            self.settle(Err(ClassifyError::InvalidOperationForState));
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    fn settle(&mut self, result: Result<D, ClassifyError>) {
        if let Some(tx) = self.decision_tx.take() {
            let _ = tx.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn decision_before_attach_fails() {
        let mut classifier = ContentTypeClassifier::<StreamClass>::new();
        assert_eq!(
            classifier.decision().err(),
            Some(ClassifyError::InvalidOperationForState)
        );
    }

    #[tokio::test]
    async fn attach_is_once() {
        let mut classifier = ContentTypeClassifier::<StreamClass>::new();
        classifier.attach().unwrap();
        assert_eq!(
            classifier.attach().err(),
            Some(ClassifyError::InvalidOperationForState)
        );
    }

    #[tokio::test]
    async fn detach_while_live_fails_promise() {
        let mut classifier = ContentTypeClassifier::<StreamClass>::new();
        classifier.attach().unwrap();
        let decision = classifier.decision().unwrap();
        classifier.detach();
        assert_eq!(
            decision.await,
            Err(ClassifyError::InvalidOperationForState)
        );
    }

    #[tokio::test]
    async fn channel_inactive_fails_promise() {
        let mut classifier = ContentTypeClassifier::<StreamClass>::new();
        classifier.attach().unwrap();
        let decision = classifier.decision().unwrap();
        classifier.channel_inactive();
        assert_eq!(decision.await, Err(ClassifyError::ChannelClosed));
    }

    #[tokio::test]
    async fn dropped_classifier_fails_promise() {
        let mut classifier = ContentTypeClassifier::<StreamClass>::new();
        classifier.attach().unwrap();
        let decision = classifier.decision().unwrap();
        drop(classifier);
        assert_eq!(decision.await, Err(ClassifyError::ChannelClosed));
    }
}
