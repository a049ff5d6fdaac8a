/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;

use super::ClassifyError;
use crate::{FramePayload, MediaType};

/// Per-stream classification state.
///
/// The only legal walk is
/// Initial -> AwaitingDecision -> (Unbuffering | Finished) -> Finished.
/// The frame buffer moves between states together with the state value, it is
/// never aliased from two states.
pub(super) enum ClassifierState {
    Initial,
    AwaitingDecision(VecDeque<FramePayload>),
    Unbuffering(VecDeque<FramePayload>),
    Finished,
}

pub enum RecvFrameAction {
    /// The frame is not subject to classification, pass it on unchanged.
    Forward(FramePayload),
    /// The first HEADERS frame arrived, run the decision function.
    InvokeDecision(Option<MediaType>),
    /// The frame was appended to the replay buffer.
    Buffered,
    /// A pre-HEADERS WINDOW_UPDATE frame, dropped on purpose.
    Discarded,
}

pub enum DecisionAction {
    /// Buffered frames are pending, drain them one by one.
    StartUnbuffering,
    /// Nothing was buffered beyond the decision, leave the pipeline now.
    Detach,
    /// The stream already finished, e.g. torn down from within the decision
    /// function. Tolerated as a no-op.
    Ignore,
}

pub enum UnbufferAction {
    Forward(FramePayload),
    /// The buffer ran empty, signal read-complete and detach.
    ReadComplete,
}

impl ClassifierState {
    pub(super) fn recv_frame(&mut self, frame: FramePayload) -> RecvFrameAction {
        match self {
            ClassifierState::Initial => match frame {
                FramePayload::Headers(headers) => {
                    let media_type = headers.content_type().and_then(MediaType::parse);
                    let mut buffer = VecDeque::with_capacity(4);
                    buffer.push_back(FramePayload::Headers(headers));
                    *self = ClassifierState::AwaitingDecision(buffer);
                    RecvFrameAction::InvokeDecision(media_type)
                }
                FramePayload::WindowUpdate { .. } => RecvFrameAction::Discarded,
                frame => RecvFrameAction::Forward(frame),
            },
            ClassifierState::AwaitingDecision(buffer) | ClassifierState::Unbuffering(buffer) => {
                buffer.push_back(frame);
                RecvFrameAction::Buffered
            }
            ClassifierState::Finished => RecvFrameAction::Forward(frame),
        }
    }

    pub(super) fn decision_resolved(&mut self) -> Result<DecisionAction, ClassifyError> {
        match std::mem::replace(self, ClassifierState::Finished) {
            ClassifierState::AwaitingDecision(buffer) => {
                if buffer.is_empty() {
                    Ok(DecisionAction::Detach)
                } else {
                    *self = ClassifierState::Unbuffering(buffer);
                    Ok(DecisionAction::StartUnbuffering)
                }
            }
            ClassifierState::Finished => Ok(DecisionAction::Ignore),
            state => {
                *self = state;
                Err(ClassifyError::InvalidOperationForState)
            }
        }
    }

    pub(super) fn unbuffer(&mut self) -> Result<UnbufferAction, ClassifyError> {
        match self {
            ClassifierState::Unbuffering(buffer) => match buffer.pop_front() {
                Some(frame) => Ok(UnbufferAction::Forward(frame)),
                None => {
                    *self = ClassifierState::Finished;
                    Ok(UnbufferAction::ReadComplete)
                }
            },
            _ => Err(ClassifyError::InvalidOperationForState),
        }
    }

    /// Returns true if the stream was still live, in which case the caller
    /// has a pending promise to fail.
    pub(super) fn channel_inactive(&mut self) -> bool {
        match self {
            ClassifierState::Finished => false,
            _ => {
                *self = ClassifierState::Finished;
                true
            }
        }
    }

    pub(super) fn is_finished(&self) -> bool {
        matches!(self, ClassifierState::Finished)
    }
}
