/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::future::Future;

use tokio::sync::mpsc;

use super::{
    ClassifyError, ContentTypeClassifier, FrameEvent, RecvFrameAction, Resolution, UnbufferAction,
};
use crate::{FramePayload, MediaType};

/// Drive one stream through content-type classification.
///
/// Frames are pulled from `frames` and forwarded to `downstream` per the
/// classifier state machine: pre-HEADERS frames pass through (except
/// WINDOW_UPDATE, which is dropped), frames received while `decide` is pending
/// are buffered, and after the decision resolves the buffer is replayed one
/// frame at a time so transport backpressure stays intact. Once the classifier
/// detached, the function keeps forwarding frames unchanged until the source
/// closes.
///
/// The caller is expected to have called [`ContentTypeClassifier::attach`] and
/// taken the decision future before driving; the promise settles here.
pub async fn classify_stream<D, F, Fut>(
    mut classifier: ContentTypeClassifier<D>,
    frames: &mut mpsc::Receiver<FramePayload>,
    decide: F,
    downstream: &mpsc::Sender<FrameEvent>,
) -> Result<(), ClassifyError>
where
    F: FnOnce(Option<MediaType>) -> Fut,
    Fut: Future<Output = Result<D, ClassifyError>>,
{
    // read as far as the first HEADERS frame
    let media_type = loop {
        match frames.recv().await {
            Some(frame) => match classifier.recv_frame(frame) {
                RecvFrameAction::Forward(frame) => forward(downstream, frame).await?,
                RecvFrameAction::InvokeDecision(media_type) => break media_type,
                RecvFrameAction::Buffered | RecvFrameAction::Discarded => {}
            },
            None => {
                classifier.channel_inactive();
                return Err(ClassifyError::ChannelClosed);
            }
        }
    };

    // keep accepting frames while the decision function runs
    let decision_fut = decide(media_type);
    tokio::pin!(decision_fut);
    let result = loop {
        tokio::select! {
            r = &mut decision_fut => break r,
            frame = frames.recv() => match frame {
                Some(frame) => {
                    let _ = classifier.recv_frame(frame);
                }
                None => {
                    classifier.channel_inactive();
                    return Err(ClassifyError::ChannelClosed);
                }
            }
        }
    };

    match classifier.decision_resolved(result)? {
        Resolution::Detached | Resolution::Ignored => {}
        Resolution::Unbuffer => drain(&mut classifier, frames, downstream).await?,
        Resolution::ErrorThenDetached(e) => {
            let _ = downstream.send(FrameEvent::Error(e.clone())).await;
            return Err(e);
        }
        Resolution::ErrorThenUnbuffer(e) => {
            // drain-with-error: the downstream side sees the error first,
            // then the buffered frames, so nothing is left orphaned
            let _ = downstream.send(FrameEvent::Error(e.clone())).await;
            drain(&mut classifier, frames, downstream).await?;
            return Err(e);
        }
    }

    // classifier detached, plain pass-through from here on
    loop {
        match frames.recv().await {
            Some(frame) => {
                if let RecvFrameAction::Forward(frame) = classifier.recv_frame(frame) {
                    forward(downstream, frame).await?;
                }
            }
            None => return Ok(()),
        }
    }
}

async fn drain<D>(
    classifier: &mut ContentTypeClassifier<D>,
    frames: &mut mpsc::Receiver<FramePayload>,
    downstream: &mpsc::Sender<FrameEvent>,
) -> Result<(), ClassifyError> {
    loop {
        // frames arriving while draining join the tail of the buffer
        while let Ok(frame) = frames.try_recv() {
            let _ = classifier.recv_frame(frame);
        }
        match classifier.unbuffer()? {
            UnbufferAction::Forward(frame) => forward(downstream, frame).await?,
            UnbufferAction::ReadComplete => {
                let _ = downstream.send(FrameEvent::ReadComplete).await;
                return Ok(());
            }
        }
    }
}

async fn forward(
    downstream: &mpsc::Sender<FrameEvent>,
    frame: FramePayload,
) -> Result<(), ClassifyError> {
    downstream
        .send(FrameEvent::Frame(frame))
        .await
        .map_err(|_| ClassifyError::SinkClosed)
}
