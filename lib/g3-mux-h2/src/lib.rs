/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod alpn;
pub use alpn::AlpnProtocol;

mod media_type;
pub use media_type::MediaType;

mod frame;
pub use frame::{FramePayload, HeadersFrame, RequestPseudo};

pub mod classify;
pub use classify::{
    ClassifyError, ContentTypeClassifier, DecisionFuture, FrameEvent, StreamClass, classify_stream,
};
