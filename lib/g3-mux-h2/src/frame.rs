/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method};

/// The request pseudo headers of a HEADERS frame. Trailer blocks carry none.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestPseudo {
    pub method: Method,
    pub scheme: Option<String>,
    pub authority: Option<String>,
    pub path: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HeadersFrame {
    pub pseudo: Option<RequestPseudo>,
    pub fields: HeaderMap,
    pub end_stream: bool,
}

impl HeadersFrame {
    pub fn request(pseudo: RequestPseudo, fields: HeaderMap, end_stream: bool) -> Self {
        HeadersFrame {
            pseudo: Some(pseudo),
            fields,
            end_stream,
        }
    }

    pub fn trailers(fields: HeaderMap) -> Self {
        HeadersFrame {
            pseudo: None,
            fields,
            end_stream: true,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.fields.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

/// One inbound HTTP/2 frame as seen by a stream, discriminated only as far as
/// the content-type classifier needs. Everything else stays opaque.
#[derive(Clone, Debug, PartialEq)]
pub enum FramePayload {
    Headers(HeadersFrame),
    Data { data: Bytes, end_stream: bool },
    WindowUpdate { size_increment: u32 },
    Other { frame_type: u8 },
}

impl FramePayload {
    pub fn frame_type(&self) -> &'static str {
        match self {
            FramePayload::Headers(_) => "HEADERS",
            FramePayload::Data { .. } => "DATA",
            FramePayload::WindowUpdate { .. } => "WINDOW_UPDATE",
            FramePayload::Other { .. } => "OTHER",
        }
    }
}
