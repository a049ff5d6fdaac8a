/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::str::FromStr;

use mime::Mime;

/// A parsed `type/subtype` media type taken from a Content-Type header value.
#[derive(Clone, Debug)]
pub struct MediaType {
    inner: Mime,
}

impl MediaType {
    /// Parse a Content-Type header value. Returns `None` for unparsable values,
    /// the caller treats that the same as an absent header.
    pub fn parse(value: &str) -> Option<Self> {
        let inner = Mime::from_str(value.trim()).ok()?;
        Some(MediaType { inner })
    }

    /// Whether this media type selects the gRPC protocol for a stream.
    ///
    /// Matches `application/grpc` as well as suffixed forms such as
    /// `application/grpc+proto`, with or without parameters.
    pub fn is_grpc(&self) -> bool {
        self.inner.type_() == mime::APPLICATION && self.inner.subtype() == "grpc"
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}
