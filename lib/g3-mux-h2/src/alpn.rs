/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;

/// The application protocols this gateway is able to negotiate via TLS ALPN.
///
/// `GrpcExp` is the legacy pre-standardization token some gRPC clients send
/// instead of `h2`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AlpnProtocol {
    Http11,
    Http2,
    GrpcExp,
}

impl fmt::Display for AlpnProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AlpnProtocol {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Http11 => "http/1.1",
            Self::Http2 => "h2",
            Self::GrpcExp => "grpc-exp",
        }
    }

    pub fn wired_identification_sequence(&self) -> &'static [u8] {
        match self {
            Self::Http11 => b"\x08http/1.1",
            Self::Http2 => b"\x02h2",
            Self::GrpcExp => b"\x08grpc-exp",
        }
    }

    #[inline]
    pub fn identification_sequence(&self) -> &'static [u8] {
        &self.wired_identification_sequence()[1..]
    }

    #[inline]
    pub fn to_identification_sequence(&self) -> Vec<u8> {
        self.identification_sequence().to_vec()
    }

    pub fn from_buf(buf: &[u8]) -> Option<Self> {
        match buf {
            b"http/1.1" => Some(AlpnProtocol::Http11),
            b"h2" => Some(AlpnProtocol::Http2),
            b"grpc-exp" => Some(AlpnProtocol::GrpcExp),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_buf() {
        assert_eq!(AlpnProtocol::from_buf(b"http/1.1"), Some(AlpnProtocol::Http11));
        assert_eq!(AlpnProtocol::from_buf(b"h2"), Some(AlpnProtocol::Http2));
        assert_eq!(AlpnProtocol::from_buf(b"grpc-exp"), Some(AlpnProtocol::GrpcExp));
        assert!(AlpnProtocol::from_buf(b"spdy/3").is_none());
        assert!(AlpnProtocol::from_buf(b"h3").is_none());
        assert!(AlpnProtocol::from_buf(b"").is_none());
    }

    #[test]
    fn identification_sequence() {
        for p in [AlpnProtocol::Http11, AlpnProtocol::Http2, AlpnProtocol::GrpcExp] {
            let wired = p.wired_identification_sequence();
            assert_eq!(wired[0] as usize, wired.len() - 1);
            assert_eq!(p.identification_sequence(), p.as_str().as_bytes());
        }
    }
}
