/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use foldhash::fast::FixedState;
use http::{HeaderValue, Response, StatusCode, header};
use log::{debug, warn};

use g3_mux_h2::HeadersFrame;

use crate::module::http::{H2Stream, H2StreamEngine};
use crate::serve::ServerTaskError;

/// gRPC status code for a method the server does not implement.
const GRPC_STATUS_UNIMPLEMENTED: &str = "12";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrpcMessageEncoding {
    Disabled,
    /// Compression coding names in server preference order.
    Enabled(Vec<String>),
}

impl Default for GrpcMessageEncoding {
    fn default() -> Self {
        GrpcMessageEncoding::Disabled
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcServerConfig {
    pub encoding: GrpcMessageEncoding,
    /// Lowercase incoming custom metadata keys before they reach handlers.
    pub normalize_headers: bool,
    pub max_recv_message_size: usize,
}

impl Default for GrpcServerConfig {
    fn default() -> Self {
        GrpcServerConfig {
            encoding: GrpcMessageEncoding::default(),
            normalize_headers: true,
            max_recv_message_size: 4 * 1024 * 1024,
        }
    }
}

/// One accepted gRPC call, handed to the registered method handler with the
/// request frames still streaming in.
pub struct GrpcCall {
    pub service: String,
    pub method: String,
    pub headers: HeadersFrame,
    pub stream: H2Stream,
    pub config: Arc<GrpcServerConfig>,
}

#[async_trait]
pub trait GrpcCallHandler: Send + Sync + 'static {
    async fn handle_call(&self, call: GrpcCall) -> Result<(), ServerTaskError>;
}

/// Observer for handler failures, meant for things like error reporters
/// that want the raw error before it is reduced to a gRPC status.
pub trait GrpcErrorDelegate: Send + Sync + 'static {
    fn observe_error(&self, service: &str, method: &str, error: &ServerTaskError);
}

#[derive(Default)]
pub struct GrpcServiceRegistryBuilder {
    handlers: HashMap<String, Arc<dyn GrpcCallHandler>, FixedState>,
}

impl GrpcServiceRegistryBuilder {
    pub fn add_method<T>(mut self, service: &str, method: &str, handler: Arc<T>) -> Self
    where
        T: GrpcCallHandler,
    {
        self.handlers.insert(format!("{service}/{method}"), handler);
        self
    }

    pub fn build(self) -> GrpcServiceRegistry {
        GrpcServiceRegistry {
            handlers: self.handlers,
        }
    }
}

/// Immutable method lookup table, fully built before the server starts so
/// lookups are lock free.
pub struct GrpcServiceRegistry {
    handlers: HashMap<String, Arc<dyn GrpcCallHandler>, FixedState>,
}

impl GrpcServiceRegistry {
    pub fn get(&self, service: &str, method: &str) -> Option<Arc<dyn GrpcCallHandler>> {
        self.handlers.get(&format!("{service}/{method}")).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}

/// A stream's first HEADERS frame must carry request pseudo headers, a
/// trailers block can not open a stream.
fn request_path(headers: &HeadersFrame) -> Result<&str, ServerTaskError> {
    match &headers.pseudo {
        Some(pseudo) => Ok(&pseudo.path),
        None => Err(ServerTaskError::UnexpectedFramePart("trailer HEADERS")),
    }
}

/// Split a request path of the form `/package.Service/Method`.
fn split_method_path(path: &str) -> Option<(&str, &str)> {
    let path = path.split('?').next().unwrap_or(path);
    let (service, method) = path.strip_prefix('/')?.split_once('/')?;
    if service.is_empty() || method.is_empty() || method.contains('/') {
        return None;
    }
    Some((service, method))
}

pub struct GrpcEngine {
    registry: Arc<GrpcServiceRegistry>,
    config: Arc<GrpcServerConfig>,
    error_delegate: Option<Arc<dyn GrpcErrorDelegate>>,
}

impl GrpcEngine {
    pub fn new(registry: Arc<GrpcServiceRegistry>, config: Arc<GrpcServerConfig>) -> Self {
        GrpcEngine {
            registry,
            config,
            error_delegate: None,
        }
    }

    pub fn with_error_delegate(mut self, delegate: Arc<dyn GrpcErrorDelegate>) -> Self {
        self.error_delegate = Some(delegate);
        self
    }
}

pub enum GrpcStreamValue {
    Call {
        handler: Arc<dyn GrpcCallHandler>,
        call: GrpcCall,
    },
    Unimplemented {
        path: String,
        stream: H2Stream,
    },
}

#[async_trait]
impl H2StreamEngine for GrpcEngine {
    type Value = GrpcStreamValue;

    async fn setup(&self, mut stream: H2Stream) -> Result<Self::Value, ServerTaskError> {
        let mut headers = stream.recv_request_headers().await?;
        let path = request_path(&headers)?.to_string();

        let Some((service, method)) = split_method_path(&path) else {
            return Ok(GrpcStreamValue::Unimplemented { path, stream });
        };
        let Some(handler) = self.registry.get(service, method) else {
            return Ok(GrpcStreamValue::Unimplemented { path, stream });
        };

        let service = service.to_string();
        let method = method.to_string();
        if matches!(self.config.encoding, GrpcMessageEncoding::Disabled) {
            // we never compress, so handlers should not see the offer
            headers.fields.remove("grpc-accept-encoding");
        }
        Ok(GrpcStreamValue::Call {
            handler,
            call: GrpcCall {
                service,
                method,
                headers,
                stream,
                config: self.config.clone(),
            },
        })
    }

    async fn handle(&self, value: Self::Value) {
        match value {
            GrpcStreamValue::Call { handler, call } => {
                let service = call.service.clone();
                let method = call.method.clone();
                if let Err(e) = handler.handle_call(call).await {
                    warn!("grpc call {service}/{method} failed: {e}");
                    if let Some(delegate) = &self.error_delegate {
                        delegate.observe_error(&service, &method, &e);
                    }
                }
            }
            GrpcStreamValue::Unimplemented { path, mut stream } => {
                debug!("unimplemented grpc method called: {path}");
                if let Err(e) = send_unimplemented(&mut stream) {
                    debug!("failed to send unimplemented response: {e}");
                    return;
                }
                stream.drain().await;
            }
        }
    }
}

/// Trailers-only response carrying `grpc-status` 12 (UNIMPLEMENTED).
fn send_unimplemented(stream: &mut H2Stream) -> Result<(), ServerTaskError> {
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HeaderValue::from_static("application/grpc"))
        .header("grpc-status", HeaderValue::from_static(GRPC_STATUS_UNIMPLEMENTED))
        .header("grpc-message", HeaderValue::from_static("unimplemented method"))
        .body(())
        .unwrap_or_default();
    stream
        .send_response
        .send_response(response, true)
        .map_err(ServerTaskError::SendResponseFailed)?;
    Ok(())
}
