// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! B3 trace context propagation.
//!
//! Every call carries its trace context explicitly in `Request::tracer_data`.
//! The tracer reads the inbound headers, derives the context of the new span
//! (root or child), writes it back onto the request and returns a
//! [`TraceSpan`] that owns everything needed to finish that span later.

pub mod zipkin;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{Level, debug, span};

use crate::request::{Request, TRACE_ID_KEY};

pub use zipkin::ZipkinRecorder;

pub const TRACE_ID_HEADER: &str = "X-B3-Traceid";
pub const SPAN_ID_HEADER: &str = "X-B3-Spanid";
pub const PARENT_SPAN_ID_HEADER: &str = "X-B3-Parentspanid";
pub const SAMPLED_HEADER: &str = "X-B3-Sampled";

// names used by peers that do not canonicalize header keys
const LEGACY_TRACE_ID_HEADER: &str = "X-B3-TraceId";
const LEGACY_SPAN_ID_HEADER: &str = "X-B3-SpanId";
const LEGACY_PARENT_SPAN_ID_HEADER: &str = "X-B3-ParentSpanId";

/// Annotation recorded when a span is closed.
pub const SEND_COMPLETED: &str = "ss";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// 128-bit id as 32 lowercase hex chars
    pub trace_id: String,
    /// 64-bit id as 16 lowercase hex chars
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub sampled: Option<bool>,
}

impl TraceContext {
    pub fn root(sampled: Option<bool>) -> Self {
        TraceContext {
            trace_id: new_trace_id(),
            span_id: new_span_id(),
            parent_span_id: None,
            sampled,
        }
    }

    /// New span inside `trace_id` whose parent is `parent_span_id`.
    pub fn child_of(
        trace_id: impl Into<String>,
        parent_span_id: impl Into<String>,
        sampled: Option<bool>,
    ) -> Self {
        TraceContext {
            trace_id: trace_id.into(),
            span_id: new_span_id(),
            parent_span_id: Some(parent_span_id.into()),
            sampled,
        }
    }

    /// Read a context from raw wire headers.
    ///
    /// Both header spellings are accepted. When a key is present in both
    /// forms the canonical one (`X-B3-Traceid`) takes precedence over the
    /// mixed-case one (`X-B3-TraceId`). Only the first value of each header
    /// is considered. A context needs at least a trace id and a span id.
    pub fn from_tracer_data(data: &HashMap<String, Vec<String>>) -> Option<Self> {
        let trace_id = header(data, TRACE_ID_HEADER, LEGACY_TRACE_ID_HEADER)?;
        let span_id = header(data, SPAN_ID_HEADER, LEGACY_SPAN_ID_HEADER)?;
        let parent_span_id = header(data, PARENT_SPAN_ID_HEADER, LEGACY_PARENT_SPAN_ID_HEADER);
        let sampled = header(data, SAMPLED_HEADER, SAMPLED_HEADER).and_then(parse_sampled);

        Some(TraceContext {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            parent_span_id: parent_span_id.map(str::to_string),
            sampled,
        })
    }

    pub fn to_tracer_data(&self) -> HashMap<String, Vec<String>> {
        let mut data = HashMap::new();
        data.insert(TRACE_ID_HEADER.to_string(), vec![self.trace_id.clone()]);
        data.insert(SPAN_ID_HEADER.to_string(), vec![self.span_id.clone()]);
        if let Some(parent) = &self.parent_span_id {
            data.insert(PARENT_SPAN_ID_HEADER.to_string(), vec![parent.clone()]);
        }
        if let Some(sampled) = self.sampled {
            data.insert(SAMPLED_HEADER.to_string(), vec![sampled.to_string()]);
        }
        data
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled.unwrap_or(false)
    }
}

fn header<'a>(data: &'a HashMap<String, Vec<String>>, name: &str, legacy: &str) -> Option<&'a str> {
    data.get(name)
        .or_else(|| data.get(legacy))
        .and_then(|values| values.first())
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

fn parse_sampled(value: &str) -> Option<bool> {
    match value {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn new_trace_id() -> String {
    format!("{:032x}", rand::random::<u128>().max(1))
}

fn new_span_id() -> String {
    format!("{:016x}", rand::random::<u64>().max(1))
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Client,
    Server,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Client => "CLIENT",
            SpanKind::Server => "SERVER",
        }
    }
}

/// A span that completed, handed to a [`SpanRecorder`].
#[derive(Debug, Clone)]
pub struct FinishedSpan {
    pub context: TraceContext,
    pub kind: SpanKind,
    pub service: String,
    pub name: String,
    /// start, microseconds since the epoch
    pub timestamp: u64,
    pub duration: u64,
    pub annotations: Vec<(u64, &'static str)>,
}

pub trait SpanRecorder: Send + Sync {
    fn record(&self, span: FinishedSpan);
}

/// Writes finished spans to the diagnostic log.
#[derive(Debug, Default, Clone)]
pub struct LogRecorder;

impl SpanRecorder for LogRecorder {
    fn record(&self, span: FinishedSpan) {
        debug!(
            service = %span.service,
            name = %span.name,
            kind = span.kind.as_str(),
            trace_id = %span.context.trace_id,
            span_id = %span.context.span_id,
            parent_span_id = ?span.context.parent_span_id,
            duration_us = span.duration,
            "span finished"
        );
    }
}

/// Open span of one call. Closing it is the only way to finish it.
pub struct TraceSpan {
    context: TraceContext,
    kind: SpanKind,
    service: String,
    name: String,
    span: tracing::Span,
    timestamp: u64,
    started: Instant,
    recorder: Arc<dyn SpanRecorder>,
}

impl TraceSpan {
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    pub fn kind(&self) -> SpanKind {
        self.kind
    }

    /// Diagnostic span that was active when the call was traced.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Record the send-completed annotation and report the span.
    pub fn close(self) {
        let duration = self.started.elapsed().as_micros() as u64;
        self.span.in_scope(|| {
            debug!(annotation = SEND_COMPLETED, duration_us = duration, "send completed");
        });

        self.recorder.record(FinishedSpan {
            context: self.context,
            kind: self.kind,
            service: self.service,
            name: self.name,
            timestamp: self.timestamp,
            duration,
            annotations: vec![(self.timestamp + duration, SEND_COMPLETED)],
        });
    }
}

pub trait Tracer: Send + Sync {
    /// Derive the context of a new span for `request`, stamp it onto the
    /// request and open the span.
    fn start_span(&self, request: &mut Request, kind: SpanKind) -> TraceSpan;

    /// Client side of a call.
    fn trace(&self, request: &mut Request) -> TraceSpan {
        self.start_span(request, SpanKind::Client)
    }
}

/// Default tracer, propagating B3 headers.
pub struct B3Tracer {
    service: String,
    sampled: bool,
    recorder: Arc<dyn SpanRecorder>,
}

impl B3Tracer {
    pub fn new(service: impl Into<String>) -> Self {
        B3Tracer {
            service: service.into(),
            sampled: true,
            recorder: Arc::new(LogRecorder),
        }
    }

    pub fn with_sampled(self, sampled: bool) -> Self {
        B3Tracer { sampled, ..self }
    }

    pub fn with_recorder(self, recorder: Arc<dyn SpanRecorder>) -> Self {
        B3Tracer { recorder, ..self }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Context of the next span: a child of the inbound one if the request
    /// carries headers, a fresh root otherwise.
    pub fn derive(&self, request: &Request) -> TraceContext {
        match TraceContext::from_tracer_data(&request.tracer_data) {
            Some(inbound) => TraceContext::child_of(
                inbound.trace_id,
                inbound.span_id,
                inbound.sampled.or(Some(self.sampled)),
            ),
            None => TraceContext::root(Some(self.sampled)),
        }
    }
}

impl Tracer for B3Tracer {
    fn start_span(&self, request: &mut Request, kind: SpanKind) -> TraceSpan {
        let context = self.derive(request);

        request
            .meta
            .insert(TRACE_ID_KEY.to_string(), context.trace_id.clone());
        request.tracer_data = context.to_tracer_data();

        let span = span!(
            Level::DEBUG,
            "rpc",
            service = %self.service,
            path = %request.path,
            kind = kind.as_str(),
            trace_id = %context.trace_id,
            span_id = %context.span_id,
        );

        TraceSpan {
            context,
            kind,
            service: self.service.clone(),
            name: request.path.clone(),
            span,
            timestamp: now_micros(),
            started: Instant::now(),
            recorder: self.recorder.clone(),
        }
    }
}
