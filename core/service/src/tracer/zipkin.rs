// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{FinishedSpan, SpanRecorder};
use crate::errors::ServiceError;

const SPANS_PATH: &str = "/api/v2/spans";
const MAX_BATCH: usize = 64;

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct ZipkinSpan {
    trace_id: String,
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    name: String,
    kind: &'static str,
    timestamp: u64,
    duration: u64,
    local_endpoint: Endpoint,
    annotations: Vec<Annotation>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Endpoint {
    service_name: String,
}

#[derive(Debug, Serialize, PartialEq)]
struct Annotation {
    timestamp: u64,
    value: &'static str,
}

impl From<FinishedSpan> for ZipkinSpan {
    fn from(span: FinishedSpan) -> Self {
        ZipkinSpan {
            trace_id: span.context.trace_id,
            id: span.context.span_id,
            parent_id: span.context.parent_span_id,
            name: span.name,
            kind: span.kind.as_str(),
            timestamp: span.timestamp,
            duration: span.duration,
            local_endpoint: Endpoint {
                service_name: span.service,
            },
            annotations: span
                .annotations
                .into_iter()
                .map(|(timestamp, value)| Annotation { timestamp, value })
                .collect(),
        }
    }
}

/// Reports sampled spans to a Zipkin collector in batches.
///
/// Spans are queued without blocking the call path and posted by a
/// background task. Delivery is best effort: a failed post is logged and
/// the batch dropped.
pub struct ZipkinRecorder {
    tx: mpsc::UnboundedSender<FinishedSpan>,
}

impl ZipkinRecorder {
    /// Start the reporting task. Must be called from within a tokio runtime.
    pub fn new(endpoint: &str) -> Result<Self, ServiceError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            ServiceError::ConfigError(format!("zipkin reporter needs a runtime: {}", e))
        })?;

        let url = format!("{}{}", endpoint.trim_end_matches('/'), SPANS_PATH);
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(report(url, rx));

        Ok(ZipkinRecorder { tx })
    }
}

impl SpanRecorder for ZipkinRecorder {
    fn record(&self, span: FinishedSpan) {
        if !span.context.is_sampled() {
            return;
        }
        if self.tx.send(span).is_err() {
            debug!("zipkin reporter stopped, span dropped");
        }
    }
}

async fn report(url: String, mut rx: mpsc::UnboundedReceiver<FinishedSpan>) {
    let client = reqwest::Client::new();

    while let Some(first) = rx.recv().await {
        let mut batch: Vec<ZipkinSpan> = vec![first.into()];
        while batch.len() < MAX_BATCH {
            match rx.try_recv() {
                Ok(span) => batch.push(span.into()),
                Err(_) => break,
            }
        }

        match client.post(&url).json(&batch).send().await {
            Ok(res) if res.status().is_success() => {
                debug!(spans = batch.len(), "spans reported");
            }
            Ok(res) => warn!(status = %res.status(), %url, "zipkin collector rejected spans"),
            Err(e) => warn!(error = %e, %url, "failed to report spans"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::{SEND_COMPLETED, SpanKind, TraceContext};
    use serde_json::json;

    #[test]
    fn test_span_json() {
        let span = FinishedSpan {
            context: TraceContext {
                trace_id: "t".to_string(),
                span_id: "s".to_string(),
                parent_span_id: Some("p".to_string()),
                sampled: Some(true),
            },
            kind: SpanKind::Client,
            service: "calc".to_string(),
            name: "calc.sum".to_string(),
            timestamp: 10,
            duration: 5,
            annotations: vec![(15, SEND_COMPLETED)],
        };

        let value = serde_json::to_value(ZipkinSpan::from(span)).unwrap();
        assert_eq!(
            value,
            json!({
                "traceId": "t",
                "id": "s",
                "parentId": "p",
                "name": "calc.sum",
                "kind": "CLIENT",
                "timestamp": 10,
                "duration": 5,
                "localEndpoint": {"serviceName": "calc"},
                "annotations": [{"timestamp": 15, "value": "ss"}],
            })
        );
    }

    #[test]
    fn test_requires_runtime() {
        assert!(matches!(
            ZipkinRecorder::new("http://localhost:9411"),
            Err(ServiceError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_unsampled_spans_are_skipped() {
        // nothing listens on this port; recording must not block or panic
        let recorder = ZipkinRecorder::new("http://127.0.0.1:9").unwrap();
        recorder.record(FinishedSpan {
            context: TraceContext::root(Some(false)),
            kind: SpanKind::Server,
            service: "calc".to_string(),
            name: "calc.sum".to_string(),
            timestamp: 0,
            duration: 0,
            annotations: vec![],
        });
    }
}
