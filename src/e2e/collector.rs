//! Minimal OTLP/gRPC trace sink.
//!
//! Every exported span is flattened out of its resource and scope and
//! appended, in receipt order, to a list readers can snapshot.
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::{
    TraceService, TraceServiceServer,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use opentelemetry_proto::tonic::common::v1::any_value::Value as AnyValueKind;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use super::{HarnessError, HarnessResult};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct CollectedSpan {
    pub trace_id: String,
    pub span_id: String,
    /// Empty for root spans.
    pub parent_span_id: String,
    pub name: String,
    pub service_name: Option<String>,
    pub start_unix_nanos: u64,
    pub end_unix_nanos: u64,
    pub attributes: BTreeMap<String, String>,
    pub status_code: i32,
}

impl CollectedSpan {
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_empty()
    }
}

type SpanLog = Arc<Mutex<Vec<CollectedSpan>>>;

struct TraceSink {
    spans: SpanLog,
}

#[tonic::async_trait]
impl TraceService for TraceSink {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let flattened = flatten(request.into_inner());
        debug!(count = flattened.len(), "collector received spans");
        self.spans.lock().extend(flattened);
        Ok(Response::new(ExportTraceServiceResponse::default()))
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn value_text(value: &Option<AnyValue>) -> String {
    match value.as_ref().and_then(|v| v.value.as_ref()) {
        Some(AnyValueKind::StringValue(s)) => s.clone(),
        Some(AnyValueKind::BoolValue(b)) => b.to_string(),
        Some(AnyValueKind::IntValue(i)) => i.to_string(),
        Some(AnyValueKind::DoubleValue(d)) => d.to_string(),
        Some(other) => format!("{other:?}"),
        None => String::new(),
    }
}

fn attribute_map(attributes: &[KeyValue]) -> BTreeMap<String, String> {
    attributes
        .iter()
        .map(|kv| (kv.key.clone(), value_text(&kv.value)))
        .collect()
}

/// Resource spans → scope spans → spans, preserving order.
pub fn flatten(request: ExportTraceServiceRequest) -> Vec<CollectedSpan> {
    let mut out = Vec::new();
    for resource_spans in request.resource_spans {
        let service_name = resource_spans
            .resource
            .as_ref()
            .and_then(|r| attribute_map(&r.attributes).remove("service.name"));
        for scope_spans in resource_spans.scope_spans {
            for span in scope_spans.spans {
                out.push(CollectedSpan {
                    trace_id: hex(&span.trace_id),
                    span_id: hex(&span.span_id),
                    parent_span_id: hex(&span.parent_span_id),
                    name: span.name,
                    service_name: service_name.clone(),
                    start_unix_nanos: span.start_time_unix_nano,
                    end_unix_nanos: span.end_time_unix_nano,
                    attributes: attribute_map(&span.attributes),
                    status_code: span.status.map(|s| s.code).unwrap_or_default(),
                });
            }
        }
    }
    out
}

/// In-process OTLP trace collector on a kernel-chosen loopback port.
pub struct Collector {
    address: SocketAddr,
    spans: SpanLog,
    server: JoinHandle<()>,
}

impl Collector {
    pub async fn start() -> HarnessResult<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let spans = SpanLog::default();
        let sink = TraceSink {
            spans: Arc::clone(&spans),
        };

        let server = tokio::spawn(async move {
            let result = Server::builder()
                .add_service(TraceServiceServer::new(sink))
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await;
            if let Err(err) = result {
                warn!("collector server stopped: {err}");
            }
        });
        debug!(%address, "collector listening");

        Ok(Self {
            address,
            spans,
            server,
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// `host:port` form accepted by `--tracing-endpoint`.
    pub fn endpoint(&self) -> String {
        self.address.to_string()
    }

    /// Snapshot of every span received so far.
    pub fn spans(&self) -> Vec<CollectedSpan> {
        self.spans.lock().clone()
    }

    pub fn clear(&self) {
        self.spans.lock().clear();
    }

    /// Waits until `predicate` holds for the received spans.
    pub async fn wait_for_spans<F>(&self, timeout: Duration, predicate: F) -> HarnessResult<Vec<CollectedSpan>>
    where
        F: Fn(&[CollectedSpan]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let spans = self.spans();
            if predicate(&spans) {
                return Ok(spans);
            }
            if Instant::now() >= deadline {
                return Err(HarnessError::Collector(format!(
                    "condition not met within {timeout:?}; {} spans received",
                    spans.len()
                )));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Halts the server, dropping in-flight exports.
    pub fn stop(&self) {
        self.server.abort();
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.server.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
    use opentelemetry_proto::tonic::resource::v1::Resource;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};

    fn request(service: &str, names: &[&str]) -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![KeyValue {
                        key: "service.name".into(),
                        value: Some(AnyValue {
                            value: Some(AnyValueKind::StringValue(service.into())),
                        }),
                    }],
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    spans: names
                        .iter()
                        .enumerate()
                        .map(|(i, name)| Span {
                            trace_id: vec![0xab; 16],
                            span_id: vec![i as u8 + 1; 8],
                            parent_span_id: if i == 0 { Vec::new() } else { vec![1; 8] },
                            name: name.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    #[test]
    fn flatten_keeps_order_and_parents() {
        let spans = flatten(request("cri-tools", &["ps", "/runtime.v1.RuntimeService/ListContainers"]));
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "ps");
        assert!(spans[0].is_root());
        assert_eq!(spans[1].parent_span_id, spans[0].span_id);
        assert_eq!(spans[1].trace_id, "ab".repeat(16));
        assert_eq!(spans[1].service_name.as_deref(), Some("cri-tools"));
    }

    #[tokio::test]
    async fn export_over_grpc_is_recorded() {
        let collector = Collector::start().await.unwrap();
        let mut client = TraceServiceClient::connect(format!("http://{}", collector.endpoint()))
            .await
            .unwrap();
        client.export(request("cri-tools", &["version"])).await.unwrap();
        client.export(request("cri-tools", &["info"])).await.unwrap();

        let spans = collector
            .wait_for_spans(Duration::from_secs(5), |spans| spans.len() == 2)
            .await
            .unwrap();
        assert_eq!(spans[0].name, "version");
        assert_eq!(spans[1].name, "info");

        collector.clear();
        assert!(collector.spans().is_empty());
        collector.stop();
    }

    #[tokio::test]
    async fn wait_gives_up_after_timeout() {
        let collector = Collector::start().await.unwrap();
        let result = collector
            .wait_for_spans(Duration::from_millis(100), |spans| !spans.is_empty())
            .await;
        assert!(matches!(result, Err(HarnessError::Collector(_))));
    }
}
