use std::future::Future;
use std::time::Duration;

use opentelemetry::propagation::Injector;
use tokio_util::sync::CancellationToken;
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};
use tonic::service::Interceptor;
use tonic::{Request, Response, Status};
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::errors::{CliError, CliResult};
use crate::grpc::retry::{retry_unavailable, UNARY_BACKOFF};

/// Deadline and cancellation shared by every call a verb makes.
#[derive(Debug, Clone)]
pub struct RequestContext {
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            timeout: Some(timeout),
            cancel,
        }
    }

    /// Same cancellation, different per-call deadline. `None` disables it.
    pub fn with_timeout(&self, timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            cancel: self.cancel.clone(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        if let Some(timeout) = self.timeout {
            request.set_timeout(timeout);
        }
        request
    }

    /// Runs a unary call under the context deadline, retrying once on
    /// `Unavailable`, and returns `Interrupted` as soon as the context is
    /// cancelled. `subject` names the object addressed, for `NotFound`.
    pub async fn unary<T, F, Fut>(
        &self,
        method: &'static str,
        subject: Option<&str>,
        mut call: F,
    ) -> CliResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Response<T>, Status>>,
    {
        let span = tracing::info_span!(
            "rpc",
            otel.name = method,
            otel.kind = "client",
            otel.status_code = tracing::field::Empty,
            rpc.system = "grpc",
            rpc.method = method,
        );
        let timeout = self.timeout;
        let attempt = || {
            let pending = call();
            async move {
                match timeout {
                    Some(limit) => match tokio::time::timeout(limit, pending).await {
                        Ok(result) => result.map(Response::into_inner),
                        Err(_) => Err(Status::deadline_exceeded("context deadline exceeded")),
                    },
                    None => pending.await.map(Response::into_inner),
                }
            }
        };

        let outcome = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(CliError::Interrupted),
                result = retry_unavailable(attempt, UNARY_BACKOFF, method) => {
                    result.map_err(|status| CliError::from_status(status, subject))
                }
            }
        }
        .instrument(span.clone())
        .await;

        if let Err(err) = &outcome {
            span.record("otel.status_code", "ERROR");
            tracing::debug!(parent: &span, method, "call failed: {err}");
        }
        outcome
    }
}

/// Injects the current span's trace context into outgoing call metadata.
/// A no-op unless a propagator was installed by the tracing initializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceContextInterceptor;

impl Interceptor for TraceContextInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let context = tracing::Span::current().context();
        opentelemetry::global::get_text_map_propagator(|propagator| {
            propagator.inject_context(&context, &mut MetadataInjector(request.metadata_mut()))
        });
        Ok(request)
    }
}

pub struct MetadataInjector<'a>(pub &'a mut MetadataMap);

impl Injector for MetadataInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(key), Ok(value)) = (
            MetadataKey::from_bytes(key.as_bytes()),
            value.parse::<MetadataValue<_>>(),
        ) {
            self.0.insert(key, value);
        }
    }
}
