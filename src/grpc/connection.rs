use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::codegen::InterceptedService;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

use crate::config::Config;
use crate::cri::image_service_client::ImageServiceClient;
use crate::cri::runtime_service_client::RuntimeServiceClient;
use crate::cri::VersionRequest;
use crate::errors::{BoxError, CliError, CliResult};
use crate::grpc::context::{RequestContext, TraceContextInterceptor};
use crate::grpc::endpoint::EndpointAddr;

pub type TracedChannel = InterceptedService<Channel, TraceContextInterceptor>;
pub type RuntimeClient = RuntimeServiceClient<TracedChannel>;
pub type ImageClient = ImageServiceClient<TracedChannel>;

const CRI_API_VERSION: &str = "v1";

/// Opens an HTTP/2 channel to `endpoint`, bounded by `connect_timeout`.
pub async fn dial(endpoint: &EndpointAddr, connect_timeout: Duration) -> CliResult<Channel> {
    let unreachable = |source: BoxError| CliError::EndpointUnreachable {
        endpoint: endpoint.to_string(),
        source,
    };

    let connecting = async {
        match endpoint {
            EndpointAddr::Unix(path) => {
                let path = path.clone();
                tune(Endpoint::from_static("http://[::]:50051"), connect_timeout)
                    .connect_with_connector(service_fn(move |_: Uri| {
                        let path = path.clone();
                        async move {
                            Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?))
                        }
                    }))
                    .await
                    .map_err(|err| unreachable(Box::new(err)))
            }
            EndpointAddr::Tcp(addr) => {
                let builder = Endpoint::from_shared(format!("http://{addr}"))
                    .map_err(|err| unreachable(Box::new(err)))?;
                tune(builder, connect_timeout)
                    .connect()
                    .await
                    .map_err(|err| unreachable(Box::new(err)))
            }
        }
    };

    match tokio::time::timeout(connect_timeout, connecting).await {
        Ok(result) => result,
        Err(elapsed) => Err(unreachable(Box::new(elapsed))),
    }
}

fn tune(endpoint: Endpoint, connect_timeout: Duration) -> Endpoint {
    endpoint
        .connect_timeout(connect_timeout)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .http2_keep_alive_interval(Duration::from_secs(30))
        .keep_alive_while_idle(true)
}

/// Runtime and image service clients over one or two channels.
#[derive(Debug, Clone)]
pub struct CriConnection {
    endpoint: EndpointAddr,
    runtime: RuntimeClient,
    image: ImageClient,
}

impl CriConnection {
    /// Dials the configured endpoint, or probes the default list with a
    /// `Version` call and keeps the first runtime that answers. The image
    /// service shares the runtime channel unless a distinct endpoint is set.
    pub async fn connect(config: &Config, ctx: &RequestContext) -> CliResult<Self> {
        let dial_timeout = config.timeout;
        let (endpoint, runtime_channel) = if config.endpoint_configured {
            let endpoint = config
                .runtime_endpoints
                .first()
                .cloned()
                .ok_or_else(|| CliError::InvalidArgument("runtime endpoint is not set".into()))?;
            let channel = dial(&endpoint, dial_timeout).await?;
            (endpoint, channel)
        } else {
            probe_defaults(&config.runtime_endpoints, dial_timeout, ctx).await?
        };

        let image_channel = match &config.image_endpoint {
            Some(image_endpoint) if *image_endpoint != endpoint => {
                dial(image_endpoint, dial_timeout).await?
            }
            _ => runtime_channel.clone(),
        };

        tracing::debug!(%endpoint, "connected to runtime");
        Ok(Self::from_channels(endpoint, runtime_channel, image_channel))
    }

    pub fn from_channels(endpoint: EndpointAddr, runtime: Channel, image: Channel) -> Self {
        Self {
            endpoint,
            runtime: RuntimeServiceClient::with_interceptor(runtime, TraceContextInterceptor),
            image: ImageServiceClient::with_interceptor(image, TraceContextInterceptor),
        }
    }

    pub fn endpoint(&self) -> &EndpointAddr {
        &self.endpoint
    }

    pub fn runtime(&self) -> RuntimeClient {
        self.runtime.clone()
    }

    pub fn image(&self) -> ImageClient {
        self.image.clone()
    }
}

async fn probe_defaults(
    candidates: &[EndpointAddr],
    dial_timeout: Duration,
    ctx: &RequestContext,
) -> CliResult<(EndpointAddr, Channel)> {
    tracing::warn!(
        "runtime endpoint is not set, trying defaults: {}",
        candidates
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut last_error: BoxError = "no default endpoints".into();
    for endpoint in candidates {
        let channel = match dial(endpoint, dial_timeout).await {
            Ok(channel) => channel,
            Err(err) => {
                tracing::debug!(%endpoint, "default endpoint not reachable: {err}");
                last_error = Box::new(err);
                continue;
            }
        };

        let mut client =
            RuntimeServiceClient::with_interceptor(channel.clone(), TraceContextInterceptor);
        let request = ctx.request(VersionRequest {
            version: CRI_API_VERSION.to_string(),
        });
        match client.version(request).await {
            Ok(_) => return Ok((endpoint.clone(), channel)),
            Err(status) => {
                tracing::debug!(%endpoint, "version probe failed: {}", status.message());
                last_error = Box::new(status);
            }
        }
    }

    Err(CliError::EndpointUnreachable {
        endpoint: candidates
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        source: last_error,
    })
}
