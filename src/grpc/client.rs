use std::time::Duration;

use tonic::codec::Streaming;
use tonic::Status;

use crate::cri::*;
use crate::errors::CliResult;
use crate::grpc::connection::CriConnection;
use crate::grpc::context::RequestContext;

macro_rules! runtime_method {
    ($name:literal) => {
        concat!("/runtime.v1.RuntimeService/", $name)
    };
}

macro_rules! image_method {
    ($name:literal) => {
        concat!("/runtime.v1.ImageService/", $name)
    };
}

/// Typed wrapper over the runtime and image services. Every call carries
/// the verb's deadline, cancellation and trace span.
#[derive(Debug, Clone)]
pub struct CriClient {
    conn: CriConnection,
    ctx: RequestContext,
}

impl CriClient {
    pub fn new(conn: CriConnection, ctx: RequestContext) -> Self {
        Self { conn, ctx }
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    pub fn connection(&self) -> &CriConnection {
        &self.conn
    }

    /// A client sharing this connection with a different per-call deadline.
    pub fn with_timeout(&self, timeout: Option<Duration>) -> Self {
        Self {
            conn: self.conn.clone(),
            ctx: self.ctx.with_timeout(timeout),
        }
    }

    pub async fn version(&self) -> CliResult<VersionResponse> {
        let message = VersionRequest {
            version: "v1".to_string(),
        };
        self.ctx
            .unary(runtime_method!("Version"), None, || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.version(request).await }
            })
            .await
    }

    pub async fn status(&self, verbose: bool) -> CliResult<StatusResponse> {
        self.ctx
            .unary(runtime_method!("Status"), None, || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(StatusRequest { verbose });
                async move { client.status(request).await }
            })
            .await
    }

    // Sandboxes

    pub async fn run_pod_sandbox(
        &self,
        config: PodSandboxConfig,
        runtime_handler: &str,
    ) -> CliResult<String> {
        let message = RunPodSandboxRequest {
            config: Some(config),
            runtime_handler: runtime_handler.to_string(),
        };
        let response = self
            .ctx
            .unary(runtime_method!("RunPodSandbox"), None, || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.run_pod_sandbox(request).await }
            })
            .await?;
        Ok(response.pod_sandbox_id)
    }

    pub async fn stop_pod_sandbox(&self, pod_sandbox_id: &str) -> CliResult<()> {
        let message = StopPodSandboxRequest {
            pod_sandbox_id: pod_sandbox_id.to_string(),
        };
        self.ctx
            .unary(runtime_method!("StopPodSandbox"), Some(pod_sandbox_id), || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.stop_pod_sandbox(request).await }
            })
            .await?;
        Ok(())
    }

    pub async fn remove_pod_sandbox(&self, pod_sandbox_id: &str) -> CliResult<()> {
        let message = RemovePodSandboxRequest {
            pod_sandbox_id: pod_sandbox_id.to_string(),
        };
        self.ctx
            .unary(runtime_method!("RemovePodSandbox"), Some(pod_sandbox_id), || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.remove_pod_sandbox(request).await }
            })
            .await?;
        Ok(())
    }

    pub async fn pod_sandbox_status(
        &self,
        pod_sandbox_id: &str,
        verbose: bool,
    ) -> CliResult<PodSandboxStatusResponse> {
        let message = PodSandboxStatusRequest {
            pod_sandbox_id: pod_sandbox_id.to_string(),
            verbose,
        };
        self.ctx
            .unary(runtime_method!("PodSandboxStatus"), Some(pod_sandbox_id), || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.pod_sandbox_status(request).await }
            })
            .await
    }

    pub async fn list_pod_sandbox(
        &self,
        filter: Option<PodSandboxFilter>,
    ) -> CliResult<Vec<PodSandbox>> {
        let message = ListPodSandboxRequest { filter };
        let response = self
            .ctx
            .unary(runtime_method!("ListPodSandbox"), None, || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.list_pod_sandbox(request).await }
            })
            .await?;
        Ok(response.items)
    }

    // Containers

    pub async fn create_container(
        &self,
        pod_sandbox_id: &str,
        config: ContainerConfig,
        sandbox_config: Option<PodSandboxConfig>,
    ) -> CliResult<String> {
        let message = CreateContainerRequest {
            pod_sandbox_id: pod_sandbox_id.to_string(),
            config: Some(config),
            sandbox_config,
        };
        let response = self
            .ctx
            .unary(runtime_method!("CreateContainer"), Some(pod_sandbox_id), || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.create_container(request).await }
            })
            .await?;
        Ok(response.container_id)
    }

    pub async fn start_container(&self, container_id: &str) -> CliResult<()> {
        let message = StartContainerRequest {
            container_id: container_id.to_string(),
        };
        self.ctx
            .unary(runtime_method!("StartContainer"), Some(container_id), || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.start_container(request).await }
            })
            .await?;
        Ok(())
    }

    pub async fn stop_container(&self, container_id: &str, timeout: i64) -> CliResult<()> {
        let message = StopContainerRequest {
            container_id: container_id.to_string(),
            timeout,
        };
        self.ctx
            .unary(runtime_method!("StopContainer"), Some(container_id), || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.stop_container(request).await }
            })
            .await?;
        Ok(())
    }

    pub async fn remove_container(&self, container_id: &str) -> CliResult<()> {
        let message = RemoveContainerRequest {
            container_id: container_id.to_string(),
        };
        self.ctx
            .unary(runtime_method!("RemoveContainer"), Some(container_id), || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.remove_container(request).await }
            })
            .await?;
        Ok(())
    }

    pub async fn list_containers(
        &self,
        filter: Option<ContainerFilter>,
    ) -> CliResult<Vec<Container>> {
        let message = ListContainersRequest { filter };
        let response = self
            .ctx
            .unary(runtime_method!("ListContainers"), None, || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.list_containers(request).await }
            })
            .await?;
        Ok(response.containers)
    }

    pub async fn container_status(
        &self,
        container_id: &str,
        verbose: bool,
    ) -> CliResult<ContainerStatusResponse> {
        let message = ContainerStatusRequest {
            container_id: container_id.to_string(),
            verbose,
        };
        self.ctx
            .unary(runtime_method!("ContainerStatus"), Some(container_id), || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.container_status(request).await }
            })
            .await
    }

    // Streaming endpoints

    /// Runs `cmd` synchronously. The call deadline is stretched to cover the
    /// in-container timeout; zero means no deadline at all.
    pub async fn exec_sync(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        timeout: Duration,
    ) -> CliResult<ExecSyncResponse> {
        let message = ExecSyncRequest {
            container_id: container_id.to_string(),
            cmd,
            timeout: timeout.as_secs() as i64,
        };
        let ctx = if timeout.is_zero() {
            self.ctx.with_timeout(None)
        } else {
            let base = self.ctx.timeout().unwrap_or_default();
            self.ctx.with_timeout(Some(base + timeout))
        };
        ctx.unary(runtime_method!("ExecSync"), Some(container_id), || {
            let mut client = self.conn.runtime();
            let request = ctx.request(message.clone());
            async move { client.exec_sync(request).await }
        })
        .await
    }

    pub async fn exec(&self, message: ExecRequest) -> CliResult<String> {
        let container_id = message.container_id.clone();
        let response = self
            .ctx
            .unary(runtime_method!("Exec"), Some(container_id.as_str()), || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.exec(request).await }
            })
            .await?;
        Ok(response.url)
    }

    pub async fn attach(&self, message: AttachRequest) -> CliResult<String> {
        let container_id = message.container_id.clone();
        let response = self
            .ctx
            .unary(runtime_method!("Attach"), Some(container_id.as_str()), || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.attach(request).await }
            })
            .await?;
        Ok(response.url)
    }

    pub async fn port_forward(&self, pod_sandbox_id: &str, ports: Vec<i32>) -> CliResult<String> {
        let message = PortForwardRequest {
            pod_sandbox_id: pod_sandbox_id.to_string(),
            port: ports,
        };
        let response = self
            .ctx
            .unary(runtime_method!("PortForward"), Some(pod_sandbox_id), || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.port_forward(request).await }
            })
            .await?;
        Ok(response.url)
    }

    // Stats

    pub async fn list_container_stats(
        &self,
        filter: Option<ContainerStatsFilter>,
    ) -> CliResult<Vec<ContainerStats>> {
        let message = ListContainerStatsRequest { filter };
        let response = self
            .ctx
            .unary(runtime_method!("ListContainerStats"), None, || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.list_container_stats(request).await }
            })
            .await?;
        Ok(response.stats)
    }

    pub async fn list_pod_sandbox_stats(
        &self,
        filter: Option<PodSandboxStatsFilter>,
    ) -> CliResult<Vec<PodSandboxStats>> {
        let message = ListPodSandboxStatsRequest { filter };
        let response = self
            .ctx
            .unary(runtime_method!("ListPodSandboxStats"), None, || {
                let mut client = self.conn.runtime();
                let request = self.ctx.request(message.clone());
                async move { client.list_pod_sandbox_stats(request).await }
            })
            .await?;
        Ok(response.stats)
    }

    // Events

    /// Opens the container event stream. No deadline applies; the caller owns
    /// cancellation and re-subscription.
    pub async fn subscribe_events(&self) -> Result<Streaming<ContainerEventResponse>, Status> {
        let mut client = self.conn.runtime();
        let response = client.get_container_events(GetEventsRequest {}).await?;
        Ok(response.into_inner())
    }

    // Images

    pub async fn list_images(&self, filter: Option<ImageFilter>) -> CliResult<Vec<Image>> {
        let message = ListImagesRequest { filter };
        let response = self
            .ctx
            .unary(image_method!("ListImages"), None, || {
                let mut client = self.conn.image();
                let request = self.ctx.request(message.clone());
                async move { client.list_images(request).await }
            })
            .await?;
        Ok(response.images)
    }

    pub async fn image_status(&self, image: &str, verbose: bool) -> CliResult<ImageStatusResponse> {
        let message = ImageStatusRequest {
            image: Some(ImageSpec {
                image: image.to_string(),
                ..Default::default()
            }),
            verbose,
        };
        self.ctx
            .unary(image_method!("ImageStatus"), Some(image), || {
                let mut client = self.conn.image();
                let request = self.ctx.request(message.clone());
                async move { client.image_status(request).await }
            })
            .await
    }

    /// Pulls are not bounded by the verb deadline.
    pub async fn pull_image(
        &self,
        image: &str,
        auth: Option<AuthConfig>,
        sandbox_config: Option<PodSandboxConfig>,
    ) -> CliResult<String> {
        let message = PullImageRequest {
            image: Some(ImageSpec {
                image: image.to_string(),
                ..Default::default()
            }),
            auth,
            sandbox_config,
        };
        let ctx = self.ctx.with_timeout(None);
        let response = ctx
            .unary(image_method!("PullImage"), Some(image), || {
                let mut client = self.conn.image();
                let request = ctx.request(message.clone());
                async move { client.pull_image(request).await }
            })
            .await?;
        Ok(response.image_ref)
    }

    pub async fn remove_image(&self, image: &str) -> CliResult<()> {
        let message = RemoveImageRequest {
            image: Some(ImageSpec {
                image: image.to_string(),
                ..Default::default()
            }),
        };
        self.ctx
            .unary(image_method!("RemoveImage"), Some(image), || {
                let mut client = self.conn.image();
                let request = self.ctx.request(message.clone());
                async move { client.remove_image(request).await }
            })
            .await?;
        Ok(())
    }
}
