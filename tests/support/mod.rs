//! In-process fake CRI runtime for driving the `crictl` binary.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use assert_cmd::Command;
use critools::cri::image_service_server::{ImageService, ImageServiceServer};
use critools::cri::runtime_service_server::{RuntimeService, RuntimeServiceServer};
use critools::cri::*;
use futures::Stream;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::net::UnixListener;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// What the fake runtime reports. Mutable while the server runs.
#[derive(Debug, Default, Clone)]
pub struct FakeState {
    pub containers: Vec<Container>,
    pub sandboxes: Vec<PodSandbox>,
    pub images: Vec<Image>,
    pub events: Vec<ContainerEventResponse>,
    /// Codes GetContainerEvents fails with, one per call, before it
    /// starts serving `events`.
    pub events_failures: Vec<tonic::Code>,
    /// Every RPC method name in call order.
    pub calls: Vec<String>,
}

type Shared = Arc<Mutex<FakeState>>;

#[derive(Clone)]
struct FakeService {
    state: Shared,
}

impl FakeService {
    fn record(&self, method: &str) {
        self.state.lock().calls.push(method.to_string());
    }
}

fn unimplemented<T>(method: &str) -> Result<Response<T>, Status> {
    Err(Status::unimplemented(format!("fake runtime does not implement {method}")))
}

fn matches_filter(container: &Container, filter: &Option<ContainerFilter>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    if !filter.id.is_empty() && container.id != filter.id {
        return false;
    }
    if let Some(state) = &filter.state {
        if container.state != state.state {
            return false;
        }
    }
    if !filter.pod_sandbox_id.is_empty() && container.pod_sandbox_id != filter.pod_sandbox_id {
        return false;
    }
    filter
        .label_selector
        .iter()
        .all(|(key, value)| container.labels.get(key) == Some(value))
}

type EventStream = Pin<Box<dyn Stream<Item = Result<ContainerEventResponse, Status>> + Send>>;

#[tonic::async_trait]
impl RuntimeService for FakeService {
    async fn version(&self, _: Request<VersionRequest>) -> Result<Response<VersionResponse>, Status> {
        self.record("Version");
        Ok(Response::new(VersionResponse {
            version: "0.1.0".into(),
            runtime_name: "fake-runtime".into(),
            runtime_version: "1.2.3".into(),
            runtime_api_version: "v1".into(),
        }))
    }

    async fn run_pod_sandbox(
        &self,
        _: Request<RunPodSandboxRequest>,
    ) -> Result<Response<RunPodSandboxResponse>, Status> {
        unimplemented("RunPodSandbox")
    }

    async fn stop_pod_sandbox(
        &self,
        _: Request<StopPodSandboxRequest>,
    ) -> Result<Response<StopPodSandboxResponse>, Status> {
        unimplemented("StopPodSandbox")
    }

    async fn remove_pod_sandbox(
        &self,
        _: Request<RemovePodSandboxRequest>,
    ) -> Result<Response<RemovePodSandboxResponse>, Status> {
        unimplemented("RemovePodSandbox")
    }

    async fn pod_sandbox_status(
        &self,
        _: Request<PodSandboxStatusRequest>,
    ) -> Result<Response<PodSandboxStatusResponse>, Status> {
        unimplemented("PodSandboxStatus")
    }

    async fn list_pod_sandbox(
        &self,
        _: Request<ListPodSandboxRequest>,
    ) -> Result<Response<ListPodSandboxResponse>, Status> {
        self.record("ListPodSandbox");
        Ok(Response::new(ListPodSandboxResponse {
            items: self.state.lock().sandboxes.clone(),
        }))
    }

    async fn create_container(
        &self,
        _: Request<CreateContainerRequest>,
    ) -> Result<Response<CreateContainerResponse>, Status> {
        unimplemented("CreateContainer")
    }

    async fn start_container(
        &self,
        request: Request<StartContainerRequest>,
    ) -> Result<Response<StartContainerResponse>, Status> {
        self.record("StartContainer");
        let id = request.into_inner().container_id;
        let mut state = self.state.lock();
        match state.containers.iter_mut().find(|c| c.id == id) {
            Some(container) => {
                container.state = ContainerState::ContainerRunning as i32;
                Ok(Response::new(StartContainerResponse {}))
            }
            None => Err(Status::not_found(format!("container {id} not found"))),
        }
    }

    async fn stop_container(
        &self,
        _: Request<StopContainerRequest>,
    ) -> Result<Response<StopContainerResponse>, Status> {
        unimplemented("StopContainer")
    }

    async fn remove_container(
        &self,
        request: Request<RemoveContainerRequest>,
    ) -> Result<Response<RemoveContainerResponse>, Status> {
        self.record("RemoveContainer");
        let id = request.into_inner().container_id;
        self.state.lock().containers.retain(|c| c.id != id);
        Ok(Response::new(RemoveContainerResponse {}))
    }

    async fn list_containers(
        &self,
        request: Request<ListContainersRequest>,
    ) -> Result<Response<ListContainersResponse>, Status> {
        self.record("ListContainers");
        let filter = request.into_inner().filter;
        let containers = self
            .state
            .lock()
            .containers
            .iter()
            .filter(|c| matches_filter(c, &filter))
            .cloned()
            .collect();
        Ok(Response::new(ListContainersResponse { containers }))
    }

    async fn container_status(
        &self,
        request: Request<ContainerStatusRequest>,
    ) -> Result<Response<ContainerStatusResponse>, Status> {
        self.record("ContainerStatus");
        let id = request.into_inner().container_id;
        let state = self.state.lock();
        let container = state
            .containers
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| Status::not_found(format!("container {id} not found")))?;
        Ok(Response::new(ContainerStatusResponse {
            status: Some(ContainerStatus {
                id: container.id.clone(),
                metadata: container.metadata.clone(),
                state: container.state,
                created_at: container.created_at,
                image: container.image.clone(),
                image_ref: container.image_ref.clone(),
                labels: container.labels.clone(),
                ..Default::default()
            }),
            info: HashMap::new(),
        }))
    }

    async fn exec_sync(
        &self,
        _: Request<ExecSyncRequest>,
    ) -> Result<Response<ExecSyncResponse>, Status> {
        unimplemented("ExecSync")
    }

    async fn exec(&self, _: Request<ExecRequest>) -> Result<Response<ExecResponse>, Status> {
        unimplemented("Exec")
    }

    async fn attach(&self, _: Request<AttachRequest>) -> Result<Response<AttachResponse>, Status> {
        unimplemented("Attach")
    }

    async fn port_forward(
        &self,
        _: Request<PortForwardRequest>,
    ) -> Result<Response<PortForwardResponse>, Status> {
        unimplemented("PortForward")
    }

    async fn container_stats(
        &self,
        _: Request<ContainerStatsRequest>,
    ) -> Result<Response<ContainerStatsResponse>, Status> {
        unimplemented("ContainerStats")
    }

    async fn list_container_stats(
        &self,
        _: Request<ListContainerStatsRequest>,
    ) -> Result<Response<ListContainerStatsResponse>, Status> {
        unimplemented("ListContainerStats")
    }

    async fn pod_sandbox_stats(
        &self,
        _: Request<PodSandboxStatsRequest>,
    ) -> Result<Response<PodSandboxStatsResponse>, Status> {
        unimplemented("PodSandboxStats")
    }

    async fn list_pod_sandbox_stats(
        &self,
        _: Request<ListPodSandboxStatsRequest>,
    ) -> Result<Response<ListPodSandboxStatsResponse>, Status> {
        unimplemented("ListPodSandboxStats")
    }

    async fn status(&self, _: Request<StatusRequest>) -> Result<Response<StatusResponse>, Status> {
        self.record("Status");
        Ok(Response::new(StatusResponse {
            status: Some(RuntimeStatus {
                conditions: vec![RuntimeCondition {
                    r#type: "RuntimeReady".into(),
                    status: true,
                    ..Default::default()
                }],
            }),
            info: HashMap::from([("config".to_string(), r#"{"sandboxImage":"pause"}"#.to_string())]),
        }))
    }

    type GetContainerEventsStream = EventStream;

    async fn get_container_events(
        &self,
        _: Request<GetEventsRequest>,
    ) -> Result<Response<Self::GetContainerEventsStream>, Status> {
        self.record("GetContainerEvents");
        let mut state = self.state.lock();
        if !state.events_failures.is_empty() {
            let code = state.events_failures.remove(0);
            return Err(Status::new(code, "event stream unavailable"));
        }
        let events = state.events.clone();
        let stream = futures::stream::iter(events.into_iter().map(Ok));
        Ok(Response::new(Box::pin(stream) as EventStream))
    }
}

#[tonic::async_trait]
impl ImageService for FakeService {
    async fn list_images(
        &self,
        _: Request<ListImagesRequest>,
    ) -> Result<Response<ListImagesResponse>, Status> {
        self.record("ListImages");
        Ok(Response::new(ListImagesResponse {
            images: self.state.lock().images.clone(),
        }))
    }

    async fn image_status(
        &self,
        request: Request<ImageStatusRequest>,
    ) -> Result<Response<ImageStatusResponse>, Status> {
        self.record("ImageStatus");
        let wanted = request.into_inner().image.unwrap_or_default().image;
        let image = self
            .state
            .lock()
            .images
            .iter()
            .find(|image| image.repo_tags.contains(&wanted))
            .cloned();
        Ok(Response::new(ImageStatusResponse {
            image,
            info: HashMap::new(),
        }))
    }

    async fn pull_image(
        &self,
        _: Request<PullImageRequest>,
    ) -> Result<Response<PullImageResponse>, Status> {
        unimplemented("PullImage")
    }

    async fn remove_image(
        &self,
        _: Request<RemoveImageRequest>,
    ) -> Result<Response<RemoveImageResponse>, Status> {
        unimplemented("RemoveImage")
    }
}

/// A fake runtime serving on a unix socket inside its own temp dir, with a
/// private tokio runtime so tests can stay synchronous.
pub struct FakeRuntime {
    state: Shared,
    socket: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    runtime: Runtime,
    _dir: TempDir,
}

impl FakeRuntime {
    pub fn start(initial: FakeState) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("fake.sock");
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let state: Shared = Arc::new(Mutex::new(initial));
        let service = FakeService {
            state: Arc::clone(&state),
        };
        let (tx, rx) = oneshot::channel::<()>();

        let listener = runtime.block_on(async { UnixListener::bind(&socket) }).unwrap();
        runtime.spawn(async move {
            Server::builder()
                .add_service(RuntimeServiceServer::new(service.clone()))
                .add_service(ImageServiceServer::new(service))
                .serve_with_incoming_shutdown(UnixListenerStream::new(listener), async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            state,
            socket,
            shutdown: Some(tx),
            runtime,
            _dir: dir,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("unix://{}", self.socket.display())
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn update(&self, change: impl FnOnce(&mut FakeState)) {
        change(&mut self.state.lock());
    }

    /// `crictl` with the environment scrubbed and the endpoint pointed here.
    pub fn crictl(&self) -> Command {
        let mut cmd = crictl();
        cmd.arg(format!("--runtime-endpoint={}", self.endpoint()));
        cmd
    }
}

impl Drop for FakeRuntime {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// `crictl` with no inherited endpoint or config.
pub fn crictl() -> Command {
    let mut cmd = crictl_without_config();
    cmd.arg("--config=/dev/null");
    cmd
}

pub fn crictl_without_config() -> Command {
    let mut cmd = Command::cargo_bin("crictl").unwrap();
    cmd.env_remove("CONTAINER_RUNTIME_ENDPOINT")
        .env_remove("IMAGE_SERVICE_ENDPOINT")
        .env_remove("CRICTL_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

pub fn container(id: &str, name: &str, created_at: i64, state: ContainerState) -> Container {
    Container {
        id: id.into(),
        pod_sandbox_id: "feedbeef0000000000000000".into(),
        metadata: Some(ContainerMetadata {
            name: name.into(),
            attempt: 0,
        }),
        image: Some(ImageSpec {
            image: "docker.io/library/busybox:latest".into(),
            ..Default::default()
        }),
        image_ref: "sha256:1111111111111111".into(),
        state: state as i32,
        created_at,
        ..Default::default()
    }
}
