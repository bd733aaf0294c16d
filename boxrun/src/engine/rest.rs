//! Engine client over the daemon's REST API.

use super::{
    AttachOptions, ContainerHandle, ContainerState, CreateResponse, EngineClient, EngineOptions,
    HijackedStream, RemoveOptions, TtySize,
};
use crate::run::LaunchSpec;
use async_trait::async_trait;
use boxrun_shared::constants::daemon_errors;
use boxrun_shared::errors::{BoxrunError, BoxrunResult};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WaitBody {
    status_code: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    running: bool,
    #[serde(default)]
    exit_code: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectBody {
    state: InspectState,
}

/// [`EngineClient`] speaking HTTP to a TCP daemon endpoint.
pub struct RestEngine {
    /// e.g. `http://127.0.0.1:2375/v1.24`
    base_url: String,
    client: reqwest::Client,
}

impl RestEngine {
    pub fn new(options: EngineOptions) -> BoxrunResult<Self> {
        let transport = options.transport()?;
        let base = match transport.http_base() {
            Some(base) => base,
            None => {
                return Err(BoxrunError::Unsupported(format!(
                    "engine address {} (only tcp endpoints are supported)",
                    transport.to_uri()
                )));
            }
        };

        let client = reqwest::Client::builder()
            .user_agent(concat!("boxrun/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BoxrunError::Internal(format!("HTTP client: {}", e)))?;

        tracing::debug!(host = %transport.to_uri(), api_version = %options.api_version, "Using REST engine");
        Ok(Self {
            base_url: format!("{}/{}", base, options.api_version),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
    }

    fn container_path(id: &ContainerHandle, action: &str) -> String {
        format!("/containers/{}{}", urlencoding::encode(id.as_str()), action)
    }

    /// Send and turn non-2xx responses into daemon errors.
    async fn send(&self, request: RequestBuilder) -> BoxrunResult<Response> {
        let response = request.send().await.map_err(connect_error)?;
        check_status(response).await
    }
}

fn connect_error(err: reqwest::Error) -> BoxrunError {
    BoxrunError::DaemonCommunication(format!(
        "Cannot connect to the engine daemon: {}",
        err
    ))
}

async fn check_status(response: Response) -> BoxrunResult<Response> {
    let status = response.status();
    if status.is_success() || status == StatusCode::SWITCHING_PROTOCOLS {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.message,
        Err(_) if body.trim().is_empty() => status.to_string(),
        Err(_) => body.trim().to_string(),
    };
    Err(BoxrunError::DaemonCommunication(format!(
        "{}{}",
        daemon_errors::ENVELOPE_PREFIX,
        message
    )))
}

/// Create request body: the container config with host and network config
/// nested under their own keys.
fn create_body(spec: &LaunchSpec) -> BoxrunResult<serde_json::Value> {
    let mut body = serde_json::to_value(&spec.config)?;
    if let Some(object) = body.as_object_mut() {
        object.insert(
            "HostConfig".into(),
            serde_json::to_value(&spec.host_config)?,
        );
        object.insert(
            "NetworkingConfig".into(),
            serde_json::to_value(&spec.networking_config)?,
        );
    }
    Ok(body)
}

fn flag(on: bool) -> &'static str {
    if on { "1" } else { "0" }
}

#[async_trait]
impl EngineClient for RestEngine {
    async fn create(&self, spec: &LaunchSpec) -> BoxrunResult<CreateResponse> {
        let body = create_body(spec)?;
        let mut request = self.request(Method::POST, "/containers/create");
        if let Some(name) = spec.flags.name.as_deref().filter(|n| !n.is_empty()) {
            request = request.query(&[("name", name)]);
        }

        let response = self.send(request.json(&body)).await?;
        response
            .json::<CreateResponse>()
            .await
            .map_err(|e| BoxrunError::DaemonCommunication(format!("invalid create response: {}", e)))
    }

    async fn start(&self, id: &ContainerHandle) -> BoxrunResult<()> {
        let path = Self::container_path(id, "/start");
        self.send(self.request(Method::POST, &path)).await?;
        Ok(())
    }

    async fn attach(
        &self,
        id: &ContainerHandle,
        options: &AttachOptions,
    ) -> BoxrunResult<HijackedStream> {
        let path = Self::container_path(id, "/attach");
        let request = self
            .request(Method::POST, &path)
            .query(&[
                ("stream", "1"),
                ("stdin", flag(options.stdin)),
                ("stdout", flag(options.stdout)),
                ("stderr", flag(options.stderr)),
                ("detachKeys", options.detach_keys.as_str()),
            ])
            .header(reqwest::header::CONNECTION, "Upgrade")
            .header(reqwest::header::UPGRADE, "tcp");

        let response = self.send(request).await?;
        let upgraded = response
            .upgrade()
            .await
            .map_err(|e| BoxrunError::AttachFailure(format!("hijack failed: {}", e)))?;
        Ok(HijackedStream::new(upgraded))
    }

    async fn wait(&self, id: &ContainerHandle) -> BoxrunResult<i32> {
        let path = Self::container_path(id, "/wait");
        let response = self.send(self.request(Method::POST, &path)).await?;
        let body: WaitBody = response
            .json()
            .await
            .map_err(|e| BoxrunError::DaemonCommunication(format!("invalid wait response: {}", e)))?;
        Ok(body.status_code)
    }

    async fn inspect(&self, id: &ContainerHandle) -> BoxrunResult<ContainerState> {
        let path = Self::container_path(id, "/json");
        let response = self.send(self.request(Method::GET, &path)).await?;
        let body: InspectBody = response.json().await.map_err(|e| {
            BoxrunError::DaemonCommunication(format!("invalid inspect response: {}", e))
        })?;
        Ok(ContainerState {
            running: body.state.running,
            exit_code: body.state.exit_code,
        })
    }

    async fn remove(&self, id: &ContainerHandle, options: RemoveOptions) -> BoxrunResult<()> {
        let path = Self::container_path(id, "");
        let request = self.request(Method::DELETE, &path).query(&[
            ("v", flag(options.remove_volumes)),
            ("force", flag(options.force)),
            ("link", flag(options.remove_links)),
        ]);
        self.send(request).await?;
        Ok(())
    }

    async fn kill(&self, id: &ContainerHandle, signal: i32) -> BoxrunResult<()> {
        let path = Self::container_path(id, "/kill");
        let request = self
            .request(Method::POST, &path)
            .query(&[("signal", signal.to_string())]);
        self.send(request).await?;
        Ok(())
    }

    async fn resize(&self, id: &ContainerHandle, size: TtySize) -> BoxrunResult<()> {
        let path = Self::container_path(id, "/resize");
        let request = self.request(Method::POST, &path).query(&[
            ("h", size.rows.to_string()),
            ("w", size.cols.to_string()),
        ]);
        self.send(request).await?;
        Ok(())
    }
}
