//! provision::http
//!
//! Provisioning service client over a JSON REST API.
//!
//! # Endpoints
//!
//! All paths are relative to the configured base URL:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | stack exists | `GET environments/{account}/{region}/stacks/{name}` |
//! | deploy | `PUT environments/{account}/{region}/stacks/{name}` |
//! | destroy | `DELETE environments/{account}/{region}/stacks/{name}` |
//! | current template | `GET .../stacks/{name}/template` |
//! | rollback | `POST .../stacks/{name}/rollback` |
//! | changeset | `POST .../stacks/{name}/changesets` |
//! | asset published | `HEAD environments/{account}/{region}/assets/{id}` |
//! | publish asset | `PUT environments/{account}/{region}/assets/{id}` |
//!
//! # Authentication
//!
//! A bearer token is sent when configured (see [`TOKEN_ENV`]).
//!
//! # Rate Limiting
//!
//! Returns `ProvisionError::RateLimited` on 429. Retrying is the caller's
//! responsibility.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::traits::{
    AssetPublisher, ChangeSet, DeployStackRequest, DeploymentOutcome, ProvisionError,
    Provisioner, RollbackRequest, RollbackResult, StackRef,
};
use crate::core::stack::Asset;
use crate::core::template::Template;
use crate::core::types::Environment;

/// Environment variable holding the API token.
pub const TOKEN_ENV: &str = "STACKPILOT_TOKEN";

/// User-Agent header value for API requests.
const USER_AGENT_VALUE: &str = "stackpilot-cli";

/// HTTP provisioning client.
pub struct HttpProvisioner {
    /// HTTP client for making requests
    client: Client,
    /// API base URL, without trailing slash
    base: String,
    /// Bearer token, if any
    token: Option<String>,
    /// Directory asset sources and build commands are relative to
    assembly_dir: PathBuf,
}

// Custom Debug to avoid exposing the token
impl std::fmt::Debug for HttpProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvisioner")
            .field("base", &self.base)
            .field("has_token", &self.token.is_some())
            .field("assembly_dir", &self.assembly_dir)
            .finish()
    }
}

/// Body of a rollback request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RollbackBody<'a> {
    force: bool,
    orphan_logical_ids: &'a [String],
}

/// Error body returned by the service.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

impl HttpProvisioner {
    /// Create a client for `base`.
    pub fn new(
        base: impl Into<String>,
        token: Option<String>,
        assembly_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client: Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
            token,
            assembly_dir: assembly_dir.into(),
        }
    }

    /// Create a client reading the token from [`TOKEN_ENV`].
    pub fn from_env(base: impl Into<String>, assembly_dir: impl Into<PathBuf>) -> Self {
        let token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty());
        Self::new(base, token, assembly_dir)
    }

    /// API base URL.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Build common headers for API requests.
    fn headers(&self) -> Result<HeaderMap, ProvisionError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ProvisionError::AuthFailed("token contains invalid characters".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        Ok(headers)
    }

    fn environment_url(&self, environment: &Environment) -> String {
        format!(
            "{}/environments/{}/{}",
            self.base, environment.account, environment.region
        )
    }

    /// Build URL for a stack endpoint (`suffix` may be empty).
    fn stack_url(&self, stack: &StackRef, suffix: &str) -> String {
        let mut url = format!(
            "{}/stacks/{}",
            self.environment_url(&stack.environment),
            stack.stack_name
        );
        if !suffix.is_empty() {
            url.push('/');
            url.push_str(suffix);
        }
        url
    }

    fn asset_url(&self, asset: &Asset, environment: &Environment) -> String {
        format!("{}/assets/{}", self.environment_url(environment), asset.id)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, ProvisionError> {
        request
            .headers(self.headers()?)
            .send()
            .await
            .map_err(|e| ProvisionError::NetworkError(e.to_string()))
    }

    /// Handle API response, mapping errors appropriately.
    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: Response,
    ) -> Result<T, ProvisionError> {
        let status = response.status();

        if status.is_success() {
            response.json().await.map_err(|e| ProvisionError::ApiError {
                status: status.as_u16(),
                message: format!("Failed to parse response: {}", e),
            })
        } else {
            self.handle_error_response(response, status).await
        }
    }

    /// Handle an error response from the API.
    async fn handle_error_response<T>(
        &self,
        response: Response,
        status: StatusCode,
    ) -> Result<T, ProvisionError> {
        let url = response.url().path().to_string();
        let message = match response.json::<ErrorResponse>().await {
            Ok(err) => err.message,
            Err(_) => "Unknown error".to_string(),
        };

        Err(match status {
            StatusCode::UNAUTHORIZED if self.token.is_none() => ProvisionError::AuthRequired,
            StatusCode::UNAUTHORIZED => ProvisionError::AuthFailed("Invalid or expired token".into()),
            StatusCode::FORBIDDEN => ProvisionError::AuthFailed(format!("Permission denied: {}", message)),
            StatusCode::NOT_FOUND => ProvisionError::NotFound(url),
            StatusCode::TOO_MANY_REQUESTS => ProvisionError::RateLimited,
            _ if status.is_server_error() => ProvisionError::ApiError {
                status: status.as_u16(),
                message: format!("server error: {}", message),
            },
            _ => ProvisionError::ApiError {
                status: status.as_u16(),
                message,
            },
        })
    }

    /// Map a bodiless response: success, 404 as `false`, anything else an error.
    async fn handle_presence(&self, response: Response) -> Result<bool, ProvisionError> {
        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status == StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            self.handle_error_response(response, status).await
        }
    }

    fn resolve_source(&self, source: &Path) -> PathBuf {
        if source.is_absolute() {
            source.to_path_buf()
        } else {
            self.assembly_dir.join(source)
        }
    }
}

#[async_trait]
impl Provisioner for HttpProvisioner {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn stack_exists(&self, stack: &StackRef) -> Result<bool, ProvisionError> {
        let url = self.stack_url(stack, "");
        let response = self.send(self.client.get(&url)).await?;
        self.handle_presence(response).await
    }

    async fn deploy_stack(
        &self,
        request: &DeployStackRequest,
    ) -> Result<DeploymentOutcome, ProvisionError> {
        let url = self.stack_url(&request.stack, "");
        let response = self.send(self.client.put(&url).json(request)).await?;
        self.handle_response(response).await
    }

    async fn rollback_stack(
        &self,
        request: &RollbackRequest,
    ) -> Result<RollbackResult, ProvisionError> {
        let url = self.stack_url(&request.stack, "rollback");
        let body = RollbackBody {
            force: request.force,
            orphan_logical_ids: &request.orphan_logical_ids,
        };
        let response = self.send(self.client.post(&url).json(&body)).await?;
        self.handle_response(response).await
    }

    async fn destroy_stack(&self, stack: &StackRef) -> Result<(), ProvisionError> {
        let url = self.stack_url(stack, "");
        let response = self.send(self.client.delete(&url)).await?;
        // Already gone counts as destroyed
        self.handle_presence(response).await.map(|_| ())
    }

    async fn read_current_template(&self, stack: &StackRef) -> Result<Template, ProvisionError> {
        let url = self.stack_url(stack, "template");
        let response = self.send(self.client.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Template::empty());
        }
        self.handle_response(response).await
    }

    async fn create_change_set(
        &self,
        request: &DeployStackRequest,
    ) -> Result<ChangeSet, ProvisionError> {
        let url = self.stack_url(&request.stack, "changesets");
        let response = self.send(self.client.post(&url).json(request)).await?;
        self.handle_response(response).await
    }
}

#[async_trait]
impl AssetPublisher for HttpProvisioner {
    async fn is_published(
        &self,
        asset: &Asset,
        environment: &Environment,
    ) -> Result<bool, ProvisionError> {
        let url = self.asset_url(asset, environment);
        let response = self.send(self.client.head(&url)).await?;
        self.handle_presence(response).await
    }

    async fn build_asset(&self, asset: &Asset) -> Result<(), ProvisionError> {
        let Some(argv) = &asset.build_command else {
            return Ok(());
        };
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ProvisionError::BuildFailed(format!("{}: empty build command", asset.id)))?;

        tracing::debug!(asset = %asset.id, command = ?argv, "building asset");
        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&self.assembly_dir)
            .output()
            .await
            .map_err(|e| ProvisionError::BuildFailed(format!("{}: {}", asset.id, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProvisionError::BuildFailed(format!(
                "{}: {} ({})",
                asset.id,
                stderr.trim(),
                output.status
            )));
        }
        Ok(())
    }

    async fn publish_asset(
        &self,
        asset: &Asset,
        environment: &Environment,
    ) -> Result<(), ProvisionError> {
        let path = self.resolve_source(&asset.source);
        if path.is_dir() {
            return Err(ProvisionError::Io(format!(
                "asset source '{}' is a directory",
                path.display()
            )));
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ProvisionError::Io(format!("{}: {}", path.display(), e)))?;

        let url = self.asset_url(asset, environment);
        let response = self
            .send(
                self.client
                    .put(&url)
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(bytes),
            )
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            self.handle_error_response(response, status).await
        }
    }
}
