// ABOUTME: reqwest-based CadApi implementation with basic auth, retries and optional raw response dumps
// ABOUTME: Response bodies are read as text first so they can be dumped before parsing

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use sketchgraph_core::{
    ApiCredentials, CadApi, DocumentSummary, ElementSummary, FeatureTree, Result, Settings,
    SketchGraphError,
};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::responses::{parse_document_parent, parse_elements, parse_folder_documents};

pub const ACCEPT_HEADER: &str = "application/json;charset=UTF-8; qs=0.09";
const PART_STUDIO_ELEMENT_TYPE: &str = "PARTSTUDIO";
const MAX_RETRY_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct OnshapeConfig {
    pub base_url: String,
    pub api_version: String,
    pub timeout: Duration,
    pub max_retries: usize,
    pub dump_dir: Option<PathBuf>,
    pub credentials: ApiCredentials,
}

impl OnshapeConfig {
    pub fn from_settings(settings: &Settings, credentials: ApiCredentials) -> Self {
        Self {
            base_url: settings.api.base_url.clone(),
            api_version: settings.api.api_version.clone(),
            timeout: Duration::from_secs(settings.api.timeout_secs),
            max_retries: settings.api.max_retries,
            dump_dir: settings.debug.dump_dir.clone(),
            credentials,
        }
    }
}

pub struct OnshapeClient {
    client: Client,
    base_url: Url,
    config: OnshapeConfig,
}

impl OnshapeClient {
    pub fn new(config: OnshapeConfig) -> Result<Self> {
        if config.credentials.access_key.is_empty()
            || config.credentials.secret_key.expose_secret().is_empty()
        {
            return Err(SketchGraphError::Configuration(
                "API access and secret keys are required".to_string(),
            ));
        }

        let base_url = Url::parse(&config.base_url).map_err(|e| {
            SketchGraphError::Configuration(format!("invalid base URL {}: {}", config.base_url, e))
        })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("SketchGraph/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SketchGraphError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| SketchGraphError::Configuration(format!("invalid endpoint {}: {}", path, e)))
    }

    /// GET `path` and return the raw body, retrying transient failures with
    /// exponential backoff. Client errors other than 429 are not retried.
    async fn get_text(&self, path: &str, query: &[(&str, &str)], dump_name: &str) -> Result<String> {
        let url = self.endpoint(path)?;
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(retry_delay(attempt)).await;
            }

            debug!("GET {}", url);
            let request = self
                .client
                .get(url.clone())
                .query(query)
                .basic_auth(
                    &self.config.credentials.access_key,
                    Some(self.config.credentials.expose_secret()),
                )
                .header("Accept", ACCEPT_HEADER)
                .header("Content-Type", "application/json")
                .send();

            match timeout(self.config.timeout, request).await {
                Ok(Ok(response)) => {
                    let status = response.status();
                    let body = match response.text().await {
                        Ok(body) => body,
                        Err(e) => {
                            last_error = Some(SketchGraphError::Network(format!(
                                "failed to read response body: {}",
                                e
                            )));
                            continue;
                        }
                    };

                    if status.is_success() {
                        self.dump(dump_name, &body).await;
                        return Ok(body);
                    }

                    error!(
                        "CAD API error (HTTP {}) for {}: {}",
                        status,
                        path,
                        body.chars().take(500).collect::<String>()
                    );
                    let err = SketchGraphError::Api(format!(
                        "HTTP {} for {}: {}",
                        status,
                        path,
                        body.chars().take(200).collect::<String>()
                    ));
                    if !is_retryable(status) {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
                Ok(Err(e)) => {
                    last_error = Some(SketchGraphError::Network(format!("request failed: {}", e)));
                }
                Err(_) => {
                    last_error = Some(SketchGraphError::Timeout(format!("GET {} timed out", path)));
                }
            }

            if attempt < self.config.max_retries {
                warn!(
                    "CAD API call failed (attempt {}/{}), retrying...",
                    attempt + 1,
                    self.config.max_retries + 1
                );
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SketchGraphError::Api(format!("all retry attempts failed for {}", path))
        }))
    }

    async fn dump(&self, name: &str, body: &str) {
        let Some(dir) = &self.config.dump_dir else {
            return;
        };
        match write_dump(dir, name, body).await {
            Ok(path) => debug!(path = %path.display(), "wrote raw response"),
            Err(e) => warn!(dir = %dir.display(), name, error = %e, "could not write raw response"),
        }
    }
}

async fn write_dump(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    let path = dir.join(format!("{}.json", name));
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, body).await?;
    Ok(path)
}

/// `100ms * 2^attempt`, capped.
fn retry_delay(attempt: usize) -> Duration {
    let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
    let millis = 100_u64.saturating_mul(2_u64.saturating_pow(exponent));
    Duration::from_millis(millis.min(MAX_RETRY_DELAY_MS))
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl CadApi for OnshapeClient {
    async fn fetch_document_parent(&self, document_id: &str) -> Result<String> {
        let body = self
            .get_text(
                &format!("/api/documents/{}", document_id),
                &[],
                &format!("document_{}", document_id),
            )
            .await?;
        parse_document_parent(&body)
    }

    async fn list_folder_documents(&self, folder_id: &str) -> Result<Vec<DocumentSummary>> {
        let body = self
            .get_text(
                &format!("/api/globaltreenodes/folder/{}", folder_id),
                &[],
                &format!("folder_{}", folder_id),
            )
            .await?;
        let documents = parse_folder_documents(&body)?;
        info!(folder_id, documents = documents.len(), "listed folder documents");
        Ok(documents)
    }

    async fn list_elements(&self, document_id: &str, workspace_id: &str) -> Result<Vec<ElementSummary>> {
        let body = self
            .get_text(
                &format!("/api/documents/d/{}/w/{}/elements", document_id, workspace_id),
                &[("elementType", PART_STUDIO_ELEMENT_TYPE)],
                &format!("elements_{}", document_id),
            )
            .await?;
        parse_elements(&body)
    }

    async fn fetch_feature_tree(
        &self,
        document_id: &str,
        workspace_id: &str,
        element_id: &str,
    ) -> Result<FeatureTree> {
        let path = format!(
            "/api/{}/partstudios/d/{}/w/{}/e/{}/features",
            self.config.api_version, document_id, workspace_id, element_id
        );
        let body = self
            .get_text(
                &path,
                &[],
                &format!("features_{}_{}", document_id, element_id),
            )
            .await?;
        let tree = FeatureTree::from_json(&body)?;
        debug!(document_id, element_id, features = tree.features.len(), "fetched feature tree");
        Ok(tree)
    }
}
