// Concrete providers and the composition root that registers them
//
// - local: offline pixel ops, ffmpeg audio extraction, local inference
// - transformers: local inference only
// - fal, replicate, runpod, ai_gateway: hosted APIs, credential read per call
// - video: request shapes shared by the video-generation backends

pub mod ai_gateway;
pub mod fal;
pub mod local;
pub mod replicate;
pub mod runpod;
pub mod transformers;
pub mod video;

use reqwest::header::HeaderValue;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::action::{ActionContext, MediaInput};
use crate::config::{Config, RemoteProviderConfig};
use crate::error::{MediaError, Result};
use crate::fetch;
use crate::inference::{CommandRuntime, LocalInference};
use crate::media::MediaProcessorFactory;
use crate::output::{ensure_output_dir, output_path, resolve_output_filename};
use crate::provider::{EnvLookup, ProcessEnv, ProviderRegistry};

pub use ai_gateway::AiGatewayProvider;
pub use fal::FalProvider;
pub use local::LocalProvider;
pub use replicate::ReplicateProvider;
pub use runpod::RunpodProvider;
pub use transformers::TransformersProvider;

/// Build the registry with every built-in provider, in resolution order.
pub fn register_all_providers(config: &Config) -> Result<ProviderRegistry> {
    let env: Arc<dyn EnvLookup> = Arc::new(ProcessEnv);
    let local_client = http_client(None)?;
    let inference = Arc::new(LocalInference::new(
        Arc::new(CommandRuntime::new(config.inference.clone())),
        local_client.clone(),
    ));

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(LocalProvider::new(
        inference.clone(),
        MediaProcessorFactory::create_processor(config.media.clone()),
        local_client,
    )));
    registry.register(Arc::new(FalProvider::new(
        RemoteApi::new("Fal", config.providers.fal.clone())?,
        env.clone(),
    )));
    registry.register(Arc::new(ReplicateProvider::new(
        RemoteApi::new("Replicate", config.providers.replicate.clone())?,
        env.clone(),
    )));
    registry.register(Arc::new(RunpodProvider::new(
        RemoteApi::new("Runpod", config.providers.runpod.clone())?,
        env.clone(),
    )));
    registry.register(Arc::new(AiGatewayProvider::new(
        RemoteApi::new("AI Gateway", config.providers.ai_gateway.clone())?,
        env,
    )));
    registry.register(Arc::new(TransformersProvider::new(inference)));

    info!("Registered providers: {}", registry.provider_names().join(", "));
    Ok(registry)
}

pub fn http_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().user_agent(concat!("agent-media/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| MediaError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Credential for a hosted provider, read at call time.
pub(crate) fn require_credential(env: &dyn EnvLookup, var: &str) -> Result<String> {
    env.get(var)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| MediaError::Api(format!("{} environment variable is not set", var)))
}

pub(crate) fn require_prompt(prompt: &str, task: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(MediaError::InvalidInput(format!("Prompt is required for {}", task)));
    }
    Ok(())
}

pub(crate) fn require_input(input: &MediaInput, task: &str) -> Result<()> {
    if input.source.trim().is_empty() {
        return Err(MediaError::InvalidInput(format!("Input source is required for {}", task)));
    }
    Ok(())
}

/// Images to request from a hosted API. One file is written per call, so
/// asking for more would only pay for discarded images.
pub(crate) fn single_image(count: u32, provider: &str) -> u32 {
    if count > 1 {
        warn!("{} writes one image per call; ignoring count {}", provider, count);
    }
    1
}

/// JSON-over-HTTP access to one hosted API.
pub struct RemoteApi {
    label: &'static str,
    config: RemoteProviderConfig,
    client: reqwest::Client,
}

impl RemoteApi {
    pub fn new(label: &'static str, config: RemoteProviderConfig) -> Result<Self> {
        let client = http_client(Some(Duration::from_secs(config.timeout_secs)))?;
        Ok(Self { label, config, client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Upper bound on waiting for an asynchronous job.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    /// Absolute URL for a path under the configured base.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub async fn post_json(&self, url: &str, auth: &str, body: &Value, extra: &[(&str, &str)]) -> Result<Value> {
        debug!("POST {}", url);
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, auth_header(auth)?)
            .json(body);
        for (name, value) in extra {
            request = request.header(*name, *value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| MediaError::Network(format!("{} request failed: {}", self.label, e)))?;
        self.read_json(response).await
    }

    pub async fn get_json(&self, url: &str, auth: &str) -> Result<Value> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, auth_header(auth)?)
            .send()
            .await
            .map_err(|e| MediaError::Network(format!("{} request failed: {}", self.label, e)))?;
        self.read_json(response).await
    }

    async fn read_json(&self, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(MediaError::Api(format!(
                "{} API error: {} - {}",
                self.label,
                status.as_u16(),
                error_text
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| MediaError::Provider(format!("{} returned malformed JSON: {}", self.label, e)))
    }
}

fn auth_header(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| MediaError::Api("Credential contains invalid characters".to_string()))
}

/// Where a provider's output goes: resolves the filename and creates the directory.
pub(crate) async fn prepare_output(context: &ActionContext, extension: &str, prefix: &str, named_from_input: bool) -> Result<PathBuf> {
    ensure_output_dir(&context.output_dir).await?;
    let input_source = if named_from_input {
        context.input_source.as_deref()
    } else {
        None
    };
    let filename = resolve_output_filename(extension, prefix, context.output_name.as_deref(), input_source);
    Ok(output_path(&context.output_dir, &filename))
}

/// Write produced media (a URL to fetch or a `data:` URI) to `path`.
pub(crate) async fn save_produced(client: &reqwest::Client, reference: &str, path: &Path) -> Result<u64> {
    let bytes = if reference.starts_with("data:") {
        fetch::decode_data_uri(reference)?
    } else {
        fetch::download(client, reference)
            .await
            .map_err(|e| MediaError::Network(format!("Failed to download generated media: {}", e)))?
            .0
    };
    if bytes.is_empty() {
        return Err(MediaError::Provider("Provider returned empty media".to_string()));
    }
    tokio::fs::write(path, &bytes).await?;
    Ok(bytes.len() as u64)
}

/// First string found at any of the JSON pointers.
pub(crate) fn first_string<'a>(value: &'a Value, pointers: &[&str]) -> Option<&'a str> {
    pointers
        .iter()
        .find_map(|p| value.pointer(p).and_then(Value::as_str).filter(|s| !s.is_empty()))
}
