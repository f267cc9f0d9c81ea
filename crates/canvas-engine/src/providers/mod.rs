mod openai;
mod stability;

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use canvas_contracts::data_url;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

use crate::error::GenerationError;

pub use openai::OpenAiProvider;
pub use stability::StabilityProvider;

pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Size sent upstream, already shaped by the model's size policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamSize {
    Preset(String),
    Dimensions { width: u32, height: u32 },
    Unspecified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateCall {
    pub upstream_model: String,
    pub prompt: String,
    pub size: UpstreamSize,
}

/// Edit request over staged files. With a mask, `images` holds only the
/// base image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditCall {
    pub upstream_model: String,
    pub prompt: String,
    pub images: Vec<PathBuf>,
    pub mask: Option<PathBuf>,
}

/// First result item returned by a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderImage {
    pub url: Option<String>,
    pub b64_json: Option<String>,
    pub seed: Option<u64>,
}

impl ProviderImage {
    /// Remote URL when present, otherwise the inline payload as a PNG data
    /// URL.
    pub fn image_url(&self) -> Option<String> {
        if let Some(url) = self.url.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            return Some(url.to_string());
        }
        self.b64_json
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|payload| data_url::from_base64("image/png", payload))
    }
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Checks that run before any upstream traffic.
    fn preflight(&self) -> Result<(), GenerationError> {
        Ok(())
    }

    fn generate(&self, call: &GenerateCall) -> Result<ProviderImage>;

    fn edit(&self, call: &EditCall) -> Result<ProviderImage> {
        let _ = call;
        bail!("{} does not support image edits", self.name());
    }
}

#[derive(Default)]
pub struct ImageProviderRegistry {
    providers: BTreeMap<String, Box<dyn ImageProvider>>,
}

impl ImageProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn ImageProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry(timeout: Duration) -> Result<ImageProviderRegistry> {
    let mut providers = ImageProviderRegistry::new();
    providers.register(OpenAiProvider::from_env(timeout)?);
    providers.register(StabilityProvider::from_env(timeout)?);
    Ok(providers)
}

/// Where a provider finds its credential. Environment keys are read on
/// every request so a restart is not needed after exporting one.
#[derive(Clone)]
pub enum ApiKey {
    Env(&'static str),
    Fixed(Option<String>),
}

impl ApiKey {
    pub fn resolve(&self) -> Option<String> {
        match self {
            ApiKey::Env(key) => non_empty_env(key),
            ApiKey::Fixed(value) => value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
        }
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiKey::Env(key) => f.debug_tuple("Env").field(key).finish(),
            ApiKey::Fixed(Some(_)) => f.write_str("Fixed(<redacted>)"),
            ApiKey::Fixed(None) => f.write_str("Fixed(None)"),
        }
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn api_base_from_env(key: &str, default: &str) -> String {
    non_empty_env(key)
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<HttpClient> {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .context("failed to build upstream HTTP client")
}

/// Parses a JSON body, turning non-2xx responses into an error whose
/// message is the vendor's own explanation.
pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        tracing::warn!(provider, status = code, body = %truncate_text(&body, 512), "upstream request rejected");
        bail!("{}", vendor_error_message(&body, code));
    }
    serde_json::from_str(&body).with_context(|| format!("{provider} returned invalid JSON payload"))
}

pub(crate) fn vendor_error_message(body: &str, status: u16) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let from_json = parsed.as_ref().and_then(|payload| {
        payload
            .pointer("/error/message")
            .or_else(|| payload.get("message"))
            .or_else(|| payload.get("error"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    });
    if let Some(message) = from_json {
        return message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("upstream request failed ({status})");
    }
    truncate_text(trimmed, 512)
}

/// Reads `data[0]` of an images API response.
pub(crate) fn first_image_item(payload: &Value) -> ProviderImage {
    let Some(item) = payload
        .get("data")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(Value::as_object)
    else {
        return ProviderImage::default();
    };
    let text = |key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    ProviderImage {
        url: text("url"),
        b64_json: text("b64_json"),
        seed: None,
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
