use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::ACCEPT;
use serde_json::{json, Value};

use super::{
    api_base_from_env, build_http_client, response_json_or_error, ApiKey, GenerateCall,
    ImageProvider, ProviderImage, UpstreamSize,
};
use crate::error::GenerationError;

pub const STABILITY_DEFAULT_API_BASE: &str = "https://api.stability.ai";
pub const STABILITY_KEY_MISSING: &str = "Stability API key not configured";

const CFG_SCALE: u32 = 7;
const STEPS: u32 = 30;
const SAMPLES: u32 = 1;

pub struct StabilityProvider {
    api_base: String,
    api_key: ApiKey,
    http: HttpClient,
}

impl StabilityProvider {
    pub fn from_env(timeout: Duration) -> Result<Self> {
        Self::new(
            api_base_from_env("STABILITY_API_BASE", STABILITY_DEFAULT_API_BASE),
            ApiKey::Env("STABILITY_API_KEY"),
            timeout,
        )
    }

    pub fn new(api_base: impl Into<String>, api_key: ApiKey, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            http: build_http_client(timeout)?,
        })
    }

    fn endpoint(&self, upstream_model: &str) -> String {
        format!(
            "{}/v1/generation/{}/text-to-image",
            self.api_base, upstream_model
        )
    }
}

fn text_to_image_payload(prompt: &str, width: u32, height: u32) -> Value {
    json!({
        "text_prompts": [{"text": prompt}],
        "cfg_scale": CFG_SCALE,
        "height": height,
        "width": width,
        "samples": SAMPLES,
        "steps": STEPS,
    })
}

fn first_artifact(payload: &Value) -> ProviderImage {
    let Some(artifact) = payload
        .get("artifacts")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
    else {
        return ProviderImage::default();
    };
    ProviderImage {
        url: None,
        b64_json: artifact
            .get("base64")
            .and_then(Value::as_str)
            .map(str::to_string),
        seed: artifact.get("seed").and_then(Value::as_u64),
    }
}

impl ImageProvider for StabilityProvider {
    fn name(&self) -> &str {
        "stability"
    }

    fn preflight(&self) -> Result<(), GenerationError> {
        if self.api_key.resolve().is_none() {
            return Err(GenerationError::Configuration(
                STABILITY_KEY_MISSING.to_string(),
            ));
        }
        Ok(())
    }

    fn generate(&self, call: &GenerateCall) -> Result<ProviderImage> {
        let api_key = self
            .api_key
            .resolve()
            .ok_or_else(|| anyhow!(STABILITY_KEY_MISSING))?;
        let UpstreamSize::Dimensions { width, height } = call.size else {
            bail!("Stability text-to-image needs explicit dimensions");
        };
        let endpoint = self.endpoint(&call.upstream_model);
        tracing::debug!(%endpoint, width, height, "stability generation");

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&api_key)
            .header(ACCEPT, "application/json")
            .json(&text_to_image_payload(&call.prompt, width, height))
            .send()
            .with_context(|| format!("Stability request failed ({endpoint})"))?;
        let payload = response_json_or_error("Stability", response)?;
        Ok(first_artifact(&payload))
    }
}
