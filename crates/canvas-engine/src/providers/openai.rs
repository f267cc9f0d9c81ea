use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{
    api_base_from_env, build_http_client, first_image_item, response_json_or_error, ApiKey,
    EditCall, GenerateCall, ImageProvider, ProviderImage, UpstreamSize,
};
use canvas_contracts::models::DEFAULT_IMAGE_SIZE;

pub const OPENAI_DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    api_base: String,
    api_key: ApiKey,
    http: HttpClient,
}

impl OpenAiProvider {
    pub fn from_env(timeout: Duration) -> Result<Self> {
        Self::new(
            api_base_from_env("OPENAI_API_BASE", OPENAI_DEFAULT_API_BASE),
            ApiKey::Env("OPENAI_API_KEY"),
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

    // Not part of preflight: a missing key surfaces as an upstream failure.
    fn api_key(&self) -> Result<String> {
        self.api_key
            .resolve()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY not set"))
    }
}

fn generation_payload(call: &GenerateCall) -> Value {
    let size = match &call.size {
        UpstreamSize::Preset(size) => size.clone(),
        UpstreamSize::Dimensions { width, height } => format!("{width}x{height}"),
        UpstreamSize::Unspecified => DEFAULT_IMAGE_SIZE.to_string(),
    };
    json!({
        "model": call.upstream_model,
        "prompt": call.prompt,
        "n": 1,
        "size": size,
        "response_format": "url",
    })
}

/// Multipart file fields for an edit: a masked edit sends one `image` plus
/// `mask`, otherwise every image goes out as `image[]`.
fn edit_file_fields(call: &EditCall) -> Result<Vec<(&'static str, PathBuf)>> {
    if call.images.is_empty() {
        bail!("OpenAI image edits require at least one input image");
    }
    let mut fields = Vec::new();
    match call.mask.as_ref() {
        Some(mask) => {
            fields.push(("image", call.images[0].clone()));
            fields.push(("mask", mask.clone()));
        }
        None => {
            for image in &call.images {
                fields.push(("image[]", image.clone()));
            }
        }
    }
    Ok(fields)
}

fn png_part(path: &Path) -> Result<MultipartPart> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("image.png")
        .to_string();
    MultipartPart::bytes(bytes)
        .file_name(file_name)
        .mime_str("image/png")
        .with_context(|| format!("invalid mime for {}", path.display()))
}

impl ImageProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn generate(&self, call: &GenerateCall) -> Result<ProviderImage> {
        let api_key = self.api_key()?;
        let endpoint = format!("{}/images/generations", self.api_base);
        let payload = generation_payload(call);
        tracing::debug!(%endpoint, model = %call.upstream_model, size = %payload["size"], "openai generation");

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&api_key)
            .json(&payload)
            .send()
            .with_context(|| format!("OpenAI request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("OpenAI", response)?;
        Ok(first_image_item(&response_payload))
    }

    fn edit(&self, call: &EditCall) -> Result<ProviderImage> {
        let api_key = self.api_key()?;
        let endpoint = format!("{}/images/edits", self.api_base);
        let mut form = MultipartForm::new()
            .text("model", call.upstream_model.clone())
            .text("prompt", call.prompt.clone());
        let fields = edit_file_fields(call)?;
        tracing::debug!(
            %endpoint,
            model = %call.upstream_model,
            files = fields.len(),
            masked = call.mask.is_some(),
            "openai edit"
        );
        for (field, path) in fields {
            form = form.part(field, png_part(&path)?);
        }

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&api_key)
            .multipart(form)
            .send()
            .context("OpenAI edits request failed")?;
        let response_payload = response_json_or_error("OpenAI edits", response)?;
        Ok(first_image_item(&response_payload))
    }
}
