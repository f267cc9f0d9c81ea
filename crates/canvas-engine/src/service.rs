use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use canvas_contracts::api::{
    EditImageRequest, GenerateImageRequest, GenerateImageResult, ImageMetadata,
};
use canvas_contracts::data_url;
use canvas_contracts::models::{
    openai_preset_size, parse_dimensions, Capability, EndpointProfile, ModelRegistry, ModelSpec,
    SeedReporting, SizePolicy,
};
use canvas_contracts::now_utc_iso;

use crate::error::GenerationError;
use crate::providers::{
    default_provider_registry, EditCall, GenerateCall, ImageProvider, ImageProviderRegistry,
    ProviderImage, UpstreamSize,
};
use crate::staging::StagedImages;

pub const PROMPT_REQUIRED: &str = "Prompt is required";
pub const IMAGES_REQUIRED: &str = "Images are required";
pub const UNSUPPORTED_MODEL: &str = "Unsupported model";
pub const UNSUPPORTED_EDIT_MODEL: &str = "Unsupported model for image editing";
pub const INVALID_RESOLUTION: &str = "Invalid resolution";
pub const MASK_INDEX_OUT_OF_RANGE: &str = "Mask index out of range";

/// Validates canvas requests, routes them through the model registry and
/// calls the matching provider.
pub struct GenerationService {
    models: ModelRegistry,
    providers: ImageProviderRegistry,
    staging_root: Option<PathBuf>,
}

impl GenerationService {
    pub fn new(models: ModelRegistry, providers: ImageProviderRegistry) -> Self {
        Self {
            models,
            providers,
            staging_root: None,
        }
    }

    pub fn with_default_providers(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self::new(
            ModelRegistry::default(),
            default_provider_registry(timeout)?,
        ))
    }

    /// Stages edit uploads under `root` instead of the system temp dir.
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.names()
    }

    pub fn generate(
        &self,
        request: &GenerateImageRequest,
    ) -> Result<GenerateImageResult, GenerationError> {
        require_prompt(&request.prompt)?;
        let model = self
            .models
            .resolve(&request.model, Capability::Generate)
            .ok_or_else(|| GenerationError::UnsupportedModel(UNSUPPORTED_MODEL.to_string()))?;
        let profile = endpoint(model, Capability::Generate, UNSUPPORTED_MODEL)?;
        let provider = self.provider_for(model)?;
        provider.preflight()?;

        let call = GenerateCall {
            upstream_model: profile.upstream_model.clone(),
            prompt: request.prompt.clone(),
            size: upstream_size(profile.sizing, &request.resolution)?,
        };
        tracing::info!(
            model = %model.name,
            provider = provider.name(),
            size = ?call.size,
            "generating image"
        );
        let image = provider
            .generate(&call)
            .map_err(GenerationError::Vendor)?;
        finish(profile, image)
    }

    pub fn edit(&self, request: &EditImageRequest) -> Result<GenerateImageResult, GenerationError> {
        require_prompt(&request.prompt)?;
        if request.images.is_empty() {
            return Err(GenerationError::Validation(IMAGES_REQUIRED.to_string()));
        }
        let model = self
            .models
            .resolve(&request.model, Capability::Edit)
            .ok_or_else(|| {
                GenerationError::UnsupportedModel(UNSUPPORTED_EDIT_MODEL.to_string())
            })?;
        let profile = endpoint(model, Capability::Edit, UNSUPPORTED_EDIT_MODEL)?;
        let provider = self.provider_for(model)?;
        provider.preflight()?;

        let mask_index = request.effective_mask_index();
        if mask_index.is_some_and(|index| index >= request.images.len()) {
            return Err(GenerationError::Validation(
                MASK_INDEX_OUT_OF_RANGE.to_string(),
            ));
        }
        let decoded = decode_images(&request.images)?;
        let staged = StagedImages::stage(self.staging_root.as_deref(), &decoded)
            .map_err(GenerationError::Internal)?;

        let outcome = edit_call(profile, &request.prompt, &staged, mask_index).and_then(|call| {
            tracing::info!(
                model = %model.name,
                provider = provider.name(),
                images = request.images.len(),
                masked = call.mask.is_some(),
                "editing image"
            );
            provider.edit(&call).map_err(GenerationError::Vendor)
        });
        staged.cleanup();
        finish(profile, outcome?)
    }

    fn provider_for(&self, model: &ModelSpec) -> Result<&dyn ImageProvider, GenerationError> {
        self.providers.get(&model.provider).ok_or_else(|| {
            GenerationError::Configuration(format!(
                "no provider registered for {} ({})",
                model.name, model.provider
            ))
        })
    }
}

fn require_prompt(prompt: &str) -> Result<(), GenerationError> {
    if prompt.trim().is_empty() {
        return Err(GenerationError::Validation(PROMPT_REQUIRED.to_string()));
    }
    Ok(())
}

fn endpoint<'a>(
    model: &'a ModelSpec,
    capability: Capability,
    unsupported: &str,
) -> Result<&'a EndpointProfile, GenerationError> {
    model
        .profile(capability)
        .ok_or_else(|| GenerationError::UnsupportedModel(unsupported.to_string()))
}

fn upstream_size(policy: SizePolicy, resolution: &str) -> Result<UpstreamSize, GenerationError> {
    match policy {
        SizePolicy::OpenAiPreset => Ok(UpstreamSize::Preset(
            openai_preset_size(resolution).to_string(),
        )),
        SizePolicy::Dimensions => parse_dimensions(resolution)
            .map(|(width, height)| UpstreamSize::Dimensions { width, height })
            .ok_or_else(|| GenerationError::Validation(INVALID_RESOLUTION.to_string())),
        SizePolicy::Ignored => Ok(UpstreamSize::Unspecified),
    }
}

fn decode_images(images: &[String]) -> Result<Vec<Vec<u8>>, GenerationError> {
    images
        .iter()
        .enumerate()
        .map(|(idx, raw)| {
            let invalid =
                || GenerationError::Validation(format!("Invalid image data at index {idx}"));
            let decoded = data_url::decode(raw).map_err(|err| {
                tracing::debug!(index = idx, error = %err, "rejecting upload");
                invalid()
            })?;
            if image::guess_format(&decoded.bytes).is_err() {
                return Err(invalid());
            }
            Ok(decoded.bytes)
        })
        .collect()
}

/// Masked edits send the first upload as the base and the mask upload
/// separately; otherwise every upload goes out as an input image.
fn edit_call(
    profile: &EndpointProfile,
    prompt: &str,
    staged: &StagedImages,
    mask_index: Option<usize>,
) -> Result<EditCall, GenerationError> {
    let missing = |index: usize| {
        GenerationError::Internal(anyhow!("staged image {index} is missing"))
    };
    let (images, mask) = match mask_index {
        Some(index) => {
            let base = staged.path(0).ok_or_else(|| missing(0))?;
            let mask = staged.path(index).ok_or_else(|| missing(index))?;
            (vec![base.to_path_buf()], Some(mask.to_path_buf()))
        }
        None => (staged.paths().to_vec(), None),
    };
    Ok(EditCall {
        upstream_model: profile.upstream_model.clone(),
        prompt: prompt.to_string(),
        images,
        mask,
    })
}

fn finish(
    profile: &EndpointProfile,
    image: ProviderImage,
) -> Result<GenerateImageResult, GenerationError> {
    let image_url = image.image_url().ok_or(GenerationError::NoImageData)?;
    let seed = match profile.seed {
        SeedReporting::Zero => Some(0),
        SeedReporting::Vendor => image.seed,
        SeedReporting::Omitted => None,
    };
    Ok(GenerateImageResult {
        image_url,
        metadata: ImageMetadata {
            model: profile.reported_model.clone(),
            seed,
            timestamp: now_utc_iso(),
        },
    })
}
