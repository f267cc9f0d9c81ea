//! JSON bodies exchanged between the canvas client and the generation
//! endpoints. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

pub const GENERATE_IMAGE_PATH: &str = "/api/generate-image";
pub const EDIT_IMAGE_PATH: &str = "/api/edit-image";
pub const MODELS_PATH: &str = "/api/models";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub resolution: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditImageRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_index: Option<i64>,
}

impl EditImageRequest {
    /// Mask index that selects the masked-edit path, if any. Negative
    /// values are the canvas's "unset" marker and count as absent.
    pub fn effective_mask_index(&self) -> Option<usize> {
        if self.images.len() < 2 {
            return None;
        }
        self.mask_index
            .filter(|index| *index >= 0)
            .map(|index| index as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageResult {
    pub image_url: String,
    pub metadata: ImageMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
