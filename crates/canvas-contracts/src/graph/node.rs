use serde::{Deserialize, Serialize};

use super::GraphError;
use crate::api::ImageMetadata;
use crate::models::DEFAULT_IMAGE_SIZE;

pub const MAX_UPLOADED_IMAGES: usize = 4;
/// Inpainting takes a base image and a mask.
pub const MAX_INPAINTING_UPLOADS: usize = 2;
pub const UNSET_MASK_INDEX: i64 = -1;

pub const DEFAULT_TEXT_TO_IMAGE_MODEL: &str = "dall-e-3";
pub const DEFAULT_EDIT_MODEL: &str = "gpt-image-1";

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    TextToImage,
    ImageToImage,
    ImageInpainting,
}

impl NodeKind {
    pub fn id_prefix(self) -> &'static str {
        match self {
            NodeKind::TextToImage => "text-to-image",
            NodeKind::ImageToImage => "image-to-image",
            NodeKind::ImageInpainting => "image-inpainting",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::TextToImage => "textToImage",
            NodeKind::ImageToImage => "imageToImage",
            NodeKind::ImageInpainting => "imageInpainting",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextToImageData {
    pub prompt: String,
    pub model: String,
    pub resolution: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ImageMetadata>,
}

impl Default for TextToImageData {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            model: DEFAULT_TEXT_TO_IMAGE_MODEL.to_string(),
            resolution: DEFAULT_IMAGE_SIZE.to_string(),
            generated_image: None,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageToImageData {
    pub prompt: String,
    pub model: String,
    pub uploaded_images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ImageMetadata>,
}

impl Default for ImageToImageData {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            model: DEFAULT_EDIT_MODEL.to_string(),
            uploaded_images: Vec::new(),
            generated_image: None,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InpaintingData {
    pub prompt: String,
    pub model: String,
    pub uploaded_images: Vec<String>,
    pub mask_index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ImageMetadata>,
}

impl Default for InpaintingData {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            model: DEFAULT_EDIT_MODEL.to_string(),
            uploaded_images: Vec::new(),
            mask_index: UNSET_MASK_INDEX,
            generated_image: None,
            metadata: None,
        }
    }
}

impl InpaintingData {
    pub fn mask_index(&self) -> Option<usize> {
        (self.mask_index >= 0).then_some(self.mask_index as usize)
    }

    fn set_mask_index(&mut self, index: i64) -> Result<(), GraphError> {
        if index < 0 {
            self.mask_index = UNSET_MASK_INDEX;
            return Ok(());
        }
        let len = self.uploaded_images.len();
        if index as usize >= len {
            return Err(GraphError::MaskIndexOutOfRange { index, len });
        }
        self.mask_index = index;
        Ok(())
    }

    fn replace_images(&mut self, images: Vec<String>) {
        self.uploaded_images = images;
        if self
            .mask_index()
            .is_some_and(|mask| mask >= self.uploaded_images.len())
        {
            self.mask_index = UNSET_MASK_INDEX;
        }
    }

    fn remove_image(&mut self, index: usize) {
        self.uploaded_images.remove(index);
        match self.mask_index() {
            Some(mask) if mask == index => self.mask_index = UNSET_MASK_INDEX,
            Some(mask) if mask > index => self.mask_index -= 1,
            _ => {}
        }
    }
}

/// Partial update of a node's editable fields. Fields that do not exist on
/// the node's kind are rejected rather than silently dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDataPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_index: Option<i64>,
}

impl NodeDataPatch {
    pub fn prompt(value: impl Into<String>) -> Self {
        Self {
            prompt: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn model(value: impl Into<String>) -> Self {
        Self {
            model: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn resolution(value: impl Into<String>) -> Self {
        Self {
            resolution: Some(value.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum NodeData {
    TextToImage(TextToImageData),
    ImageToImage(ImageToImageData),
    ImageInpainting(InpaintingData),
}

impl NodeData {
    pub fn default_for(kind: NodeKind) -> Self {
        match kind {
            NodeKind::TextToImage => NodeData::TextToImage(TextToImageData::default()),
            NodeKind::ImageToImage => NodeData::ImageToImage(ImageToImageData::default()),
            NodeKind::ImageInpainting => NodeData::ImageInpainting(InpaintingData::default()),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::TextToImage(_) => NodeKind::TextToImage,
            NodeData::ImageToImage(_) => NodeKind::ImageToImage,
            NodeData::ImageInpainting(_) => NodeKind::ImageInpainting,
        }
    }

    pub fn prompt(&self) -> &str {
        match self {
            NodeData::TextToImage(data) => &data.prompt,
            NodeData::ImageToImage(data) => &data.prompt,
            NodeData::ImageInpainting(data) => &data.prompt,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            NodeData::TextToImage(data) => &data.model,
            NodeData::ImageToImage(data) => &data.model,
            NodeData::ImageInpainting(data) => &data.model,
        }
    }

    pub fn uploaded_images(&self) -> Option<&[String]> {
        match self {
            NodeData::TextToImage(_) => None,
            NodeData::ImageToImage(data) => Some(&data.uploaded_images),
            NodeData::ImageInpainting(data) => Some(&data.uploaded_images),
        }
    }

    pub fn generated_image(&self) -> Option<&str> {
        match self {
            NodeData::TextToImage(data) => data.generated_image.as_deref(),
            NodeData::ImageToImage(data) => data.generated_image.as_deref(),
            NodeData::ImageInpainting(data) => data.generated_image.as_deref(),
        }
    }

    pub fn metadata(&self) -> Option<&ImageMetadata> {
        match self {
            NodeData::TextToImage(data) => data.metadata.as_ref(),
            NodeData::ImageToImage(data) => data.metadata.as_ref(),
            NodeData::ImageInpainting(data) => data.metadata.as_ref(),
        }
    }

    /// Mirrors the canvas's generate button. Every node needs a prompt,
    /// image-to-image needs an upload and inpainting needs a base image plus
    /// a chosen mask.
    pub fn is_ready(&self) -> bool {
        if self.prompt().trim().is_empty() {
            return false;
        }
        match self {
            NodeData::TextToImage(_) => true,
            NodeData::ImageToImage(data) => !data.uploaded_images.is_empty(),
            NodeData::ImageInpainting(data) => {
                data.uploaded_images.len() >= 2 && data.mask_index().is_some()
            }
        }
    }

    /// Shallow merge of a generation result; every other field is kept.
    pub fn set_generation_result(&mut self, image_url: String, metadata: ImageMetadata) {
        let (generated_image, slot) = match self {
            NodeData::TextToImage(data) => (&mut data.generated_image, &mut data.metadata),
            NodeData::ImageToImage(data) => (&mut data.generated_image, &mut data.metadata),
            NodeData::ImageInpainting(data) => (&mut data.generated_image, &mut data.metadata),
        };
        *generated_image = Some(image_url);
        *slot = Some(metadata);
    }

    pub fn apply_patch(&mut self, patch: NodeDataPatch) -> Result<(), GraphError> {
        let kind = self.kind();
        let unsupported = |field: &'static str| GraphError::UnsupportedField { field, kind };
        if patch.resolution.is_some() && kind != NodeKind::TextToImage {
            return Err(unsupported("resolution"));
        }
        if patch.uploaded_images.is_some() && kind == NodeKind::TextToImage {
            return Err(unsupported("uploadedImages"));
        }
        if patch.mask_index.is_some() && kind != NodeKind::ImageInpainting {
            return Err(unsupported("maskIndex"));
        }
        if let Some(images) = patch.uploaded_images.as_ref() {
            check_image_limit(images.len(), MAX_UPLOADED_IMAGES)?;
        }

        match self {
            NodeData::TextToImage(data) => {
                if let Some(prompt) = patch.prompt {
                    data.prompt = prompt;
                }
                if let Some(model) = patch.model {
                    data.model = model;
                }
                if let Some(resolution) = patch.resolution {
                    data.resolution = resolution;
                }
            }
            NodeData::ImageToImage(data) => {
                if let Some(prompt) = patch.prompt {
                    data.prompt = prompt;
                }
                if let Some(model) = patch.model {
                    data.model = model;
                }
                if let Some(images) = patch.uploaded_images {
                    data.uploaded_images = images;
                }
            }
            NodeData::ImageInpainting(data) => {
                if let Some(mask_index) = patch.mask_index {
                    let len = patch
                        .uploaded_images
                        .as_ref()
                        .map(Vec::len)
                        .unwrap_or(data.uploaded_images.len());
                    if mask_index >= 0 && mask_index as usize >= len {
                        return Err(GraphError::MaskIndexOutOfRange {
                            index: mask_index,
                            len,
                        });
                    }
                }
                if let Some(prompt) = patch.prompt {
                    data.prompt = prompt;
                }
                if let Some(model) = patch.model {
                    data.model = model;
                }
                if let Some(images) = patch.uploaded_images {
                    data.replace_images(images);
                }
                if let Some(mask_index) = patch.mask_index {
                    data.set_mask_index(mask_index)?;
                }
            }
        }
        Ok(())
    }

    /// Replaces the image list of an edit node, keeping `mask_index` valid.
    pub fn set_uploaded_images(&mut self, images: Vec<String>) -> Result<(), GraphError> {
        check_image_limit(images.len(), MAX_UPLOADED_IMAGES)?;
        match self {
            NodeData::TextToImage(_) => Err(GraphError::UnsupportedField {
                field: "uploadedImages",
                kind: NodeKind::TextToImage,
            }),
            NodeData::ImageToImage(data) => {
                data.uploaded_images = images;
                Ok(())
            }
            NodeData::ImageInpainting(data) => {
                data.replace_images(images);
                Ok(())
            }
        }
    }

    /// File-picker style upload: extra files are dropped, and an inpainting
    /// node that receives two images uses the second one as its mask.
    pub fn upload_images(&mut self, mut images: Vec<String>) -> Result<(), GraphError> {
        match self {
            NodeData::TextToImage(_) => Err(GraphError::UnsupportedField {
                field: "uploadedImages",
                kind: NodeKind::TextToImage,
            }),
            NodeData::ImageToImage(data) => {
                images.truncate(MAX_UPLOADED_IMAGES);
                data.uploaded_images = images;
                Ok(())
            }
            NodeData::ImageInpainting(data) => {
                images.truncate(MAX_INPAINTING_UPLOADS);
                let has_mask = images.len() >= 2;
                data.replace_images(images);
                if has_mask {
                    data.mask_index = 1;
                }
                Ok(())
            }
        }
    }

    pub fn remove_uploaded_image(&mut self, index: usize) -> Result<(), GraphError> {
        let len = self.uploaded_images().map(<[String]>::len).ok_or(
            GraphError::UnsupportedField {
                field: "uploadedImages",
                kind: NodeKind::TextToImage,
            },
        )?;
        if index >= len {
            return Err(GraphError::ImageIndexOutOfRange { index, len });
        }
        match self {
            NodeData::TextToImage(_) => {}
            NodeData::ImageToImage(data) => {
                data.uploaded_images.remove(index);
            }
            NodeData::ImageInpainting(data) => data.remove_image(index),
        }
        Ok(())
    }

    pub fn set_mask_index(&mut self, index: i64) -> Result<(), GraphError> {
        match self {
            NodeData::ImageInpainting(data) => data.set_mask_index(index),
            other => Err(GraphError::UnsupportedField {
                field: "maskIndex",
                kind: other.kind(),
            }),
        }
    }
}

fn check_image_limit(count: usize, limit: usize) -> Result<(), GraphError> {
    if count > limit {
        return Err(GraphError::TooManyImages { limit, count });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub position: Position,
    #[serde(flatten)]
    pub data: NodeData,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }
}
