mod edge;
mod node;

use thiserror::Error;

pub use edge::{edge_id, Edge};
pub use node::{
    ImageToImageData, InpaintingData, Node, NodeData, NodeDataPatch, NodeKind, Position,
    TextToImageData, DEFAULT_EDIT_MODEL, DEFAULT_TEXT_TO_IMAGE_MODEL, MAX_INPAINTING_UPLOADS,
    MAX_UPLOADED_IMAGES, UNSET_MASK_INDEX,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("field '{field}' does not apply to {} nodes", .kind.as_str())]
    UnsupportedField { field: &'static str, kind: NodeKind },
    #[error("at most {limit} images can be uploaded, got {count}")]
    TooManyImages { limit: usize, count: usize },
    #[error("image index {index} out of range for {len} uploaded images")]
    ImageIndexOutOfRange { index: usize, len: usize },
    #[error("mask index {index} out of range for {len} uploaded images")]
    MaskIndexOutOfRange { index: i64, len: usize },
}
