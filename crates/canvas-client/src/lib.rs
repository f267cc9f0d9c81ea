//! Canvas-side half of the image workflow: the node graph store and the
//! HTTP client it uses to reach a canvas server.

pub mod api;
pub mod store;

pub use api::{ClientError, HttpImageClient, ImageGenerationApi, EDIT_FAILED, GENERATE_FAILED};
pub use store::{CanvasSnapshot, CanvasStore, GenerationStatus, StoreError};
