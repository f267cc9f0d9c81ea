use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use canvas_contracts::api::{
    EditImageRequest, GenerateImageRequest, GenerateImageResult, ImageMetadata,
};
use canvas_contracts::graph::{
    Edge, GraphError, Node, NodeData, NodeDataPatch, NodeKind, Position,
};
use canvas_contracts::models::{Capability, ModelRegistry};
use canvas_contracts::now_utc_iso;
use indexmap::IndexMap;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;

use crate::api::{ClientError, ImageGenerationApi};

const PLACEHOLDER_SEED_RANGE: std::ops::Range<u64> = 0..1_000_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a generation is already running for node {0}")]
    GenerationInFlight(String),
    #[error("node {0} is not ready to generate")]
    NotReady(String),
    #[error("at most {limit} images can be uploaded, got {count}")]
    ImageLimit { limit: usize, count: usize },
    #[error("mask index {index} out of range for {len} uploaded images")]
    MaskIndexOutOfRange { index: i64, len: usize },
    #[error("unknown node {0}")]
    UnknownNode(String),
    #[error("cannot connect {from} to {to}: {reason}")]
    InvalidEdge {
        from: String,
        to: String,
        reason: &'static str,
    },
    #[error("{0}")]
    Graph(GraphError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl From<GraphError> for StoreError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::TooManyImages { limit, count } => StoreError::ImageLimit { limit, count },
            GraphError::MaskIndexOutOfRange { index, len } => {
                StoreError::MaskIndexOutOfRange { index, len }
            }
            other => StoreError::Graph(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GenerationStatus {
    #[default]
    Idle,
    Generating,
    Succeeded,
    Failed,
}

/// Serializable view of the whole canvas.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanvasSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

struct NodeSlot {
    node: Node,
    status: GenerationStatus,
}

#[derive(Default)]
struct CanvasState {
    next_id: u64,
    nodes: IndexMap<String, NodeSlot>,
    edges: Vec<Edge>,
}

impl CanvasState {
    fn slot_mut(&mut self, node_id: &str) -> Result<&mut NodeSlot, StoreError> {
        self.nodes
            .get_mut(node_id)
            .ok_or_else(|| StoreError::UnknownNode(node_id.to_string()))
    }
}

/// What a node's generate button turns into.
enum Dispatch {
    Generate(GenerateImageRequest),
    Edit(EditImageRequest),
    Placeholder(GenerateImageResult),
}

/// Node graph of one canvas plus the generation workflow for its nodes.
///
/// All methods take `&self`; the graph lives behind a mutex that is never
/// held while a backend call is running, so different nodes can generate
/// at the same time. A node accepts one generation at a time.
pub struct CanvasStore {
    state: Mutex<CanvasState>,
    client: Arc<dyn ImageGenerationApi>,
    models: ModelRegistry,
}

impl CanvasStore {
    pub fn new(client: Arc<dyn ImageGenerationApi>) -> Self {
        Self::with_models(client, ModelRegistry::default())
    }

    pub fn with_models(client: Arc<dyn ImageGenerationApi>, models: ModelRegistry) -> Self {
        Self {
            state: Mutex::new(CanvasState::default()),
            client,
            models,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CanvasState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add_node(&self, kind: NodeKind, position: Position) -> String {
        let mut state = self.lock();
        let id = format!("{}-{}", kind.id_prefix(), state.next_id);
        state.next_id += 1;
        state.nodes.insert(
            id.clone(),
            NodeSlot {
                node: Node {
                    id: id.clone(),
                    position,
                    data: NodeData::default_for(kind),
                },
                status: GenerationStatus::Idle,
            },
        );
        tracing::debug!(node = %id, kind = kind.as_str(), "node added");
        id
    }

    pub fn add_text_to_image_node(&self, position: Position) -> String {
        self.add_node(NodeKind::TextToImage, position)
    }

    pub fn add_image_to_image_node(&self, position: Position) -> String {
        self.add_node(NodeKind::ImageToImage, position)
    }

    pub fn add_image_inpainting_node(&self, position: Position) -> String {
        self.add_node(NodeKind::ImageInpainting, position)
    }

    /// Shallow merge of `patch` into the node's data.
    pub fn update_node_data(&self, node_id: &str, patch: NodeDataPatch) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.slot_mut(node_id)?.node.data.apply_patch(patch)?;
        Ok(())
    }

    pub fn move_node(&self, node_id: &str, position: Position) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.slot_mut(node_id)?.node.position = position;
        Ok(())
    }

    /// Connects two existing nodes and returns the edge id. Connecting the
    /// same pair again returns the existing edge.
    pub fn connect(&self, source: &str, target: &str) -> Result<String, StoreError> {
        let mut state = self.lock();
        for node_id in [source, target] {
            if !state.nodes.contains_key(node_id) {
                return Err(StoreError::UnknownNode(node_id.to_string()));
            }
        }
        if source == target {
            return Err(StoreError::InvalidEdge {
                from: source.to_string(),
                to: target.to_string(),
                reason: "a node cannot connect to itself",
            });
        }
        let edge = Edge::between(source, target);
        if !state.edges.iter().any(|existing| existing.id == edge.id) {
            state.edges.push(edge.clone());
        }
        Ok(edge.id)
    }

    /// Returns whether an edge was removed.
    pub fn remove_edge(&self, edge_id: &str) -> bool {
        let mut state = self.lock();
        let before = state.edges.len();
        state.edges.retain(|edge| edge.id != edge_id);
        state.edges.len() != before
    }

    pub fn set_uploaded_images(&self, node_id: &str, images: Vec<String>) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.slot_mut(node_id)?.node.data.set_uploaded_images(images)?;
        Ok(())
    }

    /// File-picker upload: inpainting nodes keep two images and take the
    /// second as the mask; image-to-image nodes keep four.
    pub fn upload_images(&self, node_id: &str, images: Vec<String>) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.slot_mut(node_id)?.node.data.upload_images(images)?;
        Ok(())
    }

    pub fn remove_uploaded_image(&self, node_id: &str, index: usize) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.slot_mut(node_id)?.node.data.remove_uploaded_image(index)?;
        Ok(())
    }

    pub fn set_mask_index(&self, node_id: &str, index: i64) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.slot_mut(node_id)?.node.data.set_mask_index(index)?;
        Ok(())
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.lock()
            .nodes
            .values()
            .map(|slot| slot.node.clone())
            .collect()
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.lock().edges.clone()
    }

    pub fn node(&self, node_id: &str) -> Option<Node> {
        self.lock().nodes.get(node_id).map(|slot| slot.node.clone())
    }

    pub fn generation_status(&self, node_id: &str) -> Option<GenerationStatus> {
        self.lock().nodes.get(node_id).map(|slot| slot.status)
    }

    pub fn snapshot(&self) -> CanvasSnapshot {
        let state = self.lock();
        CanvasSnapshot {
            nodes: state.nodes.values().map(|slot| slot.node.clone()).collect(),
            edges: state.edges.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self.snapshot())
    }

    /// Runs the node's generation and merges the result into its data.
    /// Unknown nodes are ignored; nodes missing a prompt or their images are
    /// rejected without calling the backend.
    pub fn generate_image(&self, node_id: &str) -> Result<(), StoreError> {
        let dispatch = {
            let mut state = self.lock();
            let Some(slot) = state.nodes.get_mut(node_id) else {
                return Ok(());
            };
            if slot.status == GenerationStatus::Generating {
                return Err(StoreError::GenerationInFlight(node_id.to_string()));
            }
            if !slot.node.data.is_ready() {
                return Err(StoreError::NotReady(node_id.to_string()));
            }
            slot.status = GenerationStatus::Generating;
            self.dispatch_for(&slot.node.data)
        };

        let outcome = match dispatch {
            Dispatch::Generate(request) => self.client.generate_image(&request),
            Dispatch::Edit(request) => self.client.generate_image_edit(&request),
            Dispatch::Placeholder(result) => Ok(result),
        };

        let mut state = self.lock();
        let slot = state.slot_mut(node_id)?;
        match outcome {
            Ok(result) => {
                slot.node
                    .data
                    .set_generation_result(result.image_url, result.metadata);
                slot.status = GenerationStatus::Succeeded;
                Ok(())
            }
            Err(err) => {
                slot.status = GenerationStatus::Failed;
                tracing::error!(node = %node_id, error = %err, "Failed to generate image");
                Err(StoreError::Client(err))
            }
        }
    }

    fn dispatch_for(&self, data: &NodeData) -> Dispatch {
        match data {
            NodeData::TextToImage(text) => {
                if self.models.ensure(&text.model, Capability::Generate).is_some() {
                    return Dispatch::Generate(GenerateImageRequest {
                        prompt: text.prompt.clone(),
                        model: text.model.clone(),
                        resolution: text.resolution.clone(),
                    });
                }
                Dispatch::Placeholder(placeholder_result(&text.model, &text.resolution))
            }
            NodeData::ImageToImage(edit) => Dispatch::Edit(EditImageRequest {
                prompt: edit.prompt.clone(),
                model: edit.model.clone(),
                images: edit.uploaded_images.clone(),
                mask_index: None,
            }),
            NodeData::ImageInpainting(inpaint) => Dispatch::Edit(EditImageRequest {
                prompt: inpaint.prompt.clone(),
                model: inpaint.model.clone(),
                images: inpaint.uploaded_images.clone(),
                mask_index: inpaint.mask_index().map(|index| index as i64),
            }),
        }
    }
}

/// Stand-in image for models no server endpoint generates.
fn placeholder_result(model: &str, resolution: &str) -> GenerateImageResult {
    let width = resolution.split('x').next().unwrap_or_default().trim();
    GenerateImageResult {
        image_url: format!("https://picsum.photos/{width}"),
        metadata: ImageMetadata {
            model: model.to_string(),
            seed: Some(rand::thread_rng().gen_range(PLACEHOLDER_SEED_RANGE)),
            timestamp: now_utc_iso(),
        },
    }
}
