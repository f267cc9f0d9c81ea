use serde::{Deserialize, Serialize};

/// Visual connection between two nodes. Edges carry no data and do not
/// influence generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn between(source: &str, target: &str) -> Self {
        Self {
            id: edge_id(source, target),
            source: source.to_string(),
            target: target.to_string(),
        }
    }
}

pub fn edge_id(source: &str, target: &str) -> String {
    format!("edge-{source}-{target}")
}
