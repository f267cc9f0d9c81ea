mod registry;
mod sizing;

pub use registry::{
    Capability, EndpointProfile, ModelRegistry, ModelSpec, SeedReporting, SizePolicy,
};
pub use sizing::{openai_preset_size, parse_dimensions, DEFAULT_IMAGE_SIZE, OPENAI_PRESET_SIZES};
