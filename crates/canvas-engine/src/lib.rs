pub mod error;
pub mod providers;
pub mod service;
pub mod staging;

pub use error::{GenerationError, UNKNOWN_ERROR_MESSAGE};
pub use providers::{
    default_provider_registry, ApiKey, EditCall, GenerateCall, ImageProvider,
    ImageProviderRegistry, OpenAiProvider, ProviderImage, StabilityProvider, UpstreamSize,
    DEFAULT_UPSTREAM_TIMEOUT,
};
pub use service::GenerationService;
pub use staging::StagedImages;
