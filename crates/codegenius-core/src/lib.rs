pub mod config;
pub mod endpoint;
pub mod error;
pub mod tokens;
pub mod types;

pub use config::{
    GenerationParams, GeniusConfig, ModelConfig, SchedulerConfig, SynthesisConfig, MODEL_VARIANTS,
};
pub use endpoint::{ChunkStream, EndpointCall, EndpointReply, ModelEndpoint};
pub use error::{GeniusError, Result};
pub use tokens::{estimate_request_cost, estimate_tokens};
pub use types::{
    Architecture, FileNode, Generated, GenerationRequest, GenerationResult, ProjectArtifact,
    ProjectSpec, RequestId, RequestOrigin, SessionWarning, Symbol, SymbolKind,
};
