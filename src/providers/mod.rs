pub mod runtime;
pub mod types;

pub use runtime::ProviderRuntime;
pub use types::{
    GenerationOptions, ProviderError, ProviderRequest, ProviderResponse, ProviderUsage,
    SafetyPolicy,
};
