mod gemini_http;
mod mock;

pub use gemini_http::GeminiHttpTransport;
pub use mock::MockTransport;

use crate::providers::types::{ProviderError, ProviderRequest, ProviderResponse};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    Gemini,
    Mock,
}

pub trait ExecutionTransport: Send + Sync {
    fn dispatch(
        &self,
        request: &ProviderRequest,
        api_key: Option<&str>,
    ) -> Result<ProviderResponse, ProviderError>;

    fn requires_api_key(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}
