use crate::providers::types::{ProviderError, ProviderRequest, ProviderResponse};
use crate::transport::{ExecutionTransport, GeminiHttpTransport, MockTransport, TransportMode};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct ProviderRuntime {
    transport: Arc<dyn ExecutionTransport>,
    api_key: Option<String>,
}

impl ProviderRuntime {
    pub fn new(transport: Arc<dyn ExecutionTransport>, api_key: Option<String>) -> Self {
        Self { transport, api_key }
    }

    pub fn from_mode(
        mode: TransportMode,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let transport: Arc<dyn ExecutionTransport> = match mode {
            TransportMode::Gemini => Arc::new(GeminiHttpTransport::new(timeout)?),
            TransportMode::Mock => Arc::new(MockTransport::new()),
        };
        Ok(Self::new(transport, api_key))
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn dispatch(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let key = match self.transport.requires_api_key() {
            true => self.api_key.as_deref(),
            false => None,
        };

        self.transport.dispatch(request, key)
    }
}
