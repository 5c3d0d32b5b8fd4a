use crate::providers::types::{
    GenerationOptions, ProviderError, ProviderRequest, ProviderResponse, ProviderUsage,
    SafetyPolicy,
};
use crate::transport::ExecutionTransport;
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HARASSMENT",
];

pub struct GeminiHttpTransport {
    endpoint: String,
    timeout: Duration,
}

impl GeminiHttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        if timeout.is_zero() {
            return Err(ProviderError::non_retryable(
                "Provider timeout must be greater than zero.",
            ));
        }
        Ok(Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn require_key(api_key: Option<&str>) -> Result<&str, ProviderError> {
        api_key.filter(|v| !v.trim().is_empty()).ok_or_else(|| {
            ProviderError::non_retryable(
                "Provider key is not set. Configure GOOGLE_API_KEY and try again.",
            )
        })
    }

    fn classify_http_status(http_status: u16) -> ProviderError {
        match http_status {
            401 | 403 => ProviderError::non_retryable(
                "Gemini rejected the request. Check your API key and try again.",
            ),
            408 | 429 => ProviderError::retryable(
                "Gemini is rate limiting or temporarily unavailable. Try again shortly.",
            ),
            500..=599 => {
                ProviderError::retryable("Gemini is temporarily unavailable. Try again shortly.")
            }
            _ => ProviderError::non_retryable(
                "Gemini rejected the request. Update the input and try again.",
            ),
        }
    }

    fn classify_send_failure(err: &reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::retryable("Gemini did not answer in time. Try again shortly.")
        } else if err.is_connect() {
            ProviderError::retryable("Gemini is temporarily unavailable. Try again shortly.")
        } else {
            ProviderError::non_retryable("Gemini request could not be sent.")
        }
    }

    pub(crate) fn request_body(input: &str, options: &GenerationOptions) -> Value {
        let mut body = serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": input}]}],
            "generationConfig": {
                "maxOutputTokens": options.max_output_tokens,
                "temperature": options.temperature,
                "topP": options.top_p
            }
        });
        if options.safety_policy == SafetyPolicy::BlockNone {
            body["safetySettings"] = Value::Array(
                HARM_CATEGORIES
                    .iter()
                    .map(|category| {
                        serde_json::json!({"category": category, "threshold": "BLOCK_NONE"})
                    })
                    .collect(),
            );
        }
        body
    }

    pub(crate) fn extract_response(
        model: &str,
        json: &Value,
    ) -> Result<ProviderResponse, ProviderError> {
        let candidate = json
            .get("candidates")
            .and_then(|v| v.as_array())
            .and_then(|candidates| candidates.first());

        if candidate.is_none() {
            if let Some(reason) = json
                .get("promptFeedback")
                .and_then(|f| f.get("blockReason"))
                .and_then(|v| v.as_str())
            {
                return Err(ProviderError::non_retryable(format!(
                    "Gemini declined the prompt ({reason})."
                )));
            }
        }

        let text = candidate
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|v| v.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<&str>>()
                    .concat()
            })
            .filter(|text| !text.is_empty());

        let input_tokens = json
            .get("usageMetadata")
            .and_then(|u| u.get("promptTokenCount"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let output_tokens = json
            .get("usageMetadata")
            .and_then(|u| u.get("candidatesTokenCount"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;

        Ok(ProviderResponse {
            model: model.to_string(),
            text,
            usage: ProviderUsage {
                input_tokens,
                output_tokens,
            },
        })
    }
}

impl ExecutionTransport for GeminiHttpTransport {
    fn dispatch(
        &self,
        request: &ProviderRequest,
        api_key: Option<&str>,
    ) -> Result<ProviderResponse, ProviderError> {
        let key = Self::require_key(api_key)?;
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|_| ProviderError::non_retryable("Could not initialize network client."))?;

        let url = format!("{}/{}:generateContent", self.endpoint, request.model);
        let response = client
            .post(url)
            .header("x-goog-api-key", key)
            .json(&Self::request_body(&request.input, &request.options))
            .send()
            .map_err(|e| Self::classify_send_failure(&e))?;

        let status = response.status().as_u16();
        if !(200..=299).contains(&status) {
            return Err(Self::classify_http_status(status));
        }

        let json = response
            .json::<Value>()
            .map_err(|_| ProviderError::retryable("Gemini response could not be parsed."))?;
        Self::extract_response(&request.model, &json)
    }

    fn requires_api_key(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::GeminiHttpTransport;
    use crate::providers::types::{GenerationOptions, ProviderRequest, SafetyPolicy};
    use crate::transport::ExecutionTransport;
    use std::time::Duration;

    #[test]
    fn request_body_carries_generation_config_and_safety_settings() {
        let body = GeminiHttpTransport::request_body("hello", &GenerationOptions::default());
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 8192);
        assert_eq!(body["safetySettings"].as_array().map(|a| a.len()), Some(4));

        let relaxed = GenerationOptions {
            safety_policy: SafetyPolicy::ProviderDefault,
            ..GenerationOptions::default()
        };
        let body = GeminiHttpTransport::request_body("hello", &relaxed);
        assert!(body.get("safetySettings").is_none());
    }

    #[test]
    fn extracts_first_candidate_text() {
        let json = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "{\"goal\":"}, {"text": "\"x\"}"}]}}],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 5}
        });
        let resp = GeminiHttpTransport::extract_response("gemini-test", &json).expect("response");
        assert_eq!(resp.text.as_deref(), Some("{\"goal\":\"x\"}"));
        assert_eq!(resp.usage.input_tokens, 12);
    }

    #[test]
    fn missing_candidates_yield_no_text() {
        let json = serde_json::json!({"candidates": []});
        let resp = GeminiHttpTransport::extract_response("gemini-test", &json).expect("response");
        assert!(resp.text.is_none());
    }

    #[test]
    fn blocked_prompt_is_a_provider_error() {
        let json = serde_json::json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let err = GeminiHttpTransport::extract_response("gemini-test", &json)
            .expect_err("blocked prompt");
        assert!(!err.is_retryable());
        assert!(err.message.contains("SAFETY"));
    }

    #[test]
    fn rate_limits_are_retryable_and_auth_failures_are_not() {
        assert!(GeminiHttpTransport::classify_http_status(429).is_retryable());
        assert!(GeminiHttpTransport::classify_http_status(503).is_retryable());
        assert!(!GeminiHttpTransport::classify_http_status(401).is_retryable());
        assert!(!GeminiHttpTransport::classify_http_status(400).is_retryable());
    }

    #[test]
    fn missing_key_is_rejected_before_network() {
        let transport = GeminiHttpTransport::new(Duration::from_secs(5)).expect("transport");
        let req = ProviderRequest {
            model: "gemini-1.5-flash-002".to_string(),
            input: "Reply with ok".to_string(),
            options: GenerationOptions::default(),
            correlation_id: None,
        };
        let err = transport.dispatch(&req, Some("  ")).expect_err("no key");
        assert!(err.message.contains("GOOGLE_API_KEY"));
    }

    #[test]
    fn unreachable_endpoint_is_retryable() {
        let transport = GeminiHttpTransport::new(Duration::from_secs(2))
            .expect("transport")
            .with_endpoint("http://127.0.0.1:9/");
        let req = ProviderRequest {
            model: "gemini-1.5-flash-002".to_string(),
            input: "Reply with ok".to_string(),
            options: GenerationOptions::default(),
            correlation_id: None,
        };
        let err = transport
            .dispatch(&req, Some("test-key"))
            .expect_err("nothing listens there");
        assert!(err.is_retryable());
    }

    // Env-gated integration test. Requires GOOGLE_API_KEY and real network access.
    #[test]
    fn live_gemini_call_is_env_gated() {
        if std::env::var("PATHWISE_RUN_LIVE_TESTS").ok().as_deref() != Some("1") {
            return;
        }

        let key = std::env::var("GOOGLE_API_KEY").expect("GOOGLE_API_KEY");
        let transport = GeminiHttpTransport::new(Duration::from_secs(60)).expect("transport");
        let req = ProviderRequest {
            model: "gemini-1.5-flash-002".to_string(),
            input: "Reply with the single word: ok".to_string(),
            options: GenerationOptions {
                max_output_tokens: 16,
                temperature: 0.0,
                ..GenerationOptions::default()
            },
            correlation_id: Some("live_gemini_test".to_string()),
        };

        let resp = transport.dispatch(&req, Some(&key)).expect("gemini response");
        assert!(resp.text.is_some());
    }
}
