//! Service configuration from command-line flags and environment.

use crate::providers::{GenerationOptions, SafetyPolicy};
use crate::transport::TransportMode;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(name = "pathwise")]
#[command(about = "Learning roadmap service: generate, track, and revise milestone plans")]
pub struct Cli {
    /// Address the HTTP API listens on
    #[arg(long, env = "PATHWISE_BIND", default_value = "127.0.0.1:8787")]
    pub bind: SocketAddr,

    /// SQLite database file
    #[arg(long, env = "PATHWISE_DB_PATH", default_value = "pathwise.sqlite")]
    pub db_path: PathBuf,

    /// Plan generation backend
    #[arg(long, env = "PATHWISE_TRANSPORT", value_enum, default_value = "mock")]
    pub transport: TransportMode,

    /// Model name sent to the provider
    #[arg(long, env = "PATHWISE_MODEL", default_value = "gemini-1.5-flash-002")]
    pub model: String,

    /// Provider API key (required for the gemini transport)
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, default_value_t = 8192)]
    pub max_output_tokens: u32,

    #[arg(long, default_value_t = 2.0)]
    pub temperature: f32,

    #[arg(long, default_value_t = 0.95)]
    pub top_p: f32,

    #[arg(long, value_enum, default_value = "block_none")]
    pub safety_policy: SafetyPolicy,

    /// Give up on a provider call after this many seconds
    #[arg(long, default_value_t = 90)]
    pub provider_timeout_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("GOOGLE_API_KEY (or --api-key) is required when the transport is gemini")]
    MissingApiKey,
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    pub transport: TransportMode,
    pub model: String,
    pub api_key: Option<String>,
    pub options: GenerationOptions,
    pub provider_timeout: Duration,
    pub log_json: bool,
}

impl TryFrom<Cli> for AppConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let api_key = cli
            .api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        if cli.transport == TransportMode::Gemini && api_key.is_none() {
            return Err(ConfigError::MissingApiKey);
        }
        if cli.model.trim().is_empty() {
            return Err(ConfigError::Invalid("--model must not be empty".to_string()));
        }
        if cli.max_output_tokens == 0 {
            return Err(ConfigError::Invalid(
                "--max-output-tokens must be positive".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&cli.temperature) {
            return Err(ConfigError::Invalid(
                "--temperature must be between 0 and 2".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&cli.top_p) {
            return Err(ConfigError::Invalid("--top-p must be between 0 and 1".to_string()));
        }
        if cli.provider_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "--provider-timeout-secs must be positive".to_string(),
            ));
        }

        Ok(Self {
            bind: cli.bind,
            db_path: cli.db_path,
            transport: cli.transport,
            model: cli.model.trim().to_string(),
            api_key,
            options: GenerationOptions {
                max_output_tokens: cli.max_output_tokens,
                temperature: cli.temperature,
                top_p: cli.top_p,
                safety_policy: cli.safety_policy,
            },
            provider_timeout: Duration::from_secs(cli.provider_timeout_secs),
            log_json: cli.log_json,
        })
    }
}
