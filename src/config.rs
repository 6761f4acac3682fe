//! Configuration management for Alfred.
//!
//! Configuration is read from environment variables, after loading a `.env`
//! file from the working directory if one exists:
//! - `OLLAMA_SERVER` - Optional. Ollama base URL. Defaults to `http://localhost:11434`.
//! - `ALFRED_MODEL` - Optional. Chat model. Defaults to `llama3.1`. `azure` selects Azure OpenAI.
//! - `EMBED_MODEL` - Optional. Ollama embedding model. Defaults to `bge-m3`.
//! - `AZURE_API_KEY`, `AZURE_ENDPOINT`, `AZURE_API_VERSION` - Required together for Azure.
//! - `AZURE_CHAT_DEPLOYMENT` / `AZURE_EMBED_DEPLOYMENT` - Optional Azure deployment names.
//! - `CHROMA_URL` - Optional. Chroma base URL. Defaults to `http://localhost:8000`.
//! - `FUNCTIONS_COLLECTION` / `EMAIL_COLLECTION` - Optional. Chroma collection names.
//! - `FUNCTIONS_PATH` - Optional. Function catalog. Defaults to `data/functions.json`.
//! - `ALPHA_VANTAGE_URL` / `ALPHA_VANTAGE_KEY` - Alpha Vantage endpoint and key.
//! - `EXCHANGE_RATE_URL` - Optional. Currency rates endpoint.
//! - `RAPIDAPI_KEY` - RapidAPI key (flights, financial news).
//! - `RAPIDAPI_HOST` - Optional. `x-rapidapi-host` override; defaults to the host of each API URL.
//! - `FLIGHTS_URL` / `FINANCIAL_DATA_URL` - Optional RapidAPI base URLs.
//! - `GMAIL_ACCESS_TOKEN` / `GMAIL_QUERY` - E-mail ingestion.
//! - `PROMPTS_DIR` - Optional. Defaults to `prompts`.
//! - `CONTEXT_DIR` - Optional. Where conversation contexts are stored. Defaults to `.`.
//! - `HOST` / `PORT` - Optional. Web server bind. Defaults to `127.0.0.1:3000`.
//! - `MAX_ITERATIONS` - Optional. Maximum agent loop iterations. Defaults to `25`.
//! - `CODE_INTERPRETER_IMAGE` - Optional. Defaults to `python:3.10-alpine`.

use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "llama3.1";
pub const DEFAULT_EMBED_MODEL: &str = "bge-m3";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Which backend serves chat completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    Azure,
}

impl Provider {
    /// The model name `azure` is a switch, every other name is an Ollama model.
    pub fn for_model(model: &str) -> Self {
        if model.eq_ignore_ascii_case("azure") {
            Provider::Azure
        } else {
            Provider::Ollama
        }
    }
}

/// Azure OpenAI credentials and deployments.
#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub api_key: String,
    pub endpoint: String,
    pub api_version: String,
    pub chat_deployment: String,
    pub embed_deployment: String,
}

/// Credentials shared by the RapidAPI-hosted tools.
#[derive(Debug, Clone, Default)]
pub struct RapidApiConfig {
    pub key: Option<String>,
    pub host: Option<String>,
    pub flights_url: String,
    pub financial_data_url: String,
}

/// Vector database configuration.
#[derive(Debug, Clone)]
pub struct ChromaConfig {
    pub url: String,
    pub functions_collection: String,
    pub email_collection: String,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            functions_collection: "docs".to_string(),
            email_collection: "alfred".to_string(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ollama base URL
    pub ollama_url: String,

    /// Chat model name (`azure` routes to Azure OpenAI)
    pub model: String,

    /// Embedding model served by Ollama
    pub embed_model: String,

    /// Azure OpenAI, present only when fully configured
    pub azure: Option<AzureConfig>,

    pub chroma: ChromaConfig,

    /// Path of the Alpha Vantage function catalog
    pub functions_path: PathBuf,

    pub alpha_vantage_url: String,
    pub alpha_vantage_key: Option<String>,

    pub exchange_rate_url: String,

    pub rapidapi: RapidApiConfig,

    pub gmail_access_token: Option<String>,
    pub gmail_query: String,

    pub prompts_dir: PathBuf,
    pub context_dir: PathBuf,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Maximum iterations for the agent loop
    pub max_iterations: usize,

    pub code_interpreter_image: String,
}

impl Config {
    /// Load configuration from `.env` and the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparsable numbers and
    /// `ConfigError::MissingEnvVar` when `ALFRED_MODEL=azure` but the Azure
    /// variables are incomplete.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env is the normal case outside development.
        let _ = dotenv::dotenv();

        let model = env_or("ALFRED_MODEL", DEFAULT_MODEL);

        let port = env_or("PORT", "3000")
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let max_iterations = env_or("MAX_ITERATIONS", "25")
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("MAX_ITERATIONS".to_string(), format!("{}", e))
            })?;

        let azure = azure_from_env();
        if Provider::for_model(&model) == Provider::Azure && azure.is_none() {
            return Err(ConfigError::MissingEnvVar(
                "AZURE_API_KEY, AZURE_ENDPOINT, AZURE_API_VERSION".to_string(),
            ));
        }

        Ok(Self {
            ollama_url: env_or("OLLAMA_SERVER", "http://localhost:11434"),
            model,
            embed_model: env_or("EMBED_MODEL", DEFAULT_EMBED_MODEL),
            azure,
            chroma: ChromaConfig {
                url: env_or("CHROMA_URL", "http://localhost:8000"),
                functions_collection: env_or("FUNCTIONS_COLLECTION", "docs"),
                email_collection: env_or("EMAIL_COLLECTION", "alfred"),
            },
            functions_path: PathBuf::from(env_or("FUNCTIONS_PATH", "data/functions.json")),
            alpha_vantage_url: env_or("ALPHA_VANTAGE_URL", "https://www.alphavantage.co/query"),
            alpha_vantage_key: env_opt("ALPHA_VANTAGE_KEY"),
            exchange_rate_url: env_or(
                "EXCHANGE_RATE_URL",
                "https://api.exchangerate-api.com/v4/latest/",
            ),
            rapidapi: RapidApiConfig {
                key: env_opt("RAPIDAPI_KEY"),
                host: env_opt("RAPIDAPI_HOST"),
                flights_url: env_or("FLIGHTS_URL", "https://sky-scanner3.p.rapidapi.com/flights/"),
                financial_data_url: env_or(
                    "FINANCIAL_DATA_URL",
                    "https://investing11.p.rapidapi.com/",
                ),
            },
            gmail_access_token: env_opt("GMAIL_ACCESS_TOKEN"),
            gmail_query: env_or("GMAIL_QUERY", "after:2024/01/01"),
            prompts_dir: PathBuf::from(env_or("PROMPTS_DIR", "prompts")),
            context_dir: PathBuf::from(env_or("CONTEXT_DIR", ".")),
            host: env_or("HOST", "127.0.0.1"),
            port,
            max_iterations,
            code_interpreter_image: env_or("CODE_INTERPRETER_IMAGE", "python:3.10-alpine"),
        })
    }

    /// Create a config with local defaults (useful for testing).
    pub fn new(model: impl Into<String>, ollama_url: impl Into<String>) -> Self {
        Self {
            ollama_url: ollama_url.into(),
            model: model.into(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            azure: None,
            chroma: ChromaConfig::default(),
            functions_path: PathBuf::from("data/functions.json"),
            alpha_vantage_url: "https://www.alphavantage.co/query".to_string(),
            alpha_vantage_key: None,
            exchange_rate_url: "https://api.exchangerate-api.com/v4/latest/".to_string(),
            rapidapi: RapidApiConfig {
                key: None,
                host: None,
                flights_url: "https://sky-scanner3.p.rapidapi.com/flights/".to_string(),
                financial_data_url: "https://investing11.p.rapidapi.com/".to_string(),
            },
            gmail_access_token: None,
            gmail_query: "after:2024/01/01".to_string(),
            prompts_dir: PathBuf::from("prompts"),
            context_dir: PathBuf::from("."),
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_iterations: 25,
            code_interpreter_image: "python:3.10-alpine".to_string(),
        }
    }

    /// The provider serving chat for the configured model.
    pub fn provider(&self) -> Provider {
        Provider::for_model(&self.model)
    }

    /// Return a copy with another chat model (CLI `--model` override).
    ///
    /// Selecting `azure` without Azure credentials is rejected here so the
    /// failure surfaces before any request is made.
    pub fn with_model(&self, model: &str) -> Result<Self, ConfigError> {
        if Provider::for_model(model) == Provider::Azure && self.azure.is_none() {
            return Err(ConfigError::MissingEnvVar(
                "AZURE_API_KEY, AZURE_ENDPOINT, AZURE_API_VERSION".to_string(),
            ));
        }
        let mut next = self.clone();
        next.model = model.to_string();
        Ok(next)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn azure_from_env() -> Option<AzureConfig> {
    Some(AzureConfig {
        api_key: env_opt("AZURE_API_KEY")?,
        endpoint: env_opt("AZURE_ENDPOINT")?,
        api_version: env_opt("AZURE_API_VERSION")?,
        chat_deployment: env_or("AZURE_CHAT_DEPLOYMENT", "gpt-4o-mini"),
        embed_deployment: env_or("AZURE_EMBED_DEPLOYMENT", "text-embedding-ada-002"),
    })
}
