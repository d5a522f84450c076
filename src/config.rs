//! Carga y gestión de configuración de la aplicación (almacenamiento + backends LLM).

use std::env;
use std::path::PathBuf;
use anyhow::{anyhow, Result};

/// Backends LLM soportados. El selector es la cadena que viaja en la API
/// (`"ollama"`, `"together"`, `"llamacpp"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Ollama,
    Together,
    LlamaCpp,
}

impl Backend {
    /// Traduce el selector de la API a un backend conocido.
    /// Devuelve `None` para selectores desconocidos: el router responde a
    /// esos casos con un error dentro de la propia respuesta, sin red.
    pub fn from_selector(s: &str) -> Option<Self> {
        match s {
            "ollama" => Some(Self::Ollama),
            "together" => Some(Self::Together),
            "llamacpp" => Some(Self::LlamaCpp),
            _ => None,
        }
    }

    pub fn selector(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Together => "together",
            Self::LlamaCpp => "llamacpp",
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub storage_root: PathBuf,

    pub ollama_base_url: String,
    pub llamacpp_base_url: String,
    pub together_api_key: String,
    pub model_name: String,
    pub default_backend: Backend,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());

        let storage_root = PathBuf::from(
            env::var("STORAGE_ROOT").unwrap_or_else(|_| "./storage".to_string()),
        );

        let ollama_base_url = env::var("OLLAMA_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:11434".to_string());
        let llamacpp_base_url = env::var("LLAMA_CPP_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string());
        let together_api_key = env::var("TOGETHER_API_KEY").unwrap_or_default();

        let model_name = env::var("MODEL_NAME").unwrap_or_else(|_| "llama2".to_string());

        let default_backend_str =
            env::var("DEFAULT_MODEL").unwrap_or_else(|_| "llamacpp".to_string());
        let default_backend = Backend::from_selector(&default_backend_str)
            .ok_or_else(|| anyhow!("Backend LLM no soportado: {default_backend_str}"))?;

        Ok(Self {
            server_addr,
            storage_root,
            ollama_base_url,
            llamacpp_base_url,
            together_api_key,
            model_name,
            default_backend,
        })
    }
}
