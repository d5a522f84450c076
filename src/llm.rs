//! Router de backends LLM: normaliza tres protocolos HTTP distintos
//! (Ollama, Together, llama.cpp) en una única forma de respuesta.
//!
//! Cada adaptador aísla sus fallos: un error de red, de protocolo o un
//! cuerpo malformado se devuelve dentro del propio `QueryResponse`, nunca
//! como `Err` hacia el boundary layer. Así el cliente distingue "tu
//! petición estaba mal" (4xx) de "el backend está caído" (200 con `error`).

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use crate::config::{AppConfig, Backend};

/// Tiempo máximo de espera por respuesta de un backend. Un backend que no
/// responde se convierte en un fallo tras esta espera, nunca en un bloqueo.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Respuesta normalizada de cualquier backend.
///
/// `error` presente con `text` vacío señala un fallo del backend que aun
/// así se entrega como respuesta normal (HTTP 200): decisión deliberada,
/// ver el comentario del módulo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResponse {
    pub text: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    fn ok(text: String, backend: Backend) -> Self {
        Self {
            text,
            model: backend.selector().to_string(),
            error: None,
        }
    }

    fn failure(model: &str, message: String) -> Self {
        Self {
            text: String::new(),
            model: model.to_string(),
            error: Some(message),
        }
    }
}

// --- Cuerpos de respuesta de cada protocolo ---

#[derive(Deserialize)]
struct OllamaBody {
    #[serde(default)]
    response: Option<String>,
}

#[derive(Deserialize)]
struct TogetherBody {
    #[serde(default)]
    output: Option<TogetherOutput>,
}

#[derive(Deserialize)]
struct TogetherOutput {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct LlamaCppBody {
    #[serde(default)]
    content: Option<String>,
}

/// Router de consultas LLM. Sin estado entre peticiones: cada consulta es
/// una única llamada HTTP saliente, sin reintentos.
#[derive(Debug, Clone)]
pub struct LlmRouter {
    http: reqwest::Client,
    ollama_base_url: String,
    llamacpp_base_url: String,
    together_api_key: String,
    model_name: String,
}

impl LlmRouter {
    /// Construye el router a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            ollama_base_url: cfg.ollama_base_url.clone(),
            llamacpp_base_url: cfg.llamacpp_base_url.clone(),
            together_api_key: cfg.together_api_key.clone(),
            model_name: cfg.model_name.clone(),
        })
    }

    /// Despacha un prompt ya formateado al backend seleccionado.
    ///
    /// Un selector desconocido se responde inmediatamente, sin ninguna
    /// llamada de red.
    pub async fn query(&self, prompt: &str, raw_context: &str, selector: &str) -> QueryResponse {
        debug!(
            model = selector,
            prompt_len = prompt.len(),
            context_len = raw_context.len(),
            "Consulta LLM"
        );

        let backend = match Backend::from_selector(selector) {
            Some(backend) => backend,
            None => {
                return QueryResponse::failure(selector, "Invalid model specified".to_string());
            }
        };

        let result = match backend {
            Backend::Ollama => self.query_ollama(prompt).await,
            Backend::Together => self.query_together(prompt).await,
            Backend::LlamaCpp => self.query_llamacpp(prompt).await,
        };

        match result {
            Ok(text) => QueryResponse::ok(text, backend),
            Err(err) => {
                error!(model = selector, error = %err, "Fallo del backend LLM");
                QueryResponse::failure(backend.selector(), err.to_string())
            }
        }
    }

    async fn query_ollama(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model_name,
            "prompt": prompt,
            "stream": false,
        });
        let url = format!("{}/api/generate", self.ollama_base_url);
        debug!(%url, model = %self.model_name, "Petición a Ollama");

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let data: OllamaBody = response.json().await?;

        match data.response {
            Some(text) if !text.is_empty() => Ok(text),
            _ => Err(anyhow!("Respuesta inválida de Ollama")),
        }
    }

    async fn query_together(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model_name,
            "prompt": prompt,
            "max_tokens": 512,
        });

        let response = self
            .http
            .post("https://api.together.xyz/inference")
            .bearer_auth(&self.together_api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let data: TogetherBody = response.json().await?;

        data.output
            .and_then(|output| output.text)
            .ok_or_else(|| anyhow!("Respuesta inválida de Together"))
    }

    async fn query_llamacpp(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "prompt": prompt,
            "temperature": 0.7,
            "n_predict": 800,
            "stop": ["###", "### User:", "### System:"],
            "stream": false,
        });
        let url = format!("{}/completion", self.llamacpp_base_url);

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let data: LlamaCppBody = response.json().await?;

        match data.content {
            Some(text) if !text.is_empty() => Ok(text),
            _ => Err(anyhow!("Respuesta inválida del servidor llama.cpp")),
        }
    }
}
