//! Taxonomía de errores del núcleo de ficheros.
//!
//! Los fallos de backend LLM no aparecen aquí: viajan dentro del propio
//! `QueryResponse` (ver `llm.rs`), nunca como error de transporte.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    /// La ruta intenta escapar del directorio de almacenamiento.
    /// Se rechaza siempre, nunca se corrige en silencio.
    #[error("La ruta escapa del directorio de almacenamiento: {0}")]
    SandboxViolation(String),

    /// La ruta pasó la validación pero no existe en disco.
    #[error("La ruta no existe: {0}")]
    NotFound(String),

    /// La entrada existe pero su contenido no se pudo leer.
    #[error("No se pudo leer: {0}")]
    ReadFailure(String),

    /// Petición malformada (ruta o parámetros inválidos), rechazada antes de tocar disco.
    #[error("Petición inválida: {0}")]
    InvalidRequest(String),
}

impl FsError {
    /// Código HTTP con el que el boundary layer expone cada clase de error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            FsError::SandboxViolation(_) => StatusCode::FORBIDDEN,
            FsError::NotFound(_) => StatusCode::NOT_FOUND,
            FsError::ReadFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FsError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}
