//! Sandbox de rutas: toda ruta enviada por el cliente se resuelve contra el
//! directorio de almacenamiento y se rechaza cualquier intento de escape.
//!
//! La validación es puramente léxica: un segmento `..` se rechaza antes de
//! tocar el sistema de ficheros, aunque segmentos posteriores "volvieran a
//! entrar" en la raíz.

use std::path::{Path, PathBuf};

use crate::error::FsError;

/// Resuelve rutas relativas del cliente dentro de una raíz fija e inmutable.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    /// `root` debe ser una ruta absoluta (canonicalizada en el arranque).
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resuelve una ruta del cliente a una ruta absoluta dentro de la raíz.
    ///
    /// Cadena vacía o `"."` equivalen a la propia raíz. Cualquier segmento
    /// `..` tras la normalización produce `SandboxViolation`.
    pub fn resolve(&self, path_ref: &str) -> Result<PathBuf, FsError> {
        let normalized = normalize_ref(path_ref);
        if normalized.is_empty() {
            return Ok(self.root.clone());
        }

        let mut resolved = self.root.clone();
        for segment in normalized.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(FsError::SandboxViolation(path_ref.to_string()));
                }
                seg => resolved.push(seg),
            }
        }

        // La construcción por segmentos ya garantiza el prefijo; la
        // comprobación final es por componentes, no por subcadena, para que
        // una raíz hermana (`/storageX`) jamás pase como descendiente.
        if !resolved.starts_with(&self.root) {
            return Err(FsError::SandboxViolation(path_ref.to_string()));
        }

        Ok(resolved)
    }

    /// Ruta relativa a la raíz, con separadores `/` independientemente del SO.
    pub fn relative(&self, absolute: &Path) -> String {
        absolute
            .strip_prefix(&self.root)
            .unwrap_or(absolute)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// Normaliza la ruta del cliente: separadores unificados, separadores
/// repetidos colapsados, `./` iniciales y barra inicial eliminados, y un
/// alias `storage/` inicial descartado.
fn normalize_ref(raw: &str) -> String {
    let mut s = raw.replace('\\', "/");
    while s.contains("//") {
        s = s.replace("//", "/");
    }

    let mut rest = s.trim_start_matches('/');
    while let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }
    if rest == "." {
        return String::new();
    }
    if let Some(stripped) = rest.strip_prefix("storage/") {
        rest = stripped;
    } else if rest == "storage" {
        rest = "";
    }

    rest.to_string()
}
