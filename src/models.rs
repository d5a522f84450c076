//! Modelos de dominio (nodos del árbol de ficheros y metadatos de subida).

use serde::{Serialize, Serializer};

/// Resultado de leer el contenido de un fichero.
///
/// Distingue explícitamente "texto presente" de "no se pudo leer": un
/// fichero binario o ilegible sigue apareciendo en el listado, pero sin
/// campo `content` en la serialización (ausente, nunca cadena vacía).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Unreadable,
}

impl FileContent {
    pub fn is_unreadable(&self) -> bool {
        matches!(self, FileContent::Unreadable)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FileContent::Text(text) => Some(text),
            FileContent::Unreadable => None,
        }
    }
}

impl Serialize for FileContent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FileContent::Text(text) => serializer.serialize_str(text),
            // Nunca se alcanza: el campo se omite con skip_serializing_if.
            FileContent::Unreadable => serializer.serialize_none(),
        }
    }
}

/// Una entrada (fichero o directorio) del árbol de almacenamiento.
///
/// Variante etiquetada en lugar de una struct con campos anulables: un
/// directorio con contenido o un fichero con hijos son irrepresentables.
/// Serializa como `{name, path, kind: "file"|"directory", content?, children?}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FileNode {
    File {
        name: String,
        /// Ruta relativa a la raíz de almacenamiento, con separadores `/`.
        path: String,
        #[serde(skip_serializing_if = "FileContent::is_unreadable")]
        content: FileContent,
    },
    Directory {
        name: String,
        path: String,
        /// Presente sólo cuando se pidió listado recursivo.
        #[serde(skip_serializing_if = "Option::is_none")]
        children: Option<Vec<FileNode>>,
    },
}

impl FileNode {
    pub fn name(&self) -> &str {
        match self {
            FileNode::File { name, .. } | FileNode::Directory { name, .. } => name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FileNode::File { path, .. } | FileNode::Directory { path, .. } => path,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileNode::Directory { .. })
    }
}

/// Metadatos de un fichero subido, tal y como se devuelven al cliente.
#[derive(Debug, Clone, Serialize)]
pub struct UploadedFile {
    pub name: String,
    /// Tamaño formateado para humanos, p. ej. `"1.25 KB"`.
    pub size: String,
    pub path: String,
}
