//! Ensamblado del contexto: convierte un conjunto de nodos de fichero en un
//! único texto acotado listo para insertar en el prompt.
//!
//! El truncado es en dos fases (por fichero y total) para acotar a la vez
//! el caso "un fichero enorme" y el caso "muchos ficheros pequeños" sin
//! contar tokens. Siempre se trunca por caracteres, nunca por bytes.

use crate::files::is_text_file;
use crate::models::FileNode;
use tracing::debug;

/// Límite de caracteres por fichero dentro del contexto.
pub const MAX_FILE_CONTENT: usize = 1000;
/// Límite total de caracteres del contexto ensamblado.
pub const MAX_TOTAL_CONTEXT: usize = 4000;

const FILE_TRUNCATION_MARKER: &str = "... [content truncated]";
const CONTEXT_TRUNCATION_MARKER: &str = "... (truncated)";

/// Un fichero seleccionado para el contexto de una consulta.
#[derive(Debug, Clone)]
struct ContextItem<'a> {
    label: &'a str,
    text: &'a str,
}

/// Ensambla el contexto a partir de los nodos seleccionados.
///
/// Sólo entran ficheros con contenido legible y extensión de texto; el
/// resto se excluye en silencio aunque aparezca en el árbol de navegación.
/// El orden de entrada se conserva.
pub fn assemble(nodes: &[FileNode], per_file_limit: usize, total_limit: usize) -> String {
    let mut items = Vec::new();
    collect_items(nodes, &mut items);

    let blocks: Vec<String> = items
        .iter()
        .map(|item| {
            format!(
                "File: {}\n{}",
                item.label,
                truncate_file_content(item.text, per_file_limit)
            )
        })
        .collect();

    let joined = blocks.join("\n\n");
    let assembled = truncate_context(&joined, total_limit);
    debug!(
        files = items.len(),
        raw_len = joined.chars().count(),
        final_len = assembled.chars().count(),
        "Contexto ensamblado"
    );
    assembled
}

/// Aplana el árbol en una secuencia lineal de ficheros elegibles,
/// preservando el orden de recorrido.
fn collect_items<'a>(nodes: &'a [FileNode], out: &mut Vec<ContextItem<'a>>) {
    for node in nodes {
        match node {
            FileNode::File { path, content, .. } => {
                if let Some(text) = content.as_text() {
                    if is_text_file(path) {
                        out.push(ContextItem { label: path, text });
                    }
                }
            }
            FileNode::Directory { children, .. } => {
                if let Some(children) = children {
                    collect_items(children, out);
                }
            }
        }
    }
}

/// Trunca el contenido de un fichero a `limit` caracteres, con marcador.
fn truncate_file_content(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], FILE_TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// Trunca el contexto completo a `max_len` caracteres. Si el último salto
/// de línea cae dentro del 80% final del límite, se corta ahí para no
/// partir una línea; si no, se corta en el límite duro.
pub fn truncate_context(context: &str, max_len: usize) -> String {
    let Some((byte_limit, _)) = context.char_indices().nth(max_len) else {
        return context.to_string();
    };
    let truncated = &context[..byte_limit];

    if let Some(newline_byte) = truncated.rfind('\n') {
        let newline_chars = truncated[..newline_byte].chars().count();
        if newline_chars * 10 > max_len * 8 {
            return format!("{}\n{}", &truncated[..newline_byte], CONTEXT_TRUNCATION_MARKER);
        }
    }
    format!("{truncated}{CONTEXT_TRUNCATION_MARKER}")
}
