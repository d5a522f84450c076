//! Construcción del prompt final que esperan las plantillas de los
//! backends: preámbulo de sistema, sección opcional de ficheros de contexto
//! y turno de usuario, cerrados con el marcador del turno del asistente.

use tracing::debug;

/// Instrucción de sistema fija. El framing literal (`### System:`,
/// `### User:`, `### Assistant:`) es un detalle de protocolo: coincide con
/// las secuencias de parada configuradas en los backends.
const SYSTEM_PROMPT: &str = "### System: You are an expert programmer named Lexie providing practical solutions. Always format code blocks with the appropriate language tag (e.g. ```javascript).";

/// Envuelve contexto y pregunta en el prompt final.
///
/// Las tres secciones mantienen siempre este orden; cuando el contexto está
/// vacío o es sólo espacio en blanco, la sección `Context files:` se omite
/// por completo (no se emite vacía).
pub fn format_context_prompt(context: &str, query: &str) -> String {
    let context_section = if context.trim().is_empty() {
        String::new()
    } else {
        let blocks: Vec<String> = context
            .split("File:")
            .filter(|part| !part.trim().is_empty())
            .map(|part| {
                let trimmed = part.trim();
                let (label, body) = match trimmed.split_once('\n') {
                    Some((first, rest)) => (first.trim(), rest),
                    None => (trimmed, ""),
                };
                format!("File: {label}\n```\n{body}\n```")
            })
            .collect();
        format!("\nContext files:\n{}", blocks.join("\n\n"))
    };

    let prompt = format!("{SYSTEM_PROMPT}{context_section}\n\n### User: {query}\n\n### Assistant:");
    debug!(
        prompt_len = prompt.len(),
        has_context = !context_section.is_empty(),
        "Prompt formateado"
    );
    prompt
}
