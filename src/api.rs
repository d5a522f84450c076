use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    app_state::AppState,
    context,
    error::FsError,
    files::{self, FileSystemTools},
    llm::QueryResponse,
    models::{FileNode, UploadedFile},
    prompt,
};

/// Límite por fichero subido (10 MB), aplicado en el boundary layer.
const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;
/// Límite del cuerpo multipart completo, con margen sobre el límite por fichero.
const UPLOAD_BODY_LIMIT: usize = 12 * 1024 * 1024;

// --- Payloads de la API ---

#[derive(Deserialize)]
pub struct ListFilesParams {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    recursive: bool,
}

#[derive(Deserialize)]
pub struct CreateFolderPayload {
    path: String,
}

#[derive(Deserialize)]
pub struct QueryPayload {
    /// Selección de contexto (método actual).
    #[serde(default)]
    paths: Option<Vec<String>>,
    /// Ruta única (método heredado del cliente antiguo).
    #[serde(default)]
    path: Option<String>,
    query: String,
    /// Contrato permisivo: si falta, se usa el backend por defecto de la
    /// configuración. Un selector desconocido se contesta en banda.
    #[serde(default)]
    model: Option<String>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_response(err: FsError) -> ApiError {
    (err.status_code(), Json(json!({"error": err.to_string()})))
}

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message})))
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/files", get(list_files_handler))
        .route("/api/files/upload", post(upload_file_handler))
        .route("/api/files/:filename", delete(delete_file_handler))
        .route("/api/folders", post(create_folder_handler))
        .route("/api/folders/upload", post(upload_to_folder_handler))
        .route("/api/query", post(query_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn list_files_handler(
    State(state): State<AppState>,
    Query(params): Query<ListFilesParams>,
) -> Result<Json<Vec<FileNode>>, ApiError> {
    let path = params.path.unwrap_or_else(|| "./".to_string());
    let files = state
        .fs_tools
        .list_directory(&path, params.recursive)
        .await
        .map_err(error_response)?;
    Ok(Json(files))
}

#[axum::debug_handler]
async fn create_folder_handler(
    State(state): State<AppState>,
    Json(payload): Json<CreateFolderPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.path.trim().is_empty() {
        return Err(bad_request("Invalid folder path"));
    }
    let folder = state
        .fs_tools
        .create_folder(&payload.path)
        .await
        .map_err(error_response)?;
    info!(path = %folder.path(), "Carpeta creada");
    Ok(Json(json!({
        "message": "Folder created successfully",
        "folder": folder,
    })))
}

#[axum::debug_handler]
async fn upload_to_folder_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let (folder_path, pending) = collect_multipart(multipart).await?;
    if pending.is_empty() {
        return Err(bad_request("No files uploaded"));
    }

    let mut uploaded = Vec::new();
    for (name, data) in &pending {
        uploaded.push(store_upload(&state.fs_tools, &folder_path, name, data).await?);
    }

    info!(
        folder = %folder_path,
        num_files = uploaded.len(),
        "Ficheros subidos"
    );
    Ok(Json(json!({
        "message": "Files uploaded successfully",
        "files": uploaded,
    })))
}

#[axum::debug_handler]
async fn upload_file_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let (_, mut pending) = collect_multipart(multipart).await?;
    let Some((name, data)) = pending.pop() else {
        return Err(bad_request("No file uploaded"));
    };

    let file = store_upload(&state.fs_tools, "", &name, &data).await?;
    info!(filename = %file.name, size = %file.size, "Fichero subido");
    Ok(Json(json!({
        "message": "File uploaded successfully",
        "file": file,
    })))
}

#[axum::debug_handler]
async fn delete_file_handler(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .fs_tools
        .delete_file(&filename)
        .await
        .map_err(error_response)?;
    info!(%filename, "Fichero borrado");
    Ok(Json(json!({ "message": "File deleted successfully" })))
}

#[axum::debug_handler]
async fn query_handler(
    State(state): State<AppState>,
    Json(payload): Json<QueryPayload>,
) -> Result<Json<QueryResponse>, ApiError> {
    if payload.query.trim().is_empty() {
        return Err(bad_request("Invalid query parameter"));
    }

    let model = payload
        .model
        .clone()
        .unwrap_or_else(|| state.config.default_backend.selector().to_string());

    // Método actual (paths[]) o heredado (path único); sin rutas, la
    // consulta va al modelo sin contexto.
    let selected: Vec<String> = match (&payload.paths, &payload.path) {
        (Some(paths), _) if !paths.is_empty() => paths.clone(),
        (None, Some(path)) | (Some(_), Some(path)) => vec![path.clone()],
        _ => Vec::new(),
    };
    debug!(num_paths = selected.len(), model = %model, "Consulta recibida");

    // Cualquier ruta inválida rechaza la petición completa antes de leer nada.
    let mut nodes = Vec::new();
    for path_ref in &selected {
        let mut found = state
            .fs_tools
            .context_from_path(path_ref)
            .await
            .map_err(error_response)?;
        nodes.append(&mut found);
    }

    let context = context::assemble(&nodes, context::MAX_FILE_CONTENT, context::MAX_TOTAL_CONTEXT);
    let formatted_prompt = prompt::format_context_prompt(&context, &payload.query);

    let response = state.llm.query(&formatted_prompt, &context, &model).await;
    info!(model = %response.model, failed = response.error.is_some(), "Consulta procesada");
    Ok(Json(response))
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}

// --- Utilidades de subida ---

/// Consume el multipart completo: devuelve el `folderPath` (si llegó) y los
/// pares (nombre original, bytes) de los campos de fichero.
async fn collect_multipart(
    mut multipart: Multipart,
) -> Result<(String, Vec<(String, Vec<u8>)>), ApiError> {
    let mut folder_path = String::new();
    let mut pending = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(&format!("Invalid multipart body: {e}")))?
    {
        let field_name = field.name().map(|s| s.to_string());
        match field_name.as_deref() {
            Some("folderPath") => {
                folder_path = field
                    .text()
                    .await
                    .map_err(|e| bad_request(&format!("Invalid folderPath field: {e}")))?;
            }
            Some("file") | Some("files") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(&format!("Invalid file field: {e}")))?;
                pending.push((name, data.to_vec()));
            }
            other => {
                debug!(field = ?other, "Campo multipart ignorado");
            }
        }
    }

    Ok((folder_path, pending))
}

/// Aplica la admisión por extensión y el límite de tamaño, y guarda el
/// fichero dentro de la carpeta indicada.
async fn store_upload(
    fs_tools: &FileSystemTools,
    folder_path: &str,
    name: &str,
    data: &[u8],
) -> Result<UploadedFile, ApiError> {
    if !files::is_text_file(name) && !files::is_supported_binary_file(name) {
        warn!(filename = %name, "Tipo de fichero no soportado");
        return Err(bad_request("Unsupported file type"));
    }
    if data.len() > MAX_UPLOAD_SIZE {
        return Err(bad_request("File exceeds the 10MB limit"));
    }
    fs_tools
        .save_file(folder_path, name, data)
        .await
        .map_err(error_response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{AppConfig, Backend},
        llm::LlmRouter,
        sandbox::PathSandbox,
    };
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    /// Backend de pruebas que habla el protocolo de Ollama: captura cada
    /// cuerpo recibido en `/api/generate` y contesta con una respuesta fija.
    async fn spawn_ollama_stub(captured: Arc<Mutex<Vec<serde_json::Value>>>) -> String {
        let app = Router::new().route(
            "/api/generate",
            post(move |Json(body): Json<serde_json::Value>| {
                let captured = captured.clone();
                async move {
                    captured.lock().unwrap().push(body);
                    Json(json!({ "response": "aquí tienes" }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn state_for(dir: &TempDir, ollama_base_url: String) -> AppState {
        let cfg = AppConfig {
            server_addr: "127.0.0.1:0".to_string(),
            storage_root: dir.path().to_path_buf(),
            ollama_base_url,
            llamacpp_base_url: "http://127.0.0.1:9".to_string(),
            together_api_key: String::new(),
            model_name: "llama2".to_string(),
            default_backend: Backend::Ollama,
        };
        let root = dir.path().canonicalize().unwrap();
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();
        AppState {
            fs_tools: FileSystemTools::new(PathSandbox::new(root)),
            llm: LlmRouter::from_config(&cfg).unwrap(),
            config: cfg,
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
        }
    }

    #[tokio::test]
    async fn query_flow_sends_the_formatted_prompt_to_the_backend_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/app.ts"), "code").unwrap();

        let captured = Arc::new(Mutex::new(Vec::new()));
        let base_url = spawn_ollama_stub(captured.clone()).await;
        let state = state_for(&dir, base_url);

        let payload = QueryPayload {
            paths: Some(vec!["notes.txt".to_string(), "src/app.ts".to_string()]),
            path: None,
            query: "what is here?".to_string(),
            model: Some("ollama".to_string()),
        };
        let Json(response) = query_handler(State(state), Json(payload)).await.unwrap();

        assert_eq!(response.model, "ollama");
        assert_eq!(response.text, "aquí tienes");
        assert!(response.error.is_none());

        // Exactamente una petición saliente, y lo que llega al backend es
        // el prompt ya formateado (no el contexto en crudo).
        let requests = captured.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["model"], "llama2");
        assert_eq!(requests[0]["stream"], false);

        let prompt_sent = requests[0]["prompt"].as_str().unwrap();
        assert!(prompt_sent.starts_with("### System:"));
        assert!(prompt_sent.contains("File: notes.txt\n```\nhello\n```"));
        assert!(prompt_sent.contains("File: src/app.ts\n```\ncode\n```"));
        assert!(prompt_sent.contains("### User: what is here?"));
        assert!(prompt_sent.ends_with("### Assistant:"));

        // Y en el orden de selección: primero notes.txt, después src/app.ts.
        let notes_pos = prompt_sent.find("File: notes.txt").unwrap();
        let app_pos = prompt_sent.find("File: src/app.ts").unwrap();
        assert!(notes_pos < app_pos);
    }

    #[tokio::test]
    async fn traversal_in_query_paths_rejects_without_calling_the_backend() {
        let dir = tempfile::tempdir().unwrap();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let base_url = spawn_ollama_stub(captured.clone()).await;
        let state = state_for(&dir, base_url);

        let payload = QueryPayload {
            paths: Some(vec!["../../etc/passwd".to_string()]),
            path: None,
            query: "what is here?".to_string(),
            model: Some("ollama".to_string()),
        };
        let (status, _) = query_handler(State(state), Json(payload))
            .await
            .unwrap_err();

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(captured.lock().unwrap().is_empty());
    }
}
