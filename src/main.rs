// Módulos de la aplicación
mod api;
mod app_state;
mod config;
mod context;
mod error;
mod files;
mod llm;
mod models;
mod prompt;
mod sandbox;

use crate::app_state::AppState;
use crate::files::FileSystemTools;
use crate::sandbox::PathSandbox;
use axum::Router;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Preparar la raíz de almacenamiento y el sandbox de rutas.
    // La raíz se canonicaliza una sola vez: todas las comprobaciones de
    // prefijo del sandbox trabajan sobre esta ruta absoluta fija.
    std::fs::create_dir_all(&cfg.storage_root)
        .expect("Error creando el directorio de almacenamiento");
    let storage_root = cfg
        .storage_root
        .canonicalize()
        .expect("Error canonicalizando la raíz de almacenamiento");
    info!("Raíz de almacenamiento: {}", storage_root.display());
    let fs_tools = FileSystemTools::new(PathSandbox::new(storage_root));

    // 4. Inicializar el router de backends LLM
    let llm = llm::LlmRouter::from_config(&cfg).expect("Error inicializando el router LLM");

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        fs_tools,
        llm,
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new("frontend"))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .expect("Error abriendo el puerto del servidor");
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    if webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .expect("Error del servidor HTTP");

    info!("✅ Servidor cerrado correctamente.");
}
