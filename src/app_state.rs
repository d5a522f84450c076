use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{config::AppConfig, files::FileSystemTools, llm::LlmRouter};

/// Estado compartido entre peticiones. Todo es inmutable o clonable salvo
/// el canal de apagado; ninguna petición muta estado compartido en memoria.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub fs_tools: FileSystemTools,
    pub llm: LlmRouter,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}
