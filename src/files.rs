//! Operaciones sobre el árbol de almacenamiento: listado recursivo, lectura,
//! creación y borrado, siempre a través del sandbox de rutas.
//!
//! Un fichero ilegible (binario, no-UTF8, permisos) no aborta el listado:
//! se emite igualmente como nodo de tipo fichero sin contenido y el fallo
//! se registra en el log. Una lectura directa de un único fichero, en
//! cambio, sí falla la llamada completa.

use std::path::{Path, PathBuf};

use futures::future::{join_all, BoxFuture};
use tokio::fs;
use tracing::{debug, warn};

use crate::{
    error::FsError,
    models::{FileContent, FileNode, UploadedFile},
    sandbox::PathSandbox,
};

/// Extensiones que se consideran texto y entran en el contexto del prompt.
/// Cubre documentos, código, formatos de datos, assets web, configuración
/// y bases de datos.
const TEXT_EXTENSIONS: &[&str] = &[
    // Documentos
    ".txt", ".md", ".rtf", ".log", ".doc", ".docx", ".odt", ".pdf", ".tex", ".epub",
    // Web
    ".html", ".css", ".js", ".jsx", ".ts", ".tsx", ".vue", ".svelte", ".php", ".asp", ".jsp",
    // Lenguajes de programación
    ".py", ".java", ".cpp", ".c", ".h", ".cs", ".rb", ".go", ".rs", ".swift", ".kt", ".scala",
    ".r",
    // Shell / scripts
    ".sh", ".bash", ".ps1", ".bat", ".cmd",
    // Formatos de datos
    ".json", ".yaml", ".yml", ".xml", ".csv", ".tsv", ".ini", ".conf", ".config", ".env",
    ".properties", ".xls", ".xlsx", ".ods",
    // Assets web
    ".svg", ".htm", ".xhtml", ".less", ".sass", ".scss", ".graphql", ".gql", ".wasm",
    // Configuración
    ".toml", ".editorconfig", ".gitignore", ".npmrc", ".eslintrc", ".prettierrc", ".babelrc",
    // Bases de datos
    ".sql", ".prisma", ".sqllite", ".mdb",
];

/// Formatos binarios que se admiten al subir ficheros (aunque no entren en
/// el contexto del prompt).
const BINARY_EXTENSIONS: &[&str] = &[
    // Microsoft Office
    ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx",
    // OpenDocument
    ".odt", ".ods", ".odp",
    // PDF
    ".pdf",
    // Archivos comprimidos
    ".zip", ".rar", ".7z", ".tar", ".gz",
    // Imágenes
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg",
    // Otros formatos binarios
    ".epub", ".mobi",
];

fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

/// ¿Tiene el fichero una extensión de la lista de texto?
pub fn is_text_file(path: &str) -> bool {
    extension_of(path).is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
}

/// ¿Es un formato binario admitido en la subida de ficheros?
pub fn is_supported_binary_file(path: &str) -> bool {
    extension_of(path).is_some_and(|ext| BINARY_EXTENSIONS.contains(&ext.as_str()))
}

/// Formatea un tamaño en bytes para humanos: `"512.00 B"`, `"1.25 KB"`...
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

/// Genera un nombre único para un fichero subido: `nombre-<millis>.ext`.
pub fn unique_filename(original: &str) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| original.to_string());
    let millis = chrono::Utc::now().timestamp_millis();
    match path.extension() {
        Some(ext) => format!("{stem}-{millis}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{millis}"),
    }
}

fn map_io_error(path_ref: &str, err: std::io::Error) -> FsError {
    if err.kind() == std::io::ErrorKind::NotFound {
        FsError::NotFound(path_ref.to_string())
    } else {
        FsError::ReadFailure(format!("{path_ref}: {err}"))
    }
}

/// Herramientas de sistema de ficheros sobre la raíz de almacenamiento.
///
/// Sin estado mutable compartido: se puede clonar libremente entre
/// peticiones concurrentes.
#[derive(Debug, Clone)]
pub struct FileSystemTools {
    sandbox: PathSandbox,
}

impl FileSystemTools {
    pub fn new(sandbox: PathSandbox) -> Self {
        Self { sandbox }
    }

    pub fn sandbox(&self) -> &PathSandbox {
        &self.sandbox
    }

    /// Lista un directorio. Con `recursive`, los subdirectorios llevan sus
    /// hijos anidados; sin él, aparecen como nodos directorio sin `children`.
    pub async fn list_directory(
        &self,
        path_ref: &str,
        recursive: bool,
    ) -> Result<Vec<FileNode>, FsError> {
        debug!(path = path_ref, recursive, "Listando directorio");
        let abs = self.sandbox.resolve(path_ref)?;
        let meta = fs::metadata(&abs)
            .await
            .map_err(|e| map_io_error(path_ref, e))?;
        if !meta.is_dir() {
            return Err(FsError::InvalidRequest(format!(
                "La ruta no es un directorio: {path_ref}"
            )));
        }
        self.read_dir_nodes(abs, recursive).await
    }

    /// Lectura directa de un único fichero. A diferencia del listado, un
    /// fallo de lectura aquí falla la llamada completa.
    pub async fn read_file(&self, path_ref: &str) -> Result<FileNode, FsError> {
        let abs = self.sandbox.resolve(path_ref)?;
        let meta = fs::metadata(&abs)
            .await
            .map_err(|e| map_io_error(path_ref, e))?;
        if meta.is_dir() {
            return Err(FsError::InvalidRequest(format!(
                "La ruta no es un fichero: {path_ref}"
            )));
        }
        let text = fs::read_to_string(&abs)
            .await
            .map_err(|e| FsError::ReadFailure(format!("{path_ref}: {e}")))?;
        Ok(FileNode::File {
            name: node_name(&abs),
            path: self.sandbox.relative(&abs),
            content: FileContent::Text(text),
        })
    }

    /// Materializa el contexto de una ruta: un directorio produce su listado
    /// de primer nivel; un fichero, una secuencia de un solo elemento.
    pub async fn context_from_path(&self, path_ref: &str) -> Result<Vec<FileNode>, FsError> {
        let abs = self.sandbox.resolve(path_ref)?;
        let meta = fs::metadata(&abs)
            .await
            .map_err(|e| map_io_error(path_ref, e))?;
        if meta.is_dir() {
            self.read_dir_nodes(abs, false).await
        } else {
            Ok(vec![self.read_file(path_ref).await?])
        }
    }

    /// Crea una carpeta (y sus padres si hacen falta) dentro de la raíz.
    pub async fn create_folder(&self, path_ref: &str) -> Result<FileNode, FsError> {
        let abs = self.sandbox.resolve(path_ref)?;
        fs::create_dir_all(&abs)
            .await
            .map_err(|e| FsError::ReadFailure(format!("{path_ref}: {e}")))?;
        debug!(path = path_ref, "Carpeta creada");
        Ok(FileNode::Directory {
            name: node_name(&abs),
            path: self.sandbox.relative(&abs),
            children: None,
        })
    }

    /// Garantiza que la carpeta existe antes de escribir en ella.
    pub async fn ensure_folder(&self, path_ref: &str) -> Result<(), FsError> {
        let abs = self.sandbox.resolve(path_ref)?;
        if fs::metadata(&abs).await.is_err() {
            self.create_folder(path_ref).await?;
        }
        Ok(())
    }

    /// Borra un fichero regular. Directorios y otros tipos se rechazan.
    pub async fn delete_file(&self, path_ref: &str) -> Result<(), FsError> {
        let abs = self.sandbox.resolve(path_ref)?;
        let meta = fs::metadata(&abs)
            .await
            .map_err(|e| map_io_error(path_ref, e))?;
        if !meta.is_file() {
            return Err(FsError::InvalidRequest(format!(
                "La ruta no es un fichero: {path_ref}"
            )));
        }
        fs::remove_file(&abs)
            .await
            .map_err(|e| FsError::ReadFailure(format!("{path_ref}: {e}")))?;
        debug!(path = path_ref, "Fichero borrado");
        Ok(())
    }

    /// Guarda un fichero subido dentro de `dir_ref`, con un nombre único
    /// derivado del original. El nombre no puede contener separadores ni `..`.
    pub async fn save_file(
        &self,
        dir_ref: &str,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<UploadedFile, FsError> {
        // Sin separadores, un segmento `..` sólo puede ser el nombre entero;
        // puntos dobles interiores ("a..b.txt") son nombres legítimos.
        if original_name.is_empty()
            || original_name.contains('/')
            || original_name.contains('\\')
            || original_name == ".."
        {
            return Err(FsError::InvalidRequest(format!(
                "Nombre de fichero inválido: {original_name}"
            )));
        }

        self.ensure_folder(dir_ref).await?;
        let dir_abs = self.sandbox.resolve(dir_ref)?;
        let stored_name = unique_filename(original_name);
        let abs = dir_abs.join(&stored_name);

        fs::write(&abs, bytes)
            .await
            .map_err(|e| FsError::ReadFailure(format!("{original_name}: {e}")))?;

        let mime = mime_guess::from_path(original_name).first_or_octet_stream();
        debug!(
            name = original_name,
            stored = %stored_name,
            mime = %mime,
            size = bytes.len(),
            "Fichero guardado"
        );

        Ok(UploadedFile {
            name: original_name.to_string(),
            size: format_file_size(bytes.len() as u64),
            path: self.sandbox.relative(&abs),
        })
    }

    /// Listado de un directorio ya resuelto. Las lecturas de ficheros
    /// hermanos se lanzan en paralelo; `join_all` restaura el orden de
    /// entrada aunque las lecturas terminen desordenadas.
    fn read_dir_nodes(
        &self,
        dir: PathBuf,
        recursive: bool,
    ) -> BoxFuture<'_, Result<Vec<FileNode>, FsError>> {
        Box::pin(async move {
            let rel_dir = self.sandbox.relative(&dir);
            let mut reader = fs::read_dir(&dir)
                .await
                .map_err(|e| map_io_error(&rel_dir, e))?;

            let mut entries: Vec<(String, bool)> = Vec::new();
            while let Some(entry) = reader
                .next_entry()
                .await
                .map_err(|e| map_io_error(&rel_dir, e))?
            {
                let name = entry.file_name().to_string_lossy().to_string();
                let is_dir = entry
                    .file_type()
                    .await
                    .map(|t| t.is_dir())
                    .unwrap_or(false);
                entries.push((name, is_dir));
            }

            // Orden determinista: por nombre ascendente.
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let node_futures = entries.into_iter().map(|(name, is_dir)| {
                let abs = dir.join(&name);
                let rel = self.sandbox.relative(&abs);
                async move {
                    if is_dir {
                        let children = if recursive {
                            Some(self.read_dir_nodes(abs, true).await?)
                        } else {
                            None
                        };
                        Ok(FileNode::Directory {
                            name,
                            path: rel,
                            children,
                        })
                    } else {
                        let content = match fs::read_to_string(&abs).await {
                            Ok(text) => FileContent::Text(text),
                            Err(err) => {
                                warn!(path = %rel, error = %err, "No se pudo leer el contenido");
                                FileContent::Unreadable
                            }
                        };
                        Ok(FileNode::File {
                            name,
                            path: rel,
                            content,
                        })
                    }
                }
            });

            let nodes: Result<Vec<FileNode>, FsError> =
                join_all(node_futures).await.into_iter().collect();
            let nodes = nodes?;
            debug!(path = %rel_dir, entries = nodes.len(), "Directorio leído");
            Ok(nodes)
        })
    }
}

fn node_name(abs: &Path) -> String {
    abs.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| abs.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tools(dir: &TempDir) -> FileSystemTools {
        let root = dir.path().canonicalize().unwrap();
        FileSystemTools::new(PathSandbox::new(root))
    }

    #[tokio::test]
    async fn create_and_list_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fs_tools = tools(&dir);

        let folder = fs_tools.create_folder("docs/guides").await.unwrap();
        assert!(folder.is_dir());
        assert_eq!(folder.path(), "docs/guides");

        let listing = fs_tools.list_directory("docs", false).await.unwrap();
        assert_eq!(listing.len(), 1);
        assert!(listing[0].is_dir());
        assert_eq!(listing[0].name(), "guides");
        // Sin recursión no hay campo children.
        match &listing[0] {
            FileNode::Directory { children, .. } => assert!(children.is_none()),
            _ => panic!("se esperaba un directorio"),
        }
    }

    #[tokio::test]
    async fn listing_is_sorted_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fs_tools = tools(&dir);
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(dir.path().join("c")).unwrap();

        let first = fs_tools.list_directory("", false).await.unwrap();
        let names: Vec<_> = first.iter().map(|n| n.name().to_string()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c"]);

        let second = fs_tools.list_directory("", false).await.unwrap();
        let pairs = |nodes: &[FileNode]| {
            nodes
                .iter()
                .map(|n| (n.path().to_string(), n.is_dir()))
                .collect::<Vec<_>>()
        };
        assert_eq!(pairs(&first), pairs(&second));
    }

    #[tokio::test]
    async fn recursive_listing_nests_children() {
        let dir = tempfile::tempdir().unwrap();
        let fs_tools = tools(&dir);
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/app.ts"), "code").unwrap();

        let listing = fs_tools.list_directory("", true).await.unwrap();
        match &listing[0] {
            FileNode::Directory {
                children: Some(children),
                ..
            } => {
                assert_eq!(children.len(), 1);
                assert_eq!(children[0].path(), "src/app.ts");
            }
            other => panic!("se esperaba directorio con hijos, no {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreadable_file_is_listed_without_content() {
        let dir = tempfile::tempdir().unwrap();
        let fs_tools = tools(&dir);
        // Bytes que no son UTF-8 válido.
        std::fs::write(dir.path().join("img.png"), [0xffu8, 0xfe, 0x00, 0x48]).unwrap();
        std::fs::write(dir.path().join("ok.txt"), "hola").unwrap();

        let listing = fs_tools.list_directory("", false).await.unwrap();
        assert_eq!(listing.len(), 2);
        match &listing[0] {
            FileNode::File { content, .. } => assert!(content.is_unreadable()),
            other => panic!("se esperaba fichero, no {other:?}"),
        }
        match &listing[1] {
            FileNode::File { content, .. } => assert_eq!(content.as_text(), Some("hola")),
            other => panic!("se esperaba fichero, no {other:?}"),
        }
    }

    #[tokio::test]
    async fn direct_read_of_unreadable_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let fs_tools = tools(&dir);
        std::fs::write(dir.path().join("img.png"), [0xffu8, 0xfe]).unwrap();

        let err = fs_tools.read_file("img.png").await.unwrap_err();
        assert!(matches!(err, FsError::ReadFailure(_)));
    }

    #[tokio::test]
    async fn missing_paths_report_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fs_tools = tools(&dir);

        assert!(matches!(
            fs_tools.read_file("nope.txt").await.unwrap_err(),
            FsError::NotFound(_)
        ));
        assert!(matches!(
            fs_tools.list_directory("nope", false).await.unwrap_err(),
            FsError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn traversal_is_rejected_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let fs_tools = tools(&dir);

        for op in [
            fs_tools.list_directory("../../etc", false).await.err(),
            fs_tools.read_file("../../etc/passwd").await.err(),
            fs_tools.delete_file("../x").await.err(),
            fs_tools.create_folder("../evil").await.err(),
        ] {
            assert!(matches!(op, Some(FsError::SandboxViolation(_))));
        }
    }

    #[tokio::test]
    async fn context_from_path_handles_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let fs_tools = tools(&dir);
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/app.ts"), "code").unwrap();

        let single = fs_tools.context_from_path("notes.txt").await.unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].path(), "notes.txt");

        let listed = fs_tools.context_from_path("src").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path(), "src/app.ts");
    }

    #[tokio::test]
    async fn delete_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        let fs_tools = tools(&dir);
        std::fs::create_dir(dir.path().join("src")).unwrap();

        assert!(matches!(
            fs_tools.delete_file("src").await.unwrap_err(),
            FsError::InvalidRequest(_)
        ));

        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        fs_tools.delete_file("a.txt").await.unwrap();
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn save_file_stores_under_a_unique_name() {
        let dir = tempfile::tempdir().unwrap();
        let fs_tools = tools(&dir);

        let stored = fs_tools
            .save_file("uploads", "notes.txt", b"hello")
            .await
            .unwrap();
        assert_eq!(stored.name, "notes.txt");
        assert_eq!(stored.size, "5.00 B");
        assert!(stored.path.starts_with("uploads/notes-"));
        assert!(stored.path.ends_with(".txt"));

        let listing = fs_tools.list_directory("uploads", false).await.unwrap();
        assert_eq!(listing.len(), 1);
    }

    #[tokio::test]
    async fn save_file_rejects_names_with_separators() {
        let dir = tempfile::tempdir().unwrap();
        let fs_tools = tools(&dir);

        for name in ["../evil.txt", "a/b.txt", "a\\b.txt", "..", ""] {
            assert!(matches!(
                fs_tools.save_file("", name, b"x").await.unwrap_err(),
                FsError::InvalidRequest(_)
            ));
        }
    }

    #[tokio::test]
    async fn save_file_accepts_inner_double_dots() {
        let dir = tempfile::tempdir().unwrap();
        let fs_tools = tools(&dir);

        let stored = fs_tools
            .save_file("", "report..final.md", b"x")
            .await
            .unwrap();
        assert_eq!(stored.name, "report..final.md");
        assert!(stored.path.starts_with("report..final-"));
        assert!(stored.path.ends_with(".md"));
    }

    #[test]
    fn text_extension_allowlist() {
        assert!(is_text_file("src/app.ts"));
        assert!(is_text_file("README.MD"));
        assert!(is_text_file("config.toml"));
        assert!(!is_text_file("photo.png"));
        assert!(!is_text_file("binary"));
    }

    #[test]
    fn binary_upload_allowlist() {
        assert!(is_supported_binary_file("photo.png"));
        assert!(is_supported_binary_file("report.pdf"));
        assert!(!is_supported_binary_file("virus.exe"));
    }

    #[test]
    fn file_sizes_format_for_humans() {
        assert_eq!(format_file_size(512), "512.00 B");
        assert_eq!(format_file_size(1280), "1.25 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn unique_filenames_keep_the_extension() {
        let name = unique_filename("notes.txt");
        assert!(name.starts_with("notes-"));
        assert!(name.ends_with(".txt"));

        let bare = unique_filename("Makefile");
        assert!(bare.starts_with("Makefile-"));
    }
}
