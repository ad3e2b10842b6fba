use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{
    decoder::{probe_info, DecodeThread, SymphoniaFrameSource},
    FrameSource, LoadResult, MusicSource,
};
use crate::{
    audio::track::{SourceKind, Track},
    error::DecodeError,
};

const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a", "mp4", "aac"];

/// Plays files from disk; a directory resolves to a playlist of its files.
pub struct LocalFileSource {
    root: Option<PathBuf>,
    max_playlist_size: usize,
}

impl LocalFileSource {
    /// `root` lets queries use paths relative to a music directory.
    pub fn new(root: Option<PathBuf>, max_playlist_size: usize) -> Self {
        Self {
            root,
            max_playlist_size,
        }
    }

    fn path_for(&self, query: &str) -> PathBuf {
        let raw = query.strip_prefix("file://").unwrap_or(query);
        let path = Path::new(raw);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn is_supported(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    async fn describe(path: PathBuf) -> Track {
        let fallback_title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let uri = path.display().to_string();

        let probed = tokio::task::spawn_blocking(move || -> Result<_, DecodeError> {
            let extension = path.extension().and_then(|e| e.to_str()).map(str::to_string);
            let file = std::fs::File::open(&path)?;
            probe_info(Box::new(file), extension.as_deref())
        })
        .await;

        let mut builder = Track::builder(uri, SourceKind::LocalFile).title(fallback_title);
        match probed {
            Ok(Ok(info)) => {
                if let Some(title) = info.title {
                    builder = builder.title(title);
                }
                if let Some(artist) = info.artist {
                    builder = builder.author(artist);
                }
                if let Some(duration) = info.duration {
                    builder = builder.duration(duration);
                }
            }
            Ok(Err(e)) => debug!("No se pudieron leer metadatos: {}", e),
            Err(e) => debug!("Tarea de metadatos abortada: {}", e),
        }
        builder.build()
    }

    async fn load_directory(&self, dir: &Path) -> LoadResult {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => return LoadResult::LoadFailed(format!("cannot read {}: {}", dir.display(), e)),
        };

        let mut files = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if path.is_file() && Self::is_supported(&path) {
                        files.push(path);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Error leyendo directorio {}: {}", dir.display(), e);
                    break;
                }
            }
        }

        if files.is_empty() {
            return LoadResult::NoMatches;
        }

        files.sort();
        files.truncate(self.max_playlist_size);

        let mut tracks = Vec::with_capacity(files.len());
        for file in files {
            tracks.push(Self::describe(file).await);
        }

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        info!("📀 Directorio cargado: {} ({} tracks)", name, tracks.len());
        LoadResult::PlaylistLoaded { name, tracks }
    }
}

#[async_trait]
impl MusicSource for LocalFileSource {
    fn accepts(&self, query: &str) -> bool {
        if query.starts_with("file://") || Path::new(query).is_absolute() {
            return true;
        }
        // Rutas relativas solo si hay un directorio raíz configurado
        self.root.is_some() && !query.contains("://")
    }

    async fn resolve(&self, query: &str) -> LoadResult {
        let path = self.path_for(query);

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LoadResult::NoMatches,
            Err(e) => return LoadResult::LoadFailed(e.to_string()),
        };

        if metadata.is_dir() {
            return self.load_directory(&path).await;
        }

        if !Self::is_supported(&path) {
            return LoadResult::LoadFailed(format!("unsupported file type: {}", path.display()));
        }

        LoadResult::TrackLoaded(Self::describe(path).await)
    }

    async fn open(&self, track: &Track) -> Result<Box<dyn FrameSource>, DecodeError> {
        let path = PathBuf::from(track.uri());
        let source = DecodeThread::spawn(move || {
            let extension = path.extension().and_then(|e| e.to_str()).map(str::to_string);
            let file = std::fs::File::open(&path)?;
            SymphoniaFrameSource::new(Box::new(file), extension.as_deref())
        })?;

        Ok(Box::new(source))
    }

    fn kind(&self) -> SourceKind {
        SourceKind::LocalFile
    }

    fn source_name(&self) -> &'static str {
        "local"
    }
}
