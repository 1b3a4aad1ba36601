//! Knowledge context for generated responses.
//!
//! `ContextSearch` is the seam to any ranked text search. `KnowledgeBase` is
//! the built-in implementation: a directory of `.md` / `.txt` documents split
//! into overlapping chunks and scored by query-term overlap.
//! `ContextRetriever` turns search hits into a prompt block and swallows
//! search failures.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;

use crate::error::RetrievalError;
use crate::onboarding::prompts::knowledge_context;

/// Characters per chunk.
pub const CHUNK_SIZE: usize = 500;
/// Characters shared between consecutive chunks.
pub const CHUNK_OVERLAP: usize = 100;

/// Ranked text search over some document collection.
#[async_trait]
pub trait ContextSearch: Send + Sync {
    /// Up to `k` chunks, best first. May be empty.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<String>, RetrievalError>;
}

/// Wraps a `ContextSearch` and never fails.
pub struct ContextRetriever {
    search: Arc<dyn ContextSearch>,
    top_k: usize,
}

impl ContextRetriever {
    pub fn new(search: Arc<dyn ContextSearch>, top_k: usize) -> Self {
        Self { search, top_k }
    }

    /// Framed context for `query`, or the empty string when nothing matched
    /// or the search failed.
    pub async fn retrieve(&self, query: &str) -> String {
        match self.search.search(query, self.top_k).await {
            Ok(chunks) => knowledge_context(&chunks),
            Err(e) => {
                tracing::warn!("Context retrieval failed: {}", e);
                String::new()
            }
        }
    }
}

/// A piece of a loaded document.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Path relative to the knowledge directory.
    pub source: String,
    pub text: String,
}

/// In-memory chunk index loaded from a directory of documents.
#[derive(Debug, Default)]
pub struct KnowledgeBase {
    chunks: Vec<Chunk>,
}

impl KnowledgeBase {
    /// Load every `.md` / `.txt` file under `root`, recursively.
    ///
    /// A missing directory gives an empty knowledge base.
    pub async fn load(root: &Path) -> Result<Self, RetrievalError> {
        let mut chunks = Vec::new();
        if !root.exists() {
            tracing::warn!(path = %root.display(), "Knowledge directory not found, context disabled");
            return Ok(Self { chunks });
        }
        load_dir(root, root, &mut chunks).await?;
        tracing::info!(
            path = %root.display(),
            chunks = chunks.len(),
            "Knowledge base loaded"
        );
        Ok(Self { chunks })
    }

    /// Build from in-memory documents as `(source, text)` pairs.
    pub fn from_documents<I, S, T>(documents: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: AsRef<str>,
    {
        let mut chunks = Vec::new();
        for (source, text) in documents {
            let source = source.into();
            for piece in split_chunks(text.as_ref(), CHUNK_SIZE, CHUNK_OVERLAP) {
                chunks.push(Chunk {
                    source: source.clone(),
                    text: piece,
                });
            }
        }
        Self { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunks ranked by the share of query terms they contain
    /// (case-insensitive). Chunks matching no term are dropped; ties keep
    /// load order.
    pub fn rank(&self, query: &str, k: usize) -> Vec<&Chunk> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(f32, &Chunk)> = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                let text_lower = chunk.text.to_lowercase();
                let matched = terms.iter().filter(|t| text_lower.contains(*t)).count();
                (matched > 0).then(|| (matched as f32 / terms.len() as f32, chunk))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(k).map(|(_, chunk)| chunk).collect()
    }
}

#[async_trait]
impl ContextSearch for KnowledgeBase {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<String>, RetrievalError> {
        Ok(self
            .rank(query, k)
            .into_iter()
            .map(|chunk| chunk.text.clone())
            .collect())
    }
}

/// Recursively load documents under `dir`.
fn load_dir<'a>(
    root: &'a Path,
    dir: &'a Path,
    chunks: &'a mut Vec<Chunk>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), RetrievalError>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries: Vec<PathBuf> = Vec::new();
        let mut read_dir = fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            entries.push(entry.path());
        }
        // Stable chunk order across platforms.
        entries.sort();

        for path in entries {
            let metadata = fs::metadata(&path).await?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            if metadata.is_dir() {
                if !name.starts_with('.') {
                    load_dir(root, &path, chunks).await?;
                }
            } else if metadata.is_file()
                && matches!(path.extension().and_then(|e| e.to_str()), Some("md" | "txt"))
            {
                let content = match fs::read_to_string(&path).await {
                    Ok(content) => content,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "Skipping unreadable document: {}", e);
                        continue;
                    }
                };
                let source = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .to_string();
                for text in split_chunks(&content, CHUNK_SIZE, CHUNK_OVERLAP) {
                    chunks.push(Chunk {
                        source: source.clone(),
                        text,
                    });
                }
            }
        }
        Ok(())
    })
}

/// Split `text` into windows of `size` characters, each starting
/// `size - overlap` characters after the previous one. Whitespace-only
/// windows are skipped.
pub fn split_chunks(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || size == 0 {
        return Vec::new();
    }
    let step = size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}
