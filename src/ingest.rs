//! Document upload pipeline.
//!
//! Coordinates the full upload flow: read file, pick a chunker by
//! extension, version the document, then chunk, embed, and store.
//! Plain text, Markdown, and HTML are supported; Markdown and HTML get
//! heading-aware sections, everything else is chunked as one body.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::chunk::Chunker;
use crate::config::Config;
use crate::db;
use crate::embed::EmbeddingManager;
use crate::llm;
use crate::models::ChunkDraft;
use crate::repo::Repo;

/// Chunk a file's contents with a format-appropriate strategy.
fn chunk_file(chunker: &Chunker, path: &Path, content: &str, title: &str) -> Vec<ChunkDraft> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "md" | "markdown" => chunker.chunk_markdown(content, title),
        "html" | "htm" => chunker.chunk_html(content, title),
        _ => chunker.chunk_text(content, title, ""),
    }
}

fn default_title(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}

/// `askbase upload` — ingest one file as a new active document version.
pub async fn run_upload(
    config: &Config,
    path: &Path,
    title: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        bail!("{} is empty", path.display());
    }

    let title = title.unwrap_or_else(|| default_title(path));
    let provider = llm::create_provider(&config.llm)?;
    let chunker = Chunker::new(&config.chunking, provider.as_ref());
    let chunks = chunk_file(&chunker, path, &content, &title);

    if chunks.is_empty() {
        bail!(
            "no chunks produced from {} (content shorter than min_tokens?)",
            path.display()
        );
    }

    if dry_run {
        println!("upload {} (dry-run)", path.display());
        println!("  title: {}", title);
        println!("  chunks: {}", chunks.len());
        let total_tokens: usize = chunks.iter().map(|c| c.tokens).sum();
        println!("  estimated tokens: {}", total_tokens);
        return Ok(());
    }

    let pool = db::connect(&config.db.path).await?;
    let repo = Repo::new(pool);
    let source = path.display().to_string();

    let doc = repo.create_document_version(&title, &source).await?;
    tracing::info!(doc_id = %doc.id, version = doc.version, "created document version");

    let manager = EmbeddingManager::new(provider.as_ref(), &repo);
    let stored = manager.embed_chunks(&chunks, &doc.id).await?;

    println!("uploaded {}", path.display());
    println!("  title: {} (version {})", doc.title, doc.version);
    println!("  chunks stored: {}", stored.len());

    Ok(())
}

/// `askbase reindex` — re-chunk and re-embed a document from its
/// original source file. Accepts a document id or an active title.
pub async fn run_reindex(config: &Config, id_or_title: &str) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    let repo = Repo::new(pool);

    let doc = match repo.get_document(id_or_title).await? {
        Some(doc) => doc,
        None => match repo.get_active_document(id_or_title).await? {
            Some(doc) => doc,
            None => bail!("no document found for '{}'", id_or_title),
        },
    };

    let path = Path::new(&doc.source);
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read source {}", doc.source))?;

    let provider = llm::create_provider(&config.llm)?;
    let chunker = Chunker::new(&config.chunking, provider.as_ref());
    let chunks = chunk_file(&chunker, path, &content, &doc.title);

    let manager = EmbeddingManager::new(provider.as_ref(), &repo);
    let count = manager.reindex_document(&doc.id, &chunks).await?;

    println!("reindexed {} (version {})", doc.title, doc.version);
    println!("  chunks stored: {}", count);

    Ok(())
}

/// `askbase docs` — list active documents.
pub async fn run_list(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    let repo = Repo::new(pool);

    let docs = repo.list_active_documents().await?;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    for doc in docs {
        println!("{}  {} (version {})", doc.id, doc.title, doc.version);
    }

    Ok(())
}

/// `askbase message` — record a chat message for later digesting.
pub async fn run_message(
    config: &Config,
    chat_id: i64,
    sender_id: i64,
    text: &str,
    kept: bool,
) -> Result<()> {
    if text.trim().is_empty() {
        bail!("message text is empty");
    }

    let pool = db::connect(&config.db.path).await?;
    let repo = Repo::new(pool);

    let message = repo.store_message(chat_id, sender_id, text, kept).await?;
    println!("stored message {} in chat {}", message.id, message.chat_id);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use crate::llm::WordCounter;

    fn small_chunking() -> ChunkingConfig {
        ChunkingConfig {
            min_tokens: 2,
            max_tokens: 50,
            overlap_percent: 0.0,
        }
    }

    #[test]
    fn test_chunk_file_markdown_by_extension() {
        let config = small_chunking();
        let counter = WordCounter;
        let chunker = Chunker::new(&config, &counter);

        let md = "# Intro\n\nThis section explains the product in some detail here.\n";
        let chunks = chunk_file(&chunker, Path::new("guide.md"), md, "guide");
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].section, "Intro");
    }

    #[test]
    fn test_chunk_file_plain_text_has_no_section() {
        let config = small_chunking();
        let counter = WordCounter;
        let chunker = Chunker::new(&config, &counter);

        let text = "Plain notes without any headings at all in them.";
        let chunks = chunk_file(&chunker, Path::new("notes.txt"), text, "notes");
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].section, "");
    }

    #[test]
    fn test_default_title_uses_file_stem() {
        assert_eq!(default_title(Path::new("/tmp/handbook.md")), "handbook");
        assert_eq!(default_title(Path::new("report")), "report");
    }
}
