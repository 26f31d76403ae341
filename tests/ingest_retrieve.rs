//! Integration tests for document versioning, embedding batches, and
//! end-to-end hybrid retrieval.

mod common;

use sqlx::Row;

use askbase::config::Config;
use askbase::embed::EmbeddingManager;
use askbase::models::ChunkDraft;
use askbase::retrieve::RetrievalEngine;
use common::{setup_repo, MockProvider};

fn draft(text: &str, title: &str, section: &str) -> ChunkDraft {
    ChunkDraft {
        text: text.to_string(),
        tokens: text.split_whitespace().count(),
        title: title.to_string(),
        section: section.to_string(),
    }
}

fn test_config() -> Config {
    toml::from_str(
        r#"
        [db]
        path = "unused.db"
        "#,
    )
    .unwrap()
}

#[tokio::test]
async fn only_the_newest_document_version_stays_active() {
    let (_dir, repo) = setup_repo().await.unwrap();

    let v1 = repo
        .create_document_version("handbook", "docs/handbook.md")
        .await
        .unwrap();
    assert_eq!(v1.version, 1);
    assert!(v1.is_active);

    let v2 = repo
        .create_document_version("handbook", "docs/handbook.md")
        .await
        .unwrap();
    assert_eq!(v2.version, 2);
    assert!(v2.is_active);

    let active = repo.get_active_document("handbook").await.unwrap().unwrap();
    assert_eq!(active.id, v2.id);

    let active_rows: i64 =
        sqlx::query("SELECT COUNT(*) AS n FROM docs WHERE title = 'handbook' AND is_active = 1")
            .fetch_one(repo.pool())
            .await
            .unwrap()
            .get("n");
    assert_eq!(active_rows, 1);

    // superseded version is retained, just inactive
    let v1_row = repo.get_document(&v1.id).await.unwrap().unwrap();
    assert!(!v1_row.is_active);
}

#[tokio::test]
async fn embedding_batches_by_ten_and_indexes_chunks_in_order() {
    let (_dir, repo) = setup_repo().await.unwrap();
    let provider = MockProvider::new();
    let manager = EmbeddingManager::new(&provider, &repo);

    let doc = repo
        .create_document_version("manual", "docs/manual.txt")
        .await
        .unwrap();

    let chunks: Vec<ChunkDraft> = (0..25)
        .map(|i| draft(&format!("chunk body number {}", i), "manual", ""))
        .collect();

    let stored = manager.embed_chunks(&chunks, &doc.id).await.unwrap();

    assert_eq!(stored.len(), 25);
    assert_eq!(provider.batch_count(), 3);

    for (i, chunk) in stored.iter().enumerate() {
        assert_eq!(chunk.meta["chunk_index"], i);
        assert_eq!(chunk.doc_id, doc.id);
    }

    let rows: i64 = sqlx::query("SELECT COUNT(*) AS n FROM doc_chunks")
        .fetch_one(repo.pool())
        .await
        .unwrap()
        .get("n");
    assert_eq!(rows, 25);
}

#[tokio::test]
async fn reindex_replaces_a_document_s_chunks() {
    let (_dir, repo) = setup_repo().await.unwrap();
    let provider = MockProvider::new();
    let manager = EmbeddingManager::new(&provider, &repo);

    let doc = repo
        .create_document_version("runbook", "docs/runbook.md")
        .await
        .unwrap();

    let first = vec![
        draft("old content about restarts", "runbook", "ops"),
        draft("old content about paging", "runbook", "ops"),
    ];
    manager.embed_chunks(&first, &doc.id).await.unwrap();

    let second = vec![draft("new content about escalation", "runbook", "ops")];
    let count = manager.reindex_document(&doc.id, &second).await.unwrap();
    assert_eq!(count, 1);

    let texts: Vec<String> = sqlx::query("SELECT text FROM doc_chunks WHERE doc_id = ?")
        .bind(&doc.id)
        .fetch_all(repo.pool())
        .await
        .unwrap()
        .iter()
        .map(|r| r.get("text"))
        .collect();
    assert_eq!(texts, vec!["new content about escalation".to_string()]);
}

#[tokio::test]
async fn retrieval_ranks_the_matching_chunk_first_and_labels_its_source() {
    let (_dir, repo) = setup_repo().await.unwrap();
    let provider = MockProvider::new();
    let manager = EmbeddingManager::new(&provider, &repo);

    let doc = repo
        .create_document_version("handbook", "docs/handbook.md")
        .await
        .unwrap();

    let chunks = vec![
        draft(
            "refunds are processed within five business days",
            "handbook",
            "Refunds",
        ),
        draft(
            "vacation requests go through the portal",
            "handbook",
            "Time off",
        ),
        draft(
            "expense reports need a receipt attached",
            "handbook",
            "Expenses",
        ),
    ];
    manager.embed_chunks(&chunks, &doc.id).await.unwrap();

    let config = test_config();
    let engine = RetrievalEngine::new(&config, &provider, &repo);

    // identical text gets cosine 1.0 from the mock plus a keyword hit
    let output = engine
        .retrieve("refunds are processed within five business days")
        .await
        .unwrap();

    assert!(output.total_results > 0);
    assert_eq!(
        output.context_chunks[0],
        "refunds are processed within five business days"
    );
    assert_eq!(output.sources[0], "handbook-Refunds");
}

#[tokio::test]
async fn retrieval_on_an_empty_index_returns_nothing() {
    let (_dir, repo) = setup_repo().await.unwrap();
    let provider = MockProvider::new();

    let config = test_config();
    let engine = RetrievalEngine::new(&config, &provider, &repo);

    let output = engine.retrieve("anything at all").await.unwrap();
    assert_eq!(output.total_results, 0);
    assert!(output.context_chunks.is_empty());
    assert!(output.sources.is_empty());
}
