//! Vector store integration tests over an in-memory database: store-then-
//! search, ordering, partitioning, deletion, and the query cache.

mod common;

use std::sync::Arc;

use anyhow::Result;
use ragdesk::vector::codec::serialize_vector;
use ragdesk::{SqliteVectorStore, VectorChunk};
use turso::params;

async fn fresh_store() -> Result<(turso::Database, Arc<SqliteVectorStore>)> {
    common::setup_tracing();
    let db = ragdesk::db::init_db(":memory:").await?;
    let store = Arc::new(SqliteVectorStore::new(db.clone()));
    Ok((db, store))
}

fn chunk(doc: &str, idx: i64, text: &str, vector: Vec<f32>, product: &str) -> VectorChunk {
    VectorChunk {
        chunk_text: text.to_string(),
        chunk_index: idx,
        document_id: doc.to_string(),
        document_name: format!("{doc}.pdf"),
        vector,
        image_url: String::new(),
        product_id: product.to_string(),
    }
}

#[tokio::test]
async fn store_then_search_returns_the_chunk() -> Result<()> {
    let (db, store) = fresh_store().await?;
    common::insert_document(&db, "doc1").await?;

    let v = vec![0.3f32, 0.5, 0.2, 0.7];
    store
        .store("doc1", &[chunk("doc1", 0, "some text", v.clone(), "")])
        .await?;

    let results = store.search(&v, 5, 0.0, "").await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document_id, "doc1");
    assert_eq!(results[0].chunk_index, 0);
    assert!(results[0].score >= 0.999, "score = {}", results[0].score);
    Ok(())
}

#[tokio::test]
async fn results_are_sorted_bounded_and_thresholded() -> Result<()> {
    let (db, store) = fresh_store().await?;
    common::insert_document(&db, "doc1").await?;

    let chunks: Vec<VectorChunk> = (0..10)
        .map(|i| {
            // Increasingly aligned with the query vector.
            let angle = (10 - i) as f32 * 0.15;
            chunk(
                "doc1",
                i,
                &format!("chunk {i}"),
                vec![angle.cos(), angle.sin(), 0.0],
                "",
            )
        })
        .collect();
    store.store("doc1", &chunks).await?;

    let query = vec![1.0f32, 0.0, 0.0];
    let results = store.search(&query, 4, 0.5, "").await?;

    assert!(results.len() <= 4);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for r in &results {
        assert!(r.score >= 0.5);
    }
    Ok(())
}

#[tokio::test]
async fn scenario_three_axis_vectors_rank_as_expected() -> Result<()> {
    let (db, store) = fresh_store().await?;
    common::insert_document(&db, "doc1").await?;

    store
        .store(
            "doc1",
            &[
                chunk("doc1", 0, "c1", vec![1.0, 0.0, 0.0], ""),
                chunk("doc1", 1, "c2", vec![0.0, 1.0, 0.0], ""),
                chunk("doc1", 2, "c3", vec![1.0, 1.0, 0.0], ""),
            ],
        )
        .await?;

    let results = store.search(&[1.0, 1.0, 0.0], 3, 0.5, "").await?;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].chunk_index, 2);
    assert!((results[0].score - 1.0).abs() < 1e-4);
    assert!((results[1].score - 0.7071).abs() < 1e-3);
    assert!((results[2].score - 0.7071).abs() < 1e-3);
    Ok(())
}

#[tokio::test]
async fn zero_norm_query_returns_empty() -> Result<()> {
    let (db, store) = fresh_store().await?;
    common::insert_document(&db, "doc1").await?;
    store
        .store("doc1", &[chunk("doc1", 0, "t", vec![1.0, 0.0], "")])
        .await?;

    let results = store.search(&[0.0, 0.0], 5, 0.0, "").await?;
    assert!(results.is_empty());
    Ok(())
}

#[tokio::test]
async fn zero_norm_chunks_are_skipped() -> Result<()> {
    let (db, store) = fresh_store().await?;
    common::insert_document(&db, "doc1").await?;
    store
        .store(
            "doc1",
            &[
                chunk("doc1", 0, "dead", vec![0.0, 0.0], ""),
                chunk("doc1", 1, "live", vec![1.0, 0.0], ""),
            ],
        )
        .await?;

    let results = store.search(&[1.0, 0.0], 5, 0.0, "").await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_index, 1);
    Ok(())
}

#[tokio::test]
async fn product_scoped_search_sees_product_and_public_only() -> Result<()> {
    let (db, store) = fresh_store().await?;
    common::insert_document(&db, "doc1").await?;

    store
        .store(
            "doc1",
            &[
                chunk("doc1", 0, "public", vec![1.0, 0.0], ""),
                chunk("doc1", 1, "mine", vec![1.0, 0.0], "p1"),
                chunk("doc1", 2, "other tenant", vec![1.0, 0.0], "p2"),
            ],
        )
        .await?;

    let results = store.search(&[1.0, 0.0], 10, 0.0, "p1").await?;
    assert_eq!(results.len(), 2);
    for r in &results {
        assert!(
            r.product_id == "p1" || r.product_id.is_empty(),
            "unexpected partition {:?}",
            r.product_id
        );
    }

    // The public scope sees everything.
    let all = store.search(&[1.0, 0.0], 10, 0.0, "").await?;
    assert_eq!(all.len(), 3);
    Ok(())
}

#[tokio::test]
async fn delete_removes_document_and_keeps_others_identical() -> Result<()> {
    let (db, store) = fresh_store().await?;
    common::insert_document(&db, "keep").await?;
    common::insert_document(&db, "drop").await?;

    store
        .store(
            "keep",
            &[
                chunk("keep", 0, "keep a", vec![1.0, 0.0, 0.0], ""),
                chunk("keep", 1, "keep b", vec![0.8, 0.2, 0.0], ""),
            ],
        )
        .await?;
    store
        .store(
            "drop",
            &[chunk("drop", 0, "drop a", vec![0.9, 0.1, 0.0], "")],
        )
        .await?;

    let baseline: Vec<_> = store
        .search(&[1.0, 0.0, 0.0], 10, 0.0, "")
        .await?
        .into_iter()
        .filter(|r| r.document_id == "keep")
        .collect();

    store.delete_by_doc_id("drop").await?;

    let after = store.search(&[1.0, 0.0, 0.0], 10, 0.0, "").await?;
    assert!(after.iter().all(|r| r.document_id != "drop"));
    let kept: Vec<_> = after
        .into_iter()
        .filter(|r| r.document_id == "keep")
        .collect();
    assert_eq!(kept, baseline);
    Ok(())
}

#[tokio::test]
async fn search_after_store_sees_new_data() -> Result<()> {
    let (db, store) = fresh_store().await?;
    common::insert_document(&db, "doc1").await?;
    common::insert_document(&db, "doc2").await?;

    store
        .store("doc1", &[chunk("doc1", 0, "first", vec![1.0, 0.0], "")])
        .await?;
    let query = vec![1.0f32, 0.0];
    assert_eq!(store.search(&query, 10, 0.0, "").await?.len(), 1);

    // Same parameters again after a write: the cache must not serve the
    // stale single-row result.
    store
        .store("doc2", &[chunk("doc2", 0, "second", vec![1.0, 0.0], "")])
        .await?;
    assert_eq!(store.search(&query, 10, 0.0, "").await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn arena_rebuild_from_disk_matches_live_state() -> Result<()> {
    let (db, store) = fresh_store().await?;
    common::insert_document(&db, "doc1").await?;
    store
        .store("doc1", &[chunk("doc1", 0, "persisted", vec![0.6, 0.8], "")])
        .await?;

    // A second store over the same database simulates a process restart:
    // its arena is rebuilt from the table on first search.
    let rebuilt = SqliteVectorStore::new(db.clone());
    let results = rebuilt.search(&[0.6, 0.8], 5, 0.0, "").await?;
    assert_eq!(results.len(), 1);
    assert!(results[0].score >= 0.999);
    Ok(())
}

#[tokio::test]
async fn misaligned_embedding_rows_are_skipped_on_load() -> Result<()> {
    let (db, store) = fresh_store().await?;
    common::insert_document(&db, "doc1").await?;

    let conn = db.connect()?;
    conn.execute(
        "INSERT INTO chunks (id, document_id, document_name, chunk_index, chunk_text, embedding)
         VALUES ('doc1-0', 'doc1', 'doc1.pdf', 0, 'bad row', ?)",
        params![vec![1u8, 2, 3]],
    )
    .await?;
    conn.execute(
        "INSERT INTO chunks (id, document_id, document_name, chunk_index, chunk_text, embedding)
         VALUES ('doc1-1', 'doc1', 'doc1.pdf', 1, 'good row', ?)",
        params![serialize_vector(&[1.0, 0.0])],
    )
    .await?;

    let results = store.search(&[1.0, 0.0], 5, 0.0, "").await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_text, "good row");
    Ok(())
}

#[tokio::test]
async fn failed_insert_rolls_back_the_whole_batch() -> Result<()> {
    let (db, store) = fresh_store().await?;
    common::insert_document(&db, "doc1").await?;

    // Duplicate chunk indices collide on the primary key mid-batch.
    let result = store
        .store(
            "doc1",
            &[
                chunk("doc1", 0, "a", vec![1.0, 0.0], ""),
                chunk("doc1", 0, "b", vec![0.0, 1.0], ""),
            ],
        )
        .await;
    assert!(result.is_err());

    let results = store.search(&[1.0, 0.0], 5, 0.0, "").await?;
    assert!(results.is_empty(), "rolled-back rows must not be searchable");
    Ok(())
}

#[tokio::test]
async fn dimension_mismatch_on_store_is_rejected() -> Result<()> {
    let (db, store) = fresh_store().await?;
    common::insert_document(&db, "doc1").await?;
    common::insert_document(&db, "doc2").await?;

    store
        .store("doc1", &[chunk("doc1", 0, "first", vec![1.0, 0.0], "")])
        .await?;

    let result = store
        .store("doc2", &[chunk("doc2", 0, "wider", vec![1.0, 0.0, 0.0], "")])
        .await;
    assert!(matches!(
        result,
        Err(ragdesk::StoreError::DimensionMismatch {
            expected: 2,
            got: 3
        })
    ));

    // Neither the arena nor the table took the mismatched batch.
    let results = store.search(&[1.0, 0.0], 5, 0.0, "").await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document_id, "doc1");

    let rebuilt = SqliteVectorStore::new(db.clone());
    let results = rebuilt.search(&[1.0, 0.0], 5, 0.0, "").await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document_id, "doc1");
    Ok(())
}

#[tokio::test]
async fn mixed_widths_within_one_batch_are_rejected() -> Result<()> {
    let (db, store) = fresh_store().await?;
    common::insert_document(&db, "doc1").await?;

    let result = store
        .store(
            "doc1",
            &[
                chunk("doc1", 0, "a", vec![1.0, 0.0], ""),
                chunk("doc1", 1, "b", vec![1.0, 0.0, 0.0], ""),
            ],
        )
        .await;
    assert!(matches!(
        result,
        Err(ragdesk::StoreError::DimensionMismatch { .. })
    ));

    let results = store.search(&[1.0, 0.0], 5, 0.0, "").await?;
    assert!(results.is_empty());
    Ok(())
}

#[tokio::test]
async fn text_search_ranks_keyword_matches() -> Result<()> {
    let (db, store) = fresh_store().await?;
    common::insert_document(&db, "doc1").await?;

    store
        .store(
            "doc1",
            &[
                chunk("doc1", 0, "How to install the desktop client", vec![1.0, 0.0], ""),
                chunk("doc1", 1, "Billing and invoices overview", vec![0.0, 1.0], ""),
            ],
        )
        .await?;

    let results = store
        .text_search("install the client", 5, 0.1, "")
        .await?;
    assert!(!results.is_empty());
    assert_eq!(results[0].chunk_index, 0);
    Ok(())
}

#[tokio::test]
async fn chunk_ids_follow_the_document_index_scheme() -> Result<()> {
    let (db, store) = fresh_store().await?;
    common::insert_document(&db, "docX").await?;
    store
        .store(
            "docX",
            &[
                chunk("docX", 0, "a", vec![1.0], ""),
                chunk("docX", 1, "b", vec![0.5], ""),
            ],
        )
        .await?;

    let conn = db.connect()?;
    let mut rows = conn
        .query("SELECT id FROM chunks ORDER BY chunk_index", ())
        .await?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next().await? {
        ids.push(row.get::<String>(0)?);
    }
    assert_eq!(ids, vec!["docX-0", "docX-1"]);
    Ok(())
}
