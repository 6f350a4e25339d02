//! SQLite-backed vector store with an in-memory search arena.
//!
//! Vectors live contiguously in a single `Vec<f32>` so the scan walks
//! sequential memory; a product-partitioned index keeps tenant queries
//! O(partition) instead of O(total); per-chunk norms, lowercased text and
//! character bigrams are precomputed at load time. Readers snapshot the
//! arena `Arc`s under a short read lock and scan lock-free; writers install
//! fresh `Arc`s and never mutate a buffer a reader may still hold.

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::cmp::Reverse;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use turso::{params, Database, Value as TursoValue};

use super::cache::{hash_query, QueryCache, CACHE_SIZE, CACHE_TTL};
use super::codec::{deserialize_vector, dot_product_x8, serialize_vector, vector_norm};
use crate::errors::StoreError;

/// Minimum candidates per worker before the scan fans out.
const MIN_CANDIDATES_PER_WORKER: usize = 500;

/// A document chunk with its embedding, ready for storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorChunk {
    pub chunk_text: String,
    pub chunk_index: i64,
    pub document_id: String,
    pub document_name: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub product_id: String,
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_text: String,
    pub chunk_index: i64,
    pub document_id: String,
    pub document_name: String,
    pub score: f32,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub product_id: String,
}

/// Per-chunk metadata; the vector itself lives in the arena at
/// `index * dim`.
#[derive(Clone)]
struct ChunkMeta {
    chunk_text: String,
    chunk_index: i64,
    document_id: String,
    document_name: String,
    norm: f32,
    image_url: String,
    product_id: String,
    text_lower: String,
    bigrams: HashSet<(char, char)>,
}

/// Arena state guarded by the store's RwLock. The `Arc`s are what readers
/// snapshot; every mutation replaces them (copy-on-write when shared).
#[derive(Default)]
struct ArenaState {
    meta: Arc<Vec<ChunkMeta>>,
    arena: Arc<Vec<f32>>,
    dim: usize,
    product_index: Arc<HashMap<String, Vec<usize>>>,
    loaded: bool,
}

/// A read-only view of the arena captured under the read lock.
#[derive(Clone)]
struct Snapshot {
    meta: Arc<Vec<ChunkMeta>>,
    arena: Arc<Vec<f32>>,
    dim: usize,
    product_index: Arc<HashMap<String, Vec<usize>>>,
}

impl ArenaState {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            meta: self.meta.clone(),
            arena: self.arena.clone(),
            dim: self.dim,
            product_index: self.product_index.clone(),
        }
    }
}

impl Snapshot {
    /// Candidate arena indices for a product: everything for the public
    /// scope, otherwise the product partition plus the public partition.
    fn relevant_indices(&self, product_id: &str) -> Vec<usize> {
        if product_id.is_empty() {
            return (0..self.meta.len()).collect();
        }
        let product = self.product_index.get(product_id);
        let public = self.product_index.get("");
        let total = product.map_or(0, |v| v.len()) + public.map_or(0, |v| v.len());
        let mut indices = Vec::with_capacity(total);
        if let Some(v) = product {
            indices.extend_from_slice(v);
        }
        if let Some(v) = public {
            indices.extend_from_slice(v);
        }
        indices
    }
}

/// Score + arena index with a total order so it can live in a heap.
#[derive(Clone, Copy, PartialEq)]
struct Scored {
    score: f32,
    idx: usize,
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .total_cmp(&other.score)
            .then(self.idx.cmp(&other.idx))
    }
}

/// Min-heap of at most `cap` items; the worst survivor sits at the root.
struct TopK {
    heap: BinaryHeap<Reverse<Scored>>,
    cap: usize,
}

impl TopK {
    fn new(cap: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(cap.min(1024)),
            cap,
        }
    }

    fn offer(&mut self, item: Scored) {
        if self.heap.len() < self.cap {
            self.heap.push(Reverse(item));
        } else if let Some(Reverse(min)) = self.heap.peek() {
            if item.score > min.score {
                self.heap.pop();
                self.heap.push(Reverse(item));
            }
        }
    }

    /// Drains into a vec sorted by score descending.
    fn into_sorted_desc(self) -> Vec<Scored> {
        let mut items: Vec<Scored> = self.heap.into_iter().map(|Reverse(s)| s).collect();
        items.sort_by(|a, b| b.cmp(a));
        items
    }
}

fn adaptive_workers(n: usize) -> usize {
    if n < MIN_CANDIDATES_PER_WORKER {
        return 1;
    }
    (n / MIN_CANDIDATES_PER_WORKER).clamp(1, rayon::current_num_threads().max(1))
}

/// The store. Cheap to share behind an `Arc`; all interior state is locked.
pub struct SqliteVectorStore {
    db: Database,
    state: RwLock<ArenaState>,
    cache: QueryCache,
}

impl SqliteVectorStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            state: RwLock::new(ArenaState::default()),
            cache: QueryCache::new(CACHE_SIZE, CACHE_TTL),
        }
    }

    /// Inserts a batch of chunks in one transaction, then appends them to
    /// the arena. On any insert error the transaction is rolled back and
    /// the arena is left untouched.
    pub async fn store(&self, doc_id: &str, chunks: &[VectorChunk]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        // dim is fixed at first insert or first load; a mismatched batch is
        // rejected before anything is written.
        let mut expected_dim = if state.loaded { state.dim } else { 0 };
        for chunk in chunks {
            if chunk.vector.is_empty() {
                continue;
            }
            if expected_dim == 0 {
                expected_dim = chunk.vector.len();
            } else if chunk.vector.len() != expected_dim {
                return Err(StoreError::DimensionMismatch {
                    expected: expected_dim,
                    got: chunk.vector.len(),
                });
            }
        }

        let mut conn = self.db.connect()?;
        let tx = conn.transaction().await?;

        for chunk in chunks {
            let chunk_id = format!("{doc_id}-{}", chunk.chunk_index);
            let embedding = serialize_vector(&chunk.vector);
            let insert = tx
                .execute(
                    "INSERT INTO chunks (id, document_id, document_name, chunk_index, chunk_text, embedding, image_url, product_id)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        chunk_id.clone(),
                        doc_id,
                        chunk.document_name.clone(),
                        chunk.chunk_index,
                        chunk.chunk_text.clone(),
                        embedding,
                        chunk.image_url.clone(),
                        chunk.product_id.clone()
                    ],
                )
                .await;
            if let Err(source) = insert {
                tx.rollback().await?;
                return Err(StoreError::Chunk {
                    operation: "insert",
                    chunk_id,
                    source,
                });
            }
        }

        tx.commit().await?;

        if state.loaded {
            let st = &mut *state;
            let meta = Arc::make_mut(&mut st.meta);
            let arena = Arc::make_mut(&mut st.arena);
            let product_index = Arc::make_mut(&mut st.product_index);
            for chunk in chunks {
                if st.dim == 0 && !chunk.vector.is_empty() {
                    st.dim = chunk.vector.len();
                }
                let idx = meta.len();
                let text_lower = chunk.chunk_text.to_lowercase();
                meta.push(ChunkMeta {
                    chunk_text: chunk.chunk_text.clone(),
                    chunk_index: chunk.chunk_index,
                    document_id: chunk.document_id.clone(),
                    document_name: chunk.document_name.clone(),
                    norm: vector_norm(&chunk.vector),
                    image_url: chunk.image_url.clone(),
                    product_id: chunk.product_id.clone(),
                    bigrams: char_bigrams(&text_lower),
                    text_lower,
                });
                arena.extend_from_slice(&chunk.vector);
                product_index
                    .entry(chunk.product_id.clone())
                    .or_default()
                    .push(idx);
            }
        } else {
            Self::load_arena(&self.db, &mut state).await?;
        }

        self.cache.invalidate();
        Ok(())
    }

    /// Top-K cosine search. This is the hot path: LRU hit short-circuits;
    /// otherwise the arena snapshot is scanned by parallel workers, each
    /// keeping a bounded min-heap.
    pub async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        threshold: f32,
        product_id: &str,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let cache_key = hash_query(query_vector, top_k, threshold, product_id);
        if let Some(cached) = self.cache.get(cache_key) {
            debug!("search cache hit");
            return Ok(cached);
        }

        let snapshot = self.snapshot_loaded().await?;
        let indices = snapshot.relevant_indices(product_id);
        if top_k == 0 || snapshot.meta.is_empty() || indices.is_empty() || snapshot.dim == 0 {
            return Ok(Vec::new());
        }

        let query_norm = vector_norm(query_vector);
        if query_norm == 0.0 {
            return Ok(Vec::new());
        }

        let query = query_vector.to_vec();
        let results = tokio::task::spawn_blocking(move || {
            scan_cosine(&snapshot, &indices, &query, query_norm, top_k, threshold)
        })
        .await
        .map_err(|e| StoreError::Codec(format!("search worker panicked: {e}")))?;

        self.cache.put(cache_key, results.clone());
        Ok(results)
    }

    /// Text-only fallback search for deployments without an embedding
    /// service: keyword overlap (60%) blended with character-bigram Jaccard
    /// similarity (40%) over the precomputed per-chunk data.
    pub async fn text_search(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
        product_id: &str,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let snapshot = self.snapshot_loaded().await?;
        let indices = snapshot.relevant_indices(product_id);
        if top_k == 0 || snapshot.meta.is_empty() || indices.is_empty() {
            return Ok(Vec::new());
        }

        let query_lower = query.to_lowercase();
        let results = tokio::task::spawn_blocking(move || {
            scan_text(&snapshot, &indices, &query_lower, top_k, threshold)
        })
        .await
        .map_err(|e| StoreError::Codec(format!("search worker panicked: {e}")))?;

        Ok(results)
    }

    /// Deletes a document's chunks and compacts the arena: surviving rows
    /// are copied into fresh buffers so concurrent readers holding the old
    /// snapshot keep reading valid memory.
    pub async fn delete_by_doc_id(&self, doc_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        let conn = self.db.connect()?;
        conn.execute("DELETE FROM chunks WHERE document_id = ?", params![doc_id])
            .await
            .map_err(|source| StoreError::Chunk {
                operation: "delete",
                chunk_id: doc_id.to_string(),
                source,
            })?;

        if state.loaded {
            let dim = state.dim;
            let old_meta = state.meta.clone();
            let old_arena = state.arena.clone();

            let mut new_meta = Vec::with_capacity(old_meta.len());
            let mut new_arena = Vec::with_capacity(old_arena.len());
            let mut new_index: HashMap<String, Vec<usize>> = HashMap::new();

            for (i, m) in old_meta.iter().enumerate() {
                if m.document_id == doc_id {
                    continue;
                }
                let idx = new_meta.len();
                if dim > 0 {
                    let start = i * dim;
                    let end = start + dim;
                    if end <= old_arena.len() {
                        new_arena.extend_from_slice(&old_arena[start..end]);
                    }
                }
                new_index.entry(m.product_id.clone()).or_default().push(idx);
                new_meta.push(ChunkMeta {
                    chunk_text: m.chunk_text.clone(),
                    chunk_index: m.chunk_index,
                    document_id: m.document_id.clone(),
                    document_name: m.document_name.clone(),
                    norm: m.norm,
                    image_url: m.image_url.clone(),
                    product_id: m.product_id.clone(),
                    text_lower: m.text_lower.clone(),
                    bigrams: m.bigrams.clone(),
                });
            }

            info!(
                removed = old_meta.len() - new_meta.len(),
                remaining = new_meta.len(),
                "arena compacted after document delete"
            );

            state.meta = Arc::new(new_meta);
            state.arena = Arc::new(new_arena);
            state.product_index = Arc::new(new_index);
        }

        self.cache.invalidate();
        Ok(())
    }

    /// Snapshots the arena, loading it from the database first if this is
    /// the first touch in this process.
    async fn snapshot_loaded(&self) -> Result<Snapshot, StoreError> {
        {
            let state = self.state.read().await;
            if state.loaded {
                return Ok(state.snapshot());
            }
        }
        let mut state = self.state.write().await;
        if !state.loaded {
            Self::load_arena(&self.db, &mut state).await?;
        }
        Ok(state.snapshot())
    }

    /// Full-scan rebuild of the arena from the chunks table. Rows whose
    /// embedding blob is misaligned are skipped; a dimension mismatch
    /// across rows fails the load.
    async fn load_arena(db: &Database, state: &mut ArenaState) -> Result<(), StoreError> {
        let conn = db.connect()?;
        let mut rows = conn
            .query(
                "SELECT document_id, document_name, chunk_index, chunk_text, embedding,
                        COALESCE(image_url, ''), COALESCE(product_id, '')
                 FROM chunks",
                (),
            )
            .await?;

        let mut meta: Vec<ChunkMeta> = Vec::new();
        let mut arena: Vec<f32> = Vec::new();
        let mut product_index: HashMap<String, Vec<usize>> = HashMap::new();
        let mut dim = 0usize;

        while let Some(row) = rows.next().await? {
            let document_id: String = row.get(0)?;
            let document_name: String = row.get(1)?;
            let chunk_index: i64 = row.get(2)?;
            let chunk_text: String = row.get(3)?;
            let embedding = match row.get_value(4)? {
                TursoValue::Blob(b) => b,
                _ => Vec::new(),
            };
            let image_url: String = row.get(5)?;
            let product_id: String = row.get(6)?;

            let vector = match deserialize_vector(&embedding) {
                Ok(v) => v,
                Err(e) => {
                    warn!(chunk = %format!("{document_id}-{chunk_index}"), "skipping chunk with bad embedding: {e}");
                    continue;
                }
            };

            if dim == 0 && !vector.is_empty() {
                dim = vector.len();
            } else if !vector.is_empty() && vector.len() != dim {
                return Err(StoreError::DimensionMismatch {
                    expected: dim,
                    got: vector.len(),
                });
            }

            let idx = meta.len();
            let text_lower = chunk_text.to_lowercase();
            meta.push(ChunkMeta {
                chunk_text,
                chunk_index,
                document_id,
                document_name,
                norm: vector_norm(&vector),
                image_url,
                product_id: product_id.clone(),
                bigrams: char_bigrams(&text_lower),
                text_lower,
            });
            arena.extend_from_slice(&vector);
            product_index.entry(product_id).or_default().push(idx);
        }

        info!(chunks = meta.len(), dim, "vector arena loaded");

        state.meta = Arc::new(meta);
        state.arena = Arc::new(arena);
        state.dim = dim;
        state.product_index = Arc::new(product_index);
        state.loaded = true;
        Ok(())
    }
}

/// Parallel cosine scan over the candidate indices. Work is split into
/// contiguous slices of at least 500 candidates; each worker keeps its own
/// bounded min-heap and the heaps are merged at the end.
fn scan_cosine(
    snapshot: &Snapshot,
    indices: &[usize],
    query: &[f32],
    query_norm: f32,
    top_k: usize,
    threshold: f32,
) -> Vec<SearchResult> {
    let workers = adaptive_workers(indices.len());
    let slice_len = indices.len().div_ceil(workers);
    let dim = snapshot.dim;
    let meta = &snapshot.meta;
    let arena = &snapshot.arena;

    let partials: Vec<TopK> = indices
        .par_chunks(slice_len.max(1))
        .map(|slice| {
            let mut heap = TopK::new(top_k);
            for &idx in slice {
                let m = &meta[idx];
                if m.norm == 0.0 {
                    continue;
                }
                let start = idx * dim;
                let end = start + dim;
                if end > arena.len() {
                    continue;
                }
                let vec = &arena[start..end];
                let dot = dot_product_x8(query, vec);
                let score = dot / (query_norm * m.norm);
                if score >= threshold {
                    heap.offer(Scored { score, idx });
                }
            }
            heap
        })
        .collect();

    let mut merged = TopK::new(top_k);
    for partial in partials {
        for Reverse(item) in partial.heap {
            merged.offer(item);
        }
    }

    merged
        .into_sorted_desc()
        .into_iter()
        .map(|s| to_result(&meta[s.idx], s.score))
        .collect()
}

/// Parallel keyword/bigram scan used by the text fallback.
fn scan_text(
    snapshot: &Snapshot,
    indices: &[usize],
    query_lower: &str,
    top_k: usize,
    threshold: f32,
) -> Vec<SearchResult> {
    let query_bigrams = char_bigrams(query_lower);
    let query_keywords = extract_keywords(query_lower);

    let workers = adaptive_workers(indices.len());
    let slice_len = indices.len().div_ceil(workers);
    let meta = &snapshot.meta;

    let mut hits: Vec<Scored> = indices
        .par_chunks(slice_len.max(1))
        .map(|slice| {
            let mut local = Vec::new();
            for &idx in slice {
                let m = &meta[idx];
                let kw = keyword_overlap(&query_keywords, &m.text_lower);
                let bg = jaccard_bigrams(&query_bigrams, &m.bigrams);
                let score = kw * 0.6 + bg * 0.4;
                if score >= threshold {
                    local.push(Scored { score, idx });
                }
            }
            local
        })
        .flatten()
        .collect();

    hits.sort_by(|a, b| b.cmp(a));
    hits.truncate(top_k);
    hits.into_iter()
        .map(|s| to_result(&meta[s.idx], s.score))
        .collect()
}

fn to_result(m: &ChunkMeta, score: f32) -> SearchResult {
    SearchResult {
        chunk_text: m.chunk_text.clone(),
        chunk_index: m.chunk_index,
        document_id: m.document_id.clone(),
        document_name: m.document_name.clone(),
        score,
        image_url: m.image_url.clone(),
        product_id: m.product_id.clone(),
    }
}

/// Character bigrams of a lowercased string.
fn char_bigrams(s: &str) -> HashSet<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Jaccard similarity between two bigram sets.
fn jaccard_bigrams(a: &HashSet<(char, char)>, b: &HashSet<(char, char)>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let intersection = small.iter().filter(|bg| large.contains(bg)).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}

/// Splits lowercased text into deduplicated tokens of at least two
/// characters, on whitespace and common ASCII/CJK punctuation.
fn extract_keywords(s: &str) -> Vec<String> {
    const DELIMS: &[char] = &[
        ' ', '\t', '\n', ',', '.', '?', '!', '。', '，', '？', '！', '、', '：', '；', '“', '”',
        '（', '）', '(', ')', '[', ']', '{', '}',
    ];
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    for token in s.split(|c| DELIMS.contains(&c)) {
        if token.chars().count() < 2 {
            continue;
        }
        if seen.insert(token.to_string()) {
            keywords.push(token.to_string());
        }
    }
    keywords
}

/// Fraction of query keywords found as substrings of the chunk text.
fn keyword_overlap(query_keywords: &[String], chunk_lower: &str) -> f32 {
    if query_keywords.is_empty() {
        return 0.0;
    }
    let matched = query_keywords
        .iter()
        .filter(|kw| chunk_lower.contains(kw.as_str()))
        .count();
    matched as f32 / query_keywords.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bigrams_of_short_strings() {
        assert!(char_bigrams("").is_empty());
        assert!(char_bigrams("a").is_empty());
        let bg = char_bigrams("abc");
        assert_eq!(bg.len(), 2);
        assert!(bg.contains(&('a', 'b')));
        assert!(bg.contains(&('b', 'c')));
    }

    #[test]
    fn jaccard_identical_sets_is_one() {
        let a = char_bigrams("hello world");
        assert!((jaccard_bigrams(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn jaccard_disjoint_sets_is_zero() {
        let a = char_bigrams("abcd");
        let b = char_bigrams("wxyz");
        assert_eq!(jaccard_bigrams(&a, &b), 0.0);
    }

    #[test]
    fn keywords_are_deduped_and_length_filtered() {
        let kws = extract_keywords("如何 安装 安装 the a 软件？");
        assert_eq!(kws, vec!["如何", "安装", "the", "软件"]);
    }

    #[test]
    fn keyword_overlap_fraction() {
        let kws = extract_keywords("install the software");
        let overlap = keyword_overlap(&kws, "run the installer to install everything");
        // "install" and "the" match, "software" does not.
        assert!((overlap - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn topk_keeps_the_best() {
        let mut heap = TopK::new(2);
        for (score, idx) in [(0.1, 0), (0.9, 1), (0.5, 2), (0.7, 3)] {
            heap.offer(Scored { score, idx });
        }
        let sorted = heap.into_sorted_desc();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].idx, 1);
        assert_eq!(sorted[1].idx, 3);
    }

    #[test]
    fn adaptive_workers_has_a_floor() {
        assert_eq!(adaptive_workers(0), 1);
        assert_eq!(adaptive_workers(499), 1);
        assert!(adaptive_workers(10_000) >= 1);
        assert!(adaptive_workers(1_000_000) <= rayon::current_num_threads().max(1));
    }
}
