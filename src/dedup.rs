//! Semantic near-duplicate clustering.
//!
//! Articles become nodes of a similarity graph with an edge wherever the
//! cosine similarity of their body embeddings is strictly above the
//! threshold. Each connected component of at least `min_cluster_size` nodes
//! becomes a cluster; its first member (input order, i.e. oldest article)
//! is the representative. Singletons keep a NULL cluster id.

use crate::config::Settings;
use crate::embedding::{Embedder, cosine_similarity, embed_batched};
use crate::error::EmbedError;
use crate::models::{ClusterAssignment, StoredArticle};
use crate::store;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("Embedding failed: {0}")]
    Embed(#[from] EmbedError),

    #[error("Storage error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Totals of one deduplication pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupSummary {
    pub candidates: usize,
    pub clustered_articles: usize,
    pub clusters: usize,
}

/// Union-find over vector indices.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Joins two sets; the smaller root index stays the root.
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}

/// Connected components of the thresholded similarity graph.
///
/// Components are ordered by their first member and members keep input
/// order. Components smaller than `min_size` are omitted.
pub fn find_clusters(vectors: &[Vec<f32>], threshold: f32, min_size: usize) -> Vec<Vec<usize>> {
    let n = vectors.len();
    let mut sets = DisjointSet::new(n);
    for i in 0..n {
        for j in (i + 1)..n {
            if cosine_similarity(&vectors[i], &vectors[j]) > threshold {
                sets.union(i, j);
            }
        }
    }

    let mut components: Vec<Vec<usize>> = Vec::new();
    let mut slot_of_root = vec![usize::MAX; n];
    for i in 0..n {
        let root = sets.find(i);
        if slot_of_root[root] == usize::MAX {
            slot_of_root[root] = components.len();
            components.push(Vec::new());
        }
        components[slot_of_root[root]].push(i);
    }

    components.retain(|c| c.len() >= min_size.max(2));
    components
}

/// Turn component indices into cluster assignments with ids from `next_id`.
pub fn assign_clusters(
    articles: &[StoredArticle],
    components: &[Vec<usize>],
    next_id: i64,
) -> Vec<ClusterAssignment> {
    components
        .iter()
        .enumerate()
        .map(|(offset, members)| ClusterAssignment {
            cluster_id: next_id + offset as i64,
            members: members
                .iter()
                .map(|&i| articles[i].url_hash.clone())
                .collect(),
        })
        .collect()
}

/// Cluster every passed, unclustered article in the store.
///
/// An embedding failure aborts the pass before any row is written.
#[instrument(level = "info", skip_all)]
pub async fn run_dedup<E: Embedder>(
    pool: &SqlitePool,
    embedder: &E,
    settings: &Settings,
) -> Result<DedupSummary, DedupError> {
    let articles = store::load_unclustered(pool).await?;
    if articles.len() < 2 {
        info!(count = articles.len(), "Not enough unclustered articles to deduplicate");
        return Ok(DedupSummary {
            candidates: articles.len(),
            ..Default::default()
        });
    }

    let texts: Vec<String> = articles.iter().map(|a| a.body.clone()).collect();
    let vectors = embed_batched(embedder, &texts, settings.embedding.batch_size).await?;

    let components = find_clusters(
        &vectors,
        settings.dedup.similarity_threshold,
        settings.dedup.min_cluster_size,
    );
    let next_id = store::max_cluster_id(pool).await? + 1;
    let clusters = assign_clusters(&articles, &components, next_id);

    for (cluster, members) in clusters.iter().zip(&components) {
        debug!(
            cluster_id = cluster.cluster_id,
            size = cluster.members.len(),
            representative = %cluster.representative(),
            representative_id = articles[members[0]].article_id,
            "Found cluster"
        );
    }

    let updated = if clusters.is_empty() {
        0
    } else {
        store::apply_cluster_assignments(pool, &clusters).await?
    };

    info!(
        candidates = articles.len(),
        clusters = clusters.len(),
        updated,
        "Deduplication complete"
    );
    Ok(DedupSummary {
        candidates: articles.len(),
        clustered_articles: updated as usize,
        clusters: clusters.len(),
    })
}
