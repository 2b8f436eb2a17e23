//! Recall of the graph index against exact search.

use rand::prelude::*;
use rand::rngs::StdRng;

use quiver::error::Result;
use quiver::schema::MetricType;
use quiver::vector::{HnswConfig, IndexKind, VectorIndex};

const DIM: usize = 16;
const COUNT: usize = 500;

fn random_vectors(seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..COUNT)
        .map(|_| (0..DIM).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect())
        .collect()
}

fn loaded_index(vectors: &[Vec<f32>], metric: MetricType, kind: IndexKind) -> Result<VectorIndex> {
    let mut index = VectorIndex::build(DIM, metric, kind);
    for (i, vector) in vectors.iter().enumerate() {
        index.add(format!("v{i}"), vector.clone())?;
    }
    index.load();
    Ok(index)
}

#[test]
fn test_hnsw_finds_itself() -> Result<()> {
    let vectors = random_vectors(7);
    let config = HnswConfig::default().with_seed(42);
    let index = loaded_index(&vectors, MetricType::L2, IndexKind::Hnsw(config))?;

    let mut found = 0;
    for (i, vector) in vectors.iter().enumerate() {
        let hits = index.search(vector, 1)?;
        if hits.first().is_some_and(|hit| hit.id == format!("v{i}")) {
            found += 1;
        }
    }
    let recall = found as f64 / COUNT as f64;
    assert!(recall >= 0.98, "self recall {recall}");
    Ok(())
}

#[test]
fn test_hnsw_top_k_matches_flat() -> Result<()> {
    let vectors = random_vectors(11);
    let config = HnswConfig::default().with_seed(3);
    let flat = loaded_index(&vectors, MetricType::Cosine, IndexKind::Flat)?;
    let graph = loaded_index(&vectors, MetricType::Cosine, IndexKind::Hnsw(config))?;

    let queries = random_vectors(99);
    let mut overlap = 0;
    for query in queries.iter().take(50) {
        let exact: Vec<String> = flat.search(query, 10)?.into_iter().map(|h| h.id).collect();
        let approx = graph.search(query, 10)?;
        overlap += approx.iter().filter(|hit| exact.contains(&hit.id)).count();
    }
    let recall = overlap as f64 / (50 * 10) as f64;
    assert!(recall >= 0.9, "top-10 recall {recall}");
    Ok(())
}

#[test]
fn test_deleted_ids_never_surface() -> Result<()> {
    let vectors = random_vectors(5);
    let config = HnswConfig::default().with_seed(1);
    let mut index = loaded_index(&vectors, MetricType::L2, IndexKind::Hnsw(config))?;

    for i in (0..COUNT).step_by(2) {
        assert!(index.remove(&format!("v{i}")));
    }
    for query in vectors.iter().take(20) {
        let hits = index.search(query, 10)?;
        assert_eq!(hits.len(), 10);
        for hit in hits {
            let n: usize = hit.id[1..].parse().expect("numeric id");
            assert_eq!(n % 2, 1, "deleted {} returned", hit.id);
        }
    }
    Ok(())
}
