//! Compact HNSW (Hierarchical Navigable Small World) graph.
//!
//! One graph instance backs one model's index. Vectors are normalized on
//! insert so cosine similarity reduces to a dot product. The graph is built
//! once as a batch and is read-only afterwards; concurrent searches need no
//! locking. The whole structure is serde-serializable, which is what the
//! persisted `index.json` contains.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// HNSW construction and search tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Neighbors kept per node per layer (2x on the base layer).
    pub max_neighbors: usize,
    /// Candidate budget while building.
    pub ef_construction: usize,
    /// Default candidate budget at search time; searches use
    /// `max(ef_search, k)`.
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            max_neighbors: 16,
            ef_construction: 100,
            ef_search: 64,
        }
    }
}

/// Search candidate ordered by score, ties broken toward the lower internal
/// position so results are deterministic.
#[derive(Clone, Copy, Debug)]
struct Candidate {
    score: f32,
    id: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.id == other.id
    }
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Score ascending, then id descending: a max-heap pops the highest
        // score and prefers the lower id among equals.
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

const MAX_LEVEL_CAP: usize = 16;

/// The navigable small-world graph itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HnswGraph {
    params: HnswParams,
    dimension: usize,
    /// Normalized vectors, indexed by internal position.
    vectors: Vec<Vec<f32>>,
    /// `links[node][level]` holds that node's neighbors on `level`.
    links: Vec<Vec<Vec<u32>>>,
    entry_point: Option<u32>,
    max_level: usize,
}

impl HnswGraph {
    pub fn new(dimension: usize, params: HnswParams) -> Self {
        Self {
            params,
            dimension,
            vectors: Vec::new(),
            links: Vec::new(),
            entry_point: None,
            max_level: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    /// Inserts a vector and returns its internal position. The caller is
    /// responsible for dimension validation; positions are assigned densely
    /// in insertion order.
    pub fn insert(&mut self, vector: Vec<f32>) -> u32 {
        let id = self.vectors.len() as u32;
        self.vectors.push(normalize(vector));

        let level = self.sample_level();
        self.links.push(vec![Vec::new(); level + 1]);

        let Some(mut ep) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_level = level;
            return id;
        };

        let query = self.vectors[id as usize].clone();

        for layer in ((level + 1)..=self.max_level).rev() {
            ep = self.greedy_closest(&query, ep, layer);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let ef = self.params.ef_construction.max(1);
            let candidates = self.search_layer(&query, ep, ef, layer);
            let capacity = self.layer_capacity(layer);

            let selected: Vec<u32> = candidates.iter().take(capacity).map(|c| c.id).collect();
            self.links[id as usize][layer] = selected.clone();

            for neighbor in selected {
                self.links[neighbor as usize][layer].push(id);
                if self.links[neighbor as usize][layer].len() > capacity {
                    self.prune_neighbors(neighbor, layer, capacity);
                }
            }

            if let Some(best) = candidates.first() {
                ep = best.id;
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id);
        }

        id
    }

    /// Returns up to `ef` candidates from the base layer, best first, as
    /// `(internal position, cosine score)` pairs.
    pub fn search(&self, query: &[f32], ef: usize) -> Vec<(u32, f32)> {
        let Some(mut ep) = self.entry_point else {
            return Vec::new();
        };
        let query = normalize(query.to_vec());
        for layer in (1..=self.max_level).rev() {
            ep = self.greedy_closest(&query, ep, layer);
        }
        self.search_layer(&query, ep, ef.max(1), 0)
            .into_iter()
            .map(|c| (c.id, c.score))
            .collect()
    }

    fn layer_capacity(&self, layer: usize) -> usize {
        let m = self.params.max_neighbors.max(2);
        if layer == 0 { m * 2 } else { m }
    }

    fn sample_level(&self) -> usize {
        let m = self.params.max_neighbors.max(2) as f64;
        let mult = 1.0 / m.ln();
        let uniform: f64 = rand::thread_rng().gen_range(f64::MIN_POSITIVE..1.0);
        ((-uniform.ln() * mult) as usize).min(MAX_LEVEL_CAP)
    }

    fn neighbors(&self, node: u32, layer: usize) -> &[u32] {
        self.links[node as usize]
            .get(layer)
            .map_or(&[], Vec::as_slice)
    }

    fn score(&self, query: &[f32], node: u32) -> f32 {
        dot(query, &self.vectors[node as usize])
    }

    fn greedy_closest(&self, query: &[f32], entry: u32, layer: usize) -> u32 {
        let mut best = entry;
        let mut best_score = self.score(query, best);
        loop {
            let mut improved = false;
            for &neighbor in self.neighbors(best, layer) {
                let score = self.score(query, neighbor);
                if score > best_score || (score == best_score && neighbor < best) {
                    best = neighbor;
                    best_score = score;
                    improved = true;
                }
            }
            if !improved {
                return best;
            }
        }
    }

    fn search_layer(&self, query: &[f32], entry: u32, ef: usize, layer: usize) -> Vec<Candidate> {
        let mut visited: HashSet<u32> = HashSet::new();
        visited.insert(entry);

        let start = Candidate {
            score: self.score(query, entry),
            id: entry,
        };
        let mut frontier: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut best: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        frontier.push(start);
        best.push(Reverse(start));

        while let Some(current) = frontier.pop() {
            let worst = best.peek().map(|r| r.0.score).unwrap_or(f32::MIN);
            if best.len() >= ef && current.score < worst {
                break;
            }
            for &neighbor in self.neighbors(current.id, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let score = self.score(query, neighbor);
                let worst = best.peek().map(|r| r.0.score).unwrap_or(f32::MIN);
                if best.len() < ef || score > worst {
                    let candidate = Candidate {
                        score,
                        id: neighbor,
                    };
                    frontier.push(candidate);
                    best.push(Reverse(candidate));
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        let mut results: Vec<Candidate> = best.into_iter().map(|r| r.0).collect();
        results.sort_by(|a, b| b.cmp(a));
        results
    }

    fn prune_neighbors(&mut self, node: u32, layer: usize, capacity: usize) {
        let anchor = self.vectors[node as usize].clone();
        let mut scored: Vec<Candidate> = self.links[node as usize][layer]
            .iter()
            .map(|&n| Candidate {
                score: dot(&anchor, &self.vectors[n as usize]),
                id: n,
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        scored.truncate(capacity);
        self.links[node as usize][layer] = scored.into_iter().map(|c| c.id).collect();
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}
