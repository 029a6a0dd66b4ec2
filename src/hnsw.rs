//! HNSW (Hierarchical Navigable Small World) graph for approximate
//! nearest-neighbor search over embedding vectors.
//!
//! Higher layers hold exponentially fewer nodes. A search starts at the
//! entry point on the top layer, descends greedily to layer 1, then runs a
//! beam search of width `ef` on layer 0. Similarity is cosine; higher is
//! more similar.
//!
//! Node ids are chosen by the caller (the store uses each record's insertion
//! sequence number). Level assignment uses a seeded LCG so building the same
//! vectors in the same order yields the same graph.
//!
//! # File format
//!
//! Little-endian throughout:
//!
//! ```text
//! header  magic "PHNS" | version u16 | dims u32 | m u32 | ef_construction u32
//!         | ef_search u32 | node_count u32 | level_max u8 | entry_point u32
//!         | rng_state u64
//! node    id u32 | level u8 | vector f32 × dims
//!         | per layer 0..=level: neighbor_count u32 | neighbor ids u32 × count
//! ```

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use thiserror::Error;

const MAGIC: &[u8; 4] = b"PHNS";
const FORMAT_VERSION: u16 = 1;
const NO_ENTRY_POINT: u32 = u32::MAX;
const MAX_LEVEL: u8 = 16;
const RNG_SEED: u64 = 42;

#[derive(Debug, Error, PartialEq)]
pub enum HnswError {
    #[error("duplicate node id: {0}")]
    DuplicateId(u32),
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("invalid index file: {0}")]
    Decode(String),
}

/// Graph construction and search parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HnswParams {
    /// Max neighbors per node on layers above 0 (layer 0 allows `2 × m`).
    pub m: usize,
    /// Beam width while inserting.
    pub ef_construction: usize,
    /// Minimum beam width while searching.
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 32,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    level: u8,
    vector: Vec<f32>,
    magnitude: f32,
    /// One neighbor list per layer `0..=level`.
    neighbors: Vec<Vec<u32>>,
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    score: f32,
    id: u32,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    // Higher score wins; on equal scores the lower (earlier) id wins.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Debug, Clone)]
pub struct Hnsw {
    params: HnswParams,
    dims: usize,
    level_mult: f32,
    nodes: HashMap<u32, Node>,
    entry_point: Option<u32>,
    level_max: u8,
    rng_state: u64,
}

impl Hnsw {
    pub fn new(dims: usize, params: HnswParams) -> Self {
        Hnsw {
            level_mult: 1.0 / (params.m.max(2) as f32).ln(),
            params,
            dims,
            nodes: HashMap::new(),
            entry_point: None,
            level_max: 0,
            rng_state: RNG_SEED,
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn params(&self) -> HnswParams {
        self.params
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.nodes.contains_key(&id)
    }

    /// All node ids, ascending.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Override the search beam width (not persisted as a build parameter).
    pub fn set_ef_search(&mut self, ef_search: usize) {
        self.params.ef_search = ef_search.max(1);
    }

    pub fn insert(&mut self, id: u32, vector: Vec<f32>) -> Result<(), HnswError> {
        if vector.len() != self.dims {
            return Err(HnswError::DimensionMismatch {
                expected: self.dims,
                got: vector.len(),
            });
        }
        if self.nodes.contains_key(&id) {
            return Err(HnswError::DuplicateId(id));
        }

        let level = self.select_level();
        let magnitude = magnitude(&vector);
        let node = Node {
            level,
            vector,
            magnitude,
            neighbors: vec![Vec::new(); level as usize + 1],
        };

        let Some(mut ep) = self.entry_point else {
            self.nodes.insert(id, node);
            self.entry_point = Some(id);
            self.level_max = level;
            return Ok(());
        };

        let query = node.vector.clone();
        self.nodes.insert(id, node);

        let mut layer = self.level_max;
        while layer > level {
            ep = self.greedy_closest(ep, &query, magnitude, layer);
            layer -= 1;
        }

        for layer in (0..=level.min(self.level_max)).rev() {
            let found = self.search_layer(ep, &query, magnitude, self.params.ef_construction, layer);
            let limit = self.max_neighbors(layer);
            let selected: Vec<u32> = found
                .iter()
                .filter(|s| s.id != id)
                .take(limit)
                .map(|s| s.id)
                .collect();

            for &neighbor in &selected {
                self.connect(id, neighbor, layer);
                self.connect(neighbor, id, layer);
                self.prune(neighbor, layer, limit);
            }

            if let Some(best) = found.first() {
                ep = best.id;
            }
        }

        if level > self.level_max {
            self.level_max = level;
            self.entry_point = Some(id);
        }
        Ok(())
    }

    /// The `k` most similar nodes as `(id, cosine similarity)`, best first.
    /// Equal scores are ordered by ascending id.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)> {
        let Some(mut ep) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 || query.len() != self.dims {
            return Vec::new();
        }

        let query_mag = magnitude(query);
        let mut layer = self.level_max;
        while layer > 0 {
            ep = self.greedy_closest(ep, query, query_mag, layer);
            layer -= 1;
        }

        let ef = k.max(self.params.ef_search);
        let mut found = self.search_layer(ep, query, query_mag, ef, 0);
        let wanted = k.min(self.nodes.len());
        if found.len() < wanted {
            // Pruning can strand nodes the beam never reaches; score the rest exactly.
            let seen: HashSet<u32> = found.iter().map(|s| s.id).collect();
            found.extend(
                self.nodes
                    .keys()
                    .filter(|id| !seen.contains(id))
                    .map(|&id| Scored {
                        score: self.similarity(id, query, query_mag),
                        id,
                    }),
            );
            found.sort_by(|a, b| b.cmp(a));
        }
        found
            .into_iter()
            .take(k)
            .map(|s| (s.id, s.score))
            .collect()
    }

    fn max_neighbors(&self, layer: u8) -> usize {
        if layer == 0 {
            self.params.m * 2
        } else {
            self.params.m
        }
    }

    fn select_level(&mut self) -> u8 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        let r = ((self.rng_state >> 33) as f32 / (1u64 << 31) as f32).clamp(1e-7, 1.0);
        let level = (-r.ln() * self.level_mult).floor() as u8;
        level.min(MAX_LEVEL)
    }

    fn similarity(&self, id: u32, query: &[f32], query_mag: f32) -> f32 {
        let Some(node) = self.nodes.get(&id) else {
            return f32::NEG_INFINITY;
        };
        if node.magnitude < f32::EPSILON || query_mag < f32::EPSILON {
            return 0.0;
        }
        let dot: f32 = node.vector.iter().zip(query).map(|(a, b)| a * b).sum();
        dot / (node.magnitude * query_mag)
    }

    fn neighbors(&self, id: u32, layer: u8) -> &[u32] {
        self.nodes
            .get(&id)
            .and_then(|n| n.neighbors.get(layer as usize))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    fn greedy_closest(&self, entry: u32, query: &[f32], query_mag: f32, layer: u8) -> u32 {
        let mut best = Scored {
            score: self.similarity(entry, query, query_mag),
            id: entry,
        };
        loop {
            let mut changed = false;
            for &neighbor in self.neighbors(best.id, layer) {
                let candidate = Scored {
                    score: self.similarity(neighbor, query, query_mag),
                    id: neighbor,
                };
                if candidate > best {
                    best = candidate;
                    changed = true;
                }
            }
            if !changed {
                return best.id;
            }
        }
    }

    /// Beam search on one layer; returns up to `ef` nodes, best first.
    fn search_layer(&self, entry: u32, query: &[f32], query_mag: f32, ef: usize, layer: u8) -> Vec<Scored> {
        let ef = ef.max(1);
        let start = Scored {
            score: self.similarity(entry, query, query_mag),
            id: entry,
        };

        let mut visited: HashSet<u32> = HashSet::from([entry]);
        let mut candidates: BinaryHeap<Scored> = BinaryHeap::from([start]);
        let mut results: BinaryHeap<Reverse<Scored>> = BinaryHeap::from([Reverse(start)]);

        while let Some(current) = candidates.pop() {
            let worst = results.peek().map(|r| r.0);
            if let Some(worst) = worst {
                if current < worst && results.len() >= ef {
                    break;
                }
            }

            for &neighbor in self.neighbors(current.id, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let scored = Scored {
                    score: self.similarity(neighbor, query, query_mag),
                    id: neighbor,
                };
                let admit = results.len() < ef || results.peek().map_or(true, |w| scored > w.0);
                if admit {
                    candidates.push(scored);
                    results.push(Reverse(scored));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut found: Vec<Scored> = results.into_iter().map(|r| r.0).collect();
        found.sort_by(|a, b| b.cmp(a));
        found
    }

    fn connect(&mut self, from: u32, to: u32, layer: u8) {
        if let Some(node) = self.nodes.get_mut(&from) {
            if let Some(list) = node.neighbors.get_mut(layer as usize) {
                if !list.contains(&to) {
                    list.push(to);
                }
            }
        }
    }

    fn prune(&mut self, id: u32, layer: u8, limit: usize) {
        let (vector, mag, current) = match self.nodes.get(&id) {
            Some(node) => match node.neighbors.get(layer as usize) {
                Some(list) if list.len() > limit => (node.vector.clone(), node.magnitude, list.clone()),
                _ => return,
            },
            None => return,
        };

        let mut scored: Vec<Scored> = current
            .into_iter()
            .map(|n| Scored {
                score: self.similarity(n, &vector, mag),
                id: n,
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        scored.truncate(limit);

        if let Some(node) = self.nodes.get_mut(&id) {
            node.neighbors[layer as usize] = scored.into_iter().map(|s| s.id).collect();
        }
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(40 + self.nodes.len() * (self.dims * 4 + 16));
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dims as u32).to_le_bytes());
        out.extend_from_slice(&(self.params.m as u32).to_le_bytes());
        out.extend_from_slice(&(self.params.ef_construction as u32).to_le_bytes());
        out.extend_from_slice(&(self.params.ef_search as u32).to_le_bytes());
        out.extend_from_slice(&(self.nodes.len() as u32).to_le_bytes());
        out.push(self.level_max);
        out.extend_from_slice(&self.entry_point.unwrap_or(NO_ENTRY_POINT).to_le_bytes());
        out.extend_from_slice(&self.rng_state.to_le_bytes());

        for id in self.ids() {
            let node = &self.nodes[&id];
            out.extend_from_slice(&id.to_le_bytes());
            out.push(node.level);
            for v in &node.vector {
                out.extend_from_slice(&v.to_le_bytes());
            }
            for list in &node.neighbors {
                out.extend_from_slice(&(list.len() as u32).to_le_bytes());
                for n in list {
                    out.extend_from_slice(&n.to_le_bytes());
                }
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HnswError> {
        let mut r = Reader { bytes, pos: 0 };

        if r.take(4)? != MAGIC {
            return Err(HnswError::Decode("bad magic".to_string()));
        }
        let version = r.u16()?;
        if version != FORMAT_VERSION {
            return Err(HnswError::Decode(format!("unsupported version {}", version)));
        }
        let dims = r.u32()? as usize;
        let params = HnswParams {
            m: r.u32()? as usize,
            ef_construction: r.u32()? as usize,
            ef_search: r.u32()? as usize,
        };
        if params.m < 2 || dims == 0 {
            return Err(HnswError::Decode("invalid header".to_string()));
        }
        let node_count = r.u32()? as usize;
        let level_max = r.u8()?;
        let entry = r.u32()?;
        let rng_state = r.u64()?;

        // Smallest possible node: id, level, vector, one empty neighbor list.
        let needed = dims
            .checked_mul(4)
            .and_then(|v| v.checked_add(9))
            .and_then(|per_node| per_node.checked_mul(node_count));
        match needed {
            Some(needed) if needed <= r.remaining() => {}
            _ => {
                return Err(HnswError::Decode(format!(
                    "header declares {} nodes of dimension {} but only {} bytes follow",
                    node_count,
                    dims,
                    r.remaining()
                )))
            }
        }

        let mut graph = Hnsw::new(dims, params);
        graph.level_max = level_max;
        graph.rng_state = rng_state;
        graph.entry_point = (entry != NO_ENTRY_POINT).then_some(entry);

        for _ in 0..node_count {
            let id = r.u32()?;
            let level = r.u8()?;
            if level > level_max {
                return Err(HnswError::Decode(format!("node {} above top layer", id)));
            }
            let vector: Vec<f32> = r
                .take(dims * 4)?
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            let mut neighbors = Vec::with_capacity(level as usize + 1);
            for _ in 0..=level {
                let count = r.u32()? as usize;
                let mut list = Vec::with_capacity(count.min(r.remaining() / 4));
                for _ in 0..count {
                    list.push(r.u32()?);
                }
                neighbors.push(list);
            }
            let node = Node {
                level,
                magnitude: magnitude(&vector),
                vector,
                neighbors,
            };
            if graph.nodes.insert(id, node).is_some() {
                return Err(HnswError::DuplicateId(id));
            }
        }

        if r.pos != bytes.len() {
            return Err(HnswError::Decode(format!(
                "{} trailing bytes",
                bytes.len() - r.pos
            )));
        }
        graph.validate()?;
        Ok(graph)
    }

    fn validate(&self) -> Result<(), HnswError> {
        match self.entry_point {
            None if !self.nodes.is_empty() => {
                return Err(HnswError::Decode("missing entry point".to_string()))
            }
            Some(ep) if !self.nodes.contains_key(&ep) => {
                return Err(HnswError::Decode(format!("entry point {} not in graph", ep)))
            }
            _ => {}
        }
        for (id, node) in &self.nodes {
            for list in &node.neighbors {
                if let Some(missing) = list.iter().find(|n| !self.nodes.contains_key(n)) {
                    return Err(HnswError::Decode(format!(
                        "node {} links to unknown node {}",
                        id, missing
                    )));
                }
            }
        }
        Ok(())
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], HnswError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| HnswError::Decode(format!("unexpected end of file at byte {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], HnswError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8, HnswError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, HnswError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, HnswError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, HnswError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

}

fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
