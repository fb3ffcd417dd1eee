//! Append-only nearest-neighbour index over fingerprints.

use crate::fingerprint::Fingerprint;

/// Flat (exhaustive) L2 index. Positions match insertion order.
#[derive(Debug, Clone)]
pub struct FingerprintIndex {
    dimensions: usize,
    entries: Vec<Fingerprint>,
}

impl FingerprintIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a fingerprint; returns its position. Caller checks dimensions.
    pub(crate) fn push(&mut self, fingerprint: Fingerprint) -> usize {
        debug_assert_eq!(fingerprint.dimensions(), self.dimensions);
        self.entries.push(fingerprint);
        self.entries.len() - 1
    }

    /// Positions of the `k` nearest entries, closest first.
    ///
    /// Ties keep insertion order. An empty index yields nothing.
    pub fn nearest(&self, query: &Fingerprint, k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, fp)| (pos, fp.squared_distance(query)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }
}
