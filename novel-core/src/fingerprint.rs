//! Deterministic content fingerprints.
//!
//! A fingerprint is a fixed-length pseudo-random vector whose generator is
//! seeded from the SHA-256 digest of the input text. The same text always
//! produces the same vector, in every run. It is NOT a semantic embedding:
//! two paraphrases land as far apart as two unrelated texts. The vectors only
//! give the nearest-neighbour index something stable to work with.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

/// Default vector length.
pub const DEFAULT_DIMENSIONS: usize = 1536;

/// A content fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint(Vec<f32>);

impl Fingerprint {
    /// Fingerprint `text` with the default dimensionality.
    pub fn of(text: &str) -> Self {
        Self::with_dimensions(text, DEFAULT_DIMENSIONS)
    }

    /// Fingerprint `text` into a vector of `dimensions` components in `[0, 1)`.
    pub fn with_dimensions(text: &str, dimensions: usize) -> Self {
        let mut rng = StdRng::from_seed(seed_for(text));
        Self((0..dimensions).map(|_| rng.gen::<f32>()).collect())
    }

    /// Wrap a raw vector.
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    /// Squared Euclidean distance to another fingerprint of the same length.
    pub fn squared_distance(&self, other: &Fingerprint) -> f32 {
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}

fn seed_for(text: &str) -> [u8; 32] {
    let digest = Sha256::digest(text.as_bytes());
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&digest);
    seed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_text_same_vector() {
        let a = Fingerprint::of("Mira, the cartographer of the drowned city");
        let b = Fingerprint::of("Mira, the cartographer of the drowned city");
        assert_eq!(a, b);
        assert_eq!(a.squared_distance(&b), 0.0);
    }

    #[test]
    fn test_known_vector_prefix() {
        // Components are multiples of 2^-24; compare the exact numerators.
        let fp = Fingerprint::with_dimensions("x", 3);
        let numerators: Vec<u32> = fp
            .as_slice()
            .iter()
            .map(|v| (v * (1u32 << 24) as f32) as u32)
            .collect();
        assert_eq!(numerators, vec![0x1d_d2ac, 0x47_9b6a, 0xf3_59d1]);
        assert_eq!(Fingerprint::of("x").as_slice()[..3], fp.as_slice()[..]);
    }

    #[test]
    fn test_distinct_texts_differ() {
        let a = Fingerprint::of("The Old Lighthouse");
        let b = Fingerprint::of("The Old Lighthouse.");
        assert_ne!(a, b);
        assert!(a.squared_distance(&b) > 0.0);
    }

    #[test]
    fn test_dimensions() {
        assert_eq!(Fingerprint::of("x").dimensions(), DEFAULT_DIMENSIONS);
        assert_eq!(Fingerprint::with_dimensions("x", 8).dimensions(), 8);
    }

    #[test]
    fn test_values_in_unit_interval() {
        let fp = Fingerprint::with_dimensions("range check", 256);
        assert!(fp.as_slice().iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn test_squared_distance() {
        let a = Fingerprint::from_vec(vec![0.0, 0.0]);
        let b = Fingerprint::from_vec(vec![3.0, 4.0]);
        assert_eq!(a.squared_distance(&b), 25.0);
    }
}
