//! Matching policy: nearest enrolled identity, gated by its own match flag.

use crate::types::{Embedding, Identity};

/// The accepted match for a probe embedding.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub name: String,
    pub distance: f32,
}

/// Strategy for resolving a probe embedding against enrolled identities.
pub trait Matcher {
    fn best_match(
        &self,
        probe: &Embedding,
        identities: &[Identity],
        threshold: f32,
    ) -> Option<MatchCandidate>;
}

/// Minimum-distance matcher.
///
/// Scans every identity, takes the argmin distance (strict `<`, so on a tie
/// the first-scanned entry wins), then accepts that candidate only if its own
/// boolean match flag is true. There is no fallback to a farther candidate
/// whose flag is true — the nearest entry decides or nobody does.
pub struct NearestMatcher;

impl Matcher for NearestMatcher {
    fn best_match(
        &self,
        probe: &Embedding,
        identities: &[Identity],
        threshold: f32,
    ) -> Option<MatchCandidate> {
        let mut best_idx: Option<usize> = None;
        let mut best_distance = f32::INFINITY;

        for (i, identity) in identities.iter().enumerate() {
            let distance = probe.distance(&identity.embedding);
            if distance < best_distance {
                best_distance = distance;
                best_idx = Some(i);
            }
        }

        let nearest = &identities[best_idx?];
        if probe.is_match(&nearest.embedding, threshold) {
            Some(MatchCandidate {
                name: nearest.name.clone(),
                distance: best_distance,
            })
        } else {
            None
        }
    }
}
