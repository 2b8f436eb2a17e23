//! Distance functions for the supported metrics.
//!
//! Internally every metric is reduced to a *rank key* where lower is closer,
//! so the flat scan and the graph share one ordering. Inner product is
//! negated for that purpose and flipped back when results are reported.

use std::cmp::Ordering;

use crate::schema::MetricType;

/// Dot product of two equal-length slices.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean distance.
#[inline]
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// `1 - cos(a, b)`. A zero vector is maximally distant from everything.
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot(a, b) / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

impl MetricType {
    /// Value reported to callers: distance for COSINE and L2, similarity for IP.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            MetricType::Cosine => cosine_distance(a, b),
            MetricType::L2 => euclidean(a, b),
            MetricType::Ip => dot(a, b),
        }
    }

    /// Ordering key; lower always ranks first.
    #[inline]
    pub(crate) fn rank_key(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            MetricType::Ip => -dot(a, b),
            _ => self.distance(a, b),
        }
    }

    /// Convert a rank key back into the reported value.
    #[inline]
    pub(crate) fn report(&self, key: f32) -> f32 {
        match self {
            MetricType::Ip => -key,
            _ => key,
        }
    }
}

/// Total order on `(key, seq)` pairs: lower key first, then earlier insertion.
#[inline]
pub(crate) fn compare_ranked(a: (f32, u64), b: (f32, u64)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}
