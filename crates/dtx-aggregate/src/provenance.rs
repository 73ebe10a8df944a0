//! Provenance tracking
//!
//! Records which images contributed to each merged token. Aggregate
//! confidence is the unweighted mean of member confidences.

use crate::dedup::Cluster;
use crate::error::AggregationError;
use dtx_core::{ImageId, SourceContribution};
use indexmap::IndexMap;
use serde::Serialize;

/// Provenance of one merged token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvenanceRecord {
    /// One entry per member candidate
    pub sources: Vec<SourceContribution>,
    /// Mean member confidence, within [0, 1]
    pub confidence: f64,
}

impl ProvenanceRecord {
    /// Distinct contributing images
    #[must_use]
    pub fn image_count(&self) -> usize {
        let mut images: Vec<ImageId> = self.sources.iter().map(|s| s.image_id).collect();
        images.sort();
        images.dedup();
        images.len()
    }
}

/// Mean of `confidences` clamped to [0, 1]; `None` when empty
#[must_use]
pub fn mean_confidence(confidences: &[f64]) -> Option<f64> {
    if confidences.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = confidences.iter().sum::<f64>() / confidences.len() as f64;
    Some(mean.clamp(0.0, 1.0))
}

/// Per-token provenance for one aggregation run
#[derive(Debug, Clone, Default)]
pub struct ProvenanceTracker {
    records: IndexMap<String, ProvenanceRecord>,
}

impl ProvenanceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cluster under `key`
    ///
    /// A key seen before accumulates the new members.
    ///
    /// # Errors
    /// Returns [`AggregationError::EmptyCluster`] for a cluster without members.
    pub fn track(&mut self, key: &str, cluster: &Cluster) -> Result<ProvenanceRecord, AggregationError> {
        if cluster.members.is_empty() {
            return Err(AggregationError::EmptyCluster);
        }
        let record = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| ProvenanceRecord {
                sources: Vec::new(),
                confidence: 0.0,
            });
        record
            .sources
            .extend(cluster.members.iter().map(|member| SourceContribution {
                image_id: member.source_image,
                confidence: member.confidence,
            }));
        let confidences: Vec<f64> = record.sources.iter().map(|s| s.confidence).collect();
        record.confidence = mean_confidence(&confidences).ok_or(AggregationError::EmptyCluster)?;
        Ok(record.clone())
    }

    /// Record for `key`
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ProvenanceRecord> {
        self.records.get(key)
    }

    /// All records in insertion order
    pub fn records(&self) -> impl Iterator<Item = (&str, &ProvenanceRecord)> {
        self.records.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtx_core::{TokenCandidate, TokenCategory};
    use proptest::prelude::*;

    fn cluster(confidences: &[f64]) -> Cluster {
        Cluster {
            members: confidences
                .iter()
                .map(|c| TokenCandidate::new(TokenCategory::Spacing, "gap", 8.0, *c, ImageId::new()))
                .collect(),
            representative: None,
        }
    }

    #[test]
    fn records_every_member() {
        let mut tracker = ProvenanceTracker::new();
        let record = tracker.track("spacing.gap", &cluster(&[0.9, 0.7])).unwrap();
        assert_eq!(record.sources.len(), 2);
        assert_eq!(record.image_count(), 2);
        assert!((record.confidence - 0.8).abs() < 1e-12);
        assert_eq!(tracker.get("spacing.gap"), Some(&record));
    }

    #[test]
    fn empty_cluster_is_rejected() {
        let mut tracker = ProvenanceTracker::new();
        assert_eq!(
            tracker.track("x", &cluster(&[])),
            Err(AggregationError::EmptyCluster)
        );
        assert!(tracker.is_empty());
    }

    proptest! {
        #[test]
        fn confidence_is_member_mean(confidences in prop::collection::vec(0.0f64..=1.0, 1..20)) {
            let mut tracker = ProvenanceTracker::new();
            let record = tracker.track("k", &cluster(&confidences)).unwrap();
            #[allow(clippy::cast_precision_loss)]
            let expected = confidences.iter().sum::<f64>() / confidences.len() as f64;
            prop_assert!((record.confidence - expected).abs() < 1e-9);
            prop_assert!((0.0..=1.0).contains(&record.confidence));
        }
    }
}
