//! Aggregation agent
//!
//! Groups a session's candidates by category, deduplicates each group and
//! attaches provenance, producing [`MergedToken`]s.

use crate::dedup::{Cluster, Deduplicator};
use crate::error::AggregationError;
use crate::provenance::ProvenanceTracker;
use dtx_core::{AggregationConfig, MergedToken, TokenCandidate, TokenCategory, TokenValue};
use std::collections::BTreeMap;

/// Merged tokens plus the provenance recorded while merging
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub tokens: Vec<MergedToken>,
    pub provenance: ProvenanceTracker,
}

/// Composes [`Deduplicator`] and [`ProvenanceTracker`]
#[derive(Debug, Clone, Default)]
pub struct AggregationAgent {
    deduplicator: Deduplicator,
}

impl AggregationAgent {
    #[must_use]
    pub fn new(config: AggregationConfig) -> Self {
        Self {
            deduplicator: Deduplicator::new(config),
        }
    }

    /// Merge candidates from any number of images
    ///
    /// Tokens come out grouped by category in canonical order.
    ///
    /// # Errors
    /// Returns the first [`AggregationError`]; nothing is retried.
    pub fn aggregate(&self, candidates: Vec<TokenCandidate>) -> Result<Vec<MergedToken>, AggregationError> {
        self.aggregate_with_provenance(candidates).map(|a| a.tokens)
    }

    /// Like [`aggregate`](Self::aggregate), also returning the provenance log
    ///
    /// # Errors
    /// Returns the first [`AggregationError`].
    pub fn aggregate_with_provenance(
        &self,
        candidates: Vec<TokenCandidate>,
    ) -> Result<Aggregation, AggregationError> {
        let input = candidates.len();
        let mut by_category: BTreeMap<TokenCategory, Vec<TokenCandidate>> = BTreeMap::new();
        for candidate in candidates {
            by_category.entry(candidate.category).or_default().push(candidate);
        }

        let mut output = Aggregation::default();
        for (category, group) in by_category {
            for (index, cluster) in self.deduplicator.dedupe(category, group)?.into_iter().enumerate() {
                let key = format!("{category}#{index}");
                let record = output.provenance.track(&key, &cluster)?;
                let mut token = merge(cluster)?;
                token.sources = record.sources;
                token.confidence = record.confidence;
                output.tokens.push(token);
            }
        }
        tracing::info!(candidates = input, merged = output.tokens.len(), "aggregation complete");
        Ok(output)
    }
}

/// Build the merged token; the lead member supplies identity and metadata
fn merge(cluster: Cluster) -> Result<MergedToken, AggregationError> {
    let representative = cluster.representative;
    let mut members = cluster.members.into_iter();
    let lead = members.next().ok_or(AggregationError::EmptyCluster)?;
    let mut token = MergedToken {
        category: lead.category,
        name: lead.name,
        path: lead.path,
        value: representative.map_or(lead.value, |rgb| TokenValue::Text(rgb.to_hex())),
        token_type: lead.token_type,
        description: lead.description,
        reference: lead.reference,
        extensions: lead.extensions,
        sources: Vec::new(),
        confidence: lead.confidence,
    };
    for member in members {
        if token.description.is_none() {
            token.description = member.description;
        }
        if token.reference.is_none() {
            token.reference = member.reference;
        }
        for (key, value) in member.extensions {
            token.extensions.entry(key).or_insert(value);
        }
    }
    Ok(token)
}
