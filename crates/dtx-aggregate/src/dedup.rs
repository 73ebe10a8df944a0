//! Perceptual deduplication
//!
//! Colors cluster in one pass over candidates sorted by descending
//! confidence: a candidate joins the first cluster whose representative and
//! every member are closer than the JND threshold (CIEDE2000), otherwise it
//! seeds a new one. No two members of a cluster are ever a JND or more
//! apart. Representatives are confidence-weighted means in CIELAB,
//! quantized to 8-bit sRGB. A settle pass then folds clusters whose
//! representatives drifted within the threshold of each other, under the
//! same member bound.
//!
//! Ties in confidence are broken by value, then name, so the clustering
//! depends only on the set of candidates and re-running over the members
//! of a result reproduces it.
//!
//! Everything else (and colors whose value is not a hex string) merges on
//! equal canonical values.

use crate::error::AggregationError;
use dtx_core::{delta_e_2000, AggregationConfig, Lab, Rgb, TokenCandidate, TokenCategory};
use std::cmp::Ordering;

/// Group of candidates judged to be the same token
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Members, highest confidence first
    pub members: Vec<TokenCandidate>,
    /// Merged color, for perceptual clusters
    pub representative: Option<Rgb>,
}

impl Cluster {
    fn seed(candidate: TokenCandidate, color: Option<Rgb>) -> Self {
        Self {
            members: vec![candidate],
            representative: color,
        }
    }

    /// Highest-confidence member
    #[inline]
    #[must_use]
    pub fn lead(&self) -> Option<&TokenCandidate> {
        self.members.first()
    }

    fn recompute(&mut self) {
        let Some(seed) = self.representative else {
            return;
        };
        let labs: Vec<(Lab, f64)> = self
            .members
            .iter()
            .filter_map(|m| parse_color(m).map(|rgb| (rgb.to_lab(), m.confidence)))
            .collect();
        let mean = Lab::weighted_mean(labs.iter().copied())
            .or_else(|| Lab::weighted_mean(labs.iter().map(|(lab, _)| (*lab, 1.0))));
        if let Some(mean) = mean {
            self.representative = Some(mean.to_rgb(seed.a));
        }
    }
}

fn parse_color(candidate: &TokenCandidate) -> Option<Rgb> {
    if candidate.category != TokenCategory::Color {
        return None;
    }
    candidate.value.as_text().and_then(|s| s.parse().ok())
}

fn by_confidence(a: &TokenCandidate, b: &TokenCandidate) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.value.canonical(0.0).cmp(&b.value.canonical(0.0)))
        .then_with(|| a.name.cmp(&b.name))
}

fn member_labs(cluster: &Cluster) -> impl Iterator<Item = Lab> + '_ {
    cluster.members.iter().filter_map(parse_color).map(|rgb| rgb.to_lab())
}

/// Merges near-duplicate candidates of one category
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    config: AggregationConfig,
}

impl Deduplicator {
    #[must_use]
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    /// Merge threshold in CIEDE2000 units
    #[inline]
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.config.jnd_threshold
    }

    /// Cluster candidates of `category`
    ///
    /// Output order is deterministic for a fixed input order: clusters
    /// appear in the order their seeds were visited.
    ///
    /// # Errors
    /// Rejects candidates of another category or with a confidence outside
    /// [0, 1].
    pub fn dedupe(
        &self,
        category: TokenCategory,
        mut candidates: Vec<TokenCandidate>,
    ) -> Result<Vec<Cluster>, AggregationError> {
        for candidate in &candidates {
            if candidate.category != category {
                return Err(AggregationError::CategoryMismatch {
                    name: candidate.name.clone(),
                    expected: category,
                    found: candidate.category,
                });
            }
            if !(0.0..=1.0).contains(&candidate.confidence) {
                return Err(AggregationError::ConfidenceOutOfRange {
                    name: candidate.name.clone(),
                    confidence: candidate.confidence,
                });
            }
        }
        candidates.sort_by(by_confidence);

        let mut clusters: Vec<Cluster> = Vec::new();
        for candidate in candidates {
            match parse_color(&candidate) {
                Some(color) => self.place_color(&mut clusters, candidate, color),
                None => self.place_exact(&mut clusters, candidate),
            }
        }
        self.settle(&mut clusters);
        Ok(clusters)
    }

    fn close(&self, a: Lab, b: Lab) -> bool {
        delta_e_2000(a, b) < self.config.jnd_threshold
    }

    fn admits(&self, cluster: &Cluster, color: Rgb, lab: Lab) -> bool {
        cluster
            .representative
            .is_some_and(|rep| rep.a == color.a && self.close(rep.to_lab(), lab))
            && member_labs(cluster).all(|member| self.close(member, lab))
    }

    fn place_color(&self, clusters: &mut Vec<Cluster>, candidate: TokenCandidate, color: Rgb) {
        let lab = color.to_lab();
        let target = clusters
            .iter_mut()
            .find(|cluster| self.admits(cluster, color, lab));
        match target {
            Some(cluster) => {
                tracing::debug!(
                    name = %candidate.name,
                    color = %color,
                    into = ?cluster.representative.map(|rep| rep.to_hex()),
                    "color joins cluster"
                );
                cluster.members.push(candidate);
                cluster.recompute();
            }
            None => clusters.push(Cluster::seed(candidate, Some(color))),
        }
    }

    fn place_exact(&self, clusters: &mut Vec<Cluster>, candidate: TokenCandidate) {
        let key = candidate.value.canonical(self.config.value_precision);
        let precision = self.config.value_precision;
        let target = clusters.iter_mut().find(|cluster| {
            cluster.representative.is_none()
                && cluster
                    .lead()
                    .is_some_and(|lead| lead.value.canonical(precision) == key)
        });
        match target {
            Some(cluster) => cluster.members.push(candidate),
            None => clusters.push(Cluster::seed(candidate, None)),
        }
    }

    /// Fold color clusters whose representatives ended up within the
    /// threshold of an earlier cluster, when every cross-member pair is too.
    fn settle(&self, clusters: &mut Vec<Cluster>) {
        loop {
            let pair = (0..clusters.len()).find_map(|i| {
                let rep_i = clusters[i].representative?;
                (i + 1..clusters.len()).find_map(|j| {
                    let rep_j = clusters[j].representative?;
                    (rep_i.a == rep_j.a
                        && self.close(rep_i.to_lab(), rep_j.to_lab())
                        && member_labs(&clusters[i])
                            .all(|a| member_labs(&clusters[j]).all(|b| self.close(a, b))))
                    .then_some((i, j))
                })
            });
            let Some((keep, fold)) = pair else {
                break;
            };
            let folded = clusters.remove(fold);
            let cluster = &mut clusters[keep];
            cluster.members.extend(folded.members);
            cluster.members.sort_by(by_confidence);
            cluster.recompute();
        }
    }
}
