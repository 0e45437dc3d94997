// Agreement Analyzer
//
// Concept: Measure how closely independent techniques agree on the birth minute
// Synchronization: Accepts TechniqueEstimates, outputs AgreementResult
//
// Algorithm:
// 1. Drop fallback estimates (a substitute Gaussian carries no technique evidence);
//    degraded estimates that kept their own peak still take part
// 2. For every pair of peaks, circular distance d = min(|a-b|, 1440-|a-b|)
// 3. A pair agrees at a tier when d <= the tier's half-width
// 4. tier_scores[tier] = agreeing pairs / total pairs
// 5. combined_score = Σ tier_score × normalized tier weight (max 1.0)
// 6. Each technique collects the tier weights of every pair it agrees in

use crate::config::TierConfig;
use crate::types::{AgreementResult, AgreementTier, TechniqueEstimate};
use btr_common::clock::circular_distance;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AgreementAnalyzer {
    /// (tier, half-width minutes, normalized weight)
    tiers: [(AgreementTier, u16, f64); 4],
}

impl Default for AgreementAnalyzer {
    fn default() -> Self {
        Self::new(&TierConfig::default())
    }
}

impl AgreementAnalyzer {
    pub fn new(config: &TierConfig) -> Self {
        let raw = [
            (AgreementTier::Exact, config.exact_minutes, config.exact_weight),
            (AgreementTier::Close, config.close_minutes, config.close_weight),
            (AgreementTier::Broad, config.broad_minutes, config.broad_weight),
            (AgreementTier::Loose, config.loose_minutes, config.loose_weight),
        ];
        let total: f64 = raw.iter().map(|(_, _, w)| w.max(0.0)).sum();
        let tiers = raw.map(|(tier, minutes, weight)| {
            let normalized = if total > 0.0 { weight.max(0.0) / total } else { 0.25 };
            (tier, minutes, normalized)
        });
        Self { tiers }
    }

    pub fn analyze(&self, estimates: &[TechniqueEstimate]) -> AgreementResult {
        let usable: Vec<&TechniqueEstimate> = estimates.iter().filter(|e| !e.fallback).collect();

        let mut contributions: BTreeMap<String, f64> = estimates
            .iter()
            .map(|e| (e.technique_id.clone(), 0.0))
            .collect();

        if usable.len() < 2 {
            return AgreementResult {
                tier_scores: self.tiers.iter().map(|(tier, _, _)| (*tier, 0.0)).collect(),
                combined_score: 0.0,
                insufficient_techniques: true,
                technique_contributions: contributions,
                pair_count: 0,
            };
        }

        let mut agreeing = [0usize; 4];
        let mut pair_count = 0usize;
        for (i, a) in usable.iter().enumerate() {
            for b in &usable[i + 1..] {
                pair_count += 1;
                let distance = circular_distance(a.peak_time, b.peak_time);
                let mut pair_weight = 0.0;
                for (slot, (_, half_width, weight)) in self.tiers.iter().enumerate() {
                    if distance <= *half_width {
                        agreeing[slot] += 1;
                        pair_weight += weight;
                    }
                }
                if pair_weight > 0.0 {
                    *contributions.entry(a.technique_id.clone()).or_default() += pair_weight;
                    *contributions.entry(b.technique_id.clone()).or_default() += pair_weight;
                }
            }
        }

        let mut tier_scores = BTreeMap::new();
        let mut combined_score = 0.0;
        for (slot, (tier, _, weight)) in self.tiers.iter().enumerate() {
            let score = agreeing[slot] as f64 / pair_count as f64;
            combined_score += score * weight;
            tier_scores.insert(*tier, score);
        }
        let combined_score = combined_score.clamp(0.0, 1.0);

        debug!(
            pairs = pair_count,
            exact = agreeing[0],
            close = agreeing[1],
            broad = agreeing[2],
            loose = agreeing[3],
            combined = combined_score,
            "Agreement analyzed"
        );

        AgreementResult {
            tier_scores,
            combined_score,
            insufficient_techniques: false,
            technique_contributions: contributions,
            pair_count,
        }
    }
}
