// Confidence Aggregator
//
// Concept: Turn technique estimates, their agreement and the input quality
//          into one confidence score and one rectified time
// Synchronization: Accepts TechniqueEstimates + AgreementResult + QualityScore,
//                  outputs ConfidenceResult
//
// Algorithm:
// 1. Validate every distribution (1440 finite non-negative masses summing to 1)
// 2. Ensemble = Σ reliability_i × (degraded ? factor : 1) × distribution_i, normalized
// 3. base = (ew·(1 − H/ln 1440) + dw·distinctiveness) / (ew + dw)
// 4. raw = (bw·base + aw·combined_score) / (bw + aw)
// 5. confidence = raw × quality_multiplier × 100
// 6. Ceiling: insufficient techniques or combined_score < floor caps confidence
// 7. Rectified time = circular mean of peaks weighted by agreement contribution,
//    falling back to the ensemble peak when nobody agrees
//
// Integrity: score always in [0, 100]; a NaN anywhere is an inconsistency, never a score.

use crate::config::RectificationConfig;
use crate::types::{
    AgreementResult, ConfidenceResult, QualityScore, RectificationError, TechniqueEstimate,
    TimeDistribution,
};
use crate::validators::ReliabilityClassifier;
use btr_common::clock::{format_minute_of_day, weighted_circular_mean};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ConfidenceAggregator {
    config: RectificationConfig,
    classifier: ReliabilityClassifier,
}

impl Default for ConfidenceAggregator {
    fn default() -> Self {
        Self::new(RectificationConfig::default())
    }
}

impl ConfidenceAggregator {
    pub fn new(config: RectificationConfig) -> Self {
        let classifier = ReliabilityClassifier::new(config.reliability_bands.clone());
        Self { config, classifier }
    }

    pub fn aggregate(
        &self,
        estimates: &[TechniqueEstimate],
        agreement: &AgreementResult,
        quality: &QualityScore,
    ) -> Result<ConfidenceResult, RectificationError> {
        if estimates.is_empty() {
            return Err(RectificationError::AggregationInconsistency(
                "no technique estimates to aggregate".to_string(),
            ));
        }
        for estimate in estimates {
            estimate.time_distribution.validate().map_err(|e| {
                RectificationError::AggregationInconsistency(format!(
                    "technique '{}': {}",
                    estimate.technique_id, e
                ))
            })?;
        }

        let ensemble_weights = self.ensemble_weights(estimates)?;
        let components: Vec<(&TimeDistribution, f64)> = estimates
            .iter()
            .map(|e| (&e.time_distribution, ensemble_weights[&e.technique_id]))
            .collect();
        let ensemble = TimeDistribution::mixture(&components).map_err(|e| {
            RectificationError::AggregationInconsistency(format!("ensemble: {}", e))
        })?;

        let c = &self.config;
        let certainty = 1.0 - ensemble.normalized_entropy();
        let distinctiveness = ensemble.peak_distinctiveness(c.min_peak_separation_minutes);
        let base_confidence = (c.entropy_weight * certainty
            + c.distinctiveness_weight * distinctiveness)
            / (c.entropy_weight + c.distinctiveness_weight);

        let raw_confidence = (c.base_weight * base_confidence
            + c.agreement_weight * agreement.combined_score)
            / (c.base_weight + c.agreement_weight);

        let quality_multiplier = self.quality_multiplier(quality);
        let mut confidence = raw_confidence * quality_multiplier * 100.0;
        if !confidence.is_finite() {
            return Err(RectificationError::AggregationInconsistency(format!(
                "confidence is not finite (base {}, agreement {}, quality {})",
                base_confidence, agreement.combined_score, quality_multiplier
            )));
        }

        let ceiling_applied = agreement.insufficient_techniques
            || agreement.combined_score < c.low_agreement_floor;
        if ceiling_applied && confidence > c.low_agreement_ceiling {
            info!(
                uncapped = confidence,
                ceiling = c.low_agreement_ceiling,
                insufficient = agreement.insufficient_techniques,
                combined = agreement.combined_score,
                "Low agreement, capping confidence"
            );
            confidence = c.low_agreement_ceiling;
        }
        let score = round2(confidence.clamp(0.0, 100.0));

        let contribution_total: f64 = agreement.technique_contributions.values().sum();
        let contributing_weights: BTreeMap<String, f64> = if contribution_total > 0.0 {
            estimates
                .iter()
                .map(|e| {
                    let share = agreement
                        .technique_contributions
                        .get(&e.technique_id)
                        .copied()
                        .unwrap_or(0.0);
                    (e.technique_id.clone(), share / contribution_total)
                })
                .collect()
        } else {
            ensemble_weights
        };

        let (ensemble_peak, _) = ensemble.peak();
        let rectified_time = if contribution_total > 0.0 {
            let samples: Vec<(u16, f64)> = estimates
                .iter()
                .map(|e| (e.peak_time, contributing_weights[&e.technique_id]))
                .collect();
            weighted_circular_mean(&samples).unwrap_or(ensemble_peak)
        } else {
            ensemble_peak
        };

        debug!(
            base = base_confidence,
            certainty,
            distinctiveness,
            raw = raw_confidence,
            quality = quality_multiplier,
            score,
            "Confidence aggregated"
        );

        Ok(ConfidenceResult {
            score,
            rectified_time,
            rectified_clock: format_minute_of_day(rectified_time),
            reliability_level: self.classifier.classify(score),
            contributing_weights,
            base_confidence,
            quality_multiplier,
            ceiling_applied,
            degraded_techniques: estimates
                .iter()
                .filter(|e| e.degraded)
                .map(|e| e.technique_id.clone())
                .collect(),
            agreement: agreement.clone(),
            quality: *quality,
        })
    }

    /// Normalized ensemble weight per technique
    fn ensemble_weights(
        &self,
        estimates: &[TechniqueEstimate],
    ) -> Result<BTreeMap<String, f64>, RectificationError> {
        let raw: Vec<(String, f64)> = estimates
            .iter()
            .map(|e| {
                let factor = if e.degraded {
                    self.config.degraded_weight_factor
                } else {
                    1.0
                };
                (
                    e.technique_id.clone(),
                    self.config.reliability_of(&e.technique_id) * factor,
                )
            })
            .collect();
        let total: f64 = raw.iter().map(|(_, w)| w).sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(RectificationError::AggregationInconsistency(
                "ensemble weights sum to zero".to_string(),
            ));
        }
        Ok(raw.into_iter().map(|(id, w)| (id, w / total)).collect())
    }

    /// Weighted mean of the quality sub-scores, clamped to [0, 1]
    pub fn quality_multiplier(&self, quality: &QualityScore) -> f64 {
        let weights = self.config.quality_weights.as_array();
        let values = [
            quality.coordinate_precision,
            quality.time_format_validity,
            quality.timezone_accuracy,
            quality.completeness_fraction,
            quality.text_word_count,
            quality.text_diversity,
            quality.temporal_indicator_density,
        ];
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        let weighted: f64 = weights
            .iter()
            .zip(values)
            .map(|(w, v)| w * v.clamp(0.0, 1.0))
            .sum();
        (weighted / total).clamp(0.0, 1.0)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
