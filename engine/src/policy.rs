//! Tier policy
//!
//! Turns the validated `[tiers]` configuration into the budgets each stage
//! reads, and owns the two plan post-processing passes:
//!
//! - [`TierPolicy::clamp_plan`] enforces the hard ceilings. Every director
//!   calls it and the orchestrator re-applies it, so no plan ever leaves the
//!   planning stage over budget.
//! - [`TierPolicy::enrich_plan`] is the LLM director's tier adjustment:
//!   richer wording for higher tiers and a creativity bonus for VIP.

use crate::config::{TierTable, TiersConfig};
use quill_sdk::types::{DirectorPlan, UserTier};

/// Creativity bonus granted to VIP plans by the LLM director
const VIP_CREATIVITY_BONUS: u8 = 2;

/// Per-tier generation budgets
#[derive(Debug, Clone)]
pub struct TierPolicy {
    max_length: TierTable<usize>,
    creativity_ceiling: TierTable<u8>,
    default_creativity: TierTable<u8>,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self::from_config(&TiersConfig::default())
    }
}

impl TierPolicy {
    pub fn from_config(config: &TiersConfig) -> Self {
        Self {
            max_length: config.max_length,
            creativity_ceiling: config.creativity_ceiling,
            default_creativity: config.default_creativity,
        }
    }

    /// Ceiling for `generation_parameters.max_length`
    pub fn max_length(&self, tier: UserTier) -> usize {
        self.max_length.get(tier)
    }

    /// Ceiling for `generation_parameters.creativity_level`
    pub fn creativity_ceiling(&self, tier: UserTier) -> u8 {
        self.creativity_ceiling.get(tier)
    }

    /// Creativity used when a strategy proposes none
    pub fn default_creativity(&self, tier: UserTier) -> u8 {
        self.default_creativity.get(tier)
    }

    /// Default style line
    pub fn default_style(&self, tier: UserTier) -> &'static str {
        match tier {
            UserTier::Vip => "delicate, vivid, richer pacing",
            _ => "clear, coherent, brisk pacing",
        }
    }

    /// Default pace line
    pub fn default_pace(&self, tier: UserTier) -> &'static str {
        match tier {
            UserTier::Vip => "unhurried, with room for atmosphere and inner life",
            _ => "brisk, each paragraph moves the plot",
        }
    }

    /// Detail level label
    pub fn detail_level(&self, tier: UserTier) -> &'static str {
        match tier {
            UserTier::Standard => "moderate",
            UserTier::Regular => "detailed",
            UserTier::Vip => "rich and finely textured",
        }
    }

    /// Content quality label for success criteria
    pub fn content_quality(&self, tier: UserTier) -> &'static str {
        match tier {
            UserTier::Standard => "fluent and on-topic",
            UserTier::Regular => "fluent, vivid and consistent with the story so far",
            UserTier::Vip => {
                "publication-grade prose: vivid imagery, distinct voices, seamless continuity"
            }
        }
    }

    /// Enforce the tier ceilings on a plan
    pub fn clamp_plan(&self, plan: &mut DirectorPlan, tier: UserTier) {
        let params = &mut plan.generation_parameters;
        let ceiling = self.max_length(tier);

        if params.max_length == 0 {
            params.max_length = ceiling;
        } else if params.max_length > ceiling {
            tracing::debug!(
                "Clamping max_length {} to {} for tier {}",
                params.max_length,
                ceiling,
                tier
            );
            params.max_length = ceiling;
        }

        if params.creativity_level == 0 {
            params.creativity_level = self.default_creativity(tier);
        }
        params.creativity_level = params
            .creativity_level
            .clamp(1, self.creativity_ceiling(tier));
    }

    /// Tier adjustment applied to LLM-proposed plans, followed by the clamp
    pub fn enrich_plan(&self, plan: &mut DirectorPlan, tier: UserTier) {
        if tier == UserTier::Vip {
            let params = &mut plan.generation_parameters;
            let base = if params.creativity_level == 0 {
                self.default_creativity(tier)
            } else {
                params.creativity_level
            };
            params.creativity_level = base.saturating_add(VIP_CREATIVITY_BONUS).min(10);
        }

        plan.writing_guidelines.detail_level = self.detail_level(tier).to_string();
        plan.success_criteria.content_quality = self.content_quality(tier).to_string();

        self.clamp_plan(plan, tier);
        self.describe_creativity(plan);
    }

    /// Restate the final creativity level in the success criteria
    pub fn describe_creativity(&self, plan: &mut DirectorPlan) {
        plan.success_criteria.creativity = format!(
            "creativity level {}/10",
            plan.generation_parameters.creativity_level
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with(max_length: usize, creativity: u8) -> DirectorPlan {
        let mut plan = DirectorPlan::default();
        plan.generation_parameters.max_length = max_length;
        plan.generation_parameters.creativity_level = creativity;
        plan
    }

    #[test]
    fn test_clamp_max_length_per_tier() {
        let policy = TierPolicy::default();
        for (tier, ceiling) in [
            (UserTier::Standard, 500),
            (UserTier::Regular, 1000),
            (UserTier::Vip, 2000),
        ] {
            let mut plan = plan_with(99_999, 5);
            policy.clamp_plan(&mut plan, tier);
            assert_eq!(plan.generation_parameters.max_length, ceiling);
        }
    }

    #[test]
    fn test_clamp_keeps_smaller_length_and_fills_zero() {
        let policy = TierPolicy::default();
        let mut plan = plan_with(300, 0);
        policy.clamp_plan(&mut plan, UserTier::Vip);
        assert_eq!(plan.generation_parameters.max_length, 300);
        assert_eq!(plan.generation_parameters.creativity_level, 8);

        let mut plan = plan_with(0, 3);
        policy.clamp_plan(&mut plan, UserTier::Standard);
        assert_eq!(plan.generation_parameters.max_length, 500);
    }

    #[test]
    fn test_creativity_ceiling() {
        let policy = TierPolicy::default();
        let mut plan = plan_with(100, 10);
        policy.clamp_plan(&mut plan, UserTier::Standard);
        assert_eq!(plan.generation_parameters.creativity_level, 6);
    }

    #[test]
    fn test_vip_enrichment_bonus_capped_at_ten() {
        let policy = TierPolicy::default();

        let mut plan = plan_with(100, 7);
        policy.enrich_plan(&mut plan, UserTier::Vip);
        assert_eq!(plan.generation_parameters.creativity_level, 9);

        let mut plan = plan_with(100, 9);
        policy.enrich_plan(&mut plan, UserTier::Vip);
        assert_eq!(plan.generation_parameters.creativity_level, 10);
        assert_eq!(
            plan.writing_guidelines.detail_level,
            "rich and finely textured"
        );
    }

    #[test]
    fn test_vip_enrichment_restates_boosted_creativity() {
        let policy = TierPolicy::default();
        let mut plan = plan_with(100, 6);
        plan.success_criteria.creativity = "creativity level 6/10".to_string();

        policy.enrich_plan(&mut plan, UserTier::Vip);
        assert_eq!(plan.generation_parameters.creativity_level, 8);
        assert_eq!(plan.success_criteria.creativity, "creativity level 8/10");
    }

    #[test]
    fn test_regular_enrichment_relabels_without_bonus() {
        let policy = TierPolicy::default();
        let mut plan = plan_with(100, 7);
        policy.enrich_plan(&mut plan, UserTier::Regular);
        assert_eq!(plan.generation_parameters.creativity_level, 7);
        assert_eq!(plan.writing_guidelines.detail_level, "detailed");
        assert!(!plan.success_criteria.content_quality.is_empty());
    }
}
