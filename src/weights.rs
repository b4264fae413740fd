use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// No-op detection threshold for weight writes.
const EPS: f64 = 1e-9;

/// Field weights live on [0, 1]; dataset, category and attribute weights
/// live on [0, 100]. The scale fixes both the upper clamp bound and the
/// normalization target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightScale {
    Fraction,
    Percent,
}

impl WeightScale {
    pub fn target(self) -> f64 {
        match self {
            WeightScale::Fraction => 1.0,
            WeightScale::Percent => 100.0,
        }
    }

    /// Tolerance beyond which `renormalize` rescales the vector.
    fn renormalize_tolerance(self) -> f64 {
        match self {
            WeightScale::Fraction => 1e-6,
            WeightScale::Percent => 1e-4,
        }
    }
}

/// A normalized weight vector over an ordered key set with per-key lock
/// bits. Shared by field weights, reference weights and attribute
/// sub-weights; the three call sites differ only in scale and key set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEngine {
    scale: WeightScale,
    keys: Vec<String>,
    weights: HashMap<String, f64>,
    locked: HashSet<String>,
}

impl WeightEngine {
    pub fn new(scale: WeightScale) -> Self {
        Self {
            scale,
            keys: Vec::new(),
            weights: HashMap::new(),
            locked: HashSet::new(),
        }
    }

    /// Equal distribution over `keys`, clearing previous state.
    pub fn initialize(scale: WeightScale, keys: &[String]) -> Self {
        let mut engine = Self::new(scale);
        for key in keys {
            if !engine.keys.contains(key) {
                engine.keys.push(key.clone());
            }
        }
        engine.reset_equal();
        engine
    }

    /// Rebuild an engine from persisted values, keeping the given order.
    pub fn from_weights(scale: WeightScale, keys: &[String], weights: &HashMap<String, f64>) -> Self {
        let mut engine = Self::new(scale);
        for key in keys {
            if engine.keys.contains(key) {
                continue;
            }
            engine.keys.push(key.clone());
            engine
                .weights
                .insert(key.clone(), weights.get(key).copied().unwrap_or(0.0));
        }
        engine
    }

    pub fn scale(&self) -> WeightScale {
        self.scale
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.weights.get(key).copied()
    }

    pub fn weights(&self) -> &HashMap<String, f64> {
        &self.weights
    }

    pub fn sum(&self) -> f64 {
        self.keys.iter().filter_map(|k| self.weights.get(k)).sum()
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.locked.contains(key)
    }

    pub fn lock(&mut self, key: &str) {
        if self.keys.iter().any(|k| k == key) {
            self.locked.insert(key.to_string());
        }
    }

    pub fn unlock(&mut self, key: &str) {
        self.locked.remove(key);
    }

    /// Set every key to the equal share of the scale target. Locks are
    /// kept but the Equal button overrides locked values too.
    pub fn reset_equal(&mut self) {
        if self.keys.is_empty() {
            self.weights.clear();
            return;
        }
        let share = self.scale.target() / self.keys.len() as f64;
        for key in &self.keys {
            self.weights.insert(key.clone(), share);
        }
    }

    /// Add a key with an explicit starting weight. Duplicates are ignored.
    pub fn insert_key(&mut self, key: &str, weight: f64) {
        if self.keys.iter().any(|k| k == key) {
            return;
        }
        self.keys.push(key.to_string());
        self.weights
            .insert(key.to_string(), weight.clamp(0.0, self.scale.target()));
    }

    /// Remove a key and renormalize the remainder.
    pub fn remove_key(&mut self, key: &str) {
        self.keys.retain(|k| k != key);
        self.weights.remove(key);
        self.locked.remove(key);
        self.renormalize();
    }

    /// Write one weight and redistribute the opposite delta equally among
    /// the unlocked other keys. Recipients clamp to the scale bounds; a
    /// recipient's overflow is re-spread over the remaining eligible
    /// recipients for at most three passes, after which any residual
    /// stays on the edited key (the total is allowed to drift, the UI
    /// shows the off-target sum).
    pub fn set_weight(&mut self, key: &str, new_value: f64) {
        let Some(old) = self.weights.get(key).copied() else {
            return;
        };
        let upper = self.scale.target();
        let new_value = new_value.clamp(0.0, upper);
        let delta = new_value - old;
        if delta.abs() < EPS {
            return;
        }
        self.weights.insert(key.to_string(), new_value);

        let eligible: Vec<String> = self
            .keys
            .iter()
            .filter(|k| k.as_str() != key && !self.locked.contains(k.as_str()))
            .cloned()
            .collect();
        if eligible.is_empty() {
            return;
        }

        let mut residual = -delta;
        for _pass in 0..3 {
            if residual.abs() < EPS {
                break;
            }
            let active: Vec<&String> = eligible
                .iter()
                .filter(|k| {
                    let w = self.weights.get(k.as_str()).copied().unwrap_or(0.0);
                    if residual < 0.0 {
                        w > EPS
                    } else {
                        w < upper - EPS
                    }
                })
                .collect();
            if active.is_empty() {
                break;
            }
            let share = residual / active.len() as f64;
            residual = 0.0;
            for k in active {
                let w = self.weights.get(k.as_str()).copied().unwrap_or(0.0);
                let tentative = w + share;
                let clamped = tentative.clamp(0.0, upper);
                residual += tentative - clamped;
                self.weights.insert(k.clone(), clamped);
            }
        }
    }

    /// Uniformly rescale so the vector sums to the scale target. Only
    /// fires when the sum has drifted past the scale tolerance; a
    /// zero-sum vector is left untouched.
    pub fn renormalize(&mut self) {
        let sum = self.sum();
        let target = self.scale.target();
        if sum <= EPS || (sum - target).abs() <= self.scale.renormalize_tolerance() {
            return;
        }
        let factor = target / sum;
        for key in &self.keys {
            if let Some(w) = self.weights.get_mut(key) {
                *w *= factor;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn initialize_distributes_equally_on_both_scales() {
        let fraction = WeightEngine::initialize(WeightScale::Fraction, &keys(&["a", "b"]));
        assert_eq!(fraction.get("a"), Some(0.5));
        assert_eq!(fraction.get("b"), Some(0.5));

        let percent = WeightEngine::initialize(WeightScale::Percent, &keys(&["a", "b", "c", "d"]));
        assert_eq!(percent.get("c"), Some(25.0));
    }

    #[test]
    fn set_weight_spreads_delta_over_unlocked_others() {
        // Three datasets at 100/3 each; pushing one to 50 pulls the other
        // two down to 25 each.
        let mut engine = WeightEngine::initialize(WeightScale::Percent, &keys(&["a", "b", "c"]));
        engine.set_weight("a", 50.0);
        assert!((engine.get("a").unwrap() - 50.0).abs() < 1e-9);
        assert!((engine.get("b").unwrap() - 25.0).abs() < 1e-9);
        assert!((engine.get("c").unwrap() - 25.0).abs() < 1e-9);
        assert!((engine.sum() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn locked_key_never_changes() {
        let mut engine = WeightEngine::initialize(WeightScale::Fraction, &keys(&["a", "b"]));
        engine.lock("a");
        engine.set_weight("b", 0.8);
        assert_eq!(engine.get("a"), Some(0.5));
        assert_eq!(engine.get("b"), Some(0.8));
        // No eligible recipients: the total drifts and the UI shows 130%.
        assert!((engine.sum() - 1.3).abs() < 1e-9);
    }

    #[test]
    fn noop_write_leaves_all_keys_unchanged() {
        let mut engine = WeightEngine::initialize(WeightScale::Percent, &keys(&["a", "b", "c"]));
        engine.set_weight("a", 60.0);
        let before = engine.weights().clone();
        engine.set_weight("a", 60.0);
        assert_eq!(engine.weights(), &before);
    }

    #[test]
    fn set_weight_clamps_to_scale_bounds() {
        let mut engine = WeightEngine::initialize(WeightScale::Fraction, &keys(&["a", "b"]));
        engine.set_weight("a", 7.5);
        assert_eq!(engine.get("a"), Some(1.0));
        engine.set_weight("a", -3.0);
        assert_eq!(engine.get("a"), Some(0.0));
    }

    #[test]
    fn recipient_overflow_respreads_to_remaining_recipients() {
        let mut engine = WeightEngine::from_weights(
            WeightScale::Percent,
            &keys(&["a", "b", "c"]),
            &[
                ("a".to_string(), 90.0),
                ("b".to_string(), 2.0),
                ("c".to_string(), 8.0),
            ]
            .into_iter()
            .collect(),
        );
        // Raising a by 10 asks b and c for 5 each; b bottoms out at 0 and
        // its shortfall lands on c.
        engine.set_weight("a", 100.0);
        assert_eq!(engine.get("a"), Some(100.0));
        assert!(engine.get("b").unwrap().abs() < 1e-9);
        assert!(engine.get("c").unwrap().abs() < 1e-9);
        assert!((engine.sum() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn reset_equal_restores_equal_shares() {
        let mut engine = WeightEngine::initialize(WeightScale::Fraction, &keys(&["a", "b", "c", "d"]));
        engine.set_weight("a", 0.9);
        engine.reset_equal();
        for key in ["a", "b", "c", "d"] {
            assert!((engine.get(key).unwrap() - 0.25).abs() < 1e-9);
        }
    }

    #[test]
    fn remove_key_renormalizes_remainder() {
        let mut engine = WeightEngine::initialize(WeightScale::Percent, &keys(&["a", "b", "c"]));
        engine.set_weight("a", 50.0);
        engine.remove_key("a");
        assert_eq!(engine.keys(), &keys(&["b", "c"]));
        assert!((engine.sum() - 100.0).abs() < 1e-6);
        assert!((engine.get("b").unwrap() - 50.0).abs() < 1e-6);
    }

    #[test]
    fn renormalize_scales_uniformly() {
        let mut engine = WeightEngine::from_weights(
            WeightScale::Percent,
            &keys(&["a", "b"]),
            &[("a".to_string(), 30.0), ("b".to_string(), 30.0)]
                .into_iter()
                .collect(),
        );
        engine.renormalize();
        assert!((engine.get("a").unwrap() - 50.0).abs() < 1e-9);
        assert!((engine.get("b").unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn renormalize_leaves_zero_sum_alone() {
        let mut engine = WeightEngine::from_weights(
            WeightScale::Percent,
            &keys(&["a", "b"]),
            &HashMap::new(),
        );
        engine.renormalize();
        assert_eq!(engine.sum(), 0.0);
    }

    #[test]
    fn insert_key_ignores_duplicates() {
        let mut engine = WeightEngine::initialize(WeightScale::Percent, &keys(&["a"]));
        engine.insert_key("a", 10.0);
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.get("a"), Some(100.0));
    }

    #[test]
    fn lock_of_unknown_key_is_ignored() {
        let mut engine = WeightEngine::initialize(WeightScale::Percent, &keys(&["a"]));
        engine.lock("ghost");
        assert!(!engine.is_locked("ghost"));
    }
}
