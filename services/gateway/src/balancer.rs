//! Load balancing across an upstream's targets.
//!
//! The balancer is a single-method capability so alternatives can replace
//! the default without touching the registry.

use std::sync::atomic::{AtomicUsize, Ordering};

use osprey_events::Target;
use rand::Rng;

/// Picks the next target for a connection.
pub trait Balancer: Send + Sync {
    fn next(&self, targets: &[Target]) -> Option<Target>;
}

/// Weight-proportional random selection.
///
/// Cumulative-weight sampling: a target is returned with probability
/// `weight / Σ weights`. Zero-weight targets are never returned unless every
/// target has zero weight, in which case selection is uniform.
#[derive(Debug, Default)]
pub struct WeightBalancer;

impl Balancer for WeightBalancer {
    fn next(&self, targets: &[Target]) -> Option<Target> {
        if targets.is_empty() {
            return None;
        }

        let total: f64 = targets.iter().map(|t| t.weight.max(0.0)).sum();
        let mut rng = rand::thread_rng();

        if total <= 0.0 {
            let pick = rng.gen_range(0..targets.len());
            return Some(targets[pick].clone());
        }

        let roll = rng.gen_range(0.0..total);
        let mut acc = 0.0;
        for target in targets {
            acc += target.weight.max(0.0);
            if roll < acc {
                return Some(target.clone());
            }
        }

        // Floating point drift can leave the roll at the upper edge; fall
        // back to the last target with positive weight.
        targets.iter().rev().find(|t| t.weight > 0.0).cloned()
    }
}

/// Round-robin selection, ignoring weights.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl Balancer for RoundRobinBalancer {
    fn next(&self, targets: &[Target]) -> Option<Target> {
        if targets.is_empty() {
            return None;
        }
        let pick = self.counter.fetch_add(1, Ordering::Relaxed) % targets.len();
        Some(targets[pick].clone())
    }
}
