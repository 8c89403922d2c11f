//! Load balancing across instances of a provider capability.
//!
//! A [`LoadBalancer`] picks one instance id out of a candidate set according
//! to a [`Strategy`], after [`LoadBalancer::healthy_candidates`] has already
//! excluded instances whose circuit is open or whose rolling success rate
//! has dropped them to [`HealthStatus::Unhealthy`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;

/// Instance health derived from its rolling success rate over the last
/// [`ROLLING_WINDOW`] calls: `Healthy` at or above 95%, `Degraded` below
/// 80%, `Unhealthy` below that (or circuit open, tracked separately).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Rolling success rate >= 95%.
    Healthy,
    /// Rolling success rate in `[80%, 95%)`.
    Degraded,
    /// Rolling success rate < 80%.
    Unhealthy,
}

/// Number of most-recent calls a rolling success rate is computed over.
pub const ROLLING_WINDOW: usize = 50;

/// Load balancing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Cycle through candidates in order.
    RoundRobin,
    /// Pick the candidate with the fewest in-flight requests, tie-broken by
    /// lowest latency EMA.
    LeastConnections,
    /// Draw by cumulative integer weight.
    Weighted,
    /// Deterministic hash of a request key modulo candidate count.
    Hash,
    /// Uniform random pick.
    Random,
}

/// Per-instance load/latency bookkeeping feeding [`LoadBalancer`] decisions.
pub struct InstanceStats {
    /// Stable weight used by [`Strategy::Weighted`]; never zero.
    pub weight: u32,
    in_flight: AtomicU64,
    /// Exponential moving average of call latency, in microseconds.
    latency_ema_micros: AtomicU64,
    rolling: RwLock<Vec<bool>>,
    circuit_open: std::sync::atomic::AtomicBool,
    last_used_epoch_ms: AtomicU64,
}

impl InstanceStats {
    /// Build fresh stats for a newly registered instance.
    #[must_use]
    pub fn new(weight: u32) -> Self {
        Self {
            weight: weight.max(1),
            in_flight: AtomicU64::new(0),
            latency_ema_micros: AtomicU64::new(0),
            rolling: RwLock::new(Vec::with_capacity(ROLLING_WINDOW)),
            circuit_open: std::sync::atomic::AtomicBool::new(false),
            last_used_epoch_ms: AtomicU64::new(0),
        }
    }

    /// Epoch-millisecond timestamp of the last [`Self::start`] call, or `0`
    /// if the instance has never been dispatched to.
    #[must_use]
    pub fn last_used_epoch_ms(&self) -> u64 {
        self.last_used_epoch_ms.load(Ordering::Relaxed)
    }

    /// Mark the instance's circuit breaker state, as observed by the registry.
    pub fn set_circuit_open(&self, open: bool) {
        self.circuit_open.store(open, Ordering::Relaxed);
    }

    fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    fn latency_ema(&self) -> Duration {
        Duration::from_micros(self.latency_ema_micros.load(Ordering::Relaxed))
    }

    /// Call immediately before dispatch; pair with [`Self::finish`].
    pub fn start(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        #[allow(clippy::cast_possible_truncation)]
        let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
        self.last_used_epoch_ms.store(now, Ordering::Relaxed);
    }

    /// Record the outcome and latency of a completed call, updating the
    /// latency EMA (alpha = 0.2) and the rolling success-rate window.
    pub fn finish(&self, success: bool, latency: Duration) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        let sample = latency.as_micros().min(u128::from(u64::MAX)) as u64;
        self.latency_ema_micros
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| {
                Some(if prev == 0 { sample } else { (prev * 4 + sample) / 5 })
            })
            .ok();

        let mut window = self.rolling.write();
        if window.len() >= ROLLING_WINDOW {
            window.remove(0);
        }
        window.push(success);
    }

    /// Derive [`HealthStatus`] from the rolling success-rate window. An
    /// empty window (no calls yet) is `Healthy`.
    #[must_use]
    pub fn health(&self) -> HealthStatus {
        let window = self.rolling.read();
        if window.is_empty() {
            return HealthStatus::Healthy;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = window.iter().filter(|s| **s).count() as f64 / window.len() as f64;
        if rate >= 0.95 {
            HealthStatus::Healthy
        } else if rate >= 0.80 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }

    fn is_admissible(&self) -> bool {
        !self.circuit_open.load(Ordering::Relaxed) && self.health() != HealthStatus::Unhealthy
    }
}

/// Picks a candidate instance id according to a [`Strategy`].
///
/// Grounded in the round-robin `Mutex<usize>` counter pattern used by
/// request routers elsewhere in the corpus, extended here to the other
/// four strategies the gateway needs.
pub struct LoadBalancer {
    strategy: Strategy,
    round_robin_index: std::sync::atomic::AtomicUsize,
}

impl LoadBalancer {
    /// Build a balancer using the given strategy.
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            round_robin_index: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Filter `candidates` down to those admissible for dispatch: circuit
    /// not open, and rolling health not `Unhealthy`.
    #[must_use]
    pub fn healthy_candidates<'a>(&self, candidates: &[(&'a str, &'a InstanceStats)]) -> Vec<&'a str> {
        candidates
            .iter()
            .filter(|(_, stats)| stats.is_admissible())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Pick one instance id out of `candidates` (already health-filtered).
    /// `hash_key` is consulted only by [`Strategy::Hash`].
    /// `stats_of` resolves an id to its [`InstanceStats`] for strategies
    /// that need latency/weight.
    pub fn pick<'a>(
        &self,
        candidates: &[&'a str],
        hash_key: Option<&str>,
        stats_of: impl Fn(&str) -> &'a InstanceStats,
    ) -> Option<&'a str> {
        if candidates.is_empty() {
            return None;
        }
        if candidates.len() == 1 {
            return Some(candidates[0]);
        }

        match self.strategy {
            Strategy::RoundRobin => {
                let idx = self.round_robin_index.fetch_add(1, Ordering::Relaxed) % candidates.len();
                Some(candidates[idx])
            }
            Strategy::Random => {
                let idx = rand::rng().random_range(0..candidates.len());
                Some(candidates[idx])
            }
            Strategy::Hash => {
                let key = hash_key.unwrap_or("");
                let hash = fnv1a(key.as_bytes());
                let idx = (hash as usize) % candidates.len();
                Some(candidates[idx])
            }
            Strategy::LeastConnections => candidates
                .iter()
                .min_by(|a, b| {
                    let sa = stats_of(a);
                    let sb = stats_of(b);
                    sa.in_flight()
                        .cmp(&sb.in_flight())
                        .then_with(|| sa.latency_ema().cmp(&sb.latency_ema()))
                })
                .copied(),
            Strategy::Weighted => {
                let total: u32 = candidates.iter().map(|id| stats_of(id).weight).sum();
                if total == 0 {
                    return Some(candidates[0]);
                }
                let mut draw = rand::rng().random_range(0..total);
                for id in candidates {
                    let w = stats_of(id).weight;
                    if draw < w {
                        return Some(id);
                    }
                    draw -= w;
                }
                candidates.last().copied()
            }
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles_through_all_candidates() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        let stats = InstanceStats::new(1);
        let candidates = ["a", "b", "c"];
        let picks: Vec<&str> = (0..6)
            .map(|_| lb.pick(&candidates, None, |_| &stats).unwrap())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn hash_strategy_is_deterministic_for_same_key() {
        let lb = LoadBalancer::new(Strategy::Hash);
        let stats = InstanceStats::new(1);
        let candidates = ["a", "b", "c"];
        let first = lb.pick(&candidates, Some("tenant-42"), |_| &stats).unwrap();
        let second = lb.pick(&candidates, Some("tenant-42"), |_| &stats).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn least_connections_prefers_idle_instance() {
        let lb = LoadBalancer::new(Strategy::LeastConnections);
        let busy = InstanceStats::new(1);
        let idle = InstanceStats::new(1);
        busy.start();
        busy.start();
        idle.start();
        let candidates = ["busy", "idle"];
        let stats_of = |id: &str| if id == "busy" { &busy } else { &idle };
        assert_eq!(lb.pick(&candidates, None, stats_of), Some("idle"));
    }

    #[test]
    fn weighted_never_picks_zero_weight_when_another_has_weight() {
        let lb = LoadBalancer::new(Strategy::Weighted);
        let heavy = InstanceStats::new(100);
        let light = InstanceStats::new(0);
        let candidates = ["heavy", "light"];
        let stats_of = |id: &str| if id == "heavy" { &heavy } else { &light };
        for _ in 0..20 {
            assert_eq!(lb.pick(&candidates, None, stats_of), Some("heavy"));
        }
    }

    #[test]
    fn single_candidate_short_circuits_strategy() {
        let lb = LoadBalancer::new(Strategy::Random);
        let stats = InstanceStats::new(1);
        assert_eq!(lb.pick(&["only"], None, |_| &stats), Some("only"));
    }

    #[test]
    fn empty_candidates_yields_none() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        let stats = InstanceStats::new(1);
        assert_eq!(lb.pick(&[], None, |_| &stats), None);
    }

    #[test]
    fn healthy_candidates_excludes_open_circuit() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        let open = InstanceStats::new(1);
        open.set_circuit_open(true);
        let closed = InstanceStats::new(1);
        let candidates = [("open", &open), ("closed", &closed)];
        assert_eq!(lb.healthy_candidates(&candidates), vec!["closed"]);
    }

    #[test]
    fn instance_health_degrades_below_95_percent_success() {
        let stats = InstanceStats::new(1);
        for i in 0..50 {
            stats.finish(i >= 5, Duration::from_millis(1)); // 45/50 = 90%
        }
        assert_eq!(stats.health(), HealthStatus::Degraded);
    }

    #[test]
    fn instance_health_unhealthy_below_80_percent_success() {
        let stats = InstanceStats::new(1);
        for i in 0..50 {
            stats.finish(i >= 25, Duration::from_millis(1)); // 50%
        }
        assert_eq!(stats.health(), HealthStatus::Unhealthy);
        assert!(!stats.is_admissible());
    }

    #[test]
    fn instance_health_defaults_healthy_with_no_samples() {
        let stats = InstanceStats::new(1);
        assert_eq!(stats.health(), HealthStatus::Healthy);
    }
}
