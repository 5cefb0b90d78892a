//! Server selection among eligible servers.
//!
//! A balancer produces an ordered candidate list: the first entry is the pick,
//! the rest is the failover order tried when opening the pick fails.

use crate::models::{BalanceStrategy, ConnectionMode};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-connection balancing state, one variant per strategy.
#[derive(Debug)]
pub enum LoadBalancer {
    /// Independent cursors so reads and writes each cycle through their own pool.
    RoundRobin {
        read: AtomicUsize,
        write: AtomicUsize,
    },
    Random,
    /// Open-handle counters, parallel to the connection's server list.
    LeastConnections { counters: Vec<AtomicUsize> },
}

impl LoadBalancer {
    pub fn new(strategy: BalanceStrategy, server_count: usize) -> Self {
        match strategy {
            BalanceStrategy::RoundRobin => Self::RoundRobin {
                read: AtomicUsize::new(0),
                write: AtomicUsize::new(0),
            },
            BalanceStrategy::Random => Self::Random,
            BalanceStrategy::LeastConnections => Self::LeastConnections {
                counters: (0..server_count).map(|_| AtomicUsize::new(0)).collect(),
            },
        }
    }

    pub fn strategy(&self) -> BalanceStrategy {
        match self {
            Self::RoundRobin { .. } => BalanceStrategy::RoundRobin,
            Self::Random => BalanceStrategy::Random,
            Self::LeastConnections { .. } => BalanceStrategy::LeastConnections,
        }
    }

    /// Order `eligible` server indices for one selection.
    pub fn candidates(&self, mode: ConnectionMode, eligible: &[usize]) -> Vec<usize> {
        if eligible.is_empty() {
            return Vec::new();
        }
        match self {
            Self::RoundRobin { read, write } => {
                let cursor = match mode {
                    ConnectionMode::Read => read,
                    ConnectionMode::Write => write,
                };
                round_robin_order(cursor.fetch_add(1, Ordering::Relaxed), eligible)
            }
            Self::Random => random_order(&mut rand::thread_rng(), eligible),
            Self::LeastConnections { counters } => {
                let counts: Vec<usize> = counters
                    .iter()
                    .map(|c| c.load(Ordering::Relaxed))
                    .collect();
                least_connections_order(&counts, eligible)
            }
        }
    }

    /// A handle to server `idx` was opened.
    pub fn record_open(&self, idx: usize) {
        if let Self::LeastConnections { counters } = self {
            if let Some(counter) = counters.get(idx) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// A handle to server `idx` was closed.
    pub fn record_close(&self, idx: usize) {
        if let Self::LeastConnections { counters } = self {
            if let Some(counter) = counters.get(idx) {
                // Saturate at zero; a double close must not wrap around.
                let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                    n.checked_sub(1)
                });
            }
        }
    }

    /// Open-handle count for server `idx`, tracked only by least-connections.
    pub fn open_count(&self, idx: usize) -> Option<usize> {
        match self {
            Self::LeastConnections { counters } => {
                counters.get(idx).map(|c| c.load(Ordering::Relaxed))
            }
            _ => None,
        }
    }
}

/// Start at `cursor % len` and wrap around.
pub fn round_robin_order(cursor: usize, eligible: &[usize]) -> Vec<usize> {
    let start = cursor % eligible.len().max(1);
    eligible[start..]
        .iter()
        .chain(&eligible[..start])
        .copied()
        .collect()
}

/// A uniformly random pick, then the others in registration order.
pub fn random_order<R: Rng>(rng: &mut R, eligible: &[usize]) -> Vec<usize> {
    if eligible.is_empty() {
        return Vec::new();
    }
    let pick = rng.gen_range(0..eligible.len());
    let mut order = Vec::with_capacity(eligible.len());
    order.push(eligible[pick]);
    order.extend(
        eligible
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != pick)
            .map(|(_, idx)| *idx),
    );
    order
}

/// Fewest open handles first; ties keep registration order.
pub fn least_connections_order(counts: &[usize], eligible: &[usize]) -> Vec<usize> {
    let mut order = eligible.to_vec();
    order.sort_by_key(|idx| counts.get(*idx).copied().unwrap_or(usize::MAX));
    order
}
