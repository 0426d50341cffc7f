// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use http::Uri;

use super::health::{HealthEvent, InstanceState};
use crate::error::ERR_POISONED_LOCK;
use crate::rnd::Rnd;

/// One backend endpoint and its health bookkeeping.
///
/// Attempts hold on to the instance they were created for, so an instance outlives the
/// registry snapshot that listed it until its last attempt completes.
#[derive(Debug)]
pub(crate) struct Instance {
    endpoint: Uri,
    state: Mutex<InstanceState>,
}

impl Instance {
    pub(crate) fn new(endpoint: Uri) -> Self {
        Self {
            endpoint,
            state: Mutex::new(InstanceState::default()),
        }
    }

    pub(crate) fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, InstanceState> {
        self.state.lock().expect(ERR_POISONED_LOCK)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) instance: Arc<Instance>,
    pub(crate) weight: u32,
}

/// The weighted pool selection draws from.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, Copy)]
struct Rank {
    degraded: bool,
    in_flight: u32,
    weight: u32,
}

impl Rank {
    /// Less loaded first, where load is in-flight attempts per unit of weight.
    fn compare(&self, other: &Self) -> Ordering {
        self.degraded.cmp(&other.degraded).then_with(|| {
            let this = u64::from(self.in_flight) * u64::from(other.weight);
            let that = u64::from(other.in_flight) * u64::from(self.weight);
            this.cmp(&that)
        })
    }

    fn slots(&self) -> usize {
        (self.weight - self.in_flight % self.weight) as usize
    }
}

impl Registry {
    /// Replaces the pool with `endpoints`, where repeated endpoints add weight.
    ///
    /// Instances of endpoints that remain in the pool keep their health.
    pub(crate) fn update(&mut self, endpoints: impl IntoIterator<Item = Uri>) {
        self.update_weighted(endpoints.into_iter().map(|endpoint| (endpoint, 1)));
    }

    /// Replaces the pool with weighted endpoints. Weights of repeated endpoints add up and
    /// endpoints whose total weight is zero are left out.
    pub(crate) fn update_weighted(&mut self, endpoints: impl IntoIterator<Item = (Uri, u32)>) {
        let mut previous: HashMap<Uri, Arc<Instance>> = self
            .entries
            .drain(..)
            .map(|entry| (entry.instance.endpoint().clone(), entry.instance))
            .collect();

        let mut positions: HashMap<Uri, usize> = HashMap::new();
        let mut entries: Vec<Entry> = Vec::new();

        for (endpoint, weight) in endpoints {
            if let Some(&position) = positions.get(&endpoint) {
                entries[position].weight = entries[position].weight.saturating_add(weight);
                continue;
            }

            let instance = previous
                .remove(&endpoint)
                .unwrap_or_else(|| Arc::new(Instance::new(endpoint.clone())));

            positions.insert(endpoint, entries.len());
            entries.push(Entry { instance, weight });
        }

        entries.retain(|entry| entry.weight > 0);
        self.entries = entries;
    }

    pub(crate) fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Picks an instance, avoiding the `visited` endpoints while alternatives exist.
    ///
    /// Returns `None` only when the pool is empty.
    pub(crate) fn select(&self, visited: &mut Vec<Uri>, now: Instant, rnd: &Rnd) -> Option<(Arc<Instance>, Option<HealthEvent>)> {
        if self.entries.is_empty() {
            return None;
        }

        let fresh: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|entry| !visited.contains(entry.instance.endpoint()))
            .collect();

        let filtered = !fresh.is_empty() && fresh.len() < self.entries.len();
        let candidates = if fresh.is_empty() {
            visited.clear();
            self.entries.iter().collect()
        } else {
            fresh
        };

        let (mut chosen, degraded) = pick(&candidates, now, rnd)?;

        // A previously tried healthy instance beats an untried one that is known to be bad.
        if degraded && filtered {
            let all: Vec<&Entry> = self.entries.iter().collect();
            if let Some((entry, _)) = pick(&all, now, rnd) {
                chosen = entry;
            }
        }

        let event = chosen.instance.lock().select();
        Some((Arc::clone(&chosen.instance), event))
    }
}

/// Draws among the best-ranked candidates, weighting each by its free slots.
fn pick<'a>(candidates: &[&'a Entry], now: Instant, rnd: &Rnd) -> Option<(&'a Entry, bool)> {
    let ranked: Vec<(&Entry, Rank)> = candidates
        .iter()
        .map(|&entry| {
            let mut state = entry.instance.lock();
            state.refresh(now);

            let rank = Rank {
                degraded: state.is_degraded(),
                in_flight: state.in_flight,
                weight: entry.weight,
            };
            (entry, rank)
        })
        .collect();

    let best = ranked.iter().map(|(_, rank)| *rank).min_by(Rank::compare)?;
    let best: Vec<&(&Entry, Rank)> = ranked.iter().filter(|(_, rank)| rank.compare(&best).is_eq()).collect();

    let total: usize = best.iter().map(|(_, rank)| rank.slots()).sum();
    let mut slot = rnd.next_index(total);

    for (entry, rank) in &best {
        if slot < rank.slots() {
            return Some((entry, rank.degraded));
        }
        slot -= rank.slots();
    }

    best.last().map(|(entry, rank)| (*entry, rank.degraded))
}
