use crate::error::Result;
use crate::model::{
    Aggregates, CommunityAggregates, Counter, CounterTarget, PostAggregates, VoteTally,
};
use crate::store::Gateway;
use std::sync::Arc;

/// Adds `delta` to a stored counter without letting it go below zero.
///
/// Returns true if the result had to be clamped. A clamp means the cached
/// value already disagreed with its source rows, so it is always logged and
/// the caller is expected to reconcile the target afterwards.
pub fn apply_delta(target: CounterTarget, counter: Counter, value: &mut i64, delta: i64) -> bool {
    let next = value.saturating_add(delta);
    if next < 0 {
        log::warn!(
            "{} {} would become {} ({} {:+}); clamped to 0, counters may be inconsistent",
            target,
            counter,
            next,
            value,
            delta
        );
        *value = 0;
        true
    } else {
        *value = next;
        false
    }
}

fn misrouted(target: CounterTarget, counter: Counter) -> bool {
    log::error!("{} has no {} counter", target, counter);
    true
}

impl VoteTally {
    pub(crate) fn apply(&mut self, target: CounterTarget, counter: Counter, delta: i64) -> bool {
        match counter {
            Counter::Upvotes => apply_delta(target, counter, &mut self.upvotes, delta),
            Counter::Downvotes => apply_delta(target, counter, &mut self.downvotes, delta),
            _ => misrouted(target, counter),
        }
    }
}

impl PostAggregates {
    pub(crate) fn apply(&mut self, target: CounterTarget, counter: Counter, delta: i64) -> bool {
        match counter {
            Counter::Comments => apply_delta(target, counter, &mut self.comments, delta),
            _ => self.votes.apply(target, counter, delta),
        }
    }
}

impl CommunityAggregates {
    pub(crate) fn apply(&mut self, target: CounterTarget, counter: Counter, delta: i64) -> bool {
        match counter {
            Counter::Posts => apply_delta(target, counter, &mut self.posts, delta),
            Counter::Members => apply_delta(target, counter, &mut self.members, delta),
            Counter::Managers => apply_delta(target, counter, &mut self.managers, delta),
            _ => misrouted(target, counter),
        }
    }
}

/// Result of recomputing one target's aggregates from its source rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    pub target: CounterTarget,
    /// What the cache held before.
    pub stored: Aggregates,
    /// What the source rows say, now written back.
    pub recounted: Aggregates,
}

impl Reconciliation {
    pub fn drifted(&self) -> bool {
        self.stored != self.recounted
    }
}

/// Single writer of cached aggregates outside of the units themselves.
pub struct CounterAggregator<G> {
    gateway: Arc<G>,
}

impl<G> Clone for CounterAggregator<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
        }
    }
}

impl<G: Gateway> CounterAggregator<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// Recounts a target from source rows and overwrites its cached values.
    pub async fn reconcile(&self, target: CounterTarget) -> Result<Reconciliation> {
        let (stored, recounted) = self.gateway.recount(target).await?;
        let reconciliation = Reconciliation {
            target,
            stored,
            recounted,
        };

        if reconciliation.drifted() {
            log::warn!(
                "reconciled {}: cached {:?}, recounted {:?}",
                target,
                stored,
                recounted
            );
        } else {
            log::debug!("reconciled {}: no drift", target);
        }

        Ok(reconciliation)
    }

    /// Follows a unit that clamped a counter or repaired an edge.
    ///
    /// The unit has already committed, so a failed recount is logged and
    /// left for the next reconcile run instead of failing the write.
    pub(crate) async fn heal_if(
        &self,
        drifted: bool,
        target: CounterTarget,
    ) -> Option<Reconciliation> {
        if !drifted {
            return None;
        }
        log::warn!("self-healing {} after inconsistent counter state", target);
        match self.reconcile(target).await {
            Ok(reconciliation) => Some(reconciliation),
            Err(err) => {
                log::error!("self-healing {} failed: {}", target, err);
                None
            }
        }
    }
}
