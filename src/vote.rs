use crate::aggregate::CounterAggregator;
use crate::error::Result;
use crate::global::Settings;
use crate::model::{Aggregates, TargetRef, VoteTarget, VoteTally, VoteType};
use crate::store::{with_retries, Gateway, VoteSlot};
use sea_orm::prelude::Uuid;
use serde::Serialize;
use std::sync::Arc;

/// What a vote operation did to the stored vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum VoteOutcome {
    Created,
    /// Same vote cast again; nothing written.
    Unchanged,
    Flipped,
    Retracted,
    /// Retract with no vote on record; nothing written.
    Absent,
}

impl VoteOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, VoteOutcome::Unchanged | VoteOutcome::Absent)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct VoteReceipt {
    pub target: VoteTarget,
    pub outcome: VoteOutcome,
    /// Counters as committed by this operation.
    pub tally: VoteTally,
}

fn cast(slot: &mut VoteSlot, vote_type: VoteType) -> VoteOutcome {
    match slot.vote {
        None => {
            slot.adjust(vote_type, 1);
            slot.vote = Some(vote_type);
            VoteOutcome::Created
        }
        Some(current) if current == vote_type => VoteOutcome::Unchanged,
        Some(current) => {
            slot.adjust(current, -1);
            slot.adjust(vote_type, 1);
            slot.vote = Some(vote_type);
            VoteOutcome::Flipped
        }
    }
}

fn retract(slot: &mut VoteSlot) -> VoteOutcome {
    match slot.vote.take() {
        Some(current) => {
            slot.adjust(current, -1);
            VoteOutcome::Retracted
        }
        None => VoteOutcome::Absent,
    }
}

/// Records one vote per (user, target) and keeps the target's tallies in step.
pub struct VoteLedger<G> {
    gateway: Arc<G>,
    aggregator: CounterAggregator<G>,
    settings: Settings,
}

impl<G> Clone for VoteLedger<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            aggregator: self.aggregator.clone(),
            settings: self.settings,
        }
    }
}

impl<G: Gateway> VoteLedger<G> {
    pub fn new(gateway: Arc<G>, settings: Settings) -> Self {
        Self {
            aggregator: CounterAggregator::new(gateway.clone()),
            gateway,
            settings,
        }
    }

    pub async fn cast_vote(
        &self,
        user_id: Uuid,
        target: TargetRef,
        vote_type: VoteType,
    ) -> Result<VoteReceipt> {
        let target = target.resolve()?;
        let receipt = self
            .run(user_id, target, move |slot| cast(slot, vote_type))
            .await?;
        log::debug!(
            "user {} cast {:?} on {}: {:?}",
            user_id,
            vote_type,
            target,
            receipt.outcome
        );
        Ok(receipt)
    }

    pub async fn retract_vote(&self, user_id: Uuid, target: TargetRef) -> Result<VoteReceipt> {
        let target = target.resolve()?;
        let receipt = self.run(user_id, target, retract).await?;
        log::debug!(
            "user {} retracted on {}: {:?}",
            user_id,
            target,
            receipt.outcome
        );
        Ok(receipt)
    }

    /// The user's current vote on a target, if any.
    pub async fn current_vote(&self, user_id: Uuid, target: TargetRef) -> Result<Option<VoteType>> {
        self.gateway.vote(user_id, target.resolve()?).await
    }

    async fn run<F>(&self, user_id: Uuid, target: VoteTarget, transition: F) -> Result<VoteReceipt>
    where
        F: Fn(&mut VoteSlot) -> VoteOutcome + Copy + Send,
    {
        let (outcome, mut tally, drifted) =
            with_retries(self.settings.conflict_retries, || {
                self.gateway.vote_unit(user_id, target, move |slot| {
                    let outcome = transition(slot);
                    Ok((outcome, slot.tally, slot.drifted()))
                })
            })
            .await?;

        if let Some(healed) = self.aggregator.heal_if(drifted, target.into()).await {
            match healed.recounted {
                Aggregates::Post(post) => tally = post.votes,
                Aggregates::Comment(comment) => tally = comment,
                Aggregates::Community(_) => {}
            }
        }

        Ok(VoteReceipt {
            target,
            outcome,
            tally,
        })
    }
}
