//! The atomic counter store.
//!
//! Every write that touches a shared target's counters runs as a *unit*: the
//! gateway serializes on the target id, loads a slot, hands it to a
//! synchronous closure and persists whatever the closure left in the slot
//! (rows and counters together) or nothing at all. Business logic lives in
//! the closures, so the serialization strategy is the gateway's business.

pub mod memory;
pub mod sql;

use crate::error::Result;
use crate::model::{
    Aggregates, CommunityAggregates, Counter, CounterTarget, Mark, PostAggregates, Role,
    VoteTarget, VoteTally, VoteType,
};
use crate::orm::{comments, communities, posts, recently_visited_communities};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sea_orm::prelude::Uuid;
use std::future::Future;

pub use memory::MemoryGateway;
pub use sql::SqlGateway;

/// Keyset position inside a reply listing.
pub type ReplyCursor = (NaiveDateTime, Uuid);

/// One user's vote on one target, plus the target's tallies.
#[derive(Clone, Debug)]
pub struct VoteSlot {
    target: VoteTarget,
    pub tally: VoteTally,
    pub vote: Option<VoteType>,
    drifted: bool,
}

impl VoteSlot {
    pub fn new(target: VoteTarget, tally: VoteTally, vote: Option<VoteType>) -> Self {
        Self {
            target,
            tally,
            vote,
            drifted: false,
        }
    }

    pub fn target(&self) -> VoteTarget {
        self.target
    }

    pub fn adjust(&mut self, vote_type: VoteType, delta: i64) {
        self.drifted |= self
            .tally
            .apply(self.target.into(), vote_type.counter(), delta);
    }

    pub fn drifted(&self) -> bool {
        self.drifted
    }
}

/// A post's comment count and any comments to attach to it.
#[derive(Clone, Debug)]
pub struct ThreadSlot {
    post_id: Uuid,
    pub aggregates: PostAggregates,
    staged: Vec<comments::Model>,
    drifted: bool,
}

impl ThreadSlot {
    pub fn new(post_id: Uuid, aggregates: PostAggregates) -> Self {
        Self {
            post_id,
            aggregates,
            staged: Vec::new(),
            drifted: false,
        }
    }

    pub fn post_id(&self) -> Uuid {
        self.post_id
    }

    pub fn adjust(&mut self, counter: Counter, delta: i64) {
        self.drifted |= self
            .aggregates
            .apply(CounterTarget::Post(self.post_id), counter, delta);
    }

    /// Queues a comment row to be inserted when the unit commits.
    pub fn stage(&mut self, comment: comments::Model) {
        self.staged.push(comment);
    }

    pub fn staged(&self) -> &[comments::Model] {
        &self.staged
    }

    pub(crate) fn take_staged(&mut self) -> Vec<comments::Model> {
        std::mem::take(&mut self.staged)
    }

    pub fn drifted(&self) -> bool {
        self.drifted
    }
}

/// A community's aggregates and any posts to publish into it.
#[derive(Clone, Debug)]
pub struct CommunitySlot {
    community_id: Uuid,
    pub aggregates: CommunityAggregates,
    staged: Vec<posts::Model>,
    drifted: bool,
}

impl CommunitySlot {
    pub fn new(community_id: Uuid, aggregates: CommunityAggregates) -> Self {
        Self {
            community_id,
            aggregates,
            staged: Vec::new(),
            drifted: false,
        }
    }

    pub fn community_id(&self) -> Uuid {
        self.community_id
    }

    pub fn adjust(&mut self, counter: Counter, delta: i64) {
        self.drifted |=
            self.aggregates
                .apply(CounterTarget::Community(self.community_id), counter, delta);
    }

    /// Queues a post row to be inserted when the unit commits.
    pub fn stage(&mut self, post: posts::Model) {
        self.staged.push(post);
    }

    pub fn staged(&self) -> &[posts::Model] {
        &self.staged
    }

    pub(crate) fn take_staged(&mut self) -> Vec<posts::Model> {
        std::mem::take(&mut self.staged)
    }

    pub fn drifted(&self) -> bool {
        self.drifted
    }
}

/// One user's role in one community, plus the community's aggregates.
#[derive(Clone, Debug)]
pub struct MembershipSlot {
    community_id: Uuid,
    user_id: Uuid,
    pub aggregates: CommunityAggregates,
    pub role: Role,
    drifted: bool,
}

impl MembershipSlot {
    pub fn new(
        community_id: Uuid,
        user_id: Uuid,
        aggregates: CommunityAggregates,
        role: Role,
    ) -> Self {
        Self {
            community_id,
            user_id,
            aggregates,
            role,
            drifted: false,
        }
    }

    pub fn community_id(&self) -> Uuid {
        self.community_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn adjust(&mut self, counter: Counter, delta: i64) {
        self.drifted |=
            self.aggregates
                .apply(CounterTarget::Community(self.community_id), counter, delta);
    }

    /// Gateways call this when the stored edges were already inconsistent.
    pub fn mark_drifted(&mut self) {
        self.drifted = true;
    }

    pub fn drifted(&self) -> bool {
        self.drifted
    }
}

/// A user's recently visited communities.
#[derive(Clone, Debug)]
pub struct VisitSlot {
    user_id: Uuid,
    pub visits: Vec<recently_visited_communities::Model>,
}

impl VisitSlot {
    pub fn new(user_id: Uuid, visits: Vec<recently_visited_communities::Model>) -> Self {
        Self { user_id, visits }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }
}

/// Storage consumed by every component. Implementations decide how units
/// are serialized per target id; callers only see all-or-nothing units.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn insert_community(&self, community: communities::Model) -> Result<()>;

    async fn community(&self, id: Uuid) -> Result<Option<communities::Model>>;

    async fn post(&self, id: Uuid) -> Result<Option<posts::Model>>;

    async fn comment(&self, id: Uuid) -> Result<Option<comments::Model>>;

    async fn vote(&self, user_id: Uuid, target: VoteTarget) -> Result<Option<VoteType>>;

    async fn role(&self, user_id: Uuid, community_id: Uuid) -> Result<Role>;

    /// Direct children of `parent_id` strictly after `after`, ordered by
    /// `(created_at, id)`.
    async fn replies_after(
        &self,
        parent_id: Uuid,
        after: Option<ReplyCursor>,
        limit: u64,
    ) -> Result<Vec<comments::Model>>;

    async fn visits(&self, user_id: Uuid) -> Result<Vec<recently_visited_communities::Model>>;

    async fn marks(&self, user_id: Uuid) -> Result<Vec<Mark>>;

    async fn vote_unit<F, T>(&self, user_id: Uuid, target: VoteTarget, f: F) -> Result<T>
    where
        F: FnOnce(&mut VoteSlot) -> Result<T> + Send,
        T: Send;

    async fn thread_unit<F, T>(&self, post_id: Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&mut ThreadSlot) -> Result<T> + Send,
        T: Send;

    async fn community_unit<F, T>(&self, community_id: Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&mut CommunitySlot) -> Result<T> + Send,
        T: Send;

    async fn membership_unit<F, T>(&self, user_id: Uuid, community_id: Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&mut MembershipSlot) -> Result<T> + Send,
        T: Send;

    async fn visit_unit<F, T>(&self, user_id: Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&mut VisitSlot) -> Result<T> + Send,
        T: Send;

    /// Sets `is_deleted`. Returns false if it was already set.
    async fn set_comment_deleted(&self, comment_id: Uuid) -> Result<bool>;

    /// Adds or removes a mark. Returns whether anything changed.
    async fn set_mark(&self, user_id: Uuid, mark: Mark, present: bool) -> Result<bool>;

    /// Recounts a target from its source rows inside its unit and writes the
    /// result back. Returns (cached before, recounted).
    async fn recount(&self, target: CounterTarget) -> Result<(Aggregates, Aggregates)>;
}

/// Runs `op` again while it fails with a conflict, up to `attempts` times.
/// Only idempotent units may be wrapped.
pub async fn with_retries<F, Fut, T>(attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_conflict() && attempt < attempts => {
                log::debug!("retrying after conflict ({}/{}): {}", attempt, attempts, err);
                attempt += 1;
            }
            res => return res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::cell::Cell;

    #[actix_rt::test]
    async fn test_with_retries_absorbs_conflicts() {
        let calls = Cell::new(0);
        let res = with_retries(3, || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Err(Error::Conflict("race".to_owned()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(res.ok(), Some(3));
    }

    #[actix_rt::test]
    async fn test_with_retries_gives_up() {
        let calls = Cell::new(0);
        let res: Result<()> = with_retries(2, || {
            calls.set(calls.get() + 1);
            async { Err(Error::Conflict("race".to_owned())) }
        })
        .await;
        assert!(matches!(res, Err(Error::Conflict(_))));
        assert_eq!(calls.get(), 2);
    }

    #[actix_rt::test]
    async fn test_with_retries_passes_other_errors() {
        let calls = Cell::new(0);
        let res: Result<()> = with_retries(5, || {
            calls.set(calls.get() + 1);
            async { Err(Error::InvalidTarget) }
        })
        .await;
        assert!(matches!(res, Err(Error::InvalidTarget)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_vote_slot_flags_clamp() {
        let mut slot = VoteSlot::new(VoteTarget::Post(Uuid::nil()), VoteTally::default(), None);
        slot.adjust(VoteType::Downvote, -1);
        assert!(slot.drifted());
        assert_eq!(slot.tally, VoteTally::default());
    }
}
