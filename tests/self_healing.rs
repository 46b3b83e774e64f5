#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use sea_orm::prelude::Uuid;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tallyho::model::{
        Aggregates, CommunityAggregates, CounterTarget, Mark, PostAggregates, VoteTally,
    };
    use tallyho::orm::{comments, communities, posts, recently_visited_communities};
    use tallyho::store::{
        CommunitySlot, MembershipSlot, ReplyCursor, ThreadSlot, VisitSlot, VoteSlot,
    };
    use tallyho::{
        Error, Forum, Gateway, MemoryGateway, Result, Role, Settings, TargetRef, VoteOutcome,
        VoteTarget, VoteType,
    };

    /// Memory storage whose recount can be switched to fail.
    struct FlakyRecount {
        inner: MemoryGateway,
        failing: AtomicBool,
    }

    #[async_trait]
    impl Gateway for FlakyRecount {
        async fn insert_community(&self, community: communities::Model) -> Result<()> {
            self.inner.insert_community(community).await
        }

        async fn community(&self, id: Uuid) -> Result<Option<communities::Model>> {
            self.inner.community(id).await
        }

        async fn post(&self, id: Uuid) -> Result<Option<posts::Model>> {
            self.inner.post(id).await
        }

        async fn comment(&self, id: Uuid) -> Result<Option<comments::Model>> {
            self.inner.comment(id).await
        }

        async fn vote(&self, user_id: Uuid, target: VoteTarget) -> Result<Option<VoteType>> {
            self.inner.vote(user_id, target).await
        }

        async fn role(&self, user_id: Uuid, community_id: Uuid) -> Result<Role> {
            self.inner.role(user_id, community_id).await
        }

        async fn replies_after(
            &self,
            parent_id: Uuid,
            after: Option<ReplyCursor>,
            limit: u64,
        ) -> Result<Vec<comments::Model>> {
            self.inner.replies_after(parent_id, after, limit).await
        }

        async fn visits(&self, user_id: Uuid) -> Result<Vec<recently_visited_communities::Model>> {
            self.inner.visits(user_id).await
        }

        async fn marks(&self, user_id: Uuid) -> Result<Vec<Mark>> {
            self.inner.marks(user_id).await
        }

        async fn vote_unit<F, T>(&self, user_id: Uuid, target: VoteTarget, f: F) -> Result<T>
        where
            F: FnOnce(&mut VoteSlot) -> Result<T> + Send,
            T: Send,
        {
            self.inner.vote_unit(user_id, target, f).await
        }

        async fn thread_unit<F, T>(&self, post_id: Uuid, f: F) -> Result<T>
        where
            F: FnOnce(&mut ThreadSlot) -> Result<T> + Send,
            T: Send,
        {
            self.inner.thread_unit(post_id, f).await
        }

        async fn community_unit<F, T>(&self, community_id: Uuid, f: F) -> Result<T>
        where
            F: FnOnce(&mut CommunitySlot) -> Result<T> + Send,
            T: Send,
        {
            self.inner.community_unit(community_id, f).await
        }

        async fn membership_unit<F, T>(
            &self,
            user_id: Uuid,
            community_id: Uuid,
            f: F,
        ) -> Result<T>
        where
            F: FnOnce(&mut MembershipSlot) -> Result<T> + Send,
            T: Send,
        {
            self.inner.membership_unit(user_id, community_id, f).await
        }

        async fn visit_unit<F, T>(&self, user_id: Uuid, f: F) -> Result<T>
        where
            F: FnOnce(&mut VisitSlot) -> Result<T> + Send,
            T: Send,
        {
            self.inner.visit_unit(user_id, f).await
        }

        async fn set_comment_deleted(&self, comment_id: Uuid) -> Result<bool> {
            self.inner.set_comment_deleted(comment_id).await
        }

        async fn set_mark(&self, user_id: Uuid, mark: Mark, present: bool) -> Result<bool> {
            self.inner.set_mark(user_id, mark, present).await
        }

        async fn recount(&self, target: CounterTarget) -> Result<(Aggregates, Aggregates)> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Conflict(format!("recount of {} lost a race", target)));
            }
            self.inner.recount(target).await
        }
    }

    fn forum() -> (Forum<FlakyRecount>, Arc<FlakyRecount>) {
        let gateway = Arc::new(FlakyRecount {
            inner: MemoryGateway::new(),
            failing: AtomicBool::new(true),
        });
        (
            Forum::with_gateway(gateway.clone(), Settings::default()),
            gateway,
        )
    }

    #[actix_rt::test]
    async fn test_failed_heal_keeps_committed_retract() {
        let (forum, gateway) = forum();
        let community = forum
            .communities
            .create_community(Uuid::new_v4(), "heal")
            .await
            .unwrap();
        let post = forum
            .communities
            .publish_post(community.id, Uuid::new_v4(), "Title", None)
            .await
            .unwrap();
        let target = TargetRef::post(post.id);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        forum.votes.cast_vote(a, target, VoteType::Upvote).await.unwrap();
        forum.votes.cast_vote(b, target, VoteType::Upvote).await.unwrap();
        gateway
            .inner
            .restore_aggregates(
                CounterTarget::Post(post.id),
                Aggregates::Post(PostAggregates::default()),
            )
            .unwrap();

        // The retract commits even though the follow-up recount fails.
        let receipt = forum.votes.retract_vote(a, target).await.unwrap();
        assert_eq!(receipt.outcome, VoteOutcome::Retracted);
        assert_eq!(receipt.tally, VoteTally::new(0, 0));
        assert_eq!(forum.votes.current_vote(a, target).await.unwrap(), None);

        gateway.failing.store(false, Ordering::SeqCst);
        let reconciliation = forum
            .aggregator
            .reconcile(CounterTarget::Post(post.id))
            .await
            .unwrap();
        assert!(reconciliation.drifted());
        let post = forum.communities.post(post.id).await.unwrap();
        assert_eq!((post.total_upvotes, post.vote_score), (1, 1));
    }

    #[actix_rt::test]
    async fn test_failed_heal_keeps_committed_leave() {
        let (forum, gateway) = forum();
        let community = forum
            .communities
            .create_community(Uuid::new_v4(), "heal")
            .await
            .unwrap();
        let (u, v) = (Uuid::new_v4(), Uuid::new_v4());
        forum.membership.join(u, community.id).await.unwrap();
        forum.membership.join(v, community.id).await.unwrap();
        gateway
            .inner
            .restore_aggregates(
                CounterTarget::Community(community.id),
                Aggregates::Community(CommunityAggregates::default()),
            )
            .unwrap();

        let receipt = forum.membership.leave(u, community.id).await.unwrap();
        assert!(receipt.changed);
        assert_eq!(receipt.role, Role::None);
        assert_eq!(receipt.aggregates.members, 0);
        assert_eq!(
            forum.membership.role(u, community.id).await.unwrap(),
            Role::None
        );
        assert_eq!(
            forum.membership.role(v, community.id).await.unwrap(),
            Role::Member
        );
    }
}
