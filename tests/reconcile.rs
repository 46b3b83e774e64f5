mod common;

#[cfg(test)]
mod tests {
    use super::common;
    use sea_orm::prelude::Uuid;
    use tallyho::model::{
        Aggregates, CommunityAggregates, CounterTarget, Mark, PostAggregates, VoteTally,
    };
    use tallyho::{Error, TargetRef, VoteType};

    #[actix_rt::test]
    async fn test_reconcile_repairs_corrupted_post() {
        let forum = common::forum();
        let post = common::post(&forum).await;
        forum
            .comments
            .add_comment(post.id, Uuid::new_v4(), "one", None)
            .await
            .unwrap();
        forum
            .votes
            .cast_vote(Uuid::new_v4(), TargetRef::post(post.id), VoteType::Upvote)
            .await
            .unwrap();

        let corrupted = PostAggregates {
            comments: 9,
            votes: VoteTally::new(4, 7),
        };
        forum
            .gateway()
            .restore_aggregates(CounterTarget::Post(post.id), Aggregates::Post(corrupted))
            .unwrap();
        assert_eq!(common::reload_post(&forum, post.id).await.vote_score, -3);

        let reconciliation = forum
            .aggregator
            .reconcile(CounterTarget::Post(post.id))
            .await
            .unwrap();
        assert!(reconciliation.drifted());
        assert_eq!(reconciliation.stored, Aggregates::Post(corrupted));

        let post = common::reload_post(&forum, post.id).await;
        assert_eq!(post.total_comments, 1);
        assert_eq!((post.total_upvotes, post.total_downvotes), (1, 0));
        assert_eq!(post.vote_score, 1);
    }

    #[actix_rt::test]
    async fn test_clamped_retract_heals() {
        let forum = common::forum();
        let post = common::post(&forum).await;
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let target = TargetRef::post(post.id);
        forum.votes.cast_vote(a, target, VoteType::Upvote).await.unwrap();
        forum.votes.cast_vote(b, target, VoteType::Upvote).await.unwrap();

        // The cache forgot both upvotes.
        forum
            .gateway()
            .restore_aggregates(
                CounterTarget::Post(post.id),
                Aggregates::Post(PostAggregates::default()),
            )
            .unwrap();

        let receipt = forum.votes.retract_vote(a, target).await.unwrap();
        assert_eq!(receipt.tally, VoteTally::new(1, 0));
        let post = common::reload_post(&forum, post.id).await;
        assert_eq!((post.total_upvotes, post.vote_score), (1, 1));
    }

    #[actix_rt::test]
    async fn test_clamped_leave_heals_community() {
        let forum = common::forum();
        let community = common::community(&forum).await;
        let (u, v) = (Uuid::new_v4(), Uuid::new_v4());
        forum.membership.join(u, community.id).await.unwrap();
        forum.membership.join(v, community.id).await.unwrap();

        forum
            .gateway()
            .restore_aggregates(
                CounterTarget::Community(community.id),
                Aggregates::Community(CommunityAggregates::default()),
            )
            .unwrap();

        let receipt = forum.membership.leave(u, community.id).await.unwrap();
        assert_eq!(receipt.aggregates.members, 1);
        assert_eq!(receipt.aggregates.posts, 0);
        let community = common::reload_community(&forum, community.id).await;
        assert_eq!(community.total_members, 1);
    }

    #[actix_rt::test]
    async fn test_restore_rejects_mismatched_kind() {
        let forum = common::forum();
        let post = common::post(&forum).await;
        assert!(matches!(
            forum.gateway().restore_aggregates(
                CounterTarget::Post(post.id),
                Aggregates::Comment(VoteTally::default()),
            ),
            Err(Error::Validation(_))
        ));
    }

    #[actix_rt::test]
    async fn test_bookmarks_do_not_touch_counters() {
        let forum = common::forum();
        let post = common::post(&forum).await;
        let comment = forum
            .comments
            .add_comment(post.id, Uuid::new_v4(), "keep", None)
            .await
            .unwrap();
        let user = Uuid::new_v4();

        assert!(forum.bookmarks.save_post(user, post.id).await.unwrap());
        assert!(!forum.bookmarks.save_post(user, post.id).await.unwrap());
        assert!(forum.bookmarks.hide_post(user, post.id).await.unwrap());
        assert!(forum.bookmarks.save_comment(user, comment.id).await.unwrap());
        assert!(forum.bookmarks.unhide_post(user, post.id).await.unwrap());
        assert!(!forum.bookmarks.unsave_comment(Uuid::new_v4(), comment.id).await.unwrap());

        let marks = forum.bookmarks.marks(user).await.unwrap();
        assert_eq!(marks.len(), 2);
        assert!(marks.contains(&Mark::SavedPost(post.id)));
        assert!(marks.contains(&Mark::SavedComment(comment.id)));
        assert!(matches!(
            forum.bookmarks.save_post(user, Uuid::new_v4()).await,
            Err(Error::NotFound(..))
        ));

        let reloaded = common::reload_post(&forum, post.id).await;
        assert_eq!(reloaded.total_comments, 1);
        assert_eq!(reloaded.vote_score, 0);
    }
}
