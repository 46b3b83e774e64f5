mod common;

#[cfg(test)]
mod tests {
    use super::common;
    use futures::StreamExt;
    use sea_orm::prelude::Uuid;
    use tallyho::model::CommentView;
    use tallyho::{Error, ErrorKind, Settings};

    #[actix_rt::test]
    async fn test_add_comment_counts() {
        let forum = common::forum();
        let post = common::post(&forum).await;

        let top = forum
            .comments
            .add_comment(post.id, Uuid::new_v4(), "  first  ", None)
            .await
            .unwrap();
        assert_eq!(top.content.as_deref(), Some("first"));
        forum
            .comments
            .add_comment(post.id, Uuid::new_v4(), "reply", Some(top.id))
            .await
            .unwrap();

        let post = common::reload_post(&forum, post.id).await;
        assert_eq!(post.total_comments, 2);
    }

    #[actix_rt::test]
    async fn test_parent_on_other_post_is_rejected() {
        let forum = common::forum();
        let post = common::post(&forum).await;
        let other = common::post(&forum).await;
        let parent = forum
            .comments
            .add_comment(other.id, Uuid::new_v4(), "elsewhere", None)
            .await
            .unwrap();

        let err = forum
            .comments
            .add_comment(post.id, Uuid::new_v4(), "hi", Some(parent.id))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ParentMismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(common::reload_post(&forum, post.id).await.total_comments, 0);
    }

    #[actix_rt::test]
    async fn test_rejects_missing_parent_and_blank_content() {
        let forum = common::forum();
        let post = common::post(&forum).await;

        assert!(matches!(
            forum
                .comments
                .add_comment(post.id, Uuid::new_v4(), "hi", Some(Uuid::new_v4()))
                .await,
            Err(Error::NotFound(..))
        ));
        assert!(matches!(
            forum
                .comments
                .add_comment(post.id, Uuid::new_v4(), " \n ", None)
                .await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            forum
                .comments
                .add_comment(Uuid::new_v4(), Uuid::new_v4(), "hi", None)
                .await,
            Err(Error::NotFound(..))
        ));
        assert_eq!(common::reload_post(&forum, post.id).await.total_comments, 0);
    }

    #[actix_rt::test]
    async fn test_soft_delete_keeps_slot_and_replies() {
        let forum = common::forum();
        let post = common::post(&forum).await;
        let parent = forum
            .comments
            .add_comment(post.id, Uuid::new_v4(), "parent", None)
            .await
            .unwrap();
        let reply = forum
            .comments
            .add_comment(post.id, Uuid::new_v4(), "child", Some(parent.id))
            .await
            .unwrap();

        assert!(forum.comments.delete_comment(parent.id).await.unwrap());
        assert!(!forum.comments.delete_comment(parent.id).await.unwrap());

        let deleted = forum.comments.comment(parent.id).await.unwrap();
        assert!(deleted.is_deleted);
        assert_eq!(deleted.content, None);
        assert_eq!(common::reload_post(&forum, post.id).await.total_comments, 2);

        let replies = forum
            .comments
            .list_replies(parent.id)
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert_eq!(replies, vec![reply]);

        let reconciliation = forum
            .aggregator
            .reconcile(tallyho::model::CounterTarget::Post(post.id))
            .await
            .unwrap();
        assert!(!reconciliation.drifted());
    }

    #[actix_rt::test]
    async fn test_replies_stream_in_order_across_batches() {
        let forum = common::forum_with(Settings {
            reply_batch_size: 2,
            ..Settings::default()
        });
        let post = common::post(&forum).await;
        let parent = forum
            .comments
            .add_comment(post.id, Uuid::new_v4(), "parent", None)
            .await
            .unwrap();

        let mut expected: Vec<CommentView> = Vec::new();
        for i in 0..5 {
            expected.push(
                forum
                    .comments
                    .add_comment(post.id, Uuid::new_v4(), &format!("reply {}", i), Some(parent.id))
                    .await
                    .unwrap(),
            );
        }
        // A grandchild is not a direct reply.
        forum
            .comments
            .add_comment(post.id, Uuid::new_v4(), "deeper", Some(expected[0].id))
            .await
            .unwrap();
        expected.sort_by_key(|comment| (comment.created_at, comment.id));

        let replies = forum.comments.list_replies(parent.id).await.unwrap();
        let first = replies.collect_all().await.unwrap();
        assert_eq!(first, expected);

        // Restartable: a second pass sees the same replies.
        let second: Vec<CommentView> = replies
            .stream()
            .map(|reply| reply.unwrap())
            .collect()
            .await;
        assert_eq!(second, expected);

        // Lazy: taking a prefix works without draining the rest.
        let prefix: Vec<_> = replies.stream().take(3).collect().await;
        assert_eq!(prefix.len(), 3);
    }

    #[actix_rt::test]
    async fn test_list_replies_of_missing_comment() {
        let forum = common::forum();
        assert!(matches!(
            forum.comments.list_replies(Uuid::new_v4()).await,
            Err(Error::NotFound(..))
        ));
    }

    #[actix_rt::test]
    async fn test_leaf_has_no_replies() {
        let forum = common::forum();
        let post = common::post(&forum).await;
        let leaf = forum
            .comments
            .add_comment(post.id, Uuid::new_v4(), "leaf", None)
            .await
            .unwrap();

        let replies = forum.comments.list_replies(leaf.id).await.unwrap();
        assert_eq!(replies.parent_id(), leaf.id);
        assert!(replies.collect_all().await.unwrap().is_empty());
    }
}
