use crate::aggregate::CounterAggregator;
use crate::error::{Error, Record, Result};
use crate::global::Settings;
use crate::model::{self, CommentView, Counter, CounterTarget};
use crate::orm::comments;
use crate::store::{with_retries, Gateway, ReplyCursor};
use futures::stream::{self, Stream, TryStreamExt};
use sea_orm::prelude::Uuid;
use std::sync::Arc;

/// Trims user supplied text and rejects it if nothing is left.
pub(crate) fn validate_content(content: &str, what: &str) -> Result<String> {
    let clean_content = content.trim();

    if clean_content.is_empty() {
        return Err(Error::Validation(format!("{} must contain content.", what)));
    }

    Ok(clean_content.to_owned())
}

/// Direct replies of one comment.
///
/// Every call to `stream` starts over from the oldest reply; nothing is
/// fetched until the stream is polled, and then only one batch at a time.
pub struct Replies<G> {
    gateway: Arc<G>,
    parent_id: Uuid,
    batch_size: u64,
}

impl<G: Gateway + 'static> Replies<G> {
    pub fn parent_id(&self) -> Uuid {
        self.parent_id
    }

    /// Replies ordered by creation time, then id.
    pub fn stream(&self) -> impl Stream<Item = Result<CommentView>> + Send + 'static {
        let gateway = self.gateway.clone();
        let parent_id = self.parent_id;
        let batch_size = self.batch_size.max(1);

        // State is the cursor to resume from; None once the last batch came in short.
        stream::try_unfold(Some(None), move |cursor: Option<Option<ReplyCursor>>| {
            let gateway = gateway.clone();
            async move {
                let after = match cursor {
                    Some(after) => after,
                    None => return Ok(None),
                };
                let batch = gateway.replies_after(parent_id, after, batch_size).await?;
                let next = if (batch.len() as u64) < batch_size {
                    None
                } else {
                    batch
                        .last()
                        .map(|comment| Some((comment.created_at, comment.id)))
                };
                Ok::<_, Error>(Some((batch, next)))
            }
        })
        .map_ok(|batch| {
            stream::iter(
                batch
                    .into_iter()
                    .map(|comment| Ok::<_, Error>(CommentView::from(comment))),
            )
        })
        .try_flatten()
    }

    pub async fn collect_all(&self) -> Result<Vec<CommentView>> {
        self.stream().try_collect().await
    }
}

/// Comments under posts. Keeps `total_comments` in step with inserts.
pub struct CommentTree<G> {
    gateway: Arc<G>,
    aggregator: CounterAggregator<G>,
    settings: Settings,
}

impl<G> Clone for CommentTree<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            aggregator: self.aggregator.clone(),
            settings: self.settings,
        }
    }
}

impl<G: Gateway + 'static> CommentTree<G> {
    pub fn new(gateway: Arc<G>, settings: Settings) -> Self {
        Self {
            aggregator: CounterAggregator::new(gateway.clone()),
            gateway,
            settings,
        }
    }

    /// Adds a comment to `post_id`, optionally as a reply to `parent_id`.
    pub async fn add_comment(
        &self,
        post_id: Uuid,
        author_id: Uuid,
        content: &str,
        parent_id: Option<Uuid>,
    ) -> Result<CommentView> {
        let content = validate_content(content, "Comment")?;

        // A comment never moves between posts.
        if let Some(parent_id) = parent_id {
            let parent = self
                .gateway
                .comment(parent_id)
                .await?
                .ok_or(Error::NotFound(Record::Comment, parent_id))?;
            if parent.post_id != post_id {
                return Err(Error::ParentMismatch { parent_id, post_id });
            }
        }

        let comment = comments::Model {
            id: Uuid::new_v4(),
            post_id,
            author_id,
            parent_id,
            content,
            is_deleted: false,
            created_at: model::now(),
            total_upvotes: 0,
            total_downvotes: 0,
            vote_score: 0,
        };

        let drifted = with_retries(self.settings.conflict_retries, || {
            let comment = comment.clone();
            self.gateway.thread_unit(post_id, move |slot| {
                slot.adjust(Counter::Comments, 1);
                slot.stage(comment);
                Ok(slot.drifted())
            })
        })
        .await?;
        self.aggregator
            .heal_if(drifted, CounterTarget::Post(post_id))
            .await;

        log::debug!("comment {} added to post {}", comment.id, post_id);
        Ok(CommentView::from(comment))
    }

    /// Soft-deletes a comment. The comment keeps its place in the thread and
    /// in `total_comments`; only its content is withheld from readers.
    /// Returns false if it was already deleted.
    pub async fn delete_comment(&self, comment_id: Uuid) -> Result<bool> {
        let deleted = self.gateway.set_comment_deleted(comment_id).await?;
        if deleted {
            log::debug!("comment {} deleted", comment_id);
        }
        Ok(deleted)
    }

    pub async fn comment(&self, comment_id: Uuid) -> Result<CommentView> {
        self.gateway
            .comment(comment_id)
            .await?
            .map(CommentView::from)
            .ok_or(Error::NotFound(Record::Comment, comment_id))
    }

    pub async fn list_replies(&self, comment_id: Uuid) -> Result<Replies<G>> {
        if self.gateway.comment(comment_id).await?.is_none() {
            return Err(Error::NotFound(Record::Comment, comment_id));
        }

        Ok(Replies {
            gateway: self.gateway.clone(),
            parent_id: comment_id,
            batch_size: self.settings.reply_batch_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_content_trims() {
        assert_eq!(
            validate_content("  hello \n", "Comment").ok(),
            Some("hello".to_owned())
        );
    }

    #[test]
    fn test_validate_content_rejects_blank() {
        assert!(matches!(
            validate_content(" \t\n", "Comment"),
            Err(Error::Validation(_))
        ));
    }
}
