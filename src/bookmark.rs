use crate::error::{Error, Record, Result};
use crate::model::Mark;
use crate::store::Gateway;
use sea_orm::prelude::Uuid;
use std::sync::Arc;

/// Saved and hidden posts, saved comments. Plain per-user flags; nothing
/// here feeds an aggregate.
pub struct Bookmarks<G> {
    gateway: Arc<G>,
}

impl<G> Clone for Bookmarks<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
        }
    }
}

impl<G: Gateway> Bookmarks<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    pub async fn save_post(&self, user_id: Uuid, post_id: Uuid) -> Result<bool> {
        self.set(user_id, Mark::SavedPost(post_id), true).await
    }

    pub async fn unsave_post(&self, user_id: Uuid, post_id: Uuid) -> Result<bool> {
        self.set(user_id, Mark::SavedPost(post_id), false).await
    }

    pub async fn hide_post(&self, user_id: Uuid, post_id: Uuid) -> Result<bool> {
        self.set(user_id, Mark::HiddenPost(post_id), true).await
    }

    pub async fn unhide_post(&self, user_id: Uuid, post_id: Uuid) -> Result<bool> {
        self.set(user_id, Mark::HiddenPost(post_id), false).await
    }

    pub async fn save_comment(&self, user_id: Uuid, comment_id: Uuid) -> Result<bool> {
        self.set(user_id, Mark::SavedComment(comment_id), true).await
    }

    pub async fn unsave_comment(&self, user_id: Uuid, comment_id: Uuid) -> Result<bool> {
        self.set(user_id, Mark::SavedComment(comment_id), false).await
    }

    /// All of a user's marks, oldest first.
    pub async fn marks(&self, user_id: Uuid) -> Result<Vec<Mark>> {
        self.gateway.marks(user_id).await
    }

    async fn set(&self, user_id: Uuid, mark: Mark, present: bool) -> Result<bool> {
        // Removing a mark on a vanished target is still allowed.
        if present {
            let exists = match mark {
                Mark::SavedPost(id) | Mark::HiddenPost(id) => {
                    self.gateway.post(id).await?.is_some()
                }
                Mark::SavedComment(id) => self.gateway.comment(id).await?.is_some(),
            };
            if !exists {
                return Err(match mark {
                    Mark::SavedPost(id) | Mark::HiddenPost(id) => Error::NotFound(Record::Post, id),
                    Mark::SavedComment(id) => Error::NotFound(Record::Comment, id),
                });
            }
        }

        self.gateway.set_mark(user_id, mark, present).await
    }
}
