use crate::aggregate::CounterAggregator;
use crate::comment::validate_content;
use crate::error::{Error, Record, Result};
use crate::global::Settings;
use crate::model::{self, Counter, CounterTarget};
use crate::orm::{communities, posts};
use crate::store::{with_retries, Gateway};
use sea_orm::prelude::Uuid;
use std::sync::Arc;

/// Communities and the posts published into them.
pub struct CommunityDirectory<G> {
    gateway: Arc<G>,
    aggregator: CounterAggregator<G>,
    settings: Settings,
}

impl<G> Clone for CommunityDirectory<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            aggregator: self.aggregator.clone(),
            settings: self.settings,
        }
    }
}

impl<G: Gateway> CommunityDirectory<G> {
    pub fn new(gateway: Arc<G>, settings: Settings) -> Self {
        Self {
            aggregator: CounterAggregator::new(gateway.clone()),
            gateway,
            settings,
        }
    }

    /// Creates a community with all counters at zero. The author does not
    /// join it implicitly.
    pub async fn create_community(&self, author_id: Uuid, name: &str) -> Result<communities::Model> {
        let community = communities::Model {
            id: Uuid::new_v4(),
            author_id,
            name: validate_content(name, "Community name")?,
            created_at: model::now(),
            total_posts: 0,
            total_members: 0,
            total_managers: 0,
        };

        self.gateway.insert_community(community.clone()).await?;
        log::info!("community {} ({}) created", community.id, community.name);
        Ok(community)
    }

    /// Inserts a post and bumps the community's `total_posts` in one unit.
    pub async fn publish_post(
        &self,
        community_id: Uuid,
        author_id: Uuid,
        title: &str,
        body: Option<&str>,
    ) -> Result<posts::Model> {
        let post = posts::Model {
            id: Uuid::new_v4(),
            community_id,
            author_id,
            title: validate_content(title, "Title")?,
            body: body
                .map(|body| body.trim().to_owned())
                .filter(|body| !body.is_empty()),
            created_at: model::now(),
            total_comments: 0,
            total_upvotes: 0,
            total_downvotes: 0,
            vote_score: 0,
        };

        let drifted = with_retries(self.settings.conflict_retries, || {
            let post = post.clone();
            self.gateway.community_unit(community_id, move |slot| {
                slot.adjust(Counter::Posts, 1);
                slot.stage(post);
                Ok(slot.drifted())
            })
        })
        .await?;
        self.aggregator
            .heal_if(drifted, CounterTarget::Community(community_id))
            .await;

        log::debug!("post {} published in community {}", post.id, community_id);
        Ok(post)
    }

    pub async fn community(&self, community_id: Uuid) -> Result<communities::Model> {
        self.gateway
            .community(community_id)
            .await?
            .ok_or(Error::NotFound(Record::Community, community_id))
    }

    pub async fn post(&self, post_id: Uuid) -> Result<posts::Model> {
        self.gateway
            .post(post_id)
            .await?
            .ok_or(Error::NotFound(Record::Post, post_id))
    }
}
