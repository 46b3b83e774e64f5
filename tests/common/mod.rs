#![allow(dead_code)]

use sea_orm::prelude::Uuid;
use tallyho::orm::{communities, posts};
use tallyho::{Forum, MemoryGateway, Settings};

pub fn forum() -> Forum<MemoryGateway> {
    forum_with(Settings::default())
}

pub fn forum_with(settings: Settings) -> Forum<MemoryGateway> {
    Forum::new(MemoryGateway::new(), settings)
}

pub async fn community(forum: &Forum<MemoryGateway>) -> communities::Model {
    forum
        .communities
        .create_community(Uuid::new_v4(), "rust")
        .await
        .expect("community")
}

/// A community with one post in it.
pub async fn post(forum: &Forum<MemoryGateway>) -> posts::Model {
    let community = community(forum).await;
    forum
        .communities
        .publish_post(community.id, Uuid::new_v4(), "Hello", Some("first!"))
        .await
        .expect("post")
}

pub async fn reload_post(forum: &Forum<MemoryGateway>, post_id: Uuid) -> posts::Model {
    forum.communities.post(post_id).await.expect("post")
}

pub async fn reload_community(
    forum: &Forum<MemoryGateway>,
    community_id: Uuid,
) -> communities::Model {
    forum
        .communities
        .community(community_id)
        .await
        .expect("community")
}
