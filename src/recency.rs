use crate::error::{Error, Record, Result};
use crate::global::Settings;
use crate::model;
use crate::orm::recently_visited_communities;
use crate::store::{with_retries, Gateway, VisitSlot};
use chrono::NaiveDateTime;
use sea_orm::prelude::Uuid;
use std::cmp::Reverse;
use std::sync::Arc;

/// Most recent first, ties broken by community id.
fn sort_newest_first(visits: &mut [recently_visited_communities::Model]) {
    visits.sort_by_key(|visit| (Reverse(visit.visited_at), visit.community_id));
}

/// Upserts one visit and evicts everything past `limit`. Returns the
/// communities that fell off the list.
fn touch(
    slot: &mut VisitSlot,
    community_id: Uuid,
    visited_at: NaiveDateTime,
    limit: usize,
) -> Vec<Uuid> {
    let user_id = slot.user_id();
    match slot
        .visits
        .iter_mut()
        .find(|visit| visit.community_id == community_id)
    {
        Some(visit) => visit.visited_at = visited_at,
        None => slot.visits.push(recently_visited_communities::Model {
            user_id,
            community_id,
            visited_at,
        }),
    }

    sort_newest_first(&mut slot.visits);
    slot.visits
        .split_off(limit.min(slot.visits.len()))
        .into_iter()
        .map(|visit| visit.community_id)
        .collect()
}

/// Bounded per-user list of recently visited communities.
pub struct RecencyTracker<G> {
    gateway: Arc<G>,
    settings: Settings,
}

impl<G> Clone for RecencyTracker<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            settings: self.settings,
        }
    }
}

impl<G: Gateway> RecencyTracker<G> {
    pub fn new(gateway: Arc<G>, settings: Settings) -> Self {
        Self { gateway, settings }
    }

    pub async fn record_visit(&self, user_id: Uuid, community_id: Uuid) -> Result<Vec<Uuid>> {
        self.record_visit_at(user_id, community_id, model::now())
            .await
    }

    /// Records a visit at an explicit time. Returns the evicted communities.
    pub async fn record_visit_at(
        &self,
        user_id: Uuid,
        community_id: Uuid,
        visited_at: NaiveDateTime,
    ) -> Result<Vec<Uuid>> {
        if self.gateway.community(community_id).await?.is_none() {
            return Err(Error::NotFound(Record::Community, community_id));
        }

        let limit = self.settings.recent_communities_limit.max(1);
        let evicted = with_retries(self.settings.conflict_retries, || {
            self.gateway.visit_unit(user_id, move |slot| {
                Ok(touch(slot, community_id, visited_at, limit))
            })
        })
        .await?;

        if !evicted.is_empty() {
            log::debug!(
                "evicted {} recent communities of user {}",
                evicted.len(),
                user_id
            );
        }
        Ok(evicted)
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<recently_visited_communities::Model>> {
        let mut visits = self.gateway.visits(user_id).await?;
        sort_newest_first(&mut visits);
        visits.truncate(self.settings.recent_communities_limit.max(1));
        Ok(visits)
    }
}
