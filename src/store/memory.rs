use super::{
    CommunitySlot, Gateway, MembershipSlot, ReplyCursor, ThreadSlot, VisitSlot, VoteSlot,
};
use crate::error::{Error, Record, Result};
use crate::model::{
    Aggregates, CommunityAggregates, CounterTarget, Mark, PostAggregates, Role, VoteTarget,
    VoteTally, VoteType,
};
use crate::orm::{comments, communities, posts, recently_visited_communities};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use dashmap::DashMap;
use sea_orm::prelude::Uuid;
use std::collections::HashMap;

struct CommunityRecord {
    row: communities::Model,
    roles: HashMap<Uuid, Role>,
}

struct PostRecord {
    row: posts::Model,
    votes: HashMap<Uuid, VoteType>,
}

struct CommentRecord {
    row: comments::Model,
    votes: HashMap<Uuid, VoteType>,
}

/// Gateway keeping every table in sharded in-process maps.
///
/// A unit holds the write guard of its target's entry for the whole
/// (await-free) closure, which serializes units per target id. Guards are
/// only ever taken in the order communities, posts, comments.
#[derive(Default)]
pub struct MemoryGateway {
    communities: DashMap<Uuid, CommunityRecord>,
    posts: DashMap<Uuid, PostRecord>,
    comments: DashMap<Uuid, CommentRecord>,
    visits: DashMap<Uuid, Vec<recently_visited_communities::Model>>,
    marks: DashMap<Uuid, HashMap<Mark, NaiveDateTime>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes cached aggregates exactly as given, without looking at the
    /// source rows. Used when restoring a snapshot of the counters.
    pub fn restore_aggregates(&self, target: CounterTarget, aggregates: Aggregates) -> Result<()> {
        match (target, aggregates) {
            (CounterTarget::Post(id), Aggregates::Post(aggregates)) => {
                let mut record = self
                    .posts
                    .get_mut(&id)
                    .ok_or(Error::NotFound(Record::Post, id))?;
                write_post(&mut record.row, aggregates);
            }
            (CounterTarget::Comment(id), Aggregates::Comment(tally)) => {
                let mut record = self
                    .comments
                    .get_mut(&id)
                    .ok_or(Error::NotFound(Record::Comment, id))?;
                write_comment(&mut record.row, tally);
            }
            (CounterTarget::Community(id), Aggregates::Community(aggregates)) => {
                let mut record = self
                    .communities
                    .get_mut(&id)
                    .ok_or(Error::NotFound(Record::Community, id))?;
                write_community(&mut record.row, aggregates);
            }
            (target, aggregates) => {
                return Err(Error::Validation(format!(
                    "{:?} cannot be stored on {}",
                    aggregates, target
                )))
            }
        }
        Ok(())
    }
}

fn write_post(row: &mut posts::Model, aggregates: PostAggregates) {
    row.total_comments = aggregates.comments;
    row.total_upvotes = aggregates.votes.upvotes;
    row.total_downvotes = aggregates.votes.downvotes;
    row.vote_score = aggregates.votes.score();
}

fn write_comment(row: &mut comments::Model, tally: VoteTally) {
    row.total_upvotes = tally.upvotes;
    row.total_downvotes = tally.downvotes;
    row.vote_score = tally.score();
}

fn write_community(row: &mut communities::Model, aggregates: CommunityAggregates) {
    row.total_posts = aggregates.posts;
    row.total_members = aggregates.members;
    row.total_managers = aggregates.managers;
}

fn put_vote(votes: &mut HashMap<Uuid, VoteType>, user_id: Uuid, vote: Option<VoteType>) {
    match vote {
        Some(vote_type) => {
            votes.insert(user_id, vote_type);
        }
        None => {
            votes.remove(&user_id);
        }
    }
}

fn tally_votes(votes: &HashMap<Uuid, VoteType>) -> VoteTally {
    votes
        .values()
        .fold(VoteTally::default(), |mut tally, vote_type| {
            match vote_type {
                VoteType::Upvote => tally.upvotes += 1,
                VoteType::Downvote => tally.downvotes += 1,
            }
            tally
        })
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn insert_community(&self, community: communities::Model) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.communities.entry(community.id) {
            Entry::Occupied(_) => Err(Error::Conflict(format!(
                "community {} already exists",
                community.id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(CommunityRecord {
                    row: community,
                    roles: HashMap::new(),
                });
                Ok(())
            }
        }
    }

    async fn community(&self, id: Uuid) -> Result<Option<communities::Model>> {
        Ok(self.communities.get(&id).map(|record| record.row.clone()))
    }

    async fn post(&self, id: Uuid) -> Result<Option<posts::Model>> {
        Ok(self.posts.get(&id).map(|record| record.row.clone()))
    }

    async fn comment(&self, id: Uuid) -> Result<Option<comments::Model>> {
        Ok(self.comments.get(&id).map(|record| record.row.clone()))
    }

    async fn vote(&self, user_id: Uuid, target: VoteTarget) -> Result<Option<VoteType>> {
        Ok(match target {
            VoteTarget::Post(id) => self
                .posts
                .get(&id)
                .and_then(|record| record.votes.get(&user_id).copied()),
            VoteTarget::Comment(id) => self
                .comments
                .get(&id)
                .and_then(|record| record.votes.get(&user_id).copied()),
        })
    }

    async fn role(&self, user_id: Uuid, community_id: Uuid) -> Result<Role> {
        Ok(self
            .communities
            .get(&community_id)
            .and_then(|record| record.roles.get(&user_id).copied())
            .unwrap_or_default())
    }

    async fn replies_after(
        &self,
        parent_id: Uuid,
        after: Option<ReplyCursor>,
        limit: u64,
    ) -> Result<Vec<comments::Model>> {
        let mut replies: Vec<comments::Model> = self
            .comments
            .iter()
            .filter(|record| record.row.parent_id == Some(parent_id))
            .filter(|record| match after {
                Some(cursor) => (record.row.created_at, record.row.id) > cursor,
                None => true,
            })
            .map(|record| record.row.clone())
            .collect();

        replies.sort_by_key(|comment| (comment.created_at, comment.id));
        replies.truncate(limit as usize);
        Ok(replies)
    }

    async fn visits(&self, user_id: Uuid) -> Result<Vec<recently_visited_communities::Model>> {
        Ok(self
            .visits
            .get(&user_id)
            .map(|visits| visits.clone())
            .unwrap_or_default())
    }

    async fn marks(&self, user_id: Uuid) -> Result<Vec<Mark>> {
        let mut marks: Vec<(Mark, NaiveDateTime)> = self
            .marks
            .get(&user_id)
            .map(|marks| marks.iter().map(|(mark, at)| (*mark, *at)).collect())
            .unwrap_or_default();
        marks.sort_by_key(|(_, at)| *at);
        Ok(marks.into_iter().map(|(mark, _)| mark).collect())
    }

    async fn vote_unit<F, T>(&self, user_id: Uuid, target: VoteTarget, f: F) -> Result<T>
    where
        F: FnOnce(&mut VoteSlot) -> Result<T> + Send,
        T: Send,
    {
        match target {
            VoteTarget::Post(id) => {
                let mut guard = self
                    .posts
                    .get_mut(&id)
                    .ok_or(Error::NotFound(Record::Post, id))?;
                let record = &mut *guard;
                let mut slot = VoteSlot::new(
                    target,
                    VoteTally::from(&record.row),
                    record.votes.get(&user_id).copied(),
                );
                let out = f(&mut slot)?;

                let mut aggregates = PostAggregates::from(&record.row);
                aggregates.votes = slot.tally;
                write_post(&mut record.row, aggregates);
                put_vote(&mut record.votes, user_id, slot.vote);
                Ok(out)
            }
            VoteTarget::Comment(id) => {
                let mut guard = self
                    .comments
                    .get_mut(&id)
                    .ok_or(Error::NotFound(Record::Comment, id))?;
                let record = &mut *guard;
                let mut slot = VoteSlot::new(
                    target,
                    VoteTally::from(&record.row),
                    record.votes.get(&user_id).copied(),
                );
                let out = f(&mut slot)?;

                write_comment(&mut record.row, slot.tally);
                put_vote(&mut record.votes, user_id, slot.vote);
                Ok(out)
            }
        }
    }

    async fn thread_unit<F, T>(&self, post_id: Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&mut ThreadSlot) -> Result<T> + Send,
        T: Send,
    {
        let mut guard = self
            .posts
            .get_mut(&post_id)
            .ok_or(Error::NotFound(Record::Post, post_id))?;
        let mut slot = ThreadSlot::new(post_id, PostAggregates::from(&guard.row));
        let out = f(&mut slot)?;

        if let Some(taken) = slot
            .staged()
            .iter()
            .find(|comment| self.comments.contains_key(&comment.id))
        {
            return Err(Error::Conflict(format!(
                "comment {} already exists",
                taken.id
            )));
        }

        write_post(&mut guard.row, slot.aggregates);
        for comment in slot.take_staged() {
            self.comments.insert(
                comment.id,
                CommentRecord {
                    row: comment,
                    votes: HashMap::new(),
                },
            );
        }
        Ok(out)
    }

    async fn community_unit<F, T>(&self, community_id: Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&mut CommunitySlot) -> Result<T> + Send,
        T: Send,
    {
        let mut guard = self
            .communities
            .get_mut(&community_id)
            .ok_or(Error::NotFound(Record::Community, community_id))?;
        let mut slot = CommunitySlot::new(community_id, CommunityAggregates::from(&guard.row));
        let out = f(&mut slot)?;

        if let Some(taken) = slot
            .staged()
            .iter()
            .find(|post| self.posts.contains_key(&post.id))
        {
            return Err(Error::Conflict(format!("post {} already exists", taken.id)));
        }

        write_community(&mut guard.row, slot.aggregates);
        for post in slot.take_staged() {
            self.posts.insert(
                post.id,
                PostRecord {
                    row: post,
                    votes: HashMap::new(),
                },
            );
        }
        Ok(out)
    }

    async fn membership_unit<F, T>(&self, user_id: Uuid, community_id: Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&mut MembershipSlot) -> Result<T> + Send,
        T: Send,
    {
        let mut guard = self
            .communities
            .get_mut(&community_id)
            .ok_or(Error::NotFound(Record::Community, community_id))?;
        let record = &mut *guard;
        let mut slot = MembershipSlot::new(
            community_id,
            user_id,
            CommunityAggregates::from(&record.row),
            record.roles.get(&user_id).copied().unwrap_or_default(),
        );
        let out = f(&mut slot)?;

        write_community(&mut record.row, slot.aggregates);
        match slot.role {
            Role::None => {
                record.roles.remove(&user_id);
            }
            role => {
                record.roles.insert(user_id, role);
            }
        }
        Ok(out)
    }

    async fn visit_unit<F, T>(&self, user_id: Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&mut VisitSlot) -> Result<T> + Send,
        T: Send,
    {
        let mut visits = self.visits.entry(user_id).or_default();
        let mut slot = VisitSlot::new(user_id, visits.clone());
        let out = f(&mut slot)?;
        *visits = slot.visits;
        Ok(out)
    }

    async fn set_comment_deleted(&self, comment_id: Uuid) -> Result<bool> {
        let mut record = self
            .comments
            .get_mut(&comment_id)
            .ok_or(Error::NotFound(Record::Comment, comment_id))?;
        if record.row.is_deleted {
            return Ok(false);
        }
        record.row.is_deleted = true;
        Ok(true)
    }

    async fn set_mark(&self, user_id: Uuid, mark: Mark, present: bool) -> Result<bool> {
        let mut marks = self.marks.entry(user_id).or_default();
        Ok(if present {
            if marks.contains_key(&mark) {
                false
            } else {
                marks.insert(mark, Utc::now().naive_utc());
                true
            }
        } else {
            marks.remove(&mark).is_some()
        })
    }

    async fn recount(&self, target: CounterTarget) -> Result<(Aggregates, Aggregates)> {
        match target {
            CounterTarget::Post(id) => {
                let mut guard = self
                    .posts
                    .get_mut(&id)
                    .ok_or(Error::NotFound(Record::Post, id))?;
                let stored = PostAggregates::from(&guard.row);
                let recounted = PostAggregates {
                    comments: self
                        .comments
                        .iter()
                        .filter(|record| record.row.post_id == id)
                        .count() as i64,
                    votes: tally_votes(&guard.votes),
                };
                write_post(&mut guard.row, recounted);
                Ok((Aggregates::Post(stored), Aggregates::Post(recounted)))
            }
            CounterTarget::Comment(id) => {
                let mut guard = self
                    .comments
                    .get_mut(&id)
                    .ok_or(Error::NotFound(Record::Comment, id))?;
                let stored = VoteTally::from(&guard.row);
                let recounted = tally_votes(&guard.votes);
                write_comment(&mut guard.row, recounted);
                Ok((Aggregates::Comment(stored), Aggregates::Comment(recounted)))
            }
            CounterTarget::Community(id) => {
                let mut guard = self
                    .communities
                    .get_mut(&id)
                    .ok_or(Error::NotFound(Record::Community, id))?;
                let stored = CommunityAggregates::from(&guard.row);
                let recounted = CommunityAggregates {
                    posts: self
                        .posts
                        .iter()
                        .filter(|record| record.row.community_id == id)
                        .count() as i64,
                    members: guard.roles.values().filter(|role| role.is_member()).count() as i64,
                    managers: guard.roles.values().filter(|role| role.is_manager()).count()
                        as i64,
                };
                write_community(&mut guard.row, recounted);
                Ok((Aggregates::Community(stored), Aggregates::Community(recounted)))
            }
        }
    }
}
