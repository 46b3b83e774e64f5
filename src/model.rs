use crate::error::{Error, Result};
use crate::orm::{comments, communities, posts};
use chrono::{NaiveDateTime, SubsecRound, Utc};
use derive_more::Display;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Current UTC time at microsecond precision, the finest a `timestamp`
/// column keeps.
pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(6)
}

/// Direction of a single vote.
/// Compatible with sea_orm enum type.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(8))")]
#[serde(rename_all = "UPPERCASE")]
pub enum VoteType {
    #[sea_orm(string_value = "UPVOTE")]
    Upvote,
    #[sea_orm(string_value = "DOWNVOTE")]
    Downvote,
}

impl VoteType {
    /// The counter a vote of this type is tallied under.
    pub fn counter(self) -> Counter {
        match self {
            VoteType::Upvote => Counter::Upvotes,
            VoteType::Downvote => Counter::Downvotes,
        }
    }
}

/// Vote target as received from a caller, before validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct TargetRef {
    pub post_id: Option<Uuid>,
    pub comment_id: Option<Uuid>,
}

impl TargetRef {
    pub fn post(id: Uuid) -> Self {
        Self {
            post_id: Some(id),
            comment_id: None,
        }
    }

    pub fn comment(id: Uuid) -> Self {
        Self {
            post_id: None,
            comment_id: Some(id),
        }
    }

    /// Exactly one of the two references must be set.
    pub fn resolve(&self) -> Result<VoteTarget> {
        match (self.post_id, self.comment_id) {
            (Some(id), None) => Ok(VoteTarget::Post(id)),
            (None, Some(id)) => Ok(VoteTarget::Comment(id)),
            _ => Err(Error::InvalidTarget),
        }
    }
}

/// A validated vote target.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize)]
pub enum VoteTarget {
    #[display(fmt = "post {}", _0)]
    Post(Uuid),
    #[display(fmt = "comment {}", _0)]
    Comment(Uuid),
}

impl From<VoteTarget> for CounterTarget {
    fn from(target: VoteTarget) -> Self {
        match target {
            VoteTarget::Post(id) => CounterTarget::Post(id),
            VoteTarget::Comment(id) => CounterTarget::Comment(id),
        }
    }
}

/// Any row that carries cached aggregates.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum CounterTarget {
    #[display(fmt = "post {}", _0)]
    Post(Uuid),
    #[display(fmt = "comment {}", _0)]
    Comment(Uuid),
    #[display(fmt = "community {}", _0)]
    Community(Uuid),
}

/// Names of the stored counters. `vote_score` has no entry: it is always
/// derived from the two vote counters.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum Counter {
    #[display(fmt = "total_upvotes")]
    Upvotes,
    #[display(fmt = "total_downvotes")]
    Downvotes,
    #[display(fmt = "total_comments")]
    Comments,
    #[display(fmt = "total_posts")]
    Posts,
    #[display(fmt = "total_members")]
    Members,
    #[display(fmt = "total_managers")]
    Managers,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VoteTally {
    pub upvotes: i64,
    pub downvotes: i64,
}

impl VoteTally {
    pub fn new(upvotes: i64, downvotes: i64) -> Self {
        Self { upvotes, downvotes }
    }

    pub fn score(&self) -> i64 {
        self.upvotes - self.downvotes
    }
}

impl From<&posts::Model> for VoteTally {
    fn from(post: &posts::Model) -> Self {
        Self::new(post.total_upvotes, post.total_downvotes)
    }
}

impl From<&comments::Model> for VoteTally {
    fn from(comment: &comments::Model) -> Self {
        Self::new(comment.total_upvotes, comment.total_downvotes)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PostAggregates {
    pub comments: i64,
    pub votes: VoteTally,
}

impl From<&posts::Model> for PostAggregates {
    fn from(post: &posts::Model) -> Self {
        Self {
            comments: post.total_comments,
            votes: VoteTally::from(post),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CommunityAggregates {
    pub posts: i64,
    pub members: i64,
    pub managers: i64,
}

impl From<&communities::Model> for CommunityAggregates {
    fn from(community: &communities::Model) -> Self {
        Self {
            posts: community.total_posts,
            members: community.total_members,
            managers: community.total_managers,
        }
    }
}

/// Cached aggregates of one target, whatever its kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Aggregates {
    Post(PostAggregates),
    Comment(VoteTally),
    Community(CommunityAggregates),
}

/// A user's standing in one community. Managers are always members.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Role {
    #[default]
    None,
    Member,
    Manager,
}

impl Role {
    /// Rebuilds the role from the two stored edges.
    /// Returns None for a manager edge without its member edge.
    pub fn from_edges(member: bool, manager: bool) -> Option<Self> {
        match (member, manager) {
            (false, false) => Some(Role::None),
            (true, false) => Some(Role::Member),
            (true, true) => Some(Role::Manager),
            (false, true) => None,
        }
    }

    /// (member edge, manager edge)
    pub fn edges(self) -> (bool, bool) {
        match self {
            Role::None => (false, false),
            Role::Member => (true, false),
            Role::Manager => (true, true),
        }
    }

    pub fn is_member(self) -> bool {
        self != Role::None
    }

    pub fn is_manager(self) -> bool {
        self == Role::Manager
    }
}

/// Per-user flags on posts and comments. No aggregates hang off these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Mark {
    SavedPost(Uuid),
    HiddenPost(Uuid),
    SavedComment(Uuid),
}

/// A comment as shown to readers. Soft-deleted comments keep their place in
/// the thread but expose no content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommentView {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub content: Option<String>,
    pub is_deleted: bool,
    pub created_at: chrono::NaiveDateTime,
    pub votes: VoteTally,
    pub vote_score: i64,
}

impl From<comments::Model> for CommentView {
    fn from(comment: comments::Model) -> Self {
        let votes = VoteTally::from(&comment);
        Self {
            id: comment.id,
            post_id: comment.post_id,
            author_id: comment.author_id,
            parent_id: comment.parent_id,
            content: if comment.is_deleted {
                None
            } else {
                Some(comment.content)
            },
            is_deleted: comment.is_deleted,
            created_at: comment.created_at,
            vote_score: votes.score(),
            votes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_ref_requires_exactly_one() {
        let id = Uuid::new_v4();
        assert_eq!(TargetRef::post(id).resolve().ok(), Some(VoteTarget::Post(id)));
        assert_eq!(
            TargetRef::comment(id).resolve().ok(),
            Some(VoteTarget::Comment(id))
        );
        assert!(matches!(
            TargetRef::default().resolve(),
            Err(Error::InvalidTarget)
        ));
        assert!(matches!(
            TargetRef {
                post_id: Some(id),
                comment_id: Some(id),
            }
            .resolve(),
            Err(Error::InvalidTarget)
        ));
    }

    #[test]
    fn test_now_keeps_microseconds() {
        use chrono::Timelike;
        assert_eq!(now().nanosecond() % 1_000, 0);
    }

    #[test]
    fn test_role_edges() {
        for role in [Role::None, Role::Member, Role::Manager] {
            let (member, manager) = role.edges();
            assert_eq!(Role::from_edges(member, manager), Some(role));
        }
        assert_eq!(Role::from_edges(false, true), None);
        assert!(Role::Manager.is_member());
        assert!(!Role::Member.is_manager());
    }
}
