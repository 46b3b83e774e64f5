use super::{
    CommunitySlot, Gateway, MembershipSlot, ReplyCursor, ThreadSlot, VisitSlot, VoteSlot,
};
use crate::error::{Error, Record, Result};
use crate::model::{
    Aggregates, CommunityAggregates, CounterTarget, Mark, PostAggregates, Role, VoteTarget,
    VoteTally, VoteType,
};
use crate::orm::{
    comments, communities, community_managers, community_members, hidden_posts, posts,
    recently_visited_communities, saved_comments, saved_posts, votes,
};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sea_orm::prelude::Uuid;
use sea_orm::sea_query::{Expr, Index};
use sea_orm::{
    entity::*, query::*, Condition, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DatabaseTransaction, DbErr, FromQueryResult, PaginatorTrait, Schema, TransactionTrait,
};
use std::collections::HashSet;
use std::time::Duration;

/// Gateway over a relational database.
///
/// Each unit is one transaction. The target row is locked first with an
/// in-place `UPDATE`, so concurrent units on the same id queue up behind the
/// row lock and every read inside the unit sees committed state. Counters are
/// written back as absolute values computed inside the unit.
#[derive(Clone)]
pub struct SqlGateway {
    db: DatabaseConnection,
}

#[derive(FromQueryResult)]
struct IdOnly {
    id: Uuid,
}

impl SqlGateway {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Opens a pool on `database_url`.
    pub async fn connect(database_url: String) -> Result<Self> {
        let mut opt = ConnectOptions::new(database_url);
        opt.max_connections(100)
            .min_connections(5)
            .connect_timeout(Duration::from_secs(1))
            .idle_timeout(Duration::from_secs(1))
            .sqlx_logging(true);

        Ok(Self::new(Database::connect(opt).await?))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Creates every table and the per-user vote uniqueness indexes on an
    /// empty database.
    pub async fn create_schema(&self) -> Result<()> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);

        let tables = [
            schema.create_table_from_entity(communities::Entity),
            schema.create_table_from_entity(posts::Entity),
            schema.create_table_from_entity(comments::Entity),
            schema.create_table_from_entity(votes::Entity),
            schema.create_table_from_entity(community_members::Entity),
            schema.create_table_from_entity(community_managers::Entity),
            schema.create_table_from_entity(recently_visited_communities::Entity),
            schema.create_table_from_entity(saved_posts::Entity),
            schema.create_table_from_entity(hidden_posts::Entity),
            schema.create_table_from_entity(saved_comments::Entity),
        ];
        for table in tables.iter() {
            self.db.execute(backend.build(table)).await?;
        }

        let indexes = [
            Index::create()
                .name("votes_user_post")
                .table(votes::Entity)
                .col(votes::Column::UserId)
                .col(votes::Column::PostId)
                .unique()
                .to_owned(),
            Index::create()
                .name("votes_user_comment")
                .table(votes::Entity)
                .col(votes::Column::UserId)
                .col(votes::Column::CommentId)
                .unique()
                .to_owned(),
            Index::create()
                .name("comments_parent_created")
                .table(comments::Entity)
                .col(comments::Column::ParentId)
                .col(comments::Column::CreatedAt)
                .to_owned(),
        ];
        for index in indexes.iter() {
            self.db.execute(backend.build(index)).await?;
        }

        Ok(())
    }

    /// Every row that carries cached aggregates.
    pub async fn targets(&self) -> Result<Vec<CounterTarget>> {
        let communities = communities::Entity::find()
            .select_only()
            .column(communities::Column::Id)
            .into_model::<IdOnly>()
            .all(&self.db)
            .await?;
        let posts = posts::Entity::find()
            .select_only()
            .column(posts::Column::Id)
            .into_model::<IdOnly>()
            .all(&self.db)
            .await?;
        let comments = comments::Entity::find()
            .select_only()
            .column(comments::Column::Id)
            .into_model::<IdOnly>()
            .all(&self.db)
            .await?;

        Ok(communities
            .into_iter()
            .map(|row| CounterTarget::Community(row.id))
            .chain(posts.into_iter().map(|row| CounterTarget::Post(row.id)))
            .chain(comments.into_iter().map(|row| CounterTarget::Comment(row.id)))
            .collect())
    }
}

/// Maps unique-key races and serialization failures to a retryable conflict.
fn conflict_or_db(err: DbErr) -> Error {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("unique")
        || lowered.contains("duplicate")
        || lowered.contains("could not serialize")
        || lowered.contains("deadlock")
    {
        Error::Conflict(message)
    } else {
        Error::Database(err)
    }
}

/// A concurrent writer added the same mark first.
fn already_marked(err: DbErr) -> Result<bool> {
    match conflict_or_db(err) {
        Error::Conflict(_) => Ok(false),
        err => Err(err),
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

async fn lock_community(txn: &DatabaseTransaction, id: Uuid) -> Result<communities::Model> {
    communities::Entity::update_many()
        .col_expr(communities::Column::Id, Expr::col(communities::Column::Id).into())
        .filter(communities::Column::Id.eq(id))
        .exec(txn)
        .await
        .map_err(conflict_or_db)?;
    communities::Entity::find_by_id(id)
        .one(txn)
        .await?
        .ok_or(Error::NotFound(Record::Community, id))
}

async fn lock_post(txn: &DatabaseTransaction, id: Uuid) -> Result<posts::Model> {
    posts::Entity::update_many()
        .col_expr(posts::Column::Id, Expr::col(posts::Column::Id).into())
        .filter(posts::Column::Id.eq(id))
        .exec(txn)
        .await
        .map_err(conflict_or_db)?;
    posts::Entity::find_by_id(id)
        .one(txn)
        .await?
        .ok_or(Error::NotFound(Record::Post, id))
}

async fn lock_comment(txn: &DatabaseTransaction, id: Uuid) -> Result<comments::Model> {
    comments::Entity::update_many()
        .col_expr(comments::Column::Id, Expr::col(comments::Column::Id).into())
        .filter(comments::Column::Id.eq(id))
        .exec(txn)
        .await
        .map_err(conflict_or_db)?;
    comments::Entity::find_by_id(id)
        .one(txn)
        .await?
        .ok_or(Error::NotFound(Record::Comment, id))
}

async fn write_post<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
    aggregates: PostAggregates,
) -> Result<()> {
    posts::Entity::update_many()
        .col_expr(posts::Column::TotalComments, Expr::value(aggregates.comments))
        .col_expr(
            posts::Column::TotalUpvotes,
            Expr::value(aggregates.votes.upvotes),
        )
        .col_expr(
            posts::Column::TotalDownvotes,
            Expr::value(aggregates.votes.downvotes),
        )
        .col_expr(posts::Column::VoteScore, Expr::value(aggregates.votes.score()))
        .filter(posts::Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

async fn write_comment<C: ConnectionTrait>(db: &C, id: Uuid, tally: VoteTally) -> Result<()> {
    comments::Entity::update_many()
        .col_expr(comments::Column::TotalUpvotes, Expr::value(tally.upvotes))
        .col_expr(comments::Column::TotalDownvotes, Expr::value(tally.downvotes))
        .col_expr(comments::Column::VoteScore, Expr::value(tally.score()))
        .filter(comments::Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

async fn write_community<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
    aggregates: CommunityAggregates,
) -> Result<()> {
    communities::Entity::update_many()
        .col_expr(communities::Column::TotalPosts, Expr::value(aggregates.posts))
        .col_expr(
            communities::Column::TotalMembers,
            Expr::value(aggregates.members),
        )
        .col_expr(
            communities::Column::TotalManagers,
            Expr::value(aggregates.managers),
        )
        .filter(communities::Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

fn vote_filter(user_id: Uuid, target: VoteTarget) -> Condition {
    let on_target = match target {
        VoteTarget::Post(id) => votes::Column::PostId.eq(id),
        VoteTarget::Comment(id) => votes::Column::CommentId.eq(id),
    };
    Condition::all()
        .add(votes::Column::UserId.eq(user_id))
        .add(on_target)
}

async fn find_vote<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    target: VoteTarget,
) -> Result<Option<votes::Model>> {
    Ok(votes::Entity::find()
        .filter(vote_filter(user_id, target))
        .one(db)
        .await?)
}

async fn count_votes<C: ConnectionTrait>(db: &C, target: VoteTarget) -> Result<VoteTally> {
    let on_target = match target {
        VoteTarget::Post(id) => votes::Column::PostId.eq(id),
        VoteTarget::Comment(id) => votes::Column::CommentId.eq(id),
    };
    let upvotes = votes::Entity::find()
        .filter(on_target.clone())
        .filter(votes::Column::VoteType.eq(VoteType::Upvote))
        .count(db)
        .await?;
    let downvotes = votes::Entity::find()
        .filter(on_target)
        .filter(votes::Column::VoteType.eq(VoteType::Downvote))
        .count(db)
        .await?;
    Ok(VoteTally::new(upvotes as i64, downvotes as i64))
}

/// Brings the stored vote row in line with `after`.
async fn write_vote(
    txn: &DatabaseTransaction,
    user_id: Uuid,
    target: VoteTarget,
    before: Option<votes::Model>,
    after: Option<VoteType>,
) -> Result<()> {
    match (before, after) {
        (None, None) => {}
        (None, Some(vote_type)) => {
            let (post_id, comment_id) = match target {
                VoteTarget::Post(id) => (Some(id), None),
                VoteTarget::Comment(id) => (None, Some(id)),
            };
            votes::Entity::insert(votes::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user_id),
                post_id: Set(post_id),
                comment_id: Set(comment_id),
                vote_type: Set(vote_type),
                created_at: Set(now()),
            })
            .exec(txn)
            .await
            .map_err(conflict_or_db)?;
        }
        (Some(vote), None) => {
            votes::Entity::delete_many()
                .filter(votes::Column::Id.eq(vote.id))
                .exec(txn)
                .await?;
        }
        (Some(vote), Some(vote_type)) => {
            if vote.vote_type != vote_type {
                votes::Entity::update_many()
                    .col_expr(votes::Column::VoteType, Expr::value(vote_type))
                    .filter(votes::Column::Id.eq(vote.id))
                    .exec(txn)
                    .await?;
            }
        }
    }
    Ok(())
}

/// (member edge, manager edge)
async fn find_edges<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    community_id: Uuid,
) -> Result<(bool, bool)> {
    let member = community_members::Entity::find_by_id((community_id, user_id))
        .one(db)
        .await?
        .is_some();
    let manager = community_managers::Entity::find_by_id((community_id, user_id))
        .one(db)
        .await?
        .is_some();
    Ok((member, manager))
}

async fn write_edges(
    txn: &DatabaseTransaction,
    user_id: Uuid,
    community_id: Uuid,
    before: (bool, bool),
    after: (bool, bool),
) -> Result<()> {
    let created_at = now();

    match (before.0, after.0) {
        (false, true) => {
            community_members::Entity::insert(community_members::ActiveModel {
                community_id: Set(community_id),
                user_id: Set(user_id),
                created_at: Set(created_at),
            })
            .exec(txn)
            .await
            .map_err(conflict_or_db)?;
        }
        (true, false) => {
            community_members::Entity::delete_many()
                .filter(community_members::Column::CommunityId.eq(community_id))
                .filter(community_members::Column::UserId.eq(user_id))
                .exec(txn)
                .await?;
        }
        _ => {}
    }

    match (before.1, after.1) {
        (false, true) => {
            community_managers::Entity::insert(community_managers::ActiveModel {
                community_id: Set(community_id),
                user_id: Set(user_id),
                created_at: Set(created_at),
            })
            .exec(txn)
            .await
            .map_err(conflict_or_db)?;
        }
        (true, false) => {
            community_managers::Entity::delete_many()
                .filter(community_managers::Column::CommunityId.eq(community_id))
                .filter(community_managers::Column::UserId.eq(user_id))
                .exec(txn)
                .await?;
        }
        _ => {}
    }

    Ok(())
}

fn new_comment(row: comments::Model) -> comments::ActiveModel {
    comments::ActiveModel {
        id: Set(row.id),
        post_id: Set(row.post_id),
        author_id: Set(row.author_id),
        parent_id: Set(row.parent_id),
        content: Set(row.content),
        is_deleted: Set(row.is_deleted),
        created_at: Set(row.created_at),
        total_upvotes: Set(row.total_upvotes),
        total_downvotes: Set(row.total_downvotes),
        vote_score: Set(row.vote_score),
    }
}

fn new_post(row: posts::Model) -> posts::ActiveModel {
    posts::ActiveModel {
        id: Set(row.id),
        community_id: Set(row.community_id),
        author_id: Set(row.author_id),
        title: Set(row.title),
        body: Set(row.body),
        created_at: Set(row.created_at),
        total_comments: Set(row.total_comments),
        total_upvotes: Set(row.total_upvotes),
        total_downvotes: Set(row.total_downvotes),
        vote_score: Set(row.vote_score),
    }
}

#[async_trait]
impl Gateway for SqlGateway {
    async fn insert_community(&self, community: communities::Model) -> Result<()> {
        communities::Entity::insert(communities::ActiveModel {
            id: Set(community.id),
            author_id: Set(community.author_id),
            name: Set(community.name),
            created_at: Set(community.created_at),
            total_posts: Set(community.total_posts),
            total_members: Set(community.total_members),
            total_managers: Set(community.total_managers),
        })
        .exec(&self.db)
        .await
        .map_err(conflict_or_db)?;
        Ok(())
    }

    async fn community(&self, id: Uuid) -> Result<Option<communities::Model>> {
        Ok(communities::Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn post(&self, id: Uuid) -> Result<Option<posts::Model>> {
        Ok(posts::Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn comment(&self, id: Uuid) -> Result<Option<comments::Model>> {
        Ok(comments::Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn vote(&self, user_id: Uuid, target: VoteTarget) -> Result<Option<VoteType>> {
        Ok(find_vote(&self.db, user_id, target)
            .await?
            .map(|vote| vote.vote_type))
    }

    async fn role(&self, user_id: Uuid, community_id: Uuid) -> Result<Role> {
        let (member, manager) = find_edges(&self.db, user_id, community_id).await?;
        Ok(Role::from_edges(member, manager).unwrap_or_else(|| {
            log::warn!(
                "user {} manages community {} without being a member",
                user_id,
                community_id
            );
            Role::None
        }))
    }

    async fn replies_after(
        &self,
        parent_id: Uuid,
        after: Option<ReplyCursor>,
        limit: u64,
    ) -> Result<Vec<comments::Model>> {
        let mut query = comments::Entity::find().filter(comments::Column::ParentId.eq(parent_id));
        if let Some((created_at, id)) = after {
            query = query.filter(
                Condition::any()
                    .add(comments::Column::CreatedAt.gt(created_at))
                    .add(
                        Condition::all()
                            .add(comments::Column::CreatedAt.eq(created_at))
                            .add(comments::Column::Id.gt(id)),
                    ),
            );
        }

        Ok(query
            .order_by_asc(comments::Column::CreatedAt)
            .order_by_asc(comments::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    async fn visits(&self, user_id: Uuid) -> Result<Vec<recently_visited_communities::Model>> {
        Ok(recently_visited_communities::Entity::find()
            .filter(recently_visited_communities::Column::UserId.eq(user_id))
            .all(&self.db)
            .await?)
    }

    async fn marks(&self, user_id: Uuid) -> Result<Vec<Mark>> {
        let saved_posts = saved_posts::Entity::find()
            .filter(saved_posts::Column::UserId.eq(user_id))
            .all(&self.db)
            .await?;
        let hidden_posts = hidden_posts::Entity::find()
            .filter(hidden_posts::Column::UserId.eq(user_id))
            .all(&self.db)
            .await?;
        let saved_comments = saved_comments::Entity::find()
            .filter(saved_comments::Column::UserId.eq(user_id))
            .all(&self.db)
            .await?;

        let mut marks: Vec<(NaiveDateTime, Mark)> = saved_posts
            .into_iter()
            .map(|row| (row.created_at, Mark::SavedPost(row.post_id)))
            .chain(
                hidden_posts
                    .into_iter()
                    .map(|row| (row.created_at, Mark::HiddenPost(row.post_id))),
            )
            .chain(
                saved_comments
                    .into_iter()
                    .map(|row| (row.created_at, Mark::SavedComment(row.comment_id))),
            )
            .collect();
        marks.sort_by_key(|(at, _)| *at);
        Ok(marks.into_iter().map(|(_, mark)| mark).collect())
    }

    async fn vote_unit<F, T>(&self, user_id: Uuid, target: VoteTarget, f: F) -> Result<T>
    where
        F: FnOnce(&mut VoteSlot) -> Result<T> + Send,
        T: Send,
    {
        let txn = self.db.begin().await?;

        let tally = match target {
            VoteTarget::Post(id) => VoteTally::from(&lock_post(&txn, id).await?),
            VoteTarget::Comment(id) => VoteTally::from(&lock_comment(&txn, id).await?),
        };
        let existing = find_vote(&txn, user_id, target).await?;
        let mut slot = VoteSlot::new(target, tally, existing.as_ref().map(|vote| vote.vote_type));
        let out = f(&mut slot)?;

        write_vote(&txn, user_id, target, existing, slot.vote).await?;
        match target {
            VoteTarget::Post(id) => {
                posts::Entity::update_many()
                    .col_expr(posts::Column::TotalUpvotes, Expr::value(slot.tally.upvotes))
                    .col_expr(
                        posts::Column::TotalDownvotes,
                        Expr::value(slot.tally.downvotes),
                    )
                    .col_expr(posts::Column::VoteScore, Expr::value(slot.tally.score()))
                    .filter(posts::Column::Id.eq(id))
                    .exec(&txn)
                    .await?;
            }
            VoteTarget::Comment(id) => write_comment(&txn, id, slot.tally).await?,
        }

        txn.commit().await.map_err(conflict_or_db)?;
        Ok(out)
    }

    async fn thread_unit<F, T>(&self, post_id: Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&mut ThreadSlot) -> Result<T> + Send,
        T: Send,
    {
        let txn = self.db.begin().await?;

        let post = lock_post(&txn, post_id).await?;
        let mut slot = ThreadSlot::new(post_id, PostAggregates::from(&post));
        let out = f(&mut slot)?;

        for comment in slot.take_staged() {
            comments::Entity::insert(new_comment(comment))
                .exec(&txn)
                .await
                .map_err(conflict_or_db)?;
        }
        write_post(&txn, post_id, slot.aggregates).await?;

        txn.commit().await.map_err(conflict_or_db)?;
        Ok(out)
    }

    async fn community_unit<F, T>(&self, community_id: Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&mut CommunitySlot) -> Result<T> + Send,
        T: Send,
    {
        let txn = self.db.begin().await?;

        let community = lock_community(&txn, community_id).await?;
        let mut slot = CommunitySlot::new(community_id, CommunityAggregates::from(&community));
        let out = f(&mut slot)?;

        for post in slot.take_staged() {
            posts::Entity::insert(new_post(post))
                .exec(&txn)
                .await
                .map_err(conflict_or_db)?;
        }
        write_community(&txn, community_id, slot.aggregates).await?;

        txn.commit().await.map_err(conflict_or_db)?;
        Ok(out)
    }

    async fn membership_unit<F, T>(&self, user_id: Uuid, community_id: Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&mut MembershipSlot) -> Result<T> + Send,
        T: Send,
    {
        let txn = self.db.begin().await?;

        let community = lock_community(&txn, community_id).await?;
        let before = find_edges(&txn, user_id, community_id).await?;
        let role = Role::from_edges(before.0, before.1);
        let mut slot = MembershipSlot::new(
            community_id,
            user_id,
            CommunityAggregates::from(&community),
            role.unwrap_or_default(),
        );
        if role.is_none() {
            // The orphan manager edge is dropped by the edge diff below.
            log::error!(
                "{}",
                Error::InvariantViolation(format!(
                    "user {} manages community {} without being a member",
                    user_id, community_id
                ))
            );
            slot.mark_drifted();
        }
        let out = match f(&mut slot) {
            Ok(out) => out,
            Err(err) => {
                txn.rollback().await?;
                if role.is_none() {
                    // The transition refused, but the orphan edge still goes.
                    let target = CounterTarget::Community(community_id);
                    if let Err(heal) = self.recount(target).await {
                        log::error!(
                            "removing orphan manager edges of community {} failed: {}",
                            community_id,
                            heal
                        );
                    }
                }
                return Err(err);
            }
        };

        write_edges(&txn, user_id, community_id, before, slot.role.edges()).await?;
        write_community(&txn, community_id, slot.aggregates).await?;

        txn.commit().await.map_err(conflict_or_db)?;
        Ok(out)
    }

    async fn visit_unit<F, T>(&self, user_id: Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&mut VisitSlot) -> Result<T> + Send,
        T: Send,
    {
        let txn = self.db.begin().await?;

        // Locks the user's existing entries only. Two first visits to
        // different communities can both commit and leave one entry over the
        // limit; readers truncate and the user's next visit evicts it.
        recently_visited_communities::Entity::update_many()
            .col_expr(
                recently_visited_communities::Column::VisitedAt,
                Expr::col(recently_visited_communities::Column::VisitedAt).into(),
            )
            .filter(recently_visited_communities::Column::UserId.eq(user_id))
            .exec(&txn)
            .await
            .map_err(conflict_or_db)?;
        let before = recently_visited_communities::Entity::find()
            .filter(recently_visited_communities::Column::UserId.eq(user_id))
            .all(&txn)
            .await?;

        let mut slot = VisitSlot::new(user_id, before.clone());
        let out = f(&mut slot)?;

        let kept: HashSet<Uuid> = slot.visits.iter().map(|visit| visit.community_id).collect();
        let evicted: Vec<Uuid> = before
            .iter()
            .map(|visit| visit.community_id)
            .filter(|community_id| !kept.contains(community_id))
            .collect();
        if !evicted.is_empty() {
            recently_visited_communities::Entity::delete_many()
                .filter(recently_visited_communities::Column::UserId.eq(user_id))
                .filter(recently_visited_communities::Column::CommunityId.is_in(evicted))
                .exec(&txn)
                .await?;
        }

        for visit in slot.visits {
            match before
                .iter()
                .find(|old| old.community_id == visit.community_id)
            {
                Some(old) if old.visited_at == visit.visited_at => {}
                Some(_) => {
                    recently_visited_communities::Entity::update_many()
                        .col_expr(
                            recently_visited_communities::Column::VisitedAt,
                            Expr::value(visit.visited_at),
                        )
                        .filter(recently_visited_communities::Column::UserId.eq(user_id))
                        .filter(
                            recently_visited_communities::Column::CommunityId
                                .eq(visit.community_id),
                        )
                        .exec(&txn)
                        .await?;
                }
                None => {
                    recently_visited_communities::Entity::insert(
                        recently_visited_communities::ActiveModel {
                            user_id: Set(user_id),
                            community_id: Set(visit.community_id),
                            visited_at: Set(visit.visited_at),
                        },
                    )
                    .exec(&txn)
                    .await
                    .map_err(conflict_or_db)?;
                }
            }
        }

        txn.commit().await.map_err(conflict_or_db)?;
        Ok(out)
    }

    async fn set_comment_deleted(&self, comment_id: Uuid) -> Result<bool> {
        let res = comments::Entity::update_many()
            .col_expr(comments::Column::IsDeleted, Expr::value(true))
            .filter(comments::Column::Id.eq(comment_id))
            .filter(comments::Column::IsDeleted.eq(false))
            .exec(&self.db)
            .await?;
        if res.rows_affected > 0 {
            return Ok(true);
        }

        match self.comment(comment_id).await? {
            Some(_) => Ok(false),
            None => Err(Error::NotFound(Record::Comment, comment_id)),
        }
    }

    async fn set_mark(&self, user_id: Uuid, mark: Mark, present: bool) -> Result<bool> {
        let created_at = now();

        let changed = match (mark, present) {
            (Mark::SavedPost(post_id), true) => {
                if saved_posts::Entity::find_by_id((user_id, post_id))
                    .one(&self.db)
                    .await?
                    .is_some()
                {
                    return Ok(false);
                }
                saved_posts::Entity::insert(saved_posts::ActiveModel {
                    user_id: Set(user_id),
                    post_id: Set(post_id),
                    created_at: Set(created_at),
                })
                .exec(&self.db)
                .await
                .map(|_| true)
                .or_else(already_marked)?
            }
            (Mark::HiddenPost(post_id), true) => {
                if hidden_posts::Entity::find_by_id((user_id, post_id))
                    .one(&self.db)
                    .await?
                    .is_some()
                {
                    return Ok(false);
                }
                hidden_posts::Entity::insert(hidden_posts::ActiveModel {
                    user_id: Set(user_id),
                    post_id: Set(post_id),
                    created_at: Set(created_at),
                })
                .exec(&self.db)
                .await
                .map(|_| true)
                .or_else(already_marked)?
            }
            (Mark::SavedComment(comment_id), true) => {
                if saved_comments::Entity::find_by_id((user_id, comment_id))
                    .one(&self.db)
                    .await?
                    .is_some()
                {
                    return Ok(false);
                }
                saved_comments::Entity::insert(saved_comments::ActiveModel {
                    user_id: Set(user_id),
                    comment_id: Set(comment_id),
                    created_at: Set(created_at),
                })
                .exec(&self.db)
                .await
                .map(|_| true)
                .or_else(already_marked)?
            }
            (Mark::SavedPost(post_id), false) => {
                saved_posts::Entity::delete_many()
                    .filter(saved_posts::Column::UserId.eq(user_id))
                    .filter(saved_posts::Column::PostId.eq(post_id))
                    .exec(&self.db)
                    .await?
                    .rows_affected
                    > 0
            }
            (Mark::HiddenPost(post_id), false) => {
                hidden_posts::Entity::delete_many()
                    .filter(hidden_posts::Column::UserId.eq(user_id))
                    .filter(hidden_posts::Column::PostId.eq(post_id))
                    .exec(&self.db)
                    .await?
                    .rows_affected
                    > 0
            }
            (Mark::SavedComment(comment_id), false) => {
                saved_comments::Entity::delete_many()
                    .filter(saved_comments::Column::UserId.eq(user_id))
                    .filter(saved_comments::Column::CommentId.eq(comment_id))
                    .exec(&self.db)
                    .await?
                    .rows_affected
                    > 0
            }
        };

        Ok(changed)
    }

    async fn recount(&self, target: CounterTarget) -> Result<(Aggregates, Aggregates)> {
        let txn = self.db.begin().await?;

        let res = match target {
            CounterTarget::Post(id) => {
                let post = lock_post(&txn, id).await?;
                let comments = comments::Entity::find()
                    .filter(comments::Column::PostId.eq(id))
                    .count(&txn)
                    .await?;
                let recounted = PostAggregates {
                    comments: comments as i64,
                    votes: count_votes(&txn, VoteTarget::Post(id)).await?,
                };
                write_post(&txn, id, recounted).await?;
                (
                    Aggregates::Post(PostAggregates::from(&post)),
                    Aggregates::Post(recounted),
                )
            }
            CounterTarget::Comment(id) => {
                let comment = lock_comment(&txn, id).await?;
                let recounted = count_votes(&txn, VoteTarget::Comment(id)).await?;
                write_comment(&txn, id, recounted).await?;
                (
                    Aggregates::Comment(VoteTally::from(&comment)),
                    Aggregates::Comment(recounted),
                )
            }
            CounterTarget::Community(id) => {
                let community = lock_community(&txn, id).await?;

                let members: HashSet<Uuid> = community_members::Entity::find()
                    .filter(community_members::Column::CommunityId.eq(id))
                    .all(&txn)
                    .await?
                    .into_iter()
                    .map(|edge| edge.user_id)
                    .collect();
                let managers: Vec<Uuid> = community_managers::Entity::find()
                    .filter(community_managers::Column::CommunityId.eq(id))
                    .all(&txn)
                    .await?
                    .into_iter()
                    .map(|edge| edge.user_id)
                    .collect();
                let (managers, orphans): (Vec<Uuid>, Vec<Uuid>) = managers
                    .into_iter()
                    .partition(|user_id| members.contains(user_id));
                if !orphans.is_empty() {
                    log::error!(
                        "{}",
                        Error::InvariantViolation(format!(
                            "{} manager(s) of community {} without membership, removing",
                            orphans.len(),
                            id
                        ))
                    );
                    community_managers::Entity::delete_many()
                        .filter(community_managers::Column::CommunityId.eq(id))
                        .filter(community_managers::Column::UserId.is_in(orphans))
                        .exec(&txn)
                        .await?;
                }

                let posts = posts::Entity::find()
                    .filter(posts::Column::CommunityId.eq(id))
                    .count(&txn)
                    .await?;
                let recounted = CommunityAggregates {
                    posts: posts as i64,
                    members: members.len() as i64,
                    managers: managers.len() as i64,
                };
                write_community(&txn, id, recounted).await?;
                (
                    Aggregates::Community(CommunityAggregates::from(&community)),
                    Aggregates::Community(recounted),
                )
            }
        };

        txn.commit().await.map_err(conflict_or_db)?;
        Ok(res)
    }
}
