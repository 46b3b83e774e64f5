use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "communities")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub author_id: Uuid,
    pub name: String,
    pub created_at: DateTime,
    pub total_posts: i64,
    pub total_members: i64,
    pub total_managers: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::posts::Entity")]
    Posts,
    #[sea_orm(has_many = "super::community_members::Entity")]
    CommunityMembers,
    #[sea_orm(has_many = "super::community_managers::Entity")]
    CommunityManagers,
}

impl Related<super::posts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Posts.def()
    }
}

impl Related<super::community_members::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CommunityMembers.def()
    }
}

impl Related<super::community_managers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CommunityManagers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
