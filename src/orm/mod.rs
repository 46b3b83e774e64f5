//! sea-orm entities for the tables the counters engine reads and writes.

pub mod comments;
pub mod communities;
pub mod community_managers;
pub mod community_members;
pub mod hidden_posts;
pub mod posts;
pub mod recently_visited_communities;
pub mod saved_comments;
pub mod saved_posts;
pub mod votes;
