//! Keeps the denormalized counters of a community forum (posts per
//! community, members, managers, comments and votes) consistent with the
//! rows they summarize, under concurrent writers.

pub mod aggregate;
pub mod bookmark;
pub mod comment;
pub mod community;
pub mod error;
pub mod forum;
pub mod global;
pub mod membership;
pub mod model;
pub mod orm;
pub mod recency;
pub mod store;
pub mod vote;

pub use aggregate::{CounterAggregator, Reconciliation};
pub use error::{Error, ErrorKind, Result};
pub use forum::Forum;
pub use global::Settings;
pub use model::{Role, TargetRef, VoteTarget, VoteTally, VoteType};
pub use store::{Gateway, MemoryGateway, SqlGateway};
pub use vote::{VoteOutcome, VoteReceipt};
