use crate::aggregate::CounterAggregator;
use crate::bookmark::Bookmarks;
use crate::comment::CommentTree;
use crate::community::CommunityDirectory;
use crate::global::Settings;
use crate::membership::MembershipRegistry;
use crate::recency::RecencyTracker;
use crate::store::Gateway;
use crate::vote::VoteLedger;
use std::sync::Arc;

/// Every component wired to one gateway. Cheap to clone; an API layer
/// can hand it to each worker as app data.
pub struct Forum<G> {
    pub communities: CommunityDirectory<G>,
    pub votes: VoteLedger<G>,
    pub comments: CommentTree<G>,
    pub membership: MembershipRegistry<G>,
    pub recency: RecencyTracker<G>,
    pub bookmarks: Bookmarks<G>,
    pub aggregator: CounterAggregator<G>,
    gateway: Arc<G>,
}

impl<G> Clone for Forum<G> {
    fn clone(&self) -> Self {
        Self {
            communities: self.communities.clone(),
            votes: self.votes.clone(),
            comments: self.comments.clone(),
            membership: self.membership.clone(),
            recency: self.recency.clone(),
            bookmarks: self.bookmarks.clone(),
            aggregator: self.aggregator.clone(),
            gateway: self.gateway.clone(),
        }
    }
}

impl<G: Gateway + 'static> Forum<G> {
    pub fn new(gateway: G, settings: Settings) -> Self {
        Self::with_gateway(Arc::new(gateway), settings)
    }

    pub fn with_gateway(gateway: Arc<G>, settings: Settings) -> Self {
        Self {
            communities: CommunityDirectory::new(gateway.clone(), settings),
            votes: VoteLedger::new(gateway.clone(), settings),
            comments: CommentTree::new(gateway.clone(), settings),
            membership: MembershipRegistry::new(gateway.clone(), settings),
            recency: RecencyTracker::new(gateway.clone(), settings),
            bookmarks: Bookmarks::new(gateway.clone()),
            aggregator: CounterAggregator::new(gateway.clone()),
            gateway,
        }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }
}
