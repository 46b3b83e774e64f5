use crate::aggregate::CounterAggregator;
use crate::error::{Error, Result};
use crate::global::Settings;
use crate::model::{Aggregates, CommunityAggregates, Counter, CounterTarget, Role};
use crate::store::{with_retries, Gateway, MembershipSlot};
use sea_orm::prelude::Uuid;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MembershipReceipt {
    pub role: Role,
    /// False when the call found the user already in the requested state.
    pub changed: bool,
    pub aggregates: CommunityAggregates,
}

fn join(slot: &mut MembershipSlot) -> Result<bool> {
    if slot.role.is_member() {
        return Ok(false);
    }
    slot.adjust(Counter::Members, 1);
    slot.role = Role::Member;
    Ok(true)
}

fn leave(slot: &mut MembershipSlot) -> Result<bool> {
    match slot.role {
        Role::None => return Ok(false),
        Role::Member => {}
        Role::Manager => slot.adjust(Counter::Managers, -1),
    }
    slot.adjust(Counter::Members, -1);
    slot.role = Role::None;
    Ok(true)
}

fn promote(slot: &mut MembershipSlot) -> Result<bool> {
    match slot.role {
        Role::None => Err(Error::NotAMember {
            user_id: slot.user_id(),
            community_id: slot.community_id(),
        }),
        Role::Member => {
            slot.adjust(Counter::Managers, 1);
            slot.role = Role::Manager;
            Ok(true)
        }
        Role::Manager => Ok(false),
    }
}

fn demote(slot: &mut MembershipSlot) -> Result<bool> {
    if !slot.role.is_manager() {
        return Ok(false);
    }
    slot.adjust(Counter::Managers, -1);
    slot.role = Role::Member;
    Ok(true)
}

/// Member and manager edges of communities.
///
/// States: none, member, member+manager. A manager is always a member, so
/// leaving as a manager drops both edges and both counters.
pub struct MembershipRegistry<G> {
    gateway: Arc<G>,
    aggregator: CounterAggregator<G>,
    settings: Settings,
}

impl<G> Clone for MembershipRegistry<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            aggregator: self.aggregator.clone(),
            settings: self.settings,
        }
    }
}

impl<G: Gateway> MembershipRegistry<G> {
    pub fn new(gateway: Arc<G>, settings: Settings) -> Self {
        Self {
            aggregator: CounterAggregator::new(gateway.clone()),
            gateway,
            settings,
        }
    }

    pub async fn join(&self, user_id: Uuid, community_id: Uuid) -> Result<MembershipReceipt> {
        self.run(user_id, community_id, join).await
    }

    pub async fn leave(&self, user_id: Uuid, community_id: Uuid) -> Result<MembershipReceipt> {
        self.run(user_id, community_id, leave).await
    }

    /// Fails with `NotAMember` unless the user has joined first.
    pub async fn promote(&self, user_id: Uuid, community_id: Uuid) -> Result<MembershipReceipt> {
        self.run(user_id, community_id, promote).await
    }

    pub async fn demote(&self, user_id: Uuid, community_id: Uuid) -> Result<MembershipReceipt> {
        self.run(user_id, community_id, demote).await
    }

    pub async fn role(&self, user_id: Uuid, community_id: Uuid) -> Result<Role> {
        self.gateway.role(user_id, community_id).await
    }

    async fn run(
        &self,
        user_id: Uuid,
        community_id: Uuid,
        transition: fn(&mut MembershipSlot) -> Result<bool>,
    ) -> Result<MembershipReceipt> {
        let (changed, role, mut aggregates, drifted) =
            with_retries(self.settings.conflict_retries, || {
                self.gateway
                    .membership_unit(user_id, community_id, move |slot| {
                        let changed = transition(slot)?;
                        Ok((changed, slot.role, slot.aggregates, slot.drifted()))
                    })
            })
            .await?;

        if let Some(healed) = self
            .aggregator
            .heal_if(drifted, CounterTarget::Community(community_id))
            .await
        {
            if let Aggregates::Community(recounted) = healed.recounted {
                aggregates = recounted;
            }
        }

        if changed {
            log::debug!(
                "user {} is now {:?} of community {}",
                user_id,
                role,
                community_id
            );
        }

        Ok(MembershipReceipt {
            role,
            changed,
            aggregates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(role: Role, members: i64, managers: i64) -> MembershipSlot {
        MembershipSlot::new(
            Uuid::nil(),
            Uuid::nil(),
            CommunityAggregates {
                posts: 0,
                members,
                managers,
            },
            role,
        )
    }

    #[test]
    fn test_join_then_join_again() {
        let mut slot = slot(Role::None, 0, 0);
        assert_eq!(join(&mut slot).ok(), Some(true));
        assert_eq!(join(&mut slot).ok(), Some(false));
        assert_eq!(slot.role, Role::Member);
        assert_eq!(slot.aggregates.members, 1);
    }

    #[test]
    fn test_leave_as_manager_cascades() {
        let mut slot = slot(Role::Manager, 3, 2);
        assert_eq!(leave(&mut slot).ok(), Some(true));
        assert_eq!(slot.role, Role::None);
        assert_eq!(slot.aggregates.members, 2);
        assert_eq!(slot.aggregates.managers, 1);
        assert!(!slot.drifted());
    }

    #[test]
    fn test_promote_requires_membership() {
        let mut slot = slot(Role::None, 0, 0);
        assert!(matches!(
            promote(&mut slot),
            Err(Error::NotAMember { .. })
        ));
        assert_eq!(slot.role, Role::None);
        assert_eq!(slot.aggregates.managers, 0);
    }

    #[test]
    fn test_promote_and_demote() {
        let mut slot = slot(Role::Member, 1, 0);
        assert_eq!(promote(&mut slot).ok(), Some(true));
        assert_eq!(promote(&mut slot).ok(), Some(false));
        assert_eq!(slot.aggregates.managers, 1);
        assert_eq!(demote(&mut slot).ok(), Some(true));
        assert_eq!(demote(&mut slot).ok(), Some(false));
        assert_eq!(slot.role, Role::Member);
        assert_eq!(slot.aggregates.managers, 0);
        assert_eq!(slot.aggregates.members, 1);
    }

    #[test]
    fn test_noops() {
        let mut slot = slot(Role::None, 0, 0);
        assert_eq!(leave(&mut slot).ok(), Some(false));
        assert_eq!(demote(&mut slot).ok(), Some(false));
        assert_eq!(slot.aggregates, CommunityAggregates::default());
    }
}
