//! Per-friend invitation bookkeeping.
//!
//! The ledger keeps one [`InvitationRecord`] per friend with an invite in
//! each direction. It knows nothing about session modes; the coordinator
//! checks preconditions and then calls the mutators here, which never fail.
//! Records that fall back to `None`/`None` are dropped, so the map only
//! holds live relationships.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::protocol::FriendId;

/// State of one direction of an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InviteState {
    #[default]
    None,
    Pending,
    Accepted,
}

impl InviteState {
    pub fn is_none(self) -> bool {
        self == Self::None
    }
}

/// Both directions of the invitation state with one friend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InvitationRecord {
    /// Invite the local user sent to the friend.
    pub outgoing: InviteState,
    /// Invite the friend sent to the local user.
    pub incoming: InviteState,
}

impl InvitationRecord {
    pub fn is_empty(&self) -> bool {
        self.outgoing.is_none() && self.incoming.is_none()
    }
}

/// Direction of an invitation, used to report expired entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Default)]
struct Entry {
    record: InvitationRecord,
    outgoing_since: Option<Instant>,
    incoming_since: Option<Instant>,
}

/// Invitation records keyed by friend.
#[derive(Debug, Clone, Default)]
pub struct InvitationLedger {
    entries: HashMap<FriendId, Entry>,
}

impl InvitationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record for `friend`; `None`/`None` when nothing is tracked.
    pub fn record(&self, friend: FriendId) -> InvitationRecord {
        self.entries
            .get(&friend)
            .map(|entry| entry.record)
            .unwrap_or_default()
    }

    pub fn outgoing(&self, friend: FriendId) -> InviteState {
        self.record(friend).outgoing
    }

    pub fn incoming(&self, friend: FriendId) -> InviteState {
        self.record(friend).incoming
    }

    /// Every tracked friend with its record, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (FriendId, InvitationRecord)> + '_ {
        self.entries
            .iter()
            .map(|(friend, entry)| (*friend, entry.record))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mark an invite to `friend` as sent at `now`.
    pub fn open_outgoing(&mut self, friend: FriendId, now: Instant) {
        let entry = self.entries.entry(friend).or_default();
        entry.record.outgoing = InviteState::Pending;
        entry.outgoing_since = Some(now);
    }

    /// Record an offer from `friend` received at `now`.
    ///
    /// Returns `false` and leaves the record alone if an incoming invite is
    /// already tracked.
    pub fn open_incoming(&mut self, friend: FriendId, now: Instant) -> bool {
        let entry = self.entries.entry(friend).or_default();
        if !entry.record.incoming.is_none() {
            return false;
        }
        entry.record.incoming = InviteState::Pending;
        entry.incoming_since = Some(now);
        true
    }

    /// The friend accepted our invite. Any offer they sent us is dropped.
    pub fn confirm_outgoing(&mut self, friend: FriendId) {
        let entry = self.entries.entry(friend).or_default();
        entry.record = InvitationRecord {
            outgoing: InviteState::Accepted,
            incoming: InviteState::None,
        };
        entry.outgoing_since = None;
        entry.incoming_since = None;
    }

    /// We accepted the friend's invite. Any invite we sent them is dropped.
    pub fn accept_incoming(&mut self, friend: FriendId) {
        let entry = self.entries.entry(friend).or_default();
        entry.record = InvitationRecord {
            outgoing: InviteState::None,
            incoming: InviteState::Accepted,
        };
        entry.outgoing_since = None;
        entry.incoming_since = None;
    }

    /// Returns `true` if the outgoing side was set.
    pub fn clear_outgoing(&mut self, friend: FriendId) -> bool {
        self.update(friend, |entry| {
            entry.record.outgoing = InviteState::None;
            entry.outgoing_since = None;
        })
    }

    /// Returns `true` if the incoming side was set.
    pub fn clear_incoming(&mut self, friend: FriendId) -> bool {
        self.update(friend, |entry| {
            entry.record.incoming = InviteState::None;
            entry.incoming_since = None;
        })
    }

    /// Drop both sides for `friend`. Returns `true` if anything was tracked.
    pub fn reset(&mut self, friend: FriendId) -> bool {
        self.entries
            .remove(&friend)
            .is_some_and(|entry| !entry.record.is_empty())
    }

    /// Pending invitations opened more than `ttl` before `now`.
    ///
    /// Sorted by friend so callers act on them in a stable order.
    pub fn expired(&self, now: Instant, ttl: Duration) -> Vec<(FriendId, Side)> {
        let stale = |since: Option<Instant>, state: InviteState| {
            state == InviteState::Pending
                && since.is_some_and(|since| now.saturating_duration_since(since) >= ttl)
        };
        let mut expired: Vec<(FriendId, Side)> = self
            .entries
            .iter()
            .flat_map(|(friend, entry)| {
                let outgoing = stale(entry.outgoing_since, entry.record.outgoing)
                    .then_some((*friend, Side::Outgoing));
                let incoming = stale(entry.incoming_since, entry.record.incoming)
                    .then_some((*friend, Side::Incoming));
                outgoing.into_iter().chain(incoming)
            })
            .collect();
        expired.sort_by_key(|(friend, side)| (*friend, *side == Side::Incoming));
        expired
    }

    fn update(&mut self, friend: FriendId, apply: impl FnOnce(&mut Entry)) -> bool {
        let Some(entry) = self.entries.get_mut(&friend) else {
            return false;
        };
        let before = entry.record;
        apply(entry);
        let changed = before != entry.record;
        if entry.record.is_empty() {
            self.entries.remove(&friend);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untracked_friend_reads_as_empty_record() {
        let ledger = InvitationLedger::new();
        assert!(ledger.record(3).is_empty());
        assert!(ledger.is_empty());
    }

    #[test]
    fn accepting_one_direction_clears_the_other() {
        let now = Instant::now();
        let mut ledger = InvitationLedger::new();
        ledger.open_outgoing(5, now);
        assert!(ledger.open_incoming(5, now));
        ledger.accept_incoming(5);
        assert_eq!(
            ledger.record(5),
            InvitationRecord {
                outgoing: InviteState::None,
                incoming: InviteState::Accepted
            }
        );

        ledger.open_outgoing(6, now);
        ledger.open_incoming(6, now);
        ledger.confirm_outgoing(6);
        assert_eq!(ledger.incoming(6), InviteState::None);
        assert_eq!(ledger.outgoing(6), InviteState::Accepted);
    }

    #[test]
    fn second_offer_does_not_overwrite_first() {
        let now = Instant::now();
        let mut ledger = InvitationLedger::new();
        assert!(ledger.open_incoming(2, now));
        ledger.accept_incoming(2);
        assert!(!ledger.open_incoming(2, now));
        assert_eq!(ledger.incoming(2), InviteState::Accepted);
    }

    #[test]
    fn emptied_records_are_dropped() {
        let mut ledger = InvitationLedger::new();
        ledger.open_outgoing(8, Instant::now());
        assert!(ledger.clear_outgoing(8));
        assert!(ledger.is_empty());
        assert!(!ledger.clear_outgoing(8));
        assert!(!ledger.reset(8));
    }

    #[test]
    fn expired_reports_only_old_pending_sides() {
        let start = Instant::now();
        let ttl = Duration::from_secs(60);
        let mut ledger = InvitationLedger::new();
        ledger.open_outgoing(1, start);
        ledger.open_incoming(2, start);
        ledger.open_incoming(3, start + Duration::from_secs(30));
        ledger.open_outgoing(4, start);
        ledger.confirm_outgoing(4);

        let later = start + Duration::from_secs(61);
        assert_eq!(
            ledger.expired(later, ttl),
            vec![(1, Side::Outgoing), (2, Side::Incoming)]
        );
        assert!(ledger.expired(start + Duration::from_secs(10), ttl).is_empty());
    }
}
