//! Core domain types for the placement engine.

use chrono::{DateTime, Utc};

use crate::Amount;

/// Member identifier.
pub type MemberId = u32;

/// Bonus ledger entry identifier.
pub type BonusId = u64;

/// Slot under a parent: `1..=3` for children, `0` for a tree root.
pub type Position = u8;

/// Depth in the tree, roots are at level 0.
pub type Level = u32;

/// Rank tier of a member.
pub type Rank = u8;

/// Position carried by tree roots.
pub const ROOT_POSITION: Position = 0;

/// Hard upper bound on children per node.
pub const MAX_CAPACITY: usize = 3;

/// A command representing the possible inputs of the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Register a member if needed and place it as a new tree root.
    Seed { member: MemberId },
    /// Register a member invited by `inviter` (if needed) and place it after payment.
    ///
    /// Registration commits on its own: a rejected placement, e.g. an
    /// underpayment, leaves the member registered as a participant without a
    /// node, so a later `Join` with a valid payment can place it.
    Join {
        member: MemberId,
        inviter: MemberId,
        payment: Amount,
    },
    /// Move a placed member under another parent, or make it a root.
    Relocate {
        member: MemberId,
        parent: Option<MemberId>,
    },
    /// Re-evaluate a member's rank.
    Promote { member: MemberId },
    /// Append a negative entry cancelling a bonus.
    Reverse { bonus: BonusId },
}

/// Membership status, ordered so that `>= Partner` means "partner or above".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub enum Status {
    #[default]
    Participant,
    Partner,
    Admin,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Participant => "participant",
            Status::Partner => "partner",
            Status::Admin => "admin",
        }
    }

    pub fn is_partner(self) -> bool {
        self >= Status::Partner
    }
}

/// Position of a member in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureNode {
    pub user_id: MemberId,
    pub parent_id: Option<MemberId>,
    pub position: Position,
    pub level: Level,
    pub created_at: DateTime<Utc>,
    /// Insertion ordinal assigned by the store, breaks `created_at` ties.
    pub seq: u64,
}

impl StructureNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Placement seniority: older nodes sort first.
    pub fn seniority(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.seq)
    }
}

/// Tier tag of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BonusKind {
    /// Paid to a parent when its first slot fills.
    FirstSlot,
    /// Paid to a parent when its second slot fills.
    SecondSlot,
    /// Paid to the slot-1 child when the second slot fills.
    Spillover,
    /// Paid to the slot-1 child when the third slot fills.
    ThirdSlotSpillover,
    /// Cancels an earlier entry.
    Reversal { of: BonusId },
}

impl BonusKind {
    pub fn tag(self) -> &'static str {
        match self {
            BonusKind::FirstSlot => "first-slot",
            BonusKind::SecondSlot => "second-slot",
            BonusKind::Spillover => "spillover",
            BonusKind::ThirdSlotSpillover => "third-slot-spillover",
            BonusKind::Reversal { .. } => "reversal",
        }
    }
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bonus {
    pub id: BonusId,
    pub recipient: MemberId,
    /// Member whose placement triggered the entry.
    pub source: MemberId,
    pub amount: Amount,
    pub kind: BonusKind,
    /// Level of the triggering node when the entry was created.
    pub level: Level,
    pub created_at: DateTime<Utc>,
}

/// Immutable rank history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankUpgrade {
    pub member: MemberId,
    pub from_rank: Rank,
    pub to_rank: Rank,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ordering_ranks_admin_above_partner() {
        assert!(!Status::Participant.is_partner());
        assert!(Status::Partner.is_partner());
        assert!(Status::Admin.is_partner());
        assert_eq!(Status::default(), Status::Participant);
    }

    #[test]
    fn seniority_breaks_timestamp_ties_by_seq() {
        let now = Utc::now();
        let older = StructureNode {
            user_id: 1,
            parent_id: None,
            position: ROOT_POSITION,
            level: 0,
            created_at: now,
            seq: 1,
        };
        let younger = StructureNode {
            user_id: 2,
            seq: 2,
            ..older
        };
        assert!(older.seniority() < younger.seniority());
        assert!(older.is_root());
    }

    #[test]
    fn bonus_kind_tags() {
        assert_eq!(BonusKind::FirstSlot.tag(), "first-slot");
        assert_eq!(BonusKind::ThirdSlotSpillover.tag(), "third-slot-spillover");
        assert_eq!(BonusKind::Reversal { of: 4 }.tag(), "reversal");
    }
}
