//! Placement resolution and slot allocation.
//!
//! Placement is breadth-first from the inviter: the shallowest depth that has
//! any node with a free slot wins, and within that depth the node with the
//! fewest children, then the most senior node, is chosen.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use super::error::{IntegrityError, PlaceError};
use super::{bonus, rank};
use crate::config::BonusSettings;
use crate::model::{Level, MAX_CAPACITY, MemberId, Position, ROOT_POSITION, Status, StructureNode};
use crate::store::{ChangeSet, Guard, NewNode, TreeStore};
use crate::Amount;

/// Outcome of the breadth-first parent search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// Inviter has no node yet and becomes the parent itself.
    Unplaced,
    /// Best attachment point and its depth below the inviter.
    Attach { parent: MemberId, depth: u32 },
    /// Nothing reachable had a free slot.
    Exhausted,
}

impl Resolution {
    /// Parent the new member ends up under.
    pub(crate) fn parent_or(self, inviter: MemberId) -> MemberId {
        match self {
            Resolution::Attach { parent, .. } => parent,
            Resolution::Unplaced | Resolution::Exhausted => inviter,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    member: MemberId,
    depth: u32,
    children: usize,
    seniority: (DateTime<Utc>, u64),
}

impl Candidate {
    fn beats(&self, other: &Candidate) -> bool {
        (self.children, self.seniority) < (other.children, other.seniority)
    }
}

/// Find where a member invited by `inviter` should attach.
pub(crate) fn resolve_parent<S: TreeStore>(
    store: &S,
    inviter: MemberId,
    capacity: usize,
) -> Resolution {
    if store.node(inviter).is_none() {
        return Resolution::Unplaced;
    }

    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([(inviter, 0u32)]);
    let mut best: Option<Candidate> = None;

    while let Some((member, depth)) = queue.pop_front() {
        // Depths are dequeued in order, so a deeper node ends the search.
        if best.is_some_and(|b| depth > b.depth) {
            break;
        }
        if !visited.insert(member) {
            continue;
        }
        let Some(node) = store.node(member) else {
            continue;
        };

        let children = store.children(member);
        if children.len() < capacity {
            let candidate = Candidate {
                member,
                depth,
                children: children.len(),
                seniority: node.seniority(),
            };
            if best.is_none_or(|b| candidate.beats(&b)) {
                best = Some(candidate);
            }
        }

        queue.extend(children.iter().map(|c| (c.user_id, depth + 1)));
    }

    match best {
        Some(b) => Resolution::Attach {
            parent: b.member,
            depth: b.depth,
        },
        None => Resolution::Exhausted,
    }
}

/// Slot picked for a new child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Free(Position),
    /// Every slot was taken; the last one is reused and needs operator review.
    Clamped(Position),
}

impl Slot {
    pub(crate) fn position(self) -> Position {
        match self {
            Slot::Free(p) | Slot::Clamped(p) => p,
        }
    }
}

/// Lowest position in `1..=capacity` not used by `children`.
pub(crate) fn next_position(children: &[StructureNode], capacity: usize) -> Slot {
    let last = capacity.min(MAX_CAPACITY) as Position;
    (1..=last)
        .find(|p| children.iter().all(|c| c.position != *p))
        .map_or(Slot::Clamped(last), Slot::Free)
}

/// Level of a child attached under `parent`; nodeless parents yield roots.
pub(crate) fn level_for(parent: Option<&StructureNode>) -> Level {
    parent.map_or(0, |n| n.level + 1)
}

/// Check `node` sits exactly one level below its parent.
pub(crate) fn verify_level<S: TreeStore>(
    store: &S,
    node: &StructureNode,
) -> Result<(), IntegrityError> {
    let Some(parent_id) = node.parent_id else {
        return Ok(());
    };
    let parent = store.node(parent_id).ok_or(IntegrityError::OrphanNode {
        member: node.user_id,
        parent: parent_id,
    })?;
    let expected = parent.level + 1;
    if node.level != expected {
        return Err(IntegrityError::LevelMismatch {
            member: node.user_id,
            level: node.level,
            expected,
        });
    }
    Ok(())
}

/// Where a planned placement lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Target {
    pub parent: Option<MemberId>,
    pub position: Position,
    pub level: Level,
    /// The inviter had no node and is seeded as a root in the same unit.
    pub seeded_inviter: bool,
}

/// Plan the placement of `member` invited by `inviter`, bonuses and promotion included.
///
/// `payment` is checked against the registration fee; `None` skips the check
/// (root seeding). `member == inviter` places `member` as a new root.
pub(crate) fn plan<S: TreeStore>(
    store: &S,
    settings: &BonusSettings,
    member: MemberId,
    inviter: MemberId,
    payment: Option<Amount>,
    now: DateTime<Utc>,
) -> Result<(ChangeSet, Target), PlaceError> {
    let account = store.member(member).ok_or(PlaceError::MemberNotFound(member))?;
    if store.member(inviter).is_none() {
        return Err(PlaceError::InviterNotFound(inviter));
    }
    if store.node(member).is_some() {
        return Err(PlaceError::AlreadyPlaced(member));
    }
    if let Some(paid) = payment {
        if paid < settings.registration_fee {
            return Err(PlaceError::InsufficientPayment(
                member,
                paid,
                settings.registration_fee,
            ));
        }
    }

    let mut changes = ChangeSet::default();
    changes.guard(Guard::Unplaced(member));
    // A completed payment turns the member into a partner.
    if !account.status.is_partner() {
        changes.statuses.push((member, Status::Partner));
    }

    if member == inviter {
        changes.placements.push(NewNode {
            user_id: member,
            parent_id: None,
            position: ROOT_POSITION,
            level: 0,
            created_at: now,
        });
        let target = Target {
            parent: None,
            position: ROOT_POSITION,
            level: 0,
            seeded_inviter: false,
        };
        return Ok((changes, target));
    }

    let resolution = resolve_parent(store, inviter, settings.capacity);
    let parent = resolution.parent_or(inviter);
    if let Resolution::Attach { depth, .. } = resolution {
        debug!(member, inviter, parent, depth, "parent resolved");
    }

    let (parent_node, siblings) = match resolution {
        Resolution::Unplaced => {
            changes.guard(Guard::Unplaced(inviter));
            // A seeded root is a partner, as with `seed_root`.
            if store.member(inviter).is_some_and(|m| !m.status.is_partner()) {
                changes.statuses.push((inviter, Status::Partner));
            }
            changes.placements.push(NewNode {
                user_id: inviter,
                parent_id: None,
                position: ROOT_POSITION,
                level: 0,
                created_at: now,
            });
            (None, Vec::new())
        }
        Resolution::Exhausted | Resolution::Attach { .. } => {
            if resolution == Resolution::Exhausted {
                error!(
                    member,
                    inviter, "no free slot reachable from inviter, attaching to inviter anyway"
                );
            }
            let node = *store
                .node(parent)
                .ok_or(IntegrityError::OrphanNode { member, parent })?;
            verify_level(store, &node)?;
            changes.guard(Guard::Node(node));
            (Some(node), store.children(parent))
        }
    };

    changes.guard(Guard::ChildCount {
        parent,
        expected: siblings.len(),
    });

    let slot = next_position(&siblings, settings.capacity);
    if let Slot::Clamped(position) = slot {
        error!(
            member,
            parent, position, "all slots taken, clamping position for operator review"
        );
    }
    let level = match parent_node {
        Some(node) => level_for(Some(&node)),
        // Seeded inviter is a fresh root at level 0.
        None => 1,
    };

    changes.placements.push(NewNode {
        user_id: member,
        parent_id: Some(parent),
        position: slot.position(),
        level,
        created_at: now,
    });

    changes.bonuses = bonus::plan(parent, &siblings, member, level, settings, now)
        .map_err(PlaceError::Bonus)?;

    // The new member counts as a partner once this unit commits.
    let partners = rank::first_line_partners(store, &siblings) + 1;
    if let Some(parent_account) = store.member(parent) {
        if let Some(upgrade) = rank::promotion(parent_account, partners, settings, now) {
            changes.guard(Guard::Rank {
                member: parent,
                expected: upgrade.from_rank,
            });
            changes.upgrades.push(upgrade);
        }
    }

    let target = Target {
        parent: Some(parent),
        position: slot.position(),
        level,
        seeded_inviter: resolution == Resolution::Unplaced,
    };
    Ok((changes, target))
}
