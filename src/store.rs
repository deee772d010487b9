//! Storage seam between the engine and whatever holds the tree.
//!
//! The engine never mutates storage piecemeal: every unit of work is described
//! as a [`ChangeSet`] and handed to [`TreeStore::commit`], which must apply it
//! entirely or not at all. Each change set carries the [`Guard`]s it was
//! planned against; a store rejects the set with [`StoreError::Conflict`] when
//! any guard no longer holds, and the engine re-plans from fresh reads.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::Amount;
use crate::engine::Member;
use crate::model::{
    Bonus, BonusId, BonusKind, Level, MemberId, Position, Rank, RankUpgrade, Status,
    StructureNode,
};

/// Errors reported by [`TreeStore::commit`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A guard failed; the change set was planned against stale reads.
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("member {0} does not exist")]
    UnknownMember(MemberId),
}

/// Precondition re-checked at commit time.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    /// Member is not registered yet.
    Unregistered(MemberId),
    /// Member has no node yet.
    Unplaced(MemberId),
    /// Parent still has exactly this many children.
    ChildCount { parent: MemberId, expected: usize },
    /// Node is unchanged since it was read.
    Node(StructureNode),
    /// Member still holds this rank.
    Rank { member: MemberId, expected: Rank },
    /// Member balance covers a debit.
    Balance { member: MemberId, at_least: Amount },
    /// No reversal entry points at this bonus.
    NotReversed(BonusId),
    /// No placement bonus was recorded for this source member yet.
    NoBonusesFrom(MemberId),
}

/// Node to insert; the store assigns its insertion ordinal.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub user_id: MemberId,
    pub parent_id: Option<MemberId>,
    pub position: Position,
    pub level: Level,
    pub created_at: DateTime<Utc>,
}

/// New parent, position and level for an existing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeMove {
    pub user_id: MemberId,
    pub parent_id: Option<MemberId>,
    pub position: Position,
    pub level: Level,
}

/// Ledger entry to append; positive amounts are credited, negative ones debited.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBonus {
    pub recipient: MemberId,
    pub source: MemberId,
    pub amount: Amount,
    pub kind: BonusKind,
    pub level: Level,
    pub created_at: DateTime<Utc>,
}

/// All writes of one unit of work.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub guards: Vec<Guard>,
    pub members: Vec<Member>,
    pub statuses: Vec<(MemberId, Status)>,
    pub placements: Vec<NewNode>,
    pub moves: Vec<NodeMove>,
    pub bonuses: Vec<NewBonus>,
    pub upgrades: Vec<RankUpgrade>,
}

impl ChangeSet {
    pub fn guard(&mut self, guard: Guard) {
        self.guards.push(guard);
    }
}

/// Rows created by a successful commit, with their store-assigned ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Receipt {
    pub bonuses: Vec<Bonus>,
    pub upgrades: Vec<RankUpgrade>,
}

/// Read and atomic-write access to members, nodes and the ledgers.
pub trait TreeStore {
    fn member(&self, id: MemberId) -> Option<&Member>;

    fn members(&self) -> impl Iterator<Item = &Member> + '_;

    fn node(&self, id: MemberId) -> Option<&StructureNode>;

    fn nodes(&self) -> impl Iterator<Item = &StructureNode> + '_;

    /// Children of `parent`, ordered by position then seniority.
    fn children(&self, parent: MemberId) -> Vec<StructureNode>;

    fn child_count(&self, parent: MemberId) -> usize {
        self.children(parent).len()
    }

    fn bonus(&self, id: BonusId) -> Option<&Bonus>;

    /// Ledger entries in creation order.
    fn bonuses(&self) -> impl Iterator<Item = &Bonus> + '_;

    fn rank_upgrades(&self) -> impl Iterator<Item = &RankUpgrade> + '_;

    /// Apply every write of `changes`, or none of them.
    fn commit(&mut self, changes: ChangeSet) -> Result<Receipt, StoreError>;
}

/// Arena of members and nodes keyed by member id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    members: HashMap<MemberId, Member>,
    nodes: HashMap<MemberId, StructureNode>,
    /// Child ids per parent, unordered
    children: HashMap<MemberId, Vec<MemberId>>,
    bonuses: Vec<Bonus>,
    upgrades: Vec<RankUpgrade>,
    next_seq: u64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, guard: &Guard) -> Result<(), StoreError> {
        let conflict = |what: String| Err(StoreError::Conflict(what));
        match guard {
            Guard::Unregistered(id) if self.members.contains_key(id) => {
                conflict(format!("member {id} registered concurrently"))
            }
            Guard::Unplaced(id) if self.nodes.contains_key(id) => {
                conflict(format!("member {id} placed concurrently"))
            }
            Guard::ChildCount { parent, expected } => {
                let actual = self.children.get(parent).map_or(0, Vec::len);
                if actual == *expected {
                    Ok(())
                } else {
                    conflict(format!(
                        "parent {parent} has {actual} children, expected {expected}"
                    ))
                }
            }
            Guard::Node(snapshot) if self.nodes.get(&snapshot.user_id) != Some(snapshot) => {
                conflict(format!("node of member {} changed", snapshot.user_id))
            }
            Guard::Rank { member, expected } => match self.members.get(member) {
                Some(m) if m.rank == *expected => Ok(()),
                Some(m) => conflict(format!("member {member} holds rank {}", m.rank)),
                None => Err(StoreError::UnknownMember(*member)),
            },
            Guard::Balance { member, at_least } => match self.members.get(member) {
                Some(m) if m.balance >= *at_least => Ok(()),
                Some(m) => conflict(format!("member {member} balance is {}", m.balance)),
                None => Err(StoreError::UnknownMember(*member)),
            },
            Guard::NotReversed(id)
                if self
                    .bonuses
                    .iter()
                    .any(|b| b.kind == BonusKind::Reversal { of: *id }) =>
            {
                conflict(format!("bonus {id} already reversed"))
            }
            Guard::NoBonusesFrom(source)
                if self.bonuses.iter().any(|b| {
                    b.source == *source && !matches!(b.kind, BonusKind::Reversal { .. })
                }) =>
            {
                conflict(format!("bonuses from member {source} recorded concurrently"))
            }
            _ => Ok(()),
        }
    }

    /// Every member id the change set writes to must exist after its inserts.
    fn check_references(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        let known = |id: MemberId| {
            self.members.contains_key(&id) || changes.members.iter().any(|m| m.id == id)
        };
        let referenced = changes
            .statuses
            .iter()
            .map(|(id, _)| *id)
            .chain(changes.placements.iter().map(|n| n.user_id))
            .chain(changes.placements.iter().filter_map(|n| n.parent_id))
            .chain(changes.moves.iter().map(|m| m.user_id))
            .chain(changes.moves.iter().filter_map(|m| m.parent_id))
            .chain(changes.bonuses.iter().map(|b| b.recipient))
            .chain(changes.upgrades.iter().map(|u| u.member));

        for id in referenced {
            if !known(id) {
                return Err(StoreError::UnknownMember(id));
            }
        }
        for mv in &changes.moves {
            if !self.nodes.contains_key(&mv.user_id) {
                return Err(StoreError::Conflict(format!(
                    "member {} has no node to move",
                    mv.user_id
                )));
            }
        }
        Ok(())
    }

    fn attach(&mut self, child: MemberId, parent: Option<MemberId>) {
        if let Some(parent) = parent {
            self.children.entry(parent).or_default().push(child);
        }
    }

    fn detach(&mut self, child: MemberId, parent: Option<MemberId>) {
        if let Some(siblings) = parent.and_then(|p| self.children.get_mut(&p)) {
            siblings.retain(|id| *id != child);
        }
    }

    fn member_mut(&mut self, id: MemberId) -> Result<&mut Member, StoreError> {
        self.members
            .get_mut(&id)
            .ok_or(StoreError::UnknownMember(id))
    }
}

impl TreeStore for InMemoryStore {
    fn member(&self, id: MemberId) -> Option<&Member> {
        self.members.get(&id)
    }

    fn members(&self) -> impl Iterator<Item = &Member> + '_ {
        self.members.values()
    }

    fn node(&self, id: MemberId) -> Option<&StructureNode> {
        self.nodes.get(&id)
    }

    fn nodes(&self) -> impl Iterator<Item = &StructureNode> + '_ {
        self.nodes.values()
    }

    fn children(&self, parent: MemberId) -> Vec<StructureNode> {
        let mut children: Vec<StructureNode> = self
            .children
            .get(&parent)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id).copied())
            .collect();
        children.sort_by_key(|n| (n.position, n.seniority()));
        children
    }

    fn child_count(&self, parent: MemberId) -> usize {
        self.children.get(&parent).map_or(0, Vec::len)
    }

    fn bonus(&self, id: BonusId) -> Option<&Bonus> {
        let idx = usize::try_from(id).ok()?.checked_sub(1)?;
        self.bonuses.get(idx)
    }

    fn bonuses(&self) -> impl Iterator<Item = &Bonus> + '_ {
        self.bonuses.iter()
    }

    fn rank_upgrades(&self) -> impl Iterator<Item = &RankUpgrade> + '_ {
        self.upgrades.iter()
    }

    fn commit(&mut self, changes: ChangeSet) -> Result<Receipt, StoreError> {
        for guard in &changes.guards {
            self.check(guard)?;
        }
        self.check_references(&changes)?;

        // Nothing below can fail: every referenced member was checked above.
        let mut receipt = Receipt::default();

        for member in changes.members {
            self.members.insert(member.id, member);
        }
        for (id, status) in changes.statuses {
            self.member_mut(id)?.status = status;
        }
        for new in changes.placements {
            self.next_seq += 1;
            let node = StructureNode {
                user_id: new.user_id,
                parent_id: new.parent_id,
                position: new.position,
                level: new.level,
                created_at: new.created_at,
                seq: self.next_seq,
            };
            self.attach(node.user_id, node.parent_id);
            self.nodes.insert(node.user_id, node);
        }
        for mv in changes.moves {
            let Some(node) = self.nodes.get(&mv.user_id).copied() else {
                continue;
            };
            if node.parent_id != mv.parent_id {
                self.detach(mv.user_id, node.parent_id);
                self.attach(mv.user_id, mv.parent_id);
            }
            let moved = StructureNode {
                parent_id: mv.parent_id,
                position: mv.position,
                level: mv.level,
                ..node
            };
            self.nodes.insert(mv.user_id, moved);
        }
        for new in changes.bonuses {
            let member = self.member_mut(new.recipient)?;
            if new.amount.is_negative() {
                member.debit(-new.amount);
            } else {
                member.credit(new.amount);
            }
            let bonus = Bonus {
                id: self.bonuses.len() as BonusId + 1,
                recipient: new.recipient,
                source: new.source,
                amount: new.amount,
                kind: new.kind,
                level: new.level,
                created_at: new.created_at,
            };
            self.bonuses.push(bonus.clone());
            receipt.bonuses.push(bonus);
        }
        for upgrade in changes.upgrades {
            self.member_mut(upgrade.member)?.rank = upgrade.to_rank;
            self.upgrades.push(upgrade);
            receipt.upgrades.push(upgrade);
        }

        Ok(receipt)
    }
}
