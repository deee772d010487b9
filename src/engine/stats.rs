//! Read-only structure and earnings statistics.

use std::collections::{BTreeMap, HashSet, VecDeque};

use tracing::error;

use super::error::{IntegrityError, StatsError};
use crate::Amount;
use crate::model::{Bonus, BonusKind, MAX_CAPACITY, MemberId, Position, ROOT_POSITION, Status};
use crate::store::TreeStore;

/// Number of entries and their summed amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    pub count: usize,
    pub amount: Amount,
}

impl Tally {
    fn add(&mut self, amount: Amount) {
        self.count += 1;
        self.amount += amount;
    }
}

/// Ledger entries received by a member, split per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BonusSummary {
    pub total: Tally,
    pub first_slot: Tally,
    pub second_slot: Tally,
    pub spillover: Tally,
    pub third_slot_spillover: Tally,
    pub reversals: Tally,
}

impl BonusSummary {
    pub(crate) fn collect<'a>(bonuses: impl IntoIterator<Item = &'a Bonus>) -> Self {
        let mut summary = Self::default();
        for bonus in bonuses {
            summary.total.add(bonus.amount);
            let tally = match bonus.kind {
                BonusKind::FirstSlot => &mut summary.first_slot,
                BonusKind::SecondSlot => &mut summary.second_slot,
                BonusKind::Spillover => &mut summary.spillover,
                BonusKind::ThirdSlotSpillover => &mut summary.third_slot_spillover,
                BonusKind::Reversal { .. } => &mut summary.reversals,
            };
            tally.add(bonus.amount);
        }
        summary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberStats {
    pub direct_children: usize,
    pub total_descendants: usize,
    /// Direct children with partner-or-above status.
    pub active_partners: usize,
    /// Direct children still at participant status.
    pub participants: usize,
    pub bonus_summary: BonusSummary,
}

pub(crate) fn member_stats<S: TreeStore>(
    store: &S,
    member: MemberId,
) -> Result<MemberStats, StatsError> {
    if store.member(member).is_none() {
        return Err(StatsError::MemberNotFound(member));
    }

    let children = store.children(member);
    let (active_partners, participants) =
        children
            .iter()
            .filter_map(|c| store.member(c.user_id))
            .fold((0, 0), |(partners, participants), m| {
                if m.status == Status::Participant {
                    (partners, participants + 1)
                } else {
                    (partners + 1, participants)
                }
            });

    Ok(MemberStats {
        direct_children: children.len(),
        total_descendants: count_descendants(store, member),
        active_partners,
        participants,
        bonus_summary: BonusSummary::collect(
            store.bonuses().filter(|b| b.recipient == member),
        ),
    })
}

fn count_descendants<S: TreeStore>(store: &S, member: MemberId) -> usize {
    let mut visited = HashSet::from([member]);
    let mut queue = VecDeque::from([member]);
    let mut count = 0;
    while let Some(parent) = queue.pop_front() {
        for child in store.children(parent) {
            if visited.insert(child.user_id) {
                count += 1;
                queue.push_back(child.user_id);
            }
        }
    }
    count
}

/// Every structural invariant violation in the store, ordered by member id.
pub(crate) fn audit<S: TreeStore>(store: &S, capacity: usize) -> Vec<IntegrityError> {
    let capacity = capacity.min(MAX_CAPACITY);
    let mut nodes: Vec<_> = store.nodes().copied().collect();
    nodes.sort_by_key(|n| n.user_id);

    let mut violations = Vec::new();
    let mut positions: BTreeMap<MemberId, Vec<Position>> = BTreeMap::new();

    for node in &nodes {
        let Some(parent_id) = node.parent_id else {
            if node.level != 0 {
                violations.push(IntegrityError::LevelMismatch {
                    member: node.user_id,
                    level: node.level,
                    expected: 0,
                });
            }
            if node.position != ROOT_POSITION {
                violations.push(IntegrityError::PositionOutOfRange {
                    member: node.user_id,
                    position: node.position,
                });
            }
            continue;
        };

        if !(1..=MAX_CAPACITY as Position).contains(&node.position) {
            violations.push(IntegrityError::PositionOutOfRange {
                member: node.user_id,
                position: node.position,
            });
        }
        positions.entry(parent_id).or_default().push(node.position);

        match store.node(parent_id) {
            None => violations.push(IntegrityError::OrphanNode {
                member: node.user_id,
                parent: parent_id,
            }),
            Some(parent) if node.level != parent.level + 1 => {
                violations.push(IntegrityError::LevelMismatch {
                    member: node.user_id,
                    level: node.level,
                    expected: parent.level + 1,
                });
            }
            Some(_) => {}
        }
    }

    for (parent, mut taken) in positions {
        if taken.len() > capacity {
            violations.push(IntegrityError::CapacityExceeded {
                parent,
                count: taken.len(),
                capacity,
            });
        }
        taken.sort_unstable();
        for pair in taken.windows(2) {
            if pair[0] == pair[1] {
                violations.push(IntegrityError::DuplicatePosition {
                    parent,
                    position: pair[0],
                });
            }
        }
    }

    for violation in &violations {
        error!(%violation, "structure integrity violation");
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bonus(amount: i64, kind: BonusKind) -> Bonus {
        Bonus {
            id: 1,
            recipient: 1,
            source: 2,
            amount: Amount::units(amount),
            kind,
            level: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn summary_tallies_each_tier() {
        let bonuses = [
            bonus(100, BonusKind::FirstSlot),
            bonus(50, BonusKind::SecondSlot),
            bonus(50, BonusKind::Spillover),
            bonus(100, BonusKind::ThirdSlotSpillover),
            bonus(-50, BonusKind::Reversal { of: 3 }),
        ];
        let summary = BonusSummary::collect(&bonuses);

        assert_eq!(summary.total.count, 5);
        assert_eq!(summary.total.amount, Amount::units(250));
        assert_eq!(summary.first_slot.amount, Amount::units(100));
        assert_eq!(summary.spillover.count, 1);
        assert_eq!(summary.reversals.amount, Amount::units(-50));
    }

    #[test]
    fn empty_summary_is_zero() {
        assert_eq!(
            BonusSummary::collect(Vec::<Bonus>::new().iter()),
            BonusSummary::default()
        );
    }
}
