//! Slot-tier bonus calculation.
//!
//! Tiers depend on how many children the parent holds once the new node is in:
//!
//! | children | parent        | slot-1 child             |
//! |----------|---------------|--------------------------|
//! | 1        | `first_slot`  |                          |
//! | 2        | `second_slot` | `spillover`              |
//! | 3        |               | `third_slot_spillover`   |

use chrono::{DateTime, Utc};

use super::error::IntegrityError;
use crate::config::BonusSettings;
use crate::model::{BonusKind, Level, MAX_CAPACITY, MemberId, StructureNode};
use crate::store::NewBonus;
use crate::Amount;

/// One credit owed by a placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Payout {
    pub recipient: MemberId,
    pub amount: Amount,
    pub kind: BonusKind,
}

/// Credits owed when `parent` reaches `child_count` children.
///
/// `first_child` is the member in slot 1 under `parent`.
pub(crate) fn tier_payouts(
    parent: MemberId,
    first_child: MemberId,
    child_count: usize,
    settings: &BonusSettings,
) -> Result<Vec<Payout>, IntegrityError> {
    let capacity = settings.capacity.min(MAX_CAPACITY);
    if child_count > capacity {
        return Err(IntegrityError::CapacityExceeded {
            parent,
            count: child_count,
            capacity,
        });
    }

    let payout = |recipient, amount, kind| Payout {
        recipient,
        amount,
        kind,
    };
    let payouts = match child_count {
        0 => Vec::new(),
        1 => vec![payout(parent, settings.first_slot, BonusKind::FirstSlot)],
        2 => vec![
            payout(parent, settings.second_slot, BonusKind::SecondSlot),
            payout(first_child, settings.spillover, BonusKind::Spillover),
        ],
        _ => vec![payout(
            first_child,
            settings.third_slot_spillover,
            BonusKind::ThirdSlotSpillover,
        )],
    };
    Ok(payouts)
}

/// Ledger entries for `source` joining `parent` after `earlier_siblings`.
///
/// `earlier_siblings` are the children already under `parent`, ordered by position.
pub(crate) fn plan(
    parent: MemberId,
    earlier_siblings: &[StructureNode],
    source: MemberId,
    level: Level,
    settings: &BonusSettings,
    now: DateTime<Utc>,
) -> Result<Vec<NewBonus>, IntegrityError> {
    let first_child = earlier_siblings.first().map_or(source, |n| n.user_id);
    let payouts = tier_payouts(parent, first_child, earlier_siblings.len() + 1, settings)?;

    Ok(payouts
        .into_iter()
        .map(|p| NewBonus {
            recipient: p.recipient,
            source,
            amount: p.amount,
            kind: p.kind,
            level,
            created_at: now,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BonusSettings {
        BonusSettings::default()
    }

    fn sibling(user_id: MemberId, position: u8) -> StructureNode {
        StructureNode {
            user_id,
            parent_id: Some(1),
            position,
            level: 1,
            created_at: Utc::now(),
            seq: u64::from(user_id),
        }
    }

    #[test]
    fn first_child_pays_parent_first_slot() {
        let payouts = tier_payouts(1, 2, 1, &settings()).unwrap();
        assert_eq!(
            payouts,
            vec![Payout {
                recipient: 1,
                amount: Amount::units(100),
                kind: BonusKind::FirstSlot
            }]
        );
    }

    #[test]
    fn second_child_pays_parent_and_first_sibling() {
        let payouts = tier_payouts(1, 2, 2, &settings()).unwrap();
        assert_eq!(
            payouts,
            vec![
                Payout {
                    recipient: 1,
                    amount: Amount::units(50),
                    kind: BonusKind::SecondSlot
                },
                Payout {
                    recipient: 2,
                    amount: Amount::units(50),
                    kind: BonusKind::Spillover
                },
            ]
        );
    }

    #[test]
    fn third_child_pays_first_sibling_only() {
        let payouts = tier_payouts(1, 2, 3, &settings()).unwrap();
        assert_eq!(
            payouts,
            vec![Payout {
                recipient: 2,
                amount: Amount::units(100),
                kind: BonusKind::ThirdSlotSpillover
            }]
        );
    }

    #[test]
    fn over_capacity_is_an_integrity_error() {
        assert_eq!(
            tier_payouts(1, 2, 4, &settings()),
            Err(IntegrityError::CapacityExceeded {
                parent: 1,
                count: 4,
                capacity: 3
            })
        );

        let narrow = BonusSettings {
            capacity: 2,
            ..settings()
        };
        assert!(tier_payouts(1, 2, 3, &narrow).is_err());
    }

    #[test]
    fn three_insertions_pay_exactly_the_configured_tiers() {
        let settings = BonusSettings {
            first_slot: Amount::from_scaled(12_345),
            second_slot: Amount::from_scaled(6_789),
            spillover: Amount::from_scaled(1_111),
            third_slot_spillover: Amount::from_scaled(2_222),
            ..BonusSettings::default()
        };
        let now = Utc::now();
        let siblings = [sibling(2, 1), sibling(3, 2)];

        let total: Amount = (0..3)
            .flat_map(|n| plan(1, &siblings[..n], 10 + n as MemberId, 1, &settings, now).unwrap())
            .map(|b| b.amount)
            .sum();

        assert_eq!(
            total,
            settings.first_slot
                + settings.second_slot
                + settings.spillover
                + settings.third_slot_spillover
        );
    }

    #[test]
    fn plan_tags_entries_with_source_and_level() {
        let now = Utc::now();
        let entries = plan(1, &[sibling(2, 1)], 3, 4, &settings(), now).unwrap();

        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|b| b.source == 3 && b.level == 4));
        assert_eq!(entries[1].recipient, 2);
        assert_eq!(entries[1].kind, BonusKind::Spillover);
    }
}
