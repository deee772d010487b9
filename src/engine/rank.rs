//! Rank promotion.
//!
//! A member earns one rank for every `partners_per_rank` partners in its first
//! line, up to `max_rank`. Each evaluation promotes by at most one step, so a
//! member whose rank already matches its first line is left alone.

use chrono::{DateTime, Utc};

use super::Member;
use crate::config::BonusSettings;
use crate::model::{Rank, RankUpgrade, StructureNode};
use crate::store::TreeStore;

/// Direct children holding partner-or-above status.
pub(crate) fn first_line_partners<S: TreeStore>(store: &S, children: &[StructureNode]) -> usize {
    children
        .iter()
        .filter_map(|c| store.member(c.user_id))
        .filter(|m| m.status.is_partner())
        .count()
}

/// Highest rank a first line of `partners` supports.
pub(crate) fn earned_rank(partners: usize, settings: &BonusSettings) -> Rank {
    let steps = partners / settings.partners_per_rank.max(1);
    steps.min(usize::from(settings.max_rank)) as Rank
}

/// Next upgrade for `member`, if its first line has outgrown its rank.
pub(crate) fn promotion(
    member: &Member,
    partners: usize,
    settings: &BonusSettings,
    now: DateTime<Utc>,
) -> Option<RankUpgrade> {
    if !member.status.is_partner() || member.rank >= earned_rank(partners, settings) {
        return None;
    }
    Some(RankUpgrade {
        member: member.id,
        from_rank: member.rank,
        to_rank: member.rank + 1,
        timestamp: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Status;

    fn partner(rank: Rank) -> Member {
        Member {
            status: Status::Partner,
            rank,
            ..Member::new(1, None)
        }
    }

    #[test]
    fn earned_rank_steps_every_three_partners() {
        let settings = BonusSettings::default();
        assert_eq!(earned_rank(0, &settings), 0);
        assert_eq!(earned_rank(2, &settings), 0);
        assert_eq!(earned_rank(3, &settings), 1);
        assert_eq!(earned_rank(7, &settings), 2);
        assert_eq!(earned_rank(1_000, &settings), settings.max_rank);
    }

    #[test]
    fn full_first_line_promotes_by_one() {
        let upgrade = promotion(&partner(0), 3, &BonusSettings::default(), Utc::now()).unwrap();
        assert_eq!((upgrade.from_rank, upgrade.to_rank), (0, 1));
    }

    #[test]
    fn already_promoted_member_is_left_alone() {
        assert!(promotion(&partner(1), 3, &BonusSettings::default(), Utc::now()).is_none());
    }

    #[test]
    fn participants_are_never_promoted() {
        let member = Member::new(1, None);
        assert!(promotion(&member, 3, &BonusSettings::default(), Utc::now()).is_none());
    }

    #[test]
    fn admins_count_as_partners() {
        let admin = Member {
            status: Status::Admin,
            ..Member::new(1, None)
        };
        assert!(promotion(&admin, 3, &BonusSettings::default(), Utc::now()).is_some());
    }

    #[test]
    fn large_jump_still_promotes_one_step() {
        let upgrade = promotion(&partner(0), 9, &BonusSettings::default(), Utc::now()).unwrap();
        assert_eq!(upgrade.to_rank, 1);
    }
}
