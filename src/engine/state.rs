use crate::Amount;
use crate::model::{MemberId, Rank, Status};

/// A member account with its status, rank and earnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: MemberId,
    pub status: Status,
    pub rank: Rank,
    pub balance: Amount,
    pub total_earned: Amount,
    pub inviter_id: Option<MemberId>,
}

impl Member {
    pub fn new(id: MemberId, inviter_id: Option<MemberId>) -> Self {
        Self {
            id,
            status: Status::Participant,
            rank: 0,
            balance: Amount::ZERO,
            total_earned: Amount::ZERO,
            inviter_id,
        }
    }

    /// Credit a bonus: both balance and lifetime earnings grow.
    pub fn credit(&mut self, amount: Amount) {
        self.balance += amount;
        self.total_earned += amount;
    }

    /// Debit the balance only; lifetime earnings never decrease.
    pub fn debit(&mut self, amount: Amount) {
        self.balance -= amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_member_starts_empty() {
        let member = Member::new(7, Some(1));
        assert_eq!(member.status, Status::Participant);
        assert_eq!(member.rank, 0);
        assert_eq!(member.balance, Amount::ZERO);
        assert_eq!(member.total_earned, Amount::ZERO);
        assert_eq!(member.inviter_id, Some(1));
    }

    #[test]
    fn credit_then_debit_keeps_total_earned() {
        let mut member = Member::new(1, None);
        member.credit(Amount::units(100));
        member.debit(Amount::units(40));
        assert_eq!(member.balance, Amount::units(60));
        assert_eq!(member.total_earned, Amount::units(100));
    }
}
