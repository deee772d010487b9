//! Error types for engine operations.

use thiserror::Error;

use crate::Amount;
use crate::model::{BonusId, Level, MemberId, Position};
use crate::store::StoreError;

/// Top-level error returned by [`Engine::apply`](super::Engine::apply).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("registration failed: {0}")]
    Register(#[from] RegisterError),

    #[error("placement failed: {0}")]
    Place(#[from] PlaceError),

    #[error("relocation failed: {0}")]
    Relocate(#[from] RelocateError),

    #[error("bonus calculation failed: {0}")]
    Bonus(#[from] BonusError),

    #[error("promotion failed: {0}")]
    Promote(#[from] PromoteError),

    #[error("reversal failed: {0}")]
    Reversal(#[from] ReversalError),

    #[error("{0}")]
    Stats(#[from] StatsError),
}

/// Broken structural invariant; indicates an earlier bug, never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("parent {parent} has {count} children, capacity is {capacity}")]
    CapacityExceeded {
        parent: MemberId,
        count: usize,
        capacity: usize,
    },

    #[error("member {member} is at level {level}, expected {expected}")]
    LevelMismatch {
        member: MemberId,
        level: Level,
        expected: Level,
    },

    #[error("parent {parent} has more than one child at position {position}")]
    DuplicatePosition { parent: MemberId, position: Position },

    #[error("member {member} holds invalid position {position}")]
    PositionOutOfRange { member: MemberId, position: Position },

    #[error("member {member} hangs under {parent}, which has no node")]
    OrphanNode { member: MemberId, parent: MemberId },
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("member {0} is already registered")]
    DuplicateMember(MemberId),
    #[error("inviter {0} not found")]
    InviterNotFound(MemberId),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("gave up after {0} conflicting attempts")]
    Transient(u32),
}

#[derive(Debug, Error)]
pub enum PlaceError {
    #[error("member {0} not found")]
    MemberNotFound(MemberId),
    #[error("inviter {0} not found")]
    InviterNotFound(MemberId),
    #[error("member {0} is already placed")]
    AlreadyPlaced(MemberId),
    #[error("payment from member {0} is {1}, registration fee is {2}")]
    InsufficientPayment(MemberId, Amount, Amount),
    #[error("integrity violation: {0}")]
    Integrity(#[from] IntegrityError),
    /// Raised while computing bonuses; the payment needs manual reconciliation.
    #[error("bonus stage: {0}")]
    Bonus(IntegrityError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("gave up after {0} conflicting attempts")]
    Transient(u32),
}

#[derive(Debug, Error)]
pub enum RelocateError {
    #[error("member {0} not found")]
    MemberNotFound(MemberId),
    #[error("member {0} has no node")]
    NoExistingNode(MemberId),
    #[error("member {0} cannot become its own parent")]
    SelfParent(MemberId),
    #[error("new parent {0} not found")]
    ParentNotFound(MemberId),
    #[error("new parent {0} has no node")]
    ParentNotPlaced(MemberId),
    #[error("moving member {0} under its descendant {1} would create a cycle")]
    CycleDetected(MemberId, MemberId),
    #[error("new parent {0} already has {1} children")]
    ParentFull(MemberId, usize),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("gave up after {0} conflicting attempts")]
    Transient(u32),
}

#[derive(Debug, Error)]
pub enum BonusError {
    #[error("member {0} not found")]
    MemberNotFound(MemberId),
    #[error("member {0} has no node")]
    NoExistingNode(MemberId),
    #[error("bonuses for the placement of member {0} already exist")]
    AlreadyApplied(MemberId),
    #[error("integrity violation: {0}")]
    Integrity(#[from] IntegrityError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("gave up after {0} conflicting attempts")]
    Transient(u32),
}

#[derive(Debug, Error)]
pub enum PromoteError {
    #[error("member {0} not found")]
    MemberNotFound(MemberId),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("gave up after {0} conflicting attempts")]
    Transient(u32),
}

#[derive(Debug, Error)]
pub enum ReversalError {
    #[error("bonus {0} not found")]
    BonusNotFound(BonusId),
    #[error("bonus {0} is already reversed")]
    AlreadyReversed(BonusId),
    #[error("bonus {0} is itself a reversal")]
    NotReversible(BonusId),
    #[error("member {0} balance {1} does not cover {2}")]
    InsufficientBalance(MemberId, Amount, Amount),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("gave up after {0} conflicting attempts")]
    Transient(u32),
}

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("member {0} not found")]
    MemberNotFound(MemberId),
}

/// Errors of operations that commit through the retry loop.
pub(crate) trait UnitOfWorkError: From<StoreError> {
    fn exhausted(attempts: u32) -> Self;
}

macro_rules! unit_of_work_error {
    ($($ty:ty),*) => {
        $(impl UnitOfWorkError for $ty {
            fn exhausted(attempts: u32) -> Self {
                Self::Transient(attempts)
            }
        })*
    };
}

unit_of_work_error!(
    RegisterError,
    PlaceError,
    RelocateError,
    BonusError,
    PromoteError,
    ReversalError
);
