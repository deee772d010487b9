//! Placement and bonus engine.
//!
//! The engine places paying members into a tree of capacity three, credits the
//! slot-tier bonuses each placement triggers and promotes parents whose first
//! line fills up. Every operation is planned against current store state and
//! committed as one guarded change set; conflicting commits are re-planned.
//! Also supports async stream of commands.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::Amount;
use crate::config::{BonusSettings, SettingsRegistry};
use crate::model::{
    Bonus, BonusId, BonusKind, Command, Level, MemberId, Position, RankUpgrade, StructureNode,
};
use crate::store::{ChangeSet, Guard, InMemoryStore, NewBonus, Receipt, StoreError, TreeStore};

mod bonus;
mod placement;
mod rank;

mod relocation;
pub use relocation::Relocation;

mod state;
pub use state::Member;

mod stats;
pub use stats::{BonusSummary, MemberStats, Tally};

mod error;
pub use error::{
    BonusError, EngineError, IntegrityError, PlaceError, PromoteError, RegisterError,
    RelocateError, ReversalError, StatsError,
};
use error::UnitOfWorkError;

/// Result of a successful placement.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub member: MemberId,
    /// `None` when the member became a tree root.
    pub parent: Option<MemberId>,
    pub level: Level,
    pub position: Position,
    pub bonuses: Vec<Bonus>,
    pub promotion: Option<RankUpgrade>,
    /// The inviter had no node and was seeded as a root first.
    pub seeded_inviter: bool,
}

/// A failed bonus stage awaiting manual reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationItem {
    pub member: MemberId,
    pub inviter: Option<MemberId>,
    pub payment: Option<Amount>,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// The placement engine.
///
/// All mutating operations take `&mut self`, so callers sharing an engine are
/// serialized for the whole unit of work.
pub struct Engine<S = InMemoryStore> {
    store: S,
    settings: SettingsRegistry,
    reconciliation: Vec<ReconciliationItem>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_store(InMemoryStore::new(), SettingsRegistry::with_defaults())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Public API
impl<S: TreeStore> Engine<S> {
    pub fn with_store(store: S, settings: SettingsRegistry) -> Self {
        Self {
            store,
            settings,
            reconciliation: Vec::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &SettingsRegistry {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SettingsRegistry {
        &mut self.settings
    }

    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.store.member(id)
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> + '_ {
        self.store.members()
    }

    pub fn node(&self, id: MemberId) -> Option<&StructureNode> {
        self.store.node(id)
    }

    pub fn bonuses(&self) -> impl Iterator<Item = &Bonus> + '_ {
        self.store.bonuses()
    }

    pub fn rank_upgrades(&self) -> impl Iterator<Item = &RankUpgrade> + '_ {
        self.store.rank_upgrades()
    }

    /// Failed bonus stages waiting for an operator.
    pub fn reconciliation(&self) -> &[ReconciliationItem] {
        &self.reconciliation
    }

    /// Hand the reconciliation queue over to the caller, leaving it empty.
    pub fn take_reconciliation(&mut self) -> Vec<ReconciliationItem> {
        std::mem::take(&mut self.reconciliation)
    }

    /// Run the engine with the given command stream
    pub async fn run(&mut self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = stream.next().await {
            // a failed command must not stop the engine, it is logged by `apply`
            let _ = self.apply(command);
        }
    }

    /// Apply a single command on top of the current engine state
    pub fn apply(&mut self, command: Command) -> Result<(), EngineError> {
        match command {
            Command::Seed { member } => {
                let result = self.seed_root(member);
                Self::log_result("seed", member, None, None, &result);
                result?;
            }
            Command::Join {
                member,
                inviter,
                payment,
            } => {
                let result = self.ensure_registered(member, Some(inviter)).and_then(|()| {
                    self.place(member, inviter, payment)
                        .map_err(EngineError::from)
                });
                Self::log_result("join", member, Some(inviter), Some(payment), &result);
                result?;
            }
            Command::Relocate { member, parent } => {
                let result = self.relocate(member, parent);
                Self::log_result("relocate", member, parent, None, &result);
                result?;
            }
            Command::Promote { member } => {
                let result = self.try_promote(member);
                Self::log_result("promote", member, None, None, &result);
                result?;
            }
            Command::Reverse { bonus } => {
                let result = self.reverse_bonus(bonus);
                match &result {
                    Ok(entry) => {
                        info!(bonus, member = entry.recipient, amount = %entry.amount, "reverse applied");
                    }
                    Err(e) => {
                        info!(bonus, reason = %e, "reverse skipped");
                    }
                }
                result?;
            }
        }
        Ok(())
    }

    /// Add a member at participant status, before any placement.
    pub fn register(
        &mut self,
        member: MemberId,
        inviter: Option<MemberId>,
    ) -> Result<(), RegisterError> {
        let inviter = inviter.filter(|i| *i != member);
        let settings = self.settings.active_or_default();
        self.transact("register", settings.max_retries, |store| {
            if store.member(member).is_some() {
                return Err(RegisterError::DuplicateMember(member));
            }
            if let Some(inviter) = inviter {
                if store.member(inviter).is_none() {
                    return Err(RegisterError::InviterNotFound(inviter));
                }
            }
            let changes = ChangeSet {
                guards: vec![Guard::Unregistered(member)],
                members: vec![Member::new(member, inviter)],
                ..ChangeSet::default()
            };
            Ok((changes, ()))
        })?;
        Ok(())
    }

    /// Register `member` if needed and place it as a new tree root. No payment, no bonus.
    pub fn seed_root(&mut self, member: MemberId) -> Result<Placement, PlaceError> {
        match self.register(member, None) {
            Ok(()) | Err(RegisterError::DuplicateMember(_) | RegisterError::InviterNotFound(_)) => {}
            Err(RegisterError::Store(e)) => return Err(PlaceError::Store(e)),
            Err(RegisterError::Transient(attempts)) => return Err(PlaceError::Transient(attempts)),
        }
        self.place_with(member, member, None)
    }

    /// Place `member`, invited by `inviter`, after a payment of `payment`.
    ///
    /// Resolution, slot allocation, the node insert, bonus credits and the
    /// parent's promotion commit together or not at all.
    pub fn place(
        &mut self,
        member: MemberId,
        inviter: MemberId,
        payment: Amount,
    ) -> Result<Placement, PlaceError> {
        self.place_with(member, inviter, Some(payment))
    }

    /// Parent a member invited by `inviter` would be placed under right now.
    pub fn resolve_parent(&self, inviter: MemberId) -> Result<MemberId, PlaceError> {
        if self.store.member(inviter).is_none() {
            return Err(PlaceError::InviterNotFound(inviter));
        }
        let capacity = self.settings.active_or_default().capacity;
        Ok(placement::resolve_parent(&self.store, inviter, capacity).parent_or(inviter))
    }

    /// Lowest free position under `parent`.
    pub fn next_position(&self, parent: MemberId) -> Position {
        let capacity = self.settings.active_or_default().capacity;
        placement::next_position(&self.store.children(parent), capacity).position()
    }

    /// Level a child of `parent` would get.
    pub fn level_for(&self, parent: MemberId) -> Level {
        placement::level_for(self.store.node(parent))
    }

    /// Create the bonuses owed for an already placed member whose placement
    /// committed without them (e.g. a reconciled failure).
    pub fn apply_bonuses(&mut self, member: MemberId) -> Result<Vec<Bonus>, BonusError> {
        let settings = self.settings.active_or_default();
        let result = self.transact("bonus", settings.max_retries, |store| {
            Self::plan_bonuses(store, &settings, member, Utc::now())
        });
        match result {
            Ok((receipt, ())) => Ok(receipt.bonuses),
            Err(BonusError::Integrity(violation)) => {
                self.queue_reconciliation(member, None, None, &violation);
                Err(BonusError::Integrity(violation))
            }
            Err(e) => Err(e),
        }
    }

    /// Promote `member` by one rank if its first line supports it.
    pub fn try_promote(&mut self, member: MemberId) -> Result<Option<RankUpgrade>, PromoteError> {
        let settings = self.settings.active_or_default();
        let (receipt, ()) = self.transact("promote", settings.max_retries, |store| {
            let account = store
                .member(member)
                .ok_or(PromoteError::MemberNotFound(member))?;
            let partners = rank::first_line_partners(store, &store.children(member));
            let mut changes = ChangeSet::default();
            if let Some(upgrade) = rank::promotion(account, partners, &settings, Utc::now()) {
                changes.guard(Guard::Rank {
                    member,
                    expected: upgrade.from_rank,
                });
                changes.upgrades.push(upgrade);
            }
            Ok::<_, PromoteError>((changes, ()))
        })?;

        let upgrade = receipt.upgrades.first().copied();
        if let Some(u) = &upgrade {
            debug!(member, from = u.from_rank, to = u.to_rank, "rank upgraded");
        }
        Ok(upgrade)
    }

    /// Move `member` (and its subtree) under `parent`, or make it a root.
    pub fn relocate(
        &mut self,
        member: MemberId,
        parent: Option<MemberId>,
    ) -> Result<Relocation, RelocateError> {
        let settings = self.settings.active_or_default();
        let (_, relocation) = self.transact("relocate", settings.max_retries, |store| {
            relocation::plan(store, &settings, member, parent)
        })?;
        Ok(relocation)
    }

    /// Append a negative entry cancelling bonus `id` and debit its recipient.
    pub fn reverse_bonus(&mut self, id: BonusId) -> Result<Bonus, ReversalError> {
        let settings = self.settings.active_or_default();
        let (mut receipt, ()) = self.transact("reverse", settings.max_retries, |store| {
            let original = store.bonus(id).ok_or(ReversalError::BonusNotFound(id))?;
            if let BonusKind::Reversal { .. } = original.kind {
                return Err(ReversalError::NotReversible(id));
            }
            if store
                .bonuses()
                .any(|b| b.kind == BonusKind::Reversal { of: id })
            {
                return Err(ReversalError::AlreadyReversed(id));
            }
            let recipient = store
                .member(original.recipient)
                .ok_or(StoreError::UnknownMember(original.recipient))?;
            if recipient.balance < original.amount {
                return Err(ReversalError::InsufficientBalance(
                    recipient.id,
                    recipient.balance,
                    original.amount,
                ));
            }

            let changes = ChangeSet {
                guards: vec![
                    Guard::NotReversed(id),
                    Guard::Balance {
                        member: recipient.id,
                        at_least: original.amount,
                    },
                ],
                bonuses: vec![NewBonus {
                    recipient: recipient.id,
                    source: original.source,
                    amount: -original.amount,
                    kind: BonusKind::Reversal { of: id },
                    level: original.level,
                    created_at: Utc::now(),
                }],
                ..ChangeSet::default()
            };
            Ok((changes, ()))
        })?;

        receipt.bonuses.pop().ok_or_else(|| {
            ReversalError::Store(StoreError::Conflict(format!(
                "reversal of bonus {id} missing from commit receipt"
            )))
        })
    }

    /// Structure and earnings figures for `member`.
    pub fn stats(&self, member: MemberId) -> Result<MemberStats, StatsError> {
        stats::member_stats(&self.store, member)
    }

    /// Scan the whole tree for broken capacity, level and position invariants.
    pub fn audit(&self) -> Vec<IntegrityError> {
        stats::audit(&self.store, self.settings.active_or_default().capacity)
    }
}

/// Private API
impl<S: TreeStore> Engine<S> {
    /// Plan against fresh reads and commit, re-planning after each conflict.
    fn transact<P, E: UnitOfWorkError>(
        &mut self,
        op: &'static str,
        attempts: u32,
        mut plan: impl FnMut(&S) -> Result<(ChangeSet, P), E>,
    ) -> Result<(Receipt, P), E> {
        for attempt in 1..=attempts {
            let (changes, planned) = plan(&self.store)?;
            match self.store.commit(changes) {
                Ok(receipt) => return Ok((receipt, planned)),
                Err(StoreError::Conflict(reason)) => {
                    warn!(op, attempt, %reason, "commit conflict, re-planning");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(E::exhausted(attempts))
    }

    fn place_with(
        &mut self,
        member: MemberId,
        inviter: MemberId,
        payment: Option<Amount>,
    ) -> Result<Placement, PlaceError> {
        let settings = self.settings.active_or_default();
        let result = self.transact("place", settings.max_retries, |store| {
            placement::plan(store, &settings, member, inviter, payment, Utc::now())
        });

        let (receipt, target) = match result {
            Ok(done) => done,
            Err(PlaceError::Bonus(violation)) => {
                self.queue_reconciliation(member, Some(inviter), payment, &violation);
                return Err(PlaceError::Bonus(violation));
            }
            Err(e) => return Err(e),
        };

        for bonus in &receipt.bonuses {
            debug!(
                recipient = bonus.recipient,
                source = bonus.source,
                amount = %bonus.amount,
                kind = bonus.kind.tag(),
                "bonus credited"
            );
        }
        let promotion = receipt.upgrades.first().copied();
        if let Some(u) = &promotion {
            debug!(member = u.member, from = u.from_rank, to = u.to_rank, "rank upgraded");
        }

        Ok(Placement {
            member,
            parent: target.parent,
            level: target.level,
            position: target.position,
            bonuses: receipt.bonuses,
            promotion,
            seeded_inviter: target.seeded_inviter,
        })
    }

    fn plan_bonuses(
        store: &S,
        settings: &BonusSettings,
        member: MemberId,
        now: DateTime<Utc>,
    ) -> Result<(ChangeSet, ()), BonusError> {
        if store.member(member).is_none() {
            return Err(BonusError::MemberNotFound(member));
        }
        let node = *store
            .node(member)
            .ok_or(BonusError::NoExistingNode(member))?;
        let Some(parent) = node.parent_id else {
            return Ok((ChangeSet::default(), ()));
        };
        if store
            .bonuses()
            .any(|b| b.source == member && !matches!(b.kind, BonusKind::Reversal { .. }))
        {
            return Err(BonusError::AlreadyApplied(member));
        }

        let children = store.children(parent);
        let earlier: Vec<StructureNode> = children
            .iter()
            .filter(|c| c.user_id != member && c.seniority() < node.seniority())
            .copied()
            .collect();

        let mut changes = ChangeSet::default();
        changes.guard(Guard::Node(node));
        changes.guard(Guard::NoBonusesFrom(member));
        changes.bonuses = bonus::plan(parent, &earlier, member, node.level, settings, now)?;

        let partners = rank::first_line_partners(store, &children);
        if let Some(account) = store.member(parent) {
            if let Some(upgrade) = rank::promotion(account, partners, settings, now) {
                changes.guard(Guard::Rank {
                    member: parent,
                    expected: upgrade.from_rank,
                });
                changes.upgrades.push(upgrade);
            }
        }
        Ok((changes, ()))
    }

    fn ensure_registered(
        &mut self,
        member: MemberId,
        inviter: Option<MemberId>,
    ) -> Result<(), EngineError> {
        if self.store.member(member).is_none() {
            self.register(member, inviter)?;
        }
        Ok(())
    }

    fn queue_reconciliation(
        &mut self,
        member: MemberId,
        inviter: Option<MemberId>,
        payment: Option<Amount>,
        violation: &IntegrityError,
    ) {
        error!(member, ?inviter, %violation, "bonus stage failed, queued for reconciliation");
        self.reconciliation.push(ReconciliationItem {
            member,
            inviter,
            payment,
            reason: violation.to_string(),
            recorded_at: Utc::now(),
        });
    }

    /// Small helper to log `apply` results
    fn log_result<T, E: Display>(
        command: &str,
        member: MemberId,
        target: Option<MemberId>,
        amount: Option<Amount>,
        result: &Result<T, E>,
    ) {
        match (result, amount) {
            (Ok(_), Some(amt)) => {
                info!(member, target, amount = %amt, "{command} applied");
            }
            (Ok(_), None) => {
                info!(member, target, "{command} applied");
            }
            (Err(e), Some(amt)) => {
                info!(member, target, amount = %amt, reason = %e, "{command} skipped");
            }
            (Err(e), None) => {
                info!(member, target, reason = %e, "{command} skipped");
            }
        }
    }
}
