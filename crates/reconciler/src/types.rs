//! Core types for the reconciler.

use spawner_broker::TicketId;

/// Tickets the pool believes it currently holds, in acquisition order.
///
/// This is a belief, not a cache: the broker is the source of truth and the
/// set is only corrected by later cycles. It lives in memory only, so a
/// restarted process starts empty and forgets tickets it used to own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedTicketSet {
    tickets: Vec<TicketId>,
}

impl OwnedTicketSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly requested ticket.
    pub fn push(&mut self, id: TicketId) {
        self.tickets.push(id);
    }

    /// Forget a ticket. Returns whether it was present.
    pub fn remove(&mut self, id: &TicketId) -> bool {
        self.tickets
            .iter()
            .position(|t| t == id)
            .map(|index| self.tickets.remove(index))
            .is_some()
    }

    /// Whether the ticket is owned.
    pub fn contains(&self, id: &TicketId) -> bool {
        self.tickets.contains(id)
    }

    /// Owned tickets in acquisition order.
    pub fn iter(&self) -> impl Iterator<Item = &TicketId> {
        self.tickets.iter()
    }

    /// Number of owned tickets.
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// Whether nothing is owned.
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

impl FromIterator<TicketId> for OwnedTicketSet {
    fn from_iter<I: IntoIterator<Item = TicketId>>(iter: I) -> Self {
        Self {
            tickets: iter.into_iter().collect(),
        }
    }
}

/// Why a ticket survived a stop attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The broker has not assigned a resource yet.
    NotReady,
    /// The release hook failed.
    ReleaseFailed,
    /// The release hook could not be run.
    ReleaseError,
    /// The broker rejected or could not answer a collect or close.
    BrokerError,
}

/// Result of a best-effort stop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOutcome {
    /// Tickets released and closed, in the order they were stopped.
    pub stopped: Vec<TicketId>,
    /// Tickets that were tried and kept.
    pub skipped: Vec<(TicketId, SkipReason)>,
}

impl StopOutcome {
    /// Check if every attempted ticket was stopped.
    pub fn all_succeeded(&self) -> bool {
        self.skipped.is_empty()
    }

    /// Get the number of stopped tickets.
    pub fn stopped_count(&self) -> usize {
        self.stopped.len()
    }

    /// Get the number of skipped tickets.
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// What a cycle did about the drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleAction {
    /// Owned count already matched.
    Idle,
    /// New tickets were started.
    Started { tickets: Vec<TicketId> },
    /// A stop was attempted.
    Stopped {
        /// How many removals were asked for.
        requested: usize,
        /// What actually happened.
        outcome: StopOutcome,
    },
}

/// Summary of one reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Desired count reported by the converge-to hook.
    pub desired: i64,
    /// Owned count when the cycle began.
    pub owned_before: usize,
    /// Owned count when the cycle ended.
    pub owned_after: usize,
    /// Action taken.
    pub action: CycleAction,
}

impl CycleReport {
    /// Desired minus owned at the start of the cycle.
    pub fn drift(&self) -> i64 {
        drift(self.desired, self.owned_before)
    }

    /// Whether the owned count matches the desired count after the cycle.
    pub fn converged(&self) -> bool {
        drift(self.desired, self.owned_after) == 0
    }
}

/// Desired minus owned; positive means grow, negative means shrink.
pub fn drift(desired: i64, owned: usize) -> i64 {
    desired.saturating_sub(i64::try_from(owned).unwrap_or(i64::MAX))
}
