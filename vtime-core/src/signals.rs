//! Collaborators on the consuming side of the clocks: the timer queues whose
//! deadlines are checked, and the scheduler that receives the resulting signals.

use std::fmt;

/// Virtual CPU index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vcpu{}", self.0)
    }
}

/// The two virtual clocks timers can be scheduled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockKind {
    Virtual,
    VirtualSync,
}

/// Read-only view of the timer queues.
pub trait TimerQueues: Send + Sync {
    /// Expiry of the earliest timer on `clock`, `u64::MAX` when the queue is empty.
    fn head_expiry(&self, clock: ClockKind) -> u64;

    /// True while the queues are being run; suppresses redundant signals.
    fn is_draining(&self) -> bool;
}

/// Signals raised towards the virtual CPU scheduler.
pub trait Scheduler: Send + Sync {
    fn timer_pending(&self, cpu: CpuId) -> bool;

    /// Sets the pending-timer flag on `cpu` and wakes it. Idempotent.
    fn raise_timer_pending(&self, cpu: CpuId);

    /// The synchronized clock stopped at its timer boundary.
    fn raise_sync_boundary(&self);

    /// Asks for a clock re-check at the next natural context switch.
    fn request_resync(&self);
}

/// Who is asking for the time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Vcpu(CpuId),
    External,
}

/// How hard a caller may push when publishing a raw timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerRole {
    /// The timer-owning virtual CPU; always uses the full retry budget.
    TimerOwner,
    /// Everyone else; may give up early under contention.
    Other,
}

impl Caller {
    pub fn role(self, timer_cpu: CpuId) -> CallerRole {
        match self {
            Caller::Vcpu(cpu) if cpu == timer_cpu => CallerRole::TimerOwner,
            _ => CallerRole::Other,
        }
    }
}
