//! ## vtime-core::context
//! **Per-VM virtual time context**
//!
//! [`VirtualTime`] owns every piece of clock state for one virtual machine and
//! is shared by reference between the virtual CPU threads. Hot-path getters
//! never block; pause, resume and the control-path operations serialize on a
//! single short lock.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace};
use validator::Validate;
use vtime_config::{ConfigError, SyncConfig, VtimeConfig};

use crate::error::TimeError;
use crate::platform::Platform;
use crate::signals::{Caller, CallerRole, ClockKind, CpuId, Scheduler, TimerQueues};
use crate::stats::{ClockStats, StatsSnapshot};
use crate::time::convert::FREQUENCY_HZ;
use crate::time::primary::Transition;
use crate::time::sync::RearmOutcome;
use crate::time::{ClockState, PrimaryClock, RawClock, SyncClock, WarpDrive};

/// Highest catch-up percentage accepted by [`VirtualTime::start_catch_up`].
pub const MAX_CATCH_UP_PERCENTAGE: u32 = 10_000;

pub struct VirtualTime {
    platform: Arc<dyn Platform>,
    scheduler: Arc<dyn Scheduler>,
    queues: Arc<dyn TimerQueues>,
    raw: RawClock,
    primary: PrimaryClock,
    sync: SyncClock,
    lock: Mutex<()>,
    stats: ClockStats,
    timer_cpu: CpuId,
    sync_policy: SyncConfig,
}

impl fmt::Debug for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualTime")
            .field("raw", &self.raw)
            .field("primary", &self.primary)
            .field("sync", &self.sync)
            .field("timer_cpu", &self.timer_cpu)
            .finish_non_exhaustive()
    }
}

impl VirtualTime {
    pub fn new(
        config: &VtimeConfig,
        platform: Arc<dyn Platform>,
        scheduler: Arc<dyn Scheduler>,
        queues: Arc<dyn TimerQueues>,
    ) -> Result<Self, TimeError> {
        let clock = &config.clock;
        if clock.timer_cpu >= clock.vcpu_count {
            return Err(TimeError::InvalidTimerCpu {
                cpu: clock.timer_cpu,
                vcpus: clock.vcpu_count,
            });
        }
        if !WarpDrive::is_valid_percentage(clock.warp_percentage) {
            return Err(TimeError::InvalidWarpPercentage(clock.warp_percentage));
        }
        config.validate().map_err(ConfigError::from)?;

        debug!(
            vcpus = clock.vcpu_count,
            timer_cpu = clock.timer_cpu,
            raw_source = ?clock.raw_source,
            "virtual time initialized"
        );
        Ok(Self {
            platform,
            scheduler,
            queues,
            raw: RawClock::from_config(clock),
            primary: PrimaryClock::new(clock.vcpu_count, clock.warp_percentage),
            sync: SyncClock::new(),
            lock: Mutex::new(()),
            stats: ClockStats::new(),
            timer_cpu: CpuId(clock.timer_cpu),
            sync_policy: config.sync.clone(),
        })
    }

    /// Handle for one calling thread.
    pub fn access(&self, caller: Caller) -> ClockAccess<'_> {
        ClockAccess {
            time: self,
            role: caller.role(self.timer_cpu),
        }
    }

    pub fn timer_cpu(&self) -> CpuId {
        self.timer_cpu
    }

    /// A virtual CPU starts executing. The first one starts the clock.
    pub fn resume(&self) -> Result<(), TimeError> {
        let _guard = self.lock.lock();
        let transition = self.primary.resume_with(|| {
            self.raw.reset();
            self.raw_now(CallerRole::Other)
        })?;
        if transition == Transition::Started {
            self.sync.start_ticking();
            self.stats.record_resume();
            debug!(offset = self.primary.offset(), "virtual clock resumed");
        }
        Ok(())
    }

    /// A virtual CPU stops executing. The last one freezes both clocks.
    pub fn pause(&self) -> Result<(), TimeError> {
        let _guard = self.lock.lock();
        let transition = self.primary.pause_with(|| self.raw_now(CallerRole::Other))?;
        if let Transition::Stopped(frozen) = transition {
            if self.sync.is_ticking() {
                let boundary = self.queues.head_expiry(ClockKind::VirtualSync);
                self.sync
                    .freeze(frozen.saturating_sub(self.sync.offset()).min(boundary));
            }
            self.stats.record_pause();
            debug!(frozen, "virtual clock paused");
        }
        Ok(())
    }

    pub fn primary_now(&self) -> u64 {
        self.read_primary(CallerRole::Other, true)
    }

    pub fn primary_now_no_check(&self) -> u64 {
        self.read_primary(CallerRole::Other, false)
    }

    pub fn sync_now(&self) -> u64 {
        self.read_sync(CallerRole::Other, true)
    }

    pub fn sync_now_no_check(&self) -> u64 {
        self.read_sync(CallerRole::Other, false)
    }

    /// How far the synchronized clock trails, excluding given-up time.
    pub fn lag(&self) -> u64 {
        self.sync.lag()
    }

    pub fn catch_up_percent(&self) -> u32 {
        self.sync.catch_up_percentage()
    }

    pub const fn frequency(&self) -> u64 {
        FREQUENCY_HZ
    }

    /// Changes the warp drive percentage. Only allowed while paused.
    pub fn set_warp_drive(&self, percentage: u32) -> Result<(), TimeError> {
        if !WarpDrive::is_valid_percentage(percentage) {
            return Err(TimeError::InvalidWarpPercentage(percentage));
        }
        let _guard = self.lock.lock();
        if self.primary.is_ticking() {
            return Err(TimeError::WarpWhileTicking);
        }
        self.primary.warp().set_percentage(percentage);
        info!(percentage, "warp drive set");
        Ok(())
    }

    pub fn warp_drive(&self) -> u32 {
        self.primary.warp().percentage()
    }

    /// Restarts the synchronized clock after it stopped at a timer boundary.
    ///
    /// Returns `None` when it was already ticking.
    pub fn rearm_sync(&self) -> Result<Option<RearmOutcome>, TimeError> {
        let _guard = self.lock.lock();
        if !self.primary.is_ticking() {
            return Err(TimeError::PrimaryStopped);
        }
        if self.sync.is_ticking() {
            return Ok(None);
        }

        let now = self.primary.scaled(self.raw_now(CallerRole::Other));
        let outcome = self.sync.rearm(now, &self.sync_policy, &self.stats);
        match outcome {
            RearmOutcome::GaveUp { lag } => {
                info!(lag, given_up = self.sync.given_up(), "synchronized clock gave up on lag")
            }
            RearmOutcome::CatchingUp { lag, percentage } => {
                debug!(lag, percentage, "synchronized clock catching up")
            }
            RearmOutcome::Carried { lag } => trace!(lag, "synchronized clock re-armed"),
        }
        Ok(Some(outcome))
    }

    /// Forces catch-up on at `percentage`.
    pub fn start_catch_up(&self, percentage: u32) -> Result<(), TimeError> {
        if percentage == 0 || percentage > MAX_CATCH_UP_PERCENTAGE {
            return Err(TimeError::InvalidCatchUpPercentage(percentage));
        }
        let _guard = self.lock.lock();
        let now = match self.primary.state() {
            ClockState::Ticking => self.primary.scaled(self.raw_now(CallerRole::Other)),
            ClockState::Stopped(frozen) => frozen,
        };
        self.sync.begin_catch_up(percentage, now);
        debug!(percentage, lag = self.sync.lag(), "catch-up started");
        Ok(())
    }

    pub fn primary_state(&self) -> ClockState {
        self.primary.state()
    }

    pub fn sync_state(&self) -> ClockState {
        self.sync.state()
    }

    pub fn ticking_count(&self) -> u32 {
        self.primary.ticking_count()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn raw_now(&self, role: CallerRole) -> u64 {
        self.raw.now(&*self.platform, role, &*self.scheduler, &self.stats)
    }

    fn read_primary(&self, role: CallerRole, check_timers: bool) -> u64 {
        match self.primary.state() {
            ClockState::Stopped(frozen) => frozen,
            ClockState::Ticking => {
                let now = self.primary.scaled(self.raw_now(role));
                if check_timers {
                    self.poll_timers(now);
                }
                now
            }
        }
    }

    fn read_sync(&self, role: CallerRole, check_timers: bool) -> u64 {
        if let ClockState::Stopped(frozen) = self.sync.state() {
            return frozen;
        }

        let now = self.primary.scaled(self.raw_now(role));
        if check_timers {
            self.poll_timers(now);
        }

        let offset = self.sync.offset_for(now, &self.lock, &self.stats);
        let value = now.saturating_sub(offset);
        let boundary = self.queues.head_expiry(ClockKind::VirtualSync);
        if value < boundary {
            return value;
        }

        self.sync.clamp_at(boundary, &self.lock, &*self.scheduler, &self.stats);
        // Unlike `poll_timers`, draining queues do not suppress this: the clock
        // stays stopped until the timer CPU re-arms it.
        if check_timers && !self.scheduler.timer_pending(self.timer_cpu) {
            self.raise_timer();
        }
        boundary
    }

    /// Raises the timer CPU's pending flag if either queue has come due at
    /// primary time `now`.
    fn poll_timers(&self, now: u64) {
        if self.scheduler.timer_pending(self.timer_cpu) || self.queues.is_draining() {
            return;
        }
        let primary_due = self.queues.head_expiry(ClockKind::Virtual) <= now;
        let sync_due = || {
            self.sync.is_ticking()
                && now
                    .checked_sub(self.sync.offset())
                    .is_some_and(|sync_now| {
                        self.queues.head_expiry(ClockKind::VirtualSync) <= sync_now
                    })
        };
        if primary_due || sync_due() {
            self.raise_timer();
        }
    }

    fn raise_timer(&self) {
        self.scheduler.raise_timer_pending(self.timer_cpu);
        self.stats.record_timer_raise();
        trace!(cpu = %self.timer_cpu, "timer pending raised");
    }
}

/// Clock getters bound to one caller's role.
#[derive(Clone, Copy)]
pub struct ClockAccess<'a> {
    time: &'a VirtualTime,
    role: CallerRole,
}

impl ClockAccess<'_> {
    pub fn role(&self) -> CallerRole {
        self.role
    }

    pub fn primary_now(&self) -> u64 {
        self.time.read_primary(self.role, true)
    }

    pub fn primary_now_no_check(&self) -> u64 {
        self.time.read_primary(self.role, false)
    }

    pub fn sync_now(&self) -> u64 {
        self.time.read_sync(self.role, true)
    }

    pub fn sync_now_no_check(&self) -> u64 {
        self.time.read_sync(self.role, false)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tracing_test::traced_test;

    use super::*;
    use crate::test_support::{config, Harness};

    const MS: u64 = 1_000_000;

    /// Stops the synchronized clock at `at` and lets the primary run `lag` past it.
    fn build_lag(h: &Harness, at: u64, lag: u64) {
        h.queues.set_expiry(ClockKind::VirtualSync, at);
        h.platform.advance(at);
        assert_eq!(h.time.sync_now_no_check(), at);
        h.platform.advance(lag);
        h.queues.set_expiry(ClockKind::VirtualSync, u64::MAX);
    }

    #[test]
    fn timer_cpu_must_exist() {
        let h = Harness::new(2);
        let mut cfg = config(2);
        cfg.clock.timer_cpu = 2;
        let err = VirtualTime::new(&cfg, h.platform.clone(), h.scheduler.clone(), h.queues.clone())
            .unwrap_err();
        assert!(matches!(err, TimeError::InvalidTimerCpu { cpu: 2, vcpus: 2 }));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let h = Harness::new(1);
        let mut cfg = config(1);
        cfg.clock.cas_early_exit_below = cfg.clock.cas_retry_limit + 1;
        let err = VirtualTime::new(&cfg, h.platform.clone(), h.scheduler.clone(), h.queues.clone())
            .unwrap_err();
        assert!(matches!(err, TimeError::Config(ConfigError::Validation(_))));
    }

    #[test]
    fn clock_starts_paused_at_zero() {
        let h = Harness::new(1);
        assert_eq!(h.time.primary_state(), ClockState::Stopped(0));
        assert_eq!(h.time.primary_now(), 0);
        assert_eq!(h.time.frequency(), 1_000_000_000);
    }

    #[test]
    fn pause_and_resume_are_continuous() {
        let h = Harness::new(1);
        h.time.resume().unwrap();
        h.platform.advance(5 * MS);
        assert_eq!(h.time.primary_now(), 5 * MS);

        h.time.pause().unwrap();
        h.platform.advance(1_000 * MS);
        assert_eq!(h.time.primary_now(), 5 * MS);
        assert_eq!(h.time.sync_now(), 5 * MS);

        h.time.resume().unwrap();
        assert_eq!(h.time.primary_now(), 5 * MS);
        h.platform.advance(MS);
        assert_eq!(h.time.primary_now(), 6 * MS);
        assert_eq!(h.time.sync_now(), 6 * MS);

        let stats = h.time.stats();
        assert_eq!((stats.resumes, stats.pauses), (2, 1));
        assert_eq!(stats.anomalies, 0);
    }

    #[test]
    fn resume_count_is_bounded_by_vcpus() {
        let h = Harness::new(2);
        h.time.resume().unwrap();
        h.time.resume().unwrap();
        assert!(matches!(
            h.time.resume(),
            Err(TimeError::RefCountViolation { op: "resume", .. })
        ));
        assert_eq!(h.time.ticking_count(), 2);

        h.time.pause().unwrap();
        h.time.pause().unwrap();
        assert!(matches!(
            h.time.pause(),
            Err(TimeError::RefCountViolation { op: "pause", .. })
        ));
        assert!(!h.time.primary_state().is_ticking());
    }

    #[test]
    fn paused_reads_have_no_side_effects() {
        let h = Harness::new(1);
        h.queues.set_expiry(ClockKind::Virtual, 0);
        assert_eq!(h.time.primary_now(), 0);
        assert!(!h.scheduler.is_pending(CpuId(0)));
        assert_eq!(h.time.stats().timer_raises, 0);
    }

    #[test]
    fn due_timer_raises_pending_flag_once() {
        let h = Harness::new(2);
        h.time.resume().unwrap();
        h.queues.set_expiry(ClockKind::Virtual, MS);

        h.platform.advance(2 * MS);
        h.time.primary_now_no_check();
        assert!(!h.scheduler.is_pending(CpuId(0)));

        h.time.primary_now();
        h.time.primary_now();
        assert!(h.scheduler.is_pending(CpuId(0)));
        assert!(!h.scheduler.is_pending(CpuId(1)));
        assert_eq!(h.time.stats().timer_raises, 1);
    }

    #[test]
    fn draining_queues_suppress_the_signal() {
        let h = Harness::new(1);
        h.time.resume().unwrap();
        h.queues.set_expiry(ClockKind::Virtual, MS);
        h.queues.set_draining(true);
        h.platform.advance(2 * MS);

        h.time.primary_now();
        assert!(!h.scheduler.is_pending(CpuId(0)));
    }

    #[test]
    fn sync_timer_due_raises_from_primary_read() {
        let h = Harness::new(1);
        h.time.resume().unwrap();
        h.queues.set_expiry(ClockKind::VirtualSync, MS);
        h.platform.advance(2 * MS);

        h.time.primary_now();
        assert!(h.scheduler.is_pending(CpuId(0)));
    }

    #[test]
    fn sync_clock_stops_at_timer_boundary() {
        let h = Harness::new(1);
        h.time.resume().unwrap();
        h.queues.set_expiry(ClockKind::VirtualSync, 3 * MS);
        h.platform.advance(5 * MS);

        assert_eq!(h.time.sync_now(), 3 * MS);
        assert_eq!(h.time.sync_state(), ClockState::Stopped(3 * MS));
        assert!(h.scheduler.sync_boundary_raised());
        assert!(h.scheduler.is_pending(CpuId(0)));

        h.platform.advance(5 * MS);
        assert_eq!(h.time.sync_now(), 3 * MS);
        assert_eq!(h.time.primary_now_no_check(), 10 * MS);
        assert_eq!(h.time.stats().sync_clamps, 1);
    }

    #[test]
    fn boundary_clamp_wakes_timer_cpu_while_draining() {
        let h = Harness::new(2);
        h.time.resume().unwrap();
        h.queues.set_expiry(ClockKind::VirtualSync, 3 * MS);
        h.queues.set_draining(true);
        h.platform.advance(5 * MS);

        h.time.primary_now();
        assert!(!h.scheduler.is_pending(CpuId(0)));

        assert_eq!(h.time.sync_now(), 3 * MS);
        assert!(h.scheduler.is_pending(CpuId(0)));
        assert!(!h.scheduler.is_pending(CpuId(1)));
        assert_eq!(h.time.stats().timer_raises, 1);
    }

    #[test]
    fn rearm_continues_from_frozen_value_and_catches_up() {
        let h = Harness::new(1);
        h.time.resume().unwrap();
        build_lag(&h, 3 * MS, 2 * MS);

        let outcome = h.time.rearm_sync().unwrap();
        assert_eq!(
            outcome,
            Some(RearmOutcome::CatchingUp {
                lag: 2 * MS,
                percentage: 10
            })
        );
        assert_eq!(h.time.sync_now_no_check(), 3 * MS);
        assert_eq!(h.time.catch_up_percent(), 10);

        // 10% of 10ms comes off the 2ms lag
        h.platform.advance(10 * MS);
        assert_eq!(h.time.sync_now_no_check(), 14 * MS);
        assert_eq!(h.time.lag(), MS);

        assert_eq!(h.time.rearm_sync().unwrap(), None);
    }

    #[test]
    fn contended_lock_only_delays_catch_up() {
        let h = Harness::new(1);
        h.time.resume().unwrap();
        build_lag(&h, 3 * MS, 2 * MS);
        h.time.rearm_sync().unwrap();
        h.platform.advance(10 * MS);

        {
            let _held = h.time.lock.lock();
            assert_eq!(h.time.sync_now_no_check(), 13 * MS);
        }
        assert_eq!(h.time.stats().catch_up_skipped, 1);
        assert_eq!(h.time.lag(), 2 * MS);

        assert_eq!(h.time.sync_now_no_check(), 14 * MS);
        assert_eq!(h.time.lag(), MS);
    }

    #[test]
    #[traced_test]
    fn excessive_lag_is_given_up() {
        let h = Harness::new(1);
        h.time.resume().unwrap();
        build_lag(&h, MS, 61_000 * MS);

        let outcome = h.time.rearm_sync().unwrap();
        assert_eq!(outcome, Some(RearmOutcome::GaveUp { lag: 61_000 * MS }));
        assert_eq!(h.time.lag(), 0);
        assert_eq!(h.time.catch_up_percent(), 0);
        assert_eq!(h.time.sync_now_no_check(), MS);
        assert!(logs_contain("gave up on lag"));
    }

    #[test]
    fn catch_up_after_give_up_converges_to_given_up_offset() {
        let h = Harness::new(1);
        h.time.resume().unwrap();
        build_lag(&h, MS, 61_000 * MS);
        h.time.rearm_sync().unwrap();
        let given_up = h.time.sync.given_up();
        assert_eq!(given_up, 61_000 * MS);

        h.queues.set_expiry(ClockKind::VirtualSync, 3 * MS);
        h.platform.advance(2 * MS);
        assert_eq!(h.time.sync_now_no_check(), 3 * MS);
        h.platform.advance(10 * MS);
        h.queues.set_expiry(ClockKind::VirtualSync, u64::MAX);

        let outcome = h.time.rearm_sync().unwrap();
        assert_eq!(
            outcome,
            Some(RearmOutcome::CatchingUp {
                lag: 10 * MS,
                percentage: 25
            })
        );

        let mut last_value = h.time.sync_now_no_check();
        let mut steps = 0;
        while h.time.catch_up_percent() != 0 {
            h.platform.advance(MS);
            let value = h.time.sync_now_no_check();
            assert!(value > last_value);
            assert!(h.time.sync.offset() >= given_up);
            last_value = value;
            steps += 1;
        }
        // 10ms at 25% of each 1ms step
        assert_eq!(steps, 40);
        assert_eq!(h.time.sync.offset(), h.time.sync.given_up());
        assert_eq!(h.time.lag(), 0);
        assert_eq!(
            h.time.sync_now_no_check(),
            h.time.primary_now_no_check() - given_up
        );
    }

    #[test]
    fn rearm_needs_a_ticking_primary() {
        let h = Harness::new(1);
        assert!(matches!(h.time.rearm_sync(), Err(TimeError::PrimaryStopped)));
    }

    #[test]
    fn pause_freezes_sync_behind_primary() {
        let h = Harness::new(1);
        h.time.resume().unwrap();
        build_lag(&h, 3 * MS, 2 * MS);
        h.time.rearm_sync().unwrap();

        h.time.pause().unwrap();
        assert_eq!(h.time.primary_state(), ClockState::Stopped(5 * MS));
        assert_eq!(h.time.sync_state(), ClockState::Stopped(3 * MS));
    }

    #[test]
    fn warp_drive_only_changes_while_paused() {
        let h = Harness::new(1);
        assert!(matches!(
            h.time.set_warp_drive(1),
            Err(TimeError::InvalidWarpPercentage(1))
        ));

        h.time.set_warp_drive(200).unwrap();
        assert_eq!(h.time.warp_drive(), 200);

        h.time.resume().unwrap();
        assert!(matches!(
            h.time.set_warp_drive(100),
            Err(TimeError::WarpWhileTicking)
        ));
        h.platform.advance(MS);
        assert_eq!(h.time.primary_now(), 2 * MS);
    }

    #[test]
    fn forced_catch_up_validates_percentage() {
        let h = Harness::new(1);
        assert!(matches!(
            h.time.start_catch_up(0),
            Err(TimeError::InvalidCatchUpPercentage(0))
        ));
        assert!(matches!(
            h.time.start_catch_up(10_001),
            Err(TimeError::InvalidCatchUpPercentage(10_001))
        ));
        h.time.start_catch_up(300).unwrap();
        assert_eq!(h.time.catch_up_percent(), 300);
    }

    #[test]
    fn access_roles_follow_timer_cpu() {
        let h = Harness::new(2);
        assert_eq!(
            h.time.access(Caller::Vcpu(CpuId(0))).role(),
            CallerRole::TimerOwner
        );
        assert_eq!(h.time.access(Caller::Vcpu(CpuId(1))).role(), CallerRole::Other);
        assert_eq!(h.time.access(Caller::External).role(), CallerRole::Other);

        h.time.resume().unwrap();
        h.platform.advance(MS);
        let access = h.time.access(Caller::Vcpu(CpuId(0)));
        assert_eq!(access.primary_now(), MS);
        assert_eq!(access.sync_now(), MS);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn catch_up_converges_monotonically(
            lag in 750_000u64..59_000 * MS,
            step in MS..50 * MS,
        ) {
            let h = Harness::new(1);
            h.time.resume().unwrap();
            build_lag(&h, MS, lag);
            let outcome = h.time.rearm_sync().unwrap();
            let is_catching_up = matches!(outcome, Some(RearmOutcome::CatchingUp { .. }));
            prop_assert!(is_catching_up);

            let mut last_value = h.time.sync_now_no_check();
            let mut last_lag = h.time.lag();
            let mut calls = 0;
            while h.time.catch_up_percent() != 0 {
                h.platform.advance(step);
                let value = h.time.sync_now_no_check();
                prop_assert!(value >= last_value);
                prop_assert!(h.time.lag() <= last_lag);
                last_value = value;
                last_lag = h.time.lag();
                calls += 1;
                prop_assert!(calls < 1_000_000);
            }
            prop_assert_eq!(h.time.lag(), 0);
            prop_assert_eq!(h.time.sync_now_no_check(), h.time.primary_now_no_check());
        }
    }
}
