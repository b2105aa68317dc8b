//! The pausable virtual clock.
//!
//! Ticking is reference counted: every virtual CPU that resumes holds one
//! reference. The clock only really starts on the first resume and only
//! really stops on the last pause. Transitions are serialized by the clock
//! lock held in [`crate::VirtualTime`]; readers only touch atomics.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::TimeError;
use crate::time::warp::WarpDrive;
use crate::time::ClockState;

/// Outcome of a resume or pause call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The clock went from stopped to ticking.
    Started,
    /// The clock went from ticking to stopped at this value.
    Stopped(u64),
    /// Only the reference count changed.
    Nested,
}

#[derive(Debug)]
pub struct PrimaryClock {
    ticking: AtomicU32,
    offset: AtomicU64,
    frozen: AtomicU64,
    warp: WarpDrive,
    vcpus: u32,
}

impl PrimaryClock {
    pub fn new(vcpus: u32, warp_percentage: u32) -> Self {
        Self {
            ticking: AtomicU32::new(0),
            offset: AtomicU64::new(0),
            frozen: AtomicU64::new(0),
            warp: WarpDrive::new(warp_percentage),
            vcpus,
        }
    }

    pub fn state(&self) -> ClockState {
        if self.ticking.load(Ordering::Acquire) > 0 {
            ClockState::Ticking
        } else {
            ClockState::Stopped(self.frozen.load(Ordering::Acquire))
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.ticking_count() > 0
    }

    pub fn ticking_count(&self) -> u32 {
        self.ticking.load(Ordering::Acquire)
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    pub fn warp(&self) -> &WarpDrive {
        &self.warp
    }

    /// Virtual time for raw time `raw` while ticking.
    #[inline]
    pub fn scaled(&self, raw: u64) -> u64 {
        self.warp.scale(raw, self.offset())
    }

    /// Takes one ticking reference. On the first one, `read_raw` supplies the
    /// raw time the clock restarts from, continuing exactly at the frozen value.
    pub(crate) fn resume_with(
        &self,
        read_raw: impl FnOnce() -> u64,
    ) -> Result<Transition, TimeError> {
        let ticking = self.ticking.load(Ordering::Acquire);
        if ticking >= self.vcpus {
            return Err(TimeError::RefCountViolation {
                op: "resume",
                ticking,
                vcpus: self.vcpus,
            });
        }

        if ticking > 0 {
            self.ticking.store(ticking + 1, Ordering::Release);
            return Ok(Transition::Nested);
        }

        let raw = read_raw();
        self.warp.set_start(raw);
        let frozen = self.frozen.load(Ordering::Acquire);
        self.offset.store(raw.wrapping_sub(frozen), Ordering::Release);
        self.ticking.store(1, Ordering::Release);
        Ok(Transition::Started)
    }

    /// Drops one ticking reference. On the last one, `read_raw` supplies the
    /// raw time whose virtual equivalent becomes the frozen value.
    pub(crate) fn pause_with(
        &self,
        read_raw: impl FnOnce() -> u64,
    ) -> Result<Transition, TimeError> {
        let ticking = self.ticking.load(Ordering::Acquire);
        match ticking {
            0 => Err(TimeError::RefCountViolation {
                op: "pause",
                ticking,
                vcpus: self.vcpus,
            }),
            1 => {
                let frozen = self.scaled(read_raw());
                self.frozen.store(frozen, Ordering::Release);
                self.ticking.store(0, Ordering::Release);
                Ok(Transition::Stopped(frozen))
            }
            _ => {
                self.ticking.store(ticking - 1, Ordering::Release);
                Ok(Transition::Nested)
            }
        }
    }
}
