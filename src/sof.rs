//! USB frame timing
//!
//! A [`FrameClock`] turns start-of-frame (SOF) samples into a frame time
//! estimate. Frame times are microseconds from the same free-running counter
//! that timestamps SOF interrupts. They wrap at `u32::MAX`.
//!
//! # Locked and unlocked
//!
//! When the controller reports a genuine SOF, the clock records a *direct*
//! sample and becomes [`Locked`](LockState::Locked). The direct sample is
//! trusted until its *end of availability*, which is one (smoothed) frame
//! interval after the sample, less a safety margin. Past that point the clock
//! is [`Unlocked`](LockState::Unlocked), and the estimate is *synthesized*: it
//! extrapolates whole frame intervals from the last synthetic sample. A timer
//! can keep the synthetic sample moving with
//! [`record_synthetic_tick()`](FrameClock::record_synthetic_tick) while SOF
//! interrupts are missing.
//!
//! Every direct sample is compared with the synthetic prediction for the same
//! moment. The signed error goes into a small [`ErrorHistory`], and the
//! cumulative error biases later synthetic ticks. Predictions step with the
//! same bias, so a bias that overshoots shows up as an opposite error, and
//! the cumulative error settles instead of compounding.
//!
//! # Concurrency
//!
//! Mutators take a critical section, and publish all fields under a sequence
//! counter. Readers never take the critical section on the fast path; they
//! retry until they observe a complete update. This means that you may read
//! the frame time from any context, even while an interrupt updates the clock.
//!
//! # Example
//!
//! ```
//! use usbd_core::sof::{FrameClock, FrameClockConfig, LockState, Speed};
//!
//! let clock = FrameClock::new(FrameClockConfig::from(Speed::High));
//! assert_eq!(clock.smoothed_interval(), 125);
//!
//! clock.record_direct_sample(1_000);
//! clock.record_direct_sample(1_125);
//! assert_eq!(clock.lock_state(), LockState::Locked);
//! assert_eq!(clock.frame_time_32(1_200), 1_125);
//!
//! // SOF interrupts stop; we're past the end of availability.
//! assert_eq!(clock.frame_time_32(1_400), 1_375);
//! assert_eq!(clock.lock_state(), LockState::Unlocked);
//! ```

use crate::{Error, Result};
use core::{
    cell::RefCell,
    sync::atomic::{fence, AtomicU16, AtomicU32, AtomicU8, Ordering},
};
use critical_section::Mutex;

/// Number of samples kept in the [`ErrorHistory`].
pub const ERROR_HISTORY_DEPTH: usize = 4;

/// Exponential smoothing weight, as a shift: 1/8 new, 7/8 old.
const SMOOTHING_SHIFT: u32 = 3;

/// Fractional bits kept by the smoothed interval, between updates.
const SMOOTHING_FRACTION: u32 = 8;

/// Synthetic tick bias, as a shift of the cumulative error: 1/16.
const BIAS_SHIFT: u32 = 4;

/// Synthetic tick bias limit, as a shift of the smoothed interval: 1/8.
const BIAS_LIMIT_SHIFT: u32 = 3;

/// USB low / full / high speed setting.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Speed {
    /// Low / full speed: 1ms frames.
    LowFull,
    /// High speed: 125us microframes.
    #[default]
    High,
}

impl Speed {
    /// Returns the nominal frame interval, in microseconds
    pub const fn interval_us(self) -> u16 {
        match self {
            Speed::LowFull => 1_000,
            Speed::High => 125,
        }
    }
}

/// Frame clock configuration
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct FrameClockConfig {
    /// Nominal frame interval, in microseconds.
    pub interval_us: u16,
    /// Microseconds before the next expected SOF at which a direct sample
    /// stops being trusted.
    pub margin_us: u8,
}

impl FrameClockConfig {
    pub const fn new(interval_us: u16, margin_us: u8) -> Self {
        Self {
            interval_us,
            margin_us,
        }
    }
}

impl From<Speed> for FrameClockConfig {
    /// Uses a margin of 1/8 of the interval
    fn from(speed: Speed) -> Self {
        let interval_us = speed.interval_us();
        let margin = (interval_us >> 3).min(u8::MAX.into());
        Self::new(interval_us, margin as u8)
    }
}

impl Default for FrameClockConfig {
    fn default() -> Self {
        Speed::default().into()
    }
}

/// Is the direct sample trustworthy?
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum LockState {
    /// A fresh direct sample is available.
    Locked = 0,
    /// The estimate comes from synthesis.
    Unlocked = 1,
}

impl LockState {
    fn from_bits(bits: u8) -> Self {
        if bits == LockState::Locked as u8 {
            LockState::Locked
        } else {
            LockState::Unlocked
        }
    }
}

/// One direct sample, compared against the synthetic prediction
///
/// Sample values are truncated to 16 bits.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ErrorSample {
    pub direct: u16,
    pub synthetic: u16,
    /// `direct - synthetic`, saturated
    pub error: i16,
}

/// The last [`ERROR_HISTORY_DEPTH`] synthesis errors, and their running sum
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ErrorHistory {
    index: u8,
    len: u8,
    direct: [u16; ERROR_HISTORY_DEPTH],
    synthetic: [u16; ERROR_HISTORY_DEPTH],
    error: [i16; ERROR_HISTORY_DEPTH],
    cumulative: i64,
}

impl ErrorHistory {
    const fn new() -> Self {
        Self {
            index: 0,
            len: 0,
            direct: [0; ERROR_HISTORY_DEPTH],
            synthetic: [0; ERROR_HISTORY_DEPTH],
            error: [0; ERROR_HISTORY_DEPTH],
            cumulative: 0,
        }
    }

    fn push(&mut self, direct: u32, synthetic: u32, error: i16) {
        let idx = self.index as usize;
        self.direct[idx] = direct as u16;
        self.synthetic[idx] = synthetic as u16;
        self.error[idx] = error;
        self.index = ((idx + 1) % ERROR_HISTORY_DEPTH) as u8;
        self.len = (self.len + 1).min(ERROR_HISTORY_DEPTH as u8);
        self.cumulative = self.cumulative.saturating_add(error.into());
    }

    fn clear(&mut self) {
        *self = Self::new();
    }

    /// Bias applied to the next synthetic tick, proportional to the
    /// cumulative error, and limited by the smoothed interval.
    fn bias(&self, smoothed: u16) -> i32 {
        let limit = i64::from(smoothed >> BIAS_LIMIT_SHIFT);
        (self.cumulative >> BIAS_SHIFT).clamp(-limit, limit) as i32
    }

    /// Returns the sum of every error recorded since initialization
    pub fn cumulative(&self) -> i64 {
        self.cumulative
    }

    /// Returns the number of samples held
    pub fn len(&self) -> usize {
        self.len.into()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate the held samples, oldest first
    pub fn iter(&self) -> impl Iterator<Item = ErrorSample> + '_ {
        let len = self.len();
        let start = (self.index as usize + ERROR_HISTORY_DEPTH - len) % ERROR_HISTORY_DEPTH;
        (0..len).map(move |offset| {
            let idx = (start + offset) % ERROR_HISTORY_DEPTH;
            ErrorSample {
                direct: self.direct[idx],
                synthetic: self.synthetic[idx],
                error: self.error[idx],
            }
        })
    }

    /// Returns the newest sample
    pub fn latest(&self) -> Option<ErrorSample> {
        self.iter().last()
    }
}

/// `a` is strictly after `b`, modulo wraparound
fn is_after(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// The later of two times, modulo wraparound
fn later(a: u32, b: u32) -> u32 {
    if is_after(b, a) {
        b
    } else {
        a
    }
}

/// Time from `since` to `now`; zero if `now` precedes `since`
fn elapsed(now: u32, since: u32) -> u32 {
    (now.wrapping_sub(since) as i32).max(0) as u32
}

fn saturate_i16(value: i32) -> i16 {
    value.clamp(i16::MIN.into(), i16::MAX.into()) as i16
}

/// `old + (new - old) / 8`, in fixed point
fn smooth(old: u32, new: u16) -> u32 {
    let old = i64::from(old);
    let new = i64::from(new) << SMOOTHING_FRACTION;
    (old + ((new - old) >> SMOOTHING_SHIFT)) as u32
}

/// Round a fixed point interval to whole microseconds
fn whole_us(fixed: u32) -> u16 {
    let rounded = (fixed + (1 << (SMOOTHING_FRACTION - 1))) >> SMOOTHING_FRACTION;
    rounded.clamp(1, u16::MAX.into()) as u16
}

/// Scale `margin` from a `from` interval to a `to` interval, keeping it
/// smaller than `to`
fn scale_margin(margin: u8, from: u16, to: u16) -> u8 {
    let scaled = u32::from(margin) * u32::from(to) / u32::from(from.max(1));
    scaled.min(u32::from(to) - 1).min(u8::MAX.into()) as u8
}

/// A consistent copy of the published clock fields
#[derive(Clone, Copy)]
struct Snapshot {
    last_direct: u32,
    last_synthetic: u32,
    last_update: u32,
    end_of_availability: u32,
    measured: u16,
    smoothed: u16,
    margin: u8,
    lock: LockState,
}

impl Snapshot {
    fn is_expired(&self, now: u32) -> bool {
        self.lock == LockState::Locked && is_after(now, self.end_of_availability)
    }

    /// Extrapolate the synthetic sample by the whole frames since the last update
    fn synthesize(&self, now: u32) -> u32 {
        let interval = u32::from(self.smoothed.max(1));
        let frames = elapsed(now, self.last_update) / interval;
        self.last_synthetic.wrapping_add(frames.wrapping_mul(interval))
    }

    /// The synthetic frame nearest to `at`, stepping `bias` further than the
    /// smoothed interval on every frame
    fn predict(&self, at: u32, bias: i32) -> u32 {
        let interval = u32::from(self.smoothed.max(1));
        let frames = (elapsed(at, self.last_update) + interval / 2) / interval;
        let step = (interval as i32).saturating_add(bias).max(1) as u32;
        self.last_synthetic.wrapping_add(frames.wrapping_mul(step))
    }

    fn estimate(&self, now: u32) -> u32 {
        if self.lock == LockState::Locked && !self.is_expired(now) {
            self.last_direct
        } else {
            self.synthesize(now)
        }
    }

    fn expire(&mut self, now: u32) {
        if self.is_expired(now) {
            self.lock = LockState::Unlocked;
        }
    }

    /// Availability window after a direct sample at `frame_us`
    fn availability_from(&self, frame_us: u32) -> u32 {
        let window = self.smoothed.saturating_sub(self.margin.into());
        frame_us.wrapping_add(window.into())
    }
}

/// State only touched by mutators
struct Writer {
    history: ErrorHistory,
    prev_direct: Option<u32>,
    /// Set once the synthetic sample has a meaningful base
    anchored: bool,
    /// Smoothed interval, with [`SMOOTHING_FRACTION`] fractional bits
    smoothed: u32,
    /// Interval from the configuration, or the last `set_interval`
    nominal: u16,
}

/// Synthesized USB frame time, for one controller port
///
/// See the [module documentation](crate::sof) for the locking model.
/// Mutators return the new [`LockState`] when they change it.
pub struct FrameClock {
    sequence: AtomicU32,
    last_direct: AtomicU32,
    last_synthetic: AtomicU32,
    last_update: AtomicU32,
    end_of_availability: AtomicU32,
    measured: AtomicU16,
    smoothed: AtomicU16,
    margin: AtomicU8,
    lock: AtomicU8,
    /// Latest frame time returned to a reader
    observed: AtomicU32,
    writer: Mutex<RefCell<Writer>>,
}

impl FrameClock {
    /// Create an unlocked frame clock
    ///
    /// If the margin isn't smaller than the interval, direct samples are never
    /// available.
    pub const fn new(config: FrameClockConfig) -> Self {
        Self {
            sequence: AtomicU32::new(0),
            last_direct: AtomicU32::new(0),
            last_synthetic: AtomicU32::new(0),
            last_update: AtomicU32::new(0),
            end_of_availability: AtomicU32::new(0),
            measured: AtomicU16::new(config.interval_us),
            smoothed: AtomicU16::new(config.interval_us),
            margin: AtomicU8::new(config.margin_us),
            lock: AtomicU8::new(LockState::Unlocked as u8),
            observed: AtomicU32::new(0),
            writer: Mutex::new(RefCell::new(Writer {
                history: ErrorHistory::new(),
                prev_direct: None,
                anchored: false,
                smoothed: (config.interval_us as u32) << SMOOTHING_FRACTION,
                nominal: config.interval_us,
            })),
        }
    }

    /// Read a consistent snapshot
    ///
    /// Mutators hold a critical section while the sequence is odd, so an
    /// interrupt never spins here waiting on the code it preempted.
    fn read(&self) -> Snapshot {
        self.read_sequenced().1
    }

    /// Read a consistent snapshot, and the sequence that it came from
    fn read_sequenced(&self) -> (u32, Snapshot) {
        loop {
            let sequence = self.sequence.load(Ordering::Acquire);
            if sequence % 2 == 1 {
                core::hint::spin_loop();
                continue;
            }
            let snapshot = Snapshot {
                last_direct: self.last_direct.load(Ordering::Relaxed),
                last_synthetic: self.last_synthetic.load(Ordering::Relaxed),
                last_update: self.last_update.load(Ordering::Relaxed),
                end_of_availability: self.end_of_availability.load(Ordering::Relaxed),
                measured: self.measured.load(Ordering::Relaxed),
                smoothed: self.smoothed.load(Ordering::Relaxed),
                margin: self.margin.load(Ordering::Relaxed),
                lock: LockState::from_bits(self.lock.load(Ordering::Relaxed)),
            };
            fence(Ordering::Acquire);
            if self.sequence.load(Ordering::Relaxed) == sequence {
                return (sequence, snapshot);
            }
        }
    }

    /// Publish `snapshot`. Caller holds the critical section.
    fn publish(&self, snapshot: &Snapshot) {
        let sequence = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(sequence.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.last_direct.store(snapshot.last_direct, Ordering::Relaxed);
        self.last_synthetic.store(snapshot.last_synthetic, Ordering::Relaxed);
        self.last_update.store(snapshot.last_update, Ordering::Relaxed);
        self.end_of_availability
            .store(snapshot.end_of_availability, Ordering::Relaxed);
        self.measured.store(snapshot.measured, Ordering::Relaxed);
        self.smoothed.store(snapshot.smoothed, Ordering::Relaxed);
        self.margin.store(snapshot.margin, Ordering::Relaxed);
        self.lock.store(snapshot.lock as u8, Ordering::Relaxed);

        self.sequence.store(sequence.wrapping_add(2), Ordering::Release);
    }

    /// Run a mutation in a critical section, and publish the result
    ///
    /// Returns the new lock state if the mutation changed it.
    fn update(&self, func: impl FnOnce(&mut Snapshot, &mut Writer)) -> Option<LockState> {
        critical_section::with(|cs| {
            let mut writer = self.writer.borrow_ref_mut(cs);
            let mut snapshot = self.read();
            let before = snapshot.lock;
            func(&mut snapshot, &mut *writer);
            self.publish(&snapshot);
            (snapshot.lock != before).then_some(snapshot.lock)
        })
    }

    /// The earliest value that a mutator may publish at `frame_us`. Caller
    /// holds the critical section.
    fn floor(&self, snapshot: &Snapshot, frame_us: u32) -> u32 {
        later(
            snapshot.estimate(frame_us),
            self.observed.load(Ordering::Relaxed),
        )
    }

    /// Record a genuine, hardware-reported SOF at `frame_us`
    ///
    /// Call this from the controller interrupt. `frame_us` shouldn't be later
    /// than the current time. The clock locks onto the sample until its end
    /// of availability. The published sample never moves behind a frame time
    /// that a reader has already seen.
    pub fn record_direct_sample(&self, frame_us: u32) -> Option<LockState> {
        self.update(|snapshot, writer| {
            snapshot.expire(frame_us);
            let floor = if writer.anchored {
                let floor = self.floor(snapshot, frame_us);
                let bias = writer.history.bias(snapshot.smoothed);
                let predicted = snapshot.predict(frame_us, bias);
                let error = saturate_i16(frame_us.wrapping_sub(predicted) as i32);
                writer.history.push(frame_us, predicted, error);
                floor
            } else {
                writer.anchored = true;
                self.observed.store(frame_us, Ordering::Relaxed);
                frame_us
            };

            if let Some(prev) = writer.prev_direct {
                let delta = elapsed(frame_us, prev);
                let interval = u32::from(snapshot.smoothed.max(1));
                // Missed SOFs span more than one frame. Shorter than half a
                // frame is a glitch.
                let frames = (delta + interval / 2) / interval;
                if frames > 0 {
                    let measured = (delta + frames / 2) / frames;
                    snapshot.measured = measured.min(u16::MAX.into()) as u16;
                    writer.smoothed = smooth(writer.smoothed, snapshot.measured);
                    snapshot.smoothed = whole_us(writer.smoothed);
                }
            }
            writer.prev_direct = Some(frame_us);

            let direct = later(frame_us, floor);
            // Keep the high-water mark within wrapping distance of the clock.
            self.observed.store(direct, Ordering::Relaxed);
            snapshot.last_direct = direct;
            snapshot.last_synthetic = direct;
            snapshot.last_update = frame_us;
            snapshot.end_of_availability = snapshot.availability_from(frame_us);
            snapshot.lock = LockState::Locked;
        })
    }

    /// Advance the synthetic sample by one frame, at `frame_us`
    ///
    /// Call this from a timer when there's no direct sample. The step is the
    /// smoothed interval plus a bias proportional to the cumulative error. The
    /// synthetic sample never moves behind an estimate that readers could
    /// already observe.
    ///
    /// This doesn't lock or unlock the clock, except to expire a direct sample
    /// that's past its end of availability.
    pub fn record_synthetic_tick(&self, frame_us: u32) -> Option<LockState> {
        self.update(|snapshot, writer| {
            snapshot.expire(frame_us);
            if !writer.anchored {
                writer.anchored = true;
                self.observed.store(frame_us, Ordering::Relaxed);
                snapshot.last_synthetic = frame_us;
                snapshot.last_update = frame_us;
                return;
            }

            let floor = self.floor(snapshot, frame_us);
            let step = i32::from(snapshot.smoothed) + writer.history.bias(snapshot.smoothed);
            let next = snapshot.last_synthetic.wrapping_add(step as u32);
            self.observed.store(floor, Ordering::Relaxed);
            snapshot.last_synthetic = later(next, floor);
            snapshot.last_update = frame_us;
        })
    }

    /// Check the availability of the direct sample at `now`
    ///
    /// Call this from a mid-frame timer to unlock the clock promptly, rather
    /// than on the next read.
    pub fn expire(&self, now: u32) -> Option<LockState> {
        if !self.read().is_expired(now) {
            return None;
        }
        self.update(|snapshot, _| snapshot.expire(now))
    }

    /// Seed the frame time
    ///
    /// This should only be used during initialization. The clock unlocks, and
    /// synthesis continues from `sof_us`.
    pub fn set_sof(&self, sof_us: u32) -> Option<LockState> {
        self.update(|snapshot, writer| {
            snapshot.last_direct = sof_us;
            snapshot.last_synthetic = sof_us;
            snapshot.last_update = sof_us;
            snapshot.end_of_availability = sof_us;
            snapshot.lock = LockState::Unlocked;
            writer.prev_direct = None;
            writer.anchored = true;
            self.observed.store(sof_us, Ordering::Relaxed);
        })
    }

    /// Reset the frame interval
    ///
    /// Use this during initialization, or after a bus speed change. It resets
    /// the measured and smoothed intervals, and clears the error history,
    /// including the cumulative error.
    ///
    /// The margin scales with the interval. A full speed margin of 125us
    /// becomes 15us at high speed, and it always stays smaller than the new
    /// interval. Use [`set_margin()`](Self::set_margin) afterwards to choose
    /// another margin.
    ///
    /// Returns [`Error::InvalidState`] if `interval_us` is zero.
    pub fn set_interval(&self, interval_us: u16) -> Result<()> {
        if interval_us == 0 {
            return Err(Error::InvalidState);
        }
        self.update(|snapshot, writer| {
            snapshot.margin = scale_margin(snapshot.margin, writer.nominal, interval_us);
            snapshot.measured = interval_us;
            snapshot.smoothed = interval_us;
            if snapshot.lock == LockState::Locked {
                snapshot.end_of_availability = snapshot.availability_from(snapshot.last_update);
            }
            writer.smoothed = u32::from(interval_us) << SMOOTHING_FRACTION;
            writer.nominal = interval_us;
            writer.history.clear();
            writer.prev_direct = None;
        });
        debug!("SOF INTERVAL {}", interval_us);
        Ok(())
    }

    /// Set the availability margin
    ///
    /// Returns [`Error::InvalidState`] if `margin_us` isn't smaller than the
    /// smoothed interval.
    pub fn set_margin(&self, margin_us: u8) -> Result<()> {
        if u16::from(margin_us) >= self.smoothed_interval() {
            return Err(Error::InvalidState);
        }
        self.update(|snapshot, _| {
            snapshot.margin = margin_us;
            if snapshot.lock == LockState::Locked {
                snapshot.end_of_availability = snapshot.availability_from(snapshot.last_update);
            }
        });
        Ok(())
    }

    /// Returns the best estimate of the current frame time
    ///
    /// That's the direct sample while it's available; otherwise, it's the
    /// synthetic sample extrapolated to `now`. A direct sample that's past its
    /// end of availability unlocks the clock before this returns.
    ///
    /// The result never precedes a frame time returned earlier, even if a
    /// mutator timestamp precedes that reader's `now`. Only
    /// [`set_sof()`](Self::set_sof) moves the frame time backwards. Readers
    /// take a short critical section when they see a new frame time.
    pub fn frame_time_32(&self, now: u32) -> u32 {
        loop {
            let (sequence, snapshot) = self.read_sequenced();
            if snapshot.is_expired(now) {
                self.expire(now);
                continue;
            }
            let estimate = snapshot.estimate(now);
            let observed = self.observed.load(Ordering::Acquire);
            if !is_after(estimate, observed) {
                return observed;
            }
            // Only record an estimate that came from the current sequence.
            // Otherwise, a stale reader could outrun set_sof().
            let recorded = critical_section::with(|_| {
                if self.sequence.load(Ordering::Relaxed) != sequence {
                    return None;
                }
                let observed = later(estimate, self.observed.load(Ordering::Relaxed));
                self.observed.store(observed, Ordering::Release);
                Some(observed)
            });
            if let Some(observed) = recorded {
                return observed;
            }
        }
    }

    /// Returns the low 16 bits of [`frame_time_32()`](Self::frame_time_32)
    pub fn frame_time_16(&self, now: u32) -> u16 {
        self.frame_time_32(now) as u16
    }

    pub fn lock_state(&self) -> LockState {
        self.read().lock
    }

    /// Returns the last direct sample value
    pub fn last_direct_sample(&self) -> u32 {
        self.read().last_direct
    }

    /// Returns the last synthetic sample value
    pub fn last_synthetic_sample(&self) -> u32 {
        self.read().last_synthetic
    }

    /// Returns the most recently measured frame interval
    pub fn measured_interval(&self) -> u16 {
        self.read().measured
    }

    /// Returns the smoothed frame interval
    pub fn smoothed_interval(&self) -> u16 {
        self.read().smoothed
    }

    pub fn end_of_availability(&self) -> u32 {
        self.read().end_of_availability
    }

    pub fn margin(&self) -> u8 {
        self.read().margin
    }

    /// Returns a copy of the error history
    pub fn history(&self) -> ErrorHistory {
        critical_section::with(|cs| self.writer.borrow_ref(cs).history)
    }

    /// Returns the cumulative synthesis error
    pub fn cumulative_error(&self) -> i64 {
        self.history().cumulative()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn high_speed() -> FrameClock {
        FrameClock::new(FrameClockConfig::from(Speed::High))
    }

    #[test]
    fn default_config() {
        assert_eq!(FrameClockConfig::default(), FrameClockConfig::new(125, 15));
        assert_eq!(
            FrameClockConfig::from(Speed::LowFull),
            FrameClockConfig::new(1_000, 125)
        );
    }

    #[test]
    fn stable_microframes() {
        let clock = high_speed();
        assert_eq!(clock.lock_state(), LockState::Unlocked);

        assert_eq!(clock.record_direct_sample(1_000), Some(LockState::Locked));
        assert_eq!(clock.record_direct_sample(1_125), None);

        assert_eq!(clock.smoothed_interval(), 125);
        assert_eq!(clock.measured_interval(), 125);
        assert_eq!(clock.lock_state(), LockState::Locked);
        assert_eq!(clock.end_of_availability(), 1_125 + 125 - 15);
        for now in 1_125..=clock.end_of_availability() {
            assert_eq!(clock.frame_time_32(now), 1_125);
        }
        assert_eq!(clock.lock_state(), LockState::Locked);
        assert_eq!(clock.cumulative_error(), 0);
    }

    #[test]
    fn unlock_after_availability() {
        let clock = high_speed();
        clock.record_direct_sample(1_000);
        let eoa = clock.end_of_availability();

        // Still within the window; nothing to do.
        assert_eq!(clock.expire(eoa), None);
        assert_eq!(clock.frame_time_32(eoa + 1), 1_000);
        assert_eq!(clock.lock_state(), LockState::Unlocked);

        // Synthesis continues on frame boundaries.
        assert_eq!(clock.frame_time_32(1_124), 1_000);
        assert_eq!(clock.frame_time_32(1_125), 1_125);
        assert_eq!(clock.frame_time_32(1_500), 1_500);
    }

    #[test]
    fn mid_frame_expiry() {
        let clock = high_speed();
        clock.record_direct_sample(1_000);
        assert_eq!(clock.expire(1_050), None);
        assert_eq!(clock.expire(1_111), Some(LockState::Unlocked));
        assert_eq!(clock.expire(1_112), None);
    }

    #[test]
    fn smoothing_follows_slow_host() {
        let clock = high_speed();
        let mut frame = 0;
        for _ in 0..64 {
            frame += 130;
            clock.record_direct_sample(frame);
        }
        assert_eq!(clock.measured_interval(), 130);
        assert_eq!(clock.smoothed_interval(), 130);
    }

    #[test]
    fn smoothing_resolves_one_microsecond() {
        let clock = high_speed();
        let mut frame = 0;
        for _ in 0..32 {
            frame += 126;
            clock.record_direct_sample(frame);
        }
        assert_eq!(clock.smoothed_interval(), 126);
    }

    #[test]
    fn missed_sof_divides_interval() {
        let clock = high_speed();
        clock.record_direct_sample(1_000);
        // Three frames later
        clock.record_direct_sample(1_375);
        assert_eq!(clock.measured_interval(), 125);
        assert_eq!(clock.smoothed_interval(), 125);
    }

    #[test]
    fn glitch_doesnt_measure() {
        let clock = high_speed();
        clock.record_direct_sample(1_000);
        clock.record_direct_sample(1_010);
        assert_eq!(clock.measured_interval(), 125);
        assert_eq!(clock.smoothed_interval(), 125);
    }

    #[test]
    fn synthetic_ticks_advance() {
        let clock = high_speed();
        clock.set_sof(10_000);
        assert_eq!(clock.record_synthetic_tick(10_125), None);
        assert_eq!(clock.last_synthetic_sample(), 10_125);
        clock.record_synthetic_tick(10_250);
        assert_eq!(clock.last_synthetic_sample(), 10_250);
        assert_eq!(clock.frame_time_32(10_260), 10_250);
        assert_eq!(clock.lock_state(), LockState::Unlocked);
    }

    #[test]
    fn synthetic_tick_keeps_lock() {
        let clock = high_speed();
        clock.record_direct_sample(1_000);
        assert_eq!(clock.record_synthetic_tick(1_010), None);
        assert_eq!(clock.lock_state(), LockState::Locked);
        assert_eq!(clock.frame_time_32(1_010), 1_000);

        // ...unless the direct sample is stale.
        assert_eq!(clock.record_synthetic_tick(1_200), Some(LockState::Unlocked));
    }

    #[test]
    fn error_biases_synthesis() {
        let clock = high_speed();
        clock.set_sof(0);
        // The host's frames are 5us late every time.
        for frame in 1..=8u32 {
            clock.record_direct_sample(frame * 130);
        }
        let latest = clock.history().latest().unwrap();
        assert!(latest.error > 0);
        assert!(clock.cumulative_error() > 0);

        let before = clock.last_synthetic_sample();
        let at = clock.end_of_availability() + 1;
        clock.record_synthetic_tick(at);
        let step = clock.last_synthetic_sample().wrapping_sub(before);
        let smoothed = u32::from(clock.smoothed_interval());
        assert!(step > smoothed, "step {step} smoothed {smoothed}");
        assert!(step <= smoothed + smoothed / 8);
    }

    #[test]
    fn bias_settles_then_covers_lost_sof() {
        const HOST_US: u32 = 126;
        let clock = high_speed();
        clock.set_sof(0);
        let mut frame = 0;
        for _ in 0..1_000 {
            frame += HOST_US;
            clock.record_direct_sample(frame);
        }
        assert_eq!(clock.smoothed_interval(), 126);
        let cumulative = clock.cumulative_error();
        assert!((0..16).contains(&cumulative), "cumulative {cumulative}");
        assert_eq!(clock.history().latest().unwrap().error, 0);

        // SOF interrupts stop; a timer ticks at the host's rate.
        let before = clock.last_synthetic_sample();
        for _ in 0..10 {
            frame += HOST_US;
            clock.record_synthetic_tick(frame);
        }
        let advance = clock.last_synthetic_sample().wrapping_sub(before);
        assert!((1_258..=1_262).contains(&advance), "advance {advance}");
    }

    #[test]
    fn history_wraps() {
        let clock = high_speed();
        clock.set_sof(0);
        for frame in 1..=6u32 {
            clock.record_direct_sample(frame * 125 + 1);
        }
        let history = clock.history();
        assert_eq!(history.len(), ERROR_HISTORY_DEPTH);
        let directs: [u16; ERROR_HISTORY_DEPTH] = {
            let mut directs = [0; ERROR_HISTORY_DEPTH];
            for (dst, sample) in directs.iter_mut().zip(history.iter()) {
                *dst = sample.direct;
            }
            directs
        };
        assert_eq!(directs, [376, 501, 626, 751]);
        assert_eq!(history.latest().unwrap().direct, 751);
    }

    #[test]
    fn set_interval_clears_history() {
        let clock = high_speed();
        clock.set_sof(0);
        clock.record_direct_sample(130);
        clock.record_direct_sample(260);
        assert!(!clock.history().is_empty());

        clock.set_interval(1_000).unwrap();
        assert_eq!(clock.smoothed_interval(), 1_000);
        assert_eq!(clock.measured_interval(), 1_000);
        assert!(clock.history().is_empty());
        assert_eq!(clock.cumulative_error(), 0);
        // Still locked, with a window from the new interval and margin.
        assert_eq!(clock.margin(), 120);
        assert_eq!(clock.lock_state(), LockState::Locked);
        assert_eq!(clock.end_of_availability(), 260 + 1_000 - 120);
    }

    #[test]
    fn full_speed_renegotiates_high_speed() {
        let clock = FrameClock::new(FrameClockConfig::from(Speed::LowFull));
        assert_eq!(clock.margin(), 125);
        clock.set_interval(125).unwrap();
        assert_eq!(clock.margin(), 15);
        assert_eq!(clock.smoothed_interval(), 125);

        clock.record_direct_sample(1_000);
        clock.record_direct_sample(1_125);
        assert_eq!(clock.end_of_availability(), 1_125 + 125 - 15);
        assert_eq!(clock.frame_time_32(1_200), 1_125);
    }

    #[test]
    fn margin_stays_below_tiny_interval() {
        let clock = high_speed();
        clock.set_interval(1).unwrap();
        assert_eq!(clock.margin(), 0);
        clock.set_interval(8).unwrap();
        assert!(clock.margin() < 8);
    }

    #[test]
    fn reject_bad_interval_and_margin() {
        let clock = high_speed();
        assert_eq!(clock.set_interval(0), Err(Error::InvalidState));
        assert_eq!(clock.set_margin(125), Err(Error::InvalidState));
        clock.set_margin(25).unwrap();
        assert_eq!(clock.margin(), 25);
        clock.record_direct_sample(500);
        assert_eq!(clock.end_of_availability(), 600);
    }

    #[test]
    fn set_sof_unlocks() {
        let clock = high_speed();
        clock.record_direct_sample(1_000);
        assert_eq!(clock.set_sof(50), Some(LockState::Unlocked));
        assert_eq!(clock.frame_time_32(50), 50);
        assert_eq!(clock.frame_time_32(300), 300);
    }

    #[test]
    fn wraparound() {
        let clock = high_speed();
        let start = u32::MAX - 100;
        clock.record_direct_sample(start);
        clock.record_direct_sample(start.wrapping_add(125));
        assert_eq!(clock.smoothed_interval(), 125);
        assert_eq!(clock.frame_time_32(24), 24);
        assert_eq!(clock.frame_time_16(24), 24);
        assert_eq!(clock.frame_time_32(200), 24 + 125);
    }

    #[test]
    fn frame_time_16_truncates() {
        let clock = high_speed();
        clock.record_direct_sample(0x0001_2345);
        assert_eq!(clock.frame_time_16(0x0001_2345), 0x2345);
    }

    #[test]
    fn late_sample_doesnt_rewind_readers() {
        let clock = high_speed();
        clock.set_sof(0);
        assert_eq!(clock.frame_time_32(130), 125);
        // Timestamped before the reader's now
        clock.record_direct_sample(120);
        assert_eq!(clock.last_direct_sample(), 125);
        assert_eq!(clock.frame_time_32(131), 125);
        // Synthesis continues from the clamped sample.
        assert_eq!(clock.frame_time_32(250), 250);
    }

    #[test]
    fn first_sample_isnt_clamped() {
        let clock = high_speed();
        // Far from the initial zero base
        clock.record_direct_sample(3_000_000_000);
        assert_eq!(clock.frame_time_32(3_000_000_000), 3_000_000_000);
        assert!(clock.history().is_empty());
    }
}
