//! Cosmetic progress simulation. The remote work has no real sub-progress
//! signal, so the displayed percentage is derived purely from elapsed time and
//! only reaches 100 when the coordinator forces `finalize`.

use crate::models::Mode;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, interval, sleep};

const FRAME: Duration = Duration::from_millis(16);
const BURST: Duration = Duration::from_millis(300);
const BURST_VALUE: f32 = 18.0;
/// Cap while a clarification step is pending.
pub const LOW_CEILING: f32 = 20.0;
/// Cap while actively computing; 100 is reserved for `finalize`.
pub const HIGH_CEILING: f32 = 92.0;
const GRACE: Duration = Duration::from_millis(700);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Running,
    Paused,
    Finalizing,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressState {
    pub value: f32,
    pub phase: ProgressPhase,
}

impl ProgressState {
    fn hidden() -> Self {
        Self {
            value: 0.0,
            phase: ProgressPhase::Hidden,
        }
    }
}

/// Approach-speed constant per workflow; same curve shape, distinct pacing.
fn pace_for(mode: Mode) -> f32 {
    match mode {
        Mode::Buy => 0.12,
        Mode::Sell => 0.20,
    }
}

/// Linear burst ramp, then exponential-decay approach toward `ceiling`.
/// Asymptotic: the formula alone never reaches the ceiling.
fn curve(elapsed: Duration, pace: f32, ceiling: f32) -> f32 {
    let t = elapsed.as_secs_f32();
    let burst = BURST.as_secs_f32();
    if t < burst {
        return BURST_VALUE * (t / burst);
    }
    BURST_VALUE + (ceiling - BURST_VALUE) * (1.0 - (-(t - burst) * pace).exp())
}

struct Inner {
    started_at: Instant,
    pace: f32,
    loop_task: Option<JoinHandle<()>>,
    grace_task: Option<JoinHandle<()>>,
}

pub struct ProgressSimulator {
    tx: watch::Sender<ProgressState>,
    inner: Mutex<Inner>,
    on_hidden: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl ProgressSimulator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ProgressState::hidden());
        Self {
            tx,
            inner: Mutex::new(Inner {
                started_at: Instant::now(),
                pace: pace_for(Mode::Buy),
                loop_task: None,
                grace_task: None,
            }),
            on_hidden: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressState> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> ProgressState {
        *self.tx.borrow()
    }

    /// Invoked exactly once per completed finalize cycle, after the grace hold.
    pub fn set_on_hidden(&self, callback: Arc<dyn Fn() + Send + Sync>) {
        *self.on_hidden.lock().expect("on_hidden lock") = Some(callback);
    }

    /// Reset to 0 and begin the frame loop. Restarting while already running
    /// cancels the previous loop and any pending finalize grace timer.
    pub fn start(&self, mode: Mode) {
        let mut inner = self.inner.lock().expect("progress lock");
        abort_tasks(&mut inner);
        inner.started_at = Instant::now();
        inner.pace = pace_for(mode);
        self.tx.send_replace(ProgressState {
            value: 0.0,
            phase: ProgressPhase::Running,
        });
        inner.loop_task = Some(self.spawn_loop(inner.started_at, inner.pace));
    }

    /// Stop the loop and hold at exactly the low ceiling while the user works
    /// through the clarification step.
    pub fn pause(&self) {
        let mut inner = self.inner.lock().expect("progress lock");
        if let Some(task) = inner.loop_task.take() {
            task.abort();
        }
        self.tx.send_replace(ProgressState {
            value: LOW_CEILING,
            phase: ProgressPhase::Paused,
        });
    }

    /// Restart the loop against the high ceiling, keeping the original elapsed
    /// basis so the motion never jumps backward.
    pub fn resume(&self) {
        let mut inner = self.inner.lock().expect("progress lock");
        if let Some(task) = inner.loop_task.take() {
            task.abort();
        }
        self.tx.send_modify(|state| state.phase = ProgressPhase::Running);
        inner.loop_task = Some(self.spawn_loop(inner.started_at, inner.pace));
    }

    /// Snap to 100, hold for the grace period, then hide and fire the
    /// completion callback.
    pub fn finalize(&self) {
        let mut inner = self.inner.lock().expect("progress lock");
        abort_tasks(&mut inner);
        self.tx.send_replace(ProgressState {
            value: 100.0,
            phase: ProgressPhase::Finalizing,
        });
        let tx = self.tx.clone();
        let callback = self.on_hidden.lock().expect("on_hidden lock").clone();
        inner.grace_task = Some(tokio::spawn(async move {
            sleep(GRACE).await;
            tx.send_replace(ProgressState {
                value: 100.0,
                phase: ProgressPhase::Hidden,
            });
            if let Some(callback) = callback {
                callback();
            }
        }));
    }

    /// Immediate stop with no completion hold. Used on failure and reset.
    pub fn dismiss(&self) {
        let mut inner = self.inner.lock().expect("progress lock");
        abort_tasks(&mut inner);
        self.tx.send_replace(ProgressState::hidden());
    }

    fn spawn_loop(&self, started_at: Instant, pace: f32) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut frames = interval(FRAME);
            loop {
                frames.tick().await;
                let target = curve(started_at.elapsed(), pace, HIGH_CEILING);
                tx.send_modify(|state| {
                    // Value only moves under the loop while running; phase
                    // transitions belong to the control methods.
                    if state.phase == ProgressPhase::Running {
                        state.value = state.value.max(target.min(HIGH_CEILING));
                    }
                });
            }
        })
    }
}

impl Default for ProgressSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProgressSimulator {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            abort_tasks(&mut inner);
        }
    }
}

fn abort_tasks(inner: &mut Inner) {
    if let Some(task) = inner.loop_task.take() {
        task.abort();
    }
    if let Some(task) = inner.grace_task.take() {
        task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn curve_is_bounded_and_monotonic() {
        let pace = pace_for(Mode::Sell);
        let mut last = 0.0f32;
        for ms in (0..60_000).step_by(50) {
            let value = curve(Duration::from_millis(ms), pace, HIGH_CEILING);
            assert!(value >= last, "curve regressed at {ms}ms");
            assert!((0.0..HIGH_CEILING).contains(&value));
            last = value;
        }
    }

    #[test]
    fn burst_ramp_hands_off_smoothly() {
        let pace = pace_for(Mode::Buy);
        let before = curve(BURST - Duration::from_millis(1), pace, HIGH_CEILING);
        let after = curve(BURST + Duration::from_millis(1), pace, HIGH_CEILING);
        assert!((after - before).abs() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn value_advances_while_running() {
        let sim = ProgressSimulator::new();
        sim.start(Mode::Buy);
        sleep(Duration::from_millis(200)).await;
        let early = sim.state().value;
        assert!(early > 0.0);
        sleep(Duration::from_secs(5)).await;
        let later = sim.state().value;
        assert!(later >= early);
        assert!(later <= HIGH_CEILING);
        assert_eq!(sim.state().phase, ProgressPhase::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_exactly_at_low_ceiling() {
        let sim = ProgressSimulator::new();
        sim.start(Mode::Sell);
        sleep(Duration::from_millis(100)).await;
        sim.pause();
        sleep(Duration::from_secs(30)).await;
        let state = sim.state();
        assert_eq!(state.phase, ProgressPhase::Paused);
        assert_eq!(state.value, LOW_CEILING);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_never_moves_backward() {
        let sim = ProgressSimulator::new();
        sim.start(Mode::Sell);
        sleep(Duration::from_millis(150)).await;
        sim.pause();
        sim.resume();
        sleep(Duration::from_secs(2)).await;
        let state = sim.state();
        assert_eq!(state.phase, ProgressPhase::Running);
        assert!(state.value >= LOW_CEILING);
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_snaps_holds_then_hides_once() {
        let sim = ProgressSimulator::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        sim.set_on_hidden(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        sim.start(Mode::Buy);
        sleep(Duration::from_millis(50)).await;
        sim.finalize();
        let state = sim.state();
        assert_eq!(state.phase, ProgressPhase::Finalizing);
        assert_eq!(state.value, 100.0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        sleep(GRACE + Duration::from_millis(20)).await;
        assert_eq!(sim.state().phase, ProgressPhase::Hidden);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_cancels_pending_grace_timer() {
        let sim = ProgressSimulator::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        sim.set_on_hidden(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        sim.start(Mode::Buy);
        sim.finalize();
        // Rapid resubmission before the grace period elapses.
        sim.start(Mode::Sell);
        sleep(GRACE + Duration::from_millis(100)).await;
        assert_eq!(sim.state().phase, ProgressPhase::Running);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
