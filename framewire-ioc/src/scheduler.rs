//! Cooperative, frame-budgeted stepping
//!
//! Resolution work runs in slices. [`FrameBudget::checkpoint`] is the only
//! suspension point: once the current slice has run longer than the budget,
//! the pass yields until the next turn of the host and starts a new slice.
//! What "next turn" means is decided by the [`Scheduler`]: either the
//! executor's next poll ([`Scheduler::Immediate`]) or the next frame of a
//! host-driven [`FrameLoop`].

use futures::executor::LocalPool;
use futures::future::RemoteHandle;
use futures::task::{LocalSpawnExt, SpawnError};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{DiError, DiResult};

/// Default slice length, one frame at 60 Hz
pub const DEFAULT_MAX_SLICE: Duration = Duration::from_millis(16);

/// Monotonic time source
pub trait Clock: Send + Sync {
    /// Time since an arbitrary fixed origin
    fn now(&self) -> Duration;
}

/// Wall clock
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: web_time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: web_time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Deterministic clock for tests and replays
///
/// Clones share the same time. With a non-zero step every read advances the
/// clock, which makes "work takes time" reproducible without sleeping.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
    step: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock that advances by `step` on every read
    pub fn with_step(step: Duration) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(0)),
            step: step.as_nanos() as u64,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.fetch_add(self.step, Ordering::SeqCst))
    }
}

/// Wakers parked until the next frame
#[derive(Default)]
struct FrameQueue {
    frame: AtomicU64,
    parked: Mutex<Vec<Waker>>,
}

impl FrameQueue {
    fn current(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    fn park(&self, waker: &Waker) {
        self.parked.lock().push(waker.clone());
    }

    fn advance(&self) {
        self.frame.fetch_add(1, Ordering::AcqRel);
        let wakers = std::mem::take(&mut *self.parked.lock());
        for waker in wakers {
            waker.wake();
        }
    }
}

/// Decides where a yielding pass resumes
#[derive(Clone, Default)]
pub enum Scheduler {
    /// Resume on the executor's next poll
    #[default]
    Immediate,
    /// Resume on the next [`FrameLoop::run_frame`]
    Frame(FrameHandle),
}

impl Scheduler {
    /// Future that completes on the next turn
    pub fn next_turn(&self) -> NextTurn {
        NextTurn {
            queue: match self {
                Scheduler::Immediate => None,
                Scheduler::Frame(handle) => Some(handle.queue.clone()),
            },
            parked_at: None,
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheduler::Immediate => f.write_str("Immediate"),
            Scheduler::Frame(_) => f.write_str("Frame"),
        }
    }
}

/// See [`Scheduler::next_turn`]
pub struct NextTurn {
    queue: Option<Arc<FrameQueue>>,
    parked_at: Option<u64>,
}

impl Future for NextTurn {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = &mut *self;
        match (&this.queue, this.parked_at) {
            (None, None) => {
                this.parked_at = Some(0);
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            (None, Some(_)) => Poll::Ready(()),
            (Some(queue), None) => {
                this.parked_at = Some(queue.current());
                queue.park(cx.waker());
                Poll::Pending
            }
            (Some(queue), Some(frame)) => {
                if queue.current() > frame {
                    Poll::Ready(())
                } else {
                    queue.park(cx.waker());
                    Poll::Pending
                }
            }
        }
    }
}

/// Handle to a [`FrameLoop`]'s turn queue
#[derive(Clone)]
pub struct FrameHandle {
    queue: Arc<FrameQueue>,
}

impl FrameHandle {
    /// Frames run so far
    pub fn frames_elapsed(&self) -> u64 {
        self.queue.current()
    }
}

/// Single-threaded task queue driven once per frame by the host
///
/// ```
/// use framewire_ioc::FrameLoop;
///
/// let mut frames = FrameLoop::new();
/// let scheduler = frames.scheduler();
/// let handle = frames
///     .spawn(async move {
///         scheduler.next_turn().await;
///         42
///     })
///     .unwrap();
///
/// frames.run_frame();
/// frames.run_frame();
/// assert_eq!(futures::executor::block_on(handle), 42);
/// ```
pub struct FrameLoop {
    pool: LocalPool,
    handle: FrameHandle,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self {
            pool: LocalPool::new(),
            handle: FrameHandle {
                queue: Arc::new(FrameQueue::default()),
            },
        }
    }

    /// Scheduler whose turns are this loop's frames
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::Frame(self.handle.clone())
    }

    pub fn handle(&self) -> FrameHandle {
        self.handle.clone()
    }

    /// Queue a task; it first runs on the next frame
    ///
    /// Dropping the returned handle cancels the task.
    pub fn spawn<F>(&self, future: F) -> Result<RemoteHandle<F::Output>, SpawnError>
    where
        F: Future + 'static,
    {
        self.pool.spawner().spawn_local_with_handle(future)
    }

    /// Run one frame: wake everything parked on the previous frame, then poll
    /// until no task can make progress
    pub fn run_frame(&mut self) {
        self.handle.queue.advance();
        self.pool.run_until_stalled();
        trace!("Frame {} done", self.handle.frames_elapsed());
    }

    pub fn frames_elapsed(&self) -> u64 {
        self.handle.frames_elapsed()
    }
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters collected by a [`FrameBudget`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BudgetStats {
    /// Budget checks performed
    pub checkpoints: u64,
    /// Times the pass yielded to the host
    pub turns: u64,
}

/// Time-slice tracker for one resolution pass
pub struct FrameBudget {
    clock: Arc<dyn Clock>,
    scheduler: Scheduler,
    max_slice: Duration,
    slice_start: Duration,
    cancel: CancellationToken,
    stats: BudgetStats,
}

impl FrameBudget {
    pub fn new(
        clock: Arc<dyn Clock>,
        scheduler: Scheduler,
        max_slice: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let slice_start = clock.now();
        Self {
            clock,
            scheduler,
            max_slice,
            slice_start,
            cancel,
            stats: BudgetStats::default(),
        }
    }

    /// Fail with [`DiError::Cancelled`] if the pass was cancelled
    pub fn ensure_active(&self) -> DiResult<()> {
        if self.cancel.is_cancelled() {
            return Err(DiError::Cancelled);
        }
        Ok(())
    }

    /// Yield if the current slice exceeded the budget
    pub async fn checkpoint(&mut self) -> DiResult<()> {
        self.ensure_active()?;
        self.stats.checkpoints += 1;

        let elapsed = self.clock.now().saturating_sub(self.slice_start);
        if elapsed > self.max_slice {
            trace!(?elapsed, max_slice = ?self.max_slice, "Slice exhausted, yielding");
            self.yield_turn().await?;
        }
        Ok(())
    }

    /// Yield unconditionally and start a new slice
    pub async fn yield_turn(&mut self) -> DiResult<()> {
        self.scheduler.next_turn().await;
        self.stats.turns += 1;
        self.slice_start = self.clock.now();
        self.ensure_active()
    }

    pub fn stats(&self) -> BudgetStats {
        self.stats
    }

    pub fn max_slice(&self) -> Duration {
        self.max_slice
    }
}

impl fmt::Debug for FrameBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBudget")
            .field("scheduler", &self.scheduler)
            .field("max_slice", &self.max_slice)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use tokio_test::{assert_pending, assert_ready, task};

    fn budget(clock: &ManualClock, cancel: &CancellationToken) -> FrameBudget {
        FrameBudget::new(
            Arc::new(clock.clone()),
            Scheduler::Immediate,
            DEFAULT_MAX_SLICE,
            cancel.clone(),
        )
    }

    #[test]
    fn test_manual_clock_steps() {
        let clock = ManualClock::with_step(Duration::from_millis(5));
        assert_eq!(clock.now(), Duration::ZERO);
        assert_eq!(clock.now(), Duration::from_millis(5));
        clock.advance(Duration::from_millis(10));
        assert_eq!(clock.now(), Duration::from_millis(20));
    }

    #[test]
    fn test_checkpoint_within_budget_does_not_yield() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let mut budget = budget(&clock, &cancel);

        clock.advance(Duration::from_millis(16));
        let mut check = task::spawn(budget.checkpoint());
        assert_ready!(check.poll()).unwrap();
        drop(check);
        assert_eq!(budget.stats().turns, 0);
    }

    #[test]
    fn test_checkpoint_over_budget_yields_once() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let mut budget = budget(&clock, &cancel);

        clock.advance(Duration::from_millis(17));
        {
            let mut check = task::spawn(budget.checkpoint());
            assert_pending!(check.poll());
            assert!(check.is_woken());
            assert_ready!(check.poll()).unwrap();
        }
        assert_eq!(budget.stats(), BudgetStats { checkpoints: 1, turns: 1 });

        // the slice restarted at the yield
        clock.advance(Duration::from_millis(10));
        assert!(budget.checkpoint().now_or_never().unwrap().is_ok());
    }

    #[test]
    fn test_cancellation_is_observed_at_checkpoints() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let mut budget = budget(&clock, &cancel);

        cancel.cancel();
        let result = budget.checkpoint().now_or_never().unwrap();
        assert!(matches!(result, Err(DiError::Cancelled)));
    }

    #[test]
    fn test_cancellation_during_yield() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let mut budget = budget(&clock, &cancel);

        clock.advance(Duration::from_secs(1));
        let mut check = task::spawn(budget.checkpoint());
        assert_pending!(check.poll());
        cancel.cancel();
        assert!(matches!(assert_ready!(check.poll()), Err(DiError::Cancelled)));
    }

    #[test]
    fn test_frame_turn_waits_for_next_frame() {
        let mut frames = FrameLoop::new();
        let scheduler = frames.scheduler();
        let mut handle = frames
            .spawn(async move {
                scheduler.next_turn().await;
                scheduler.next_turn().await;
            })
            .unwrap();

        frames.run_frame();
        assert!((&mut handle).now_or_never().is_none());
        frames.run_frame();
        assert!((&mut handle).now_or_never().is_none());
        frames.run_frame();
        assert!((&mut handle).now_or_never().is_some());
        assert_eq!(frames.frames_elapsed(), 3);
    }
}
