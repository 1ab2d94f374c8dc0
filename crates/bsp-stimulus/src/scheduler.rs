//! Timed prompt broadcast loop with start/stop lifecycle
//!
//! A [`PromptScheduler`] owns a stimulus sequence and, once started, a single
//! background task that publishes the current state every interval and moves
//! the cursor forward, wrapping at the end. Runs are single-use: after
//! `stop()` a fresh scheduler is needed to run again.

use crate::outlet::BroadcastChannel;
use bsp_core::{BspError, BspResult, StimulusSequence};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant, Sleep};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

impl SchedulerState {
    fn as_u8(self) -> u8 {
        match self {
            SchedulerState::Idle => 0,
            SchedulerState::Running => 1,
            SchedulerState::Stopped => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SchedulerState::Idle,
            1 => SchedulerState::Running,
            _ => SchedulerState::Stopped,
        }
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub state: SchedulerState,
    /// Ticks executed, successful or not
    pub ticks: u64,
    pub publish_failures: u64,
    /// Index of the state the next tick will publish
    pub cursor: usize,
}

/// State shared between the scheduler, its handles and the loop task.
///
/// `running` is written by `stop()` and read by the loop. The counters and
/// the cursor mirror are written only by the loop.
#[derive(Debug)]
struct RunControl {
    state: AtomicU8,
    running: AtomicBool,
    wake: Notify,
    ticks: AtomicU64,
    publish_failures: AtomicU64,
    cursor: AtomicUsize,
}

impl RunControl {
    fn new() -> Self {
        RunControl {
            state: AtomicU8::new(SchedulerState::Idle.as_u8()),
            running: AtomicBool::new(false),
            wake: Notify::new(),
            ticks: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            cursor: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: SchedulerState, to: SchedulerState) -> Result<(), SchedulerState> {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(SchedulerState::from_u8)
    }

    fn stop(&self) {
        if self
            .transition(SchedulerState::Running, SchedulerState::Stopped)
            .is_ok()
        {
            self.running.store(false, Ordering::Release);
            // Stores a permit if the loop is mid-tick rather than sleeping
            self.wake.notify_one();
            info!("Prompt scheduler stop requested");
        }
    }

    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            state: self.state(),
            ticks: self.ticks.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            cursor: self.cursor.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable control handle, usable from any task or thread
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    control: Arc<RunControl>,
}

impl SchedulerHandle {
    /// Request the loop to stop. Idempotent.
    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn state(&self) -> SchedulerState {
        self.control.state()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.control.stats()
    }
}

/// Periodic prompt publisher over a fixed stimulus sequence
pub struct PromptScheduler {
    run_id: Uuid,
    sequence: StimulusSequence,
    interval: Duration,
    channel: Arc<dyn BroadcastChannel>,
    control: Arc<RunControl>,
    task: Option<JoinHandle<()>>,
}

impl PromptScheduler {
    /// Create an idle scheduler.
    ///
    /// Fails if the sequence is empty, the interval is zero, or the sequence
    /// width differs from the channel count.
    pub fn new(
        sequence: StimulusSequence,
        interval: Duration,
        channel: Arc<dyn BroadcastChannel>,
    ) -> BspResult<Self> {
        if sequence.is_empty() {
            return Err(BspError::config("stimulus sequence must not be empty"));
        }
        if interval.is_zero() {
            return Err(BspError::config("prompt interval must be positive"));
        }

        let channel_count = channel.info().channel_count;
        if let Some(position) = sequence.iter().position(|s| s.len() != channel_count) {
            return Err(BspError::config(format!(
                "state {} has {} values but stream '{}' has {} channels",
                position,
                sequence.states()[position].len(),
                channel.info().name,
                channel_count
            )));
        }

        Ok(PromptScheduler {
            run_id: Uuid::new_v4(),
            sequence,
            interval,
            channel,
            control: Arc::new(RunControl::new()),
            task: None,
        })
    }

    /// Launch the publish loop on the current tokio runtime and return immediately
    pub fn start(&mut self) -> BspResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| BspError::lifecycle("start() must be called within a tokio runtime"))?;

        self.control
            .transition(SchedulerState::Idle, SchedulerState::Running)
            .map_err(|current| {
                BspError::lifecycle(format!(
                    "scheduler is {:?}; runs are single-use, create a new scheduler",
                    current
                ))
            })?;
        self.control.running.store(true, Ordering::Release);

        let run = SchedulerRun {
            sequence: self.sequence.clone(),
            cursor: 0,
            interval: self.interval,
            channel: Arc::clone(&self.channel),
            control: Arc::clone(&self.control),
        };
        let span = info_span!("prompt_scheduler", run_id = %self.run_id);
        self.task = Some(runtime.spawn(run.run().instrument(span)));

        Ok(())
    }

    /// Request the loop to stop. Idempotent; a no-op when idle or stopped.
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Wait for the loop task to exit. Returns at once if never started.
    pub async fn join(&mut self) -> BspResult<()> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| BspError::lifecycle(format!("prompt loop task failed: {}", e))),
            None => Ok(()),
        }
    }

    /// Get a handle for stopping the run from elsewhere
    pub fn control_handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            control: Arc::clone(&self.control),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.control.state()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.control.stats()
    }

    pub fn sequence(&self) -> &StimulusSequence {
        &self.sequence
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

impl Drop for PromptScheduler {
    fn drop(&mut self) {
        self.control.stop();
    }
}

/// Loop-owned state for one run
struct SchedulerRun {
    sequence: StimulusSequence,
    cursor: usize,
    interval: Duration,
    channel: Arc<dyn BroadcastChannel>,
    control: Arc<RunControl>,
}

impl SchedulerRun {
    async fn run(mut self) {
        info!(
            states = self.sequence.len(),
            interval_ms = self.interval.as_millis() as u64,
            stream = %self.channel.info().name,
            "Prompt loop started"
        );

        while self.control.running.load(Ordering::Acquire) {
            let tick_started = Instant::now();
            self.tick();

            tokio::select! {
                _ = self.next_tick(tick_started) => {}
                _ = self.control.wake.notified() => {}
            }
        }

        info!(
            ticks = self.control.ticks.load(Ordering::Relaxed),
            publish_failures = self.control.publish_failures.load(Ordering::Relaxed),
            "Prompt loop exited"
        );
    }

    /// Sleep until one interval after `tick_started`.
    ///
    /// Deadlines past the representable `Instant` range fall back to a plain
    /// sleep, which tokio clamps to its far-future instant.
    fn next_tick(&self, tick_started: Instant) -> Sleep {
        match tick_started.checked_add(self.interval) {
            Some(deadline) => sleep_until(deadline),
            None => sleep(self.interval),
        }
    }

    /// Publish the current state and advance the cursor
    fn tick(&mut self) {
        let index = self.cursor;
        let values = self.sequence.states()[index].to_channel_values();

        match self.channel.publish(&values) {
            Ok(()) => debug!(index, ?values, "Sent prompt"),
            Err(e) => {
                self.control.publish_failures.fetch_add(1, Ordering::Relaxed);
                warn!(index, error = %e, "Prompt publish failed, retrying next tick");
            }
        }

        self.control.ticks.fetch_add(1, Ordering::Relaxed);
        self.cursor = (self.cursor + 1) % self.sequence.len();
        self.control.cursor.store(self.cursor, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outlet::StreamInfo;
    use bsp_core::{LabelSet, StimulusState};
    use std::sync::Mutex;
    use tokio::time::{sleep, timeout};

    const INTERVAL: Duration = Duration::from_millis(100);

    /// Records every publish; fails the calls whose 0-based index is listed
    struct RecordingChannel {
        info: StreamInfo,
        published: Mutex<Vec<Vec<i8>>>,
        attempts: AtomicU64,
        fail_on: Vec<u64>,
    }

    impl RecordingChannel {
        fn new(width: usize) -> Arc<Self> {
            Self::failing(width, Vec::new())
        }

        fn failing(width: usize, fail_on: Vec<u64>) -> Arc<Self> {
            let names: Vec<String> = (0..width).map(|i| format!("ch{}", i)).collect();
            let labels = LabelSet::new(names).unwrap();
            Arc::new(RecordingChannel {
                info: StreamInfo::new("test_prompt", "Markers", &labels, INTERVAL, "test").unwrap(),
                published: Mutex::new(Vec::new()),
                attempts: AtomicU64::new(0),
                fail_on,
            })
        }

        fn published(&self) -> Vec<Vec<i8>> {
            self.published.lock().unwrap().clone()
        }

        fn attempts(&self) -> u64 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl BroadcastChannel for RecordingChannel {
        fn info(&self) -> &StreamInfo {
            &self.info
        }

        fn publish(&self, values: &[i8]) -> BspResult<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.contains(&attempt) {
                return Err(BspError::channel("transport unavailable"));
            }
            self.published.lock().unwrap().push(values.to_vec());
            Ok(())
        }
    }

    fn one_hot_sequence(width: usize, len: usize) -> StimulusSequence {
        StimulusSequence::new(
            (0..len)
                .map(|i| {
                    let mut state = StimulusState::rest(width);
                    state.set(i % width, true);
                    state
                })
                .collect(),
        )
    }

    fn values(sequence: &StimulusSequence, index: usize) -> Vec<i8> {
        sequence.get(index).unwrap().to_channel_values()
    }

    #[test]
    fn test_new_rejects_empty_sequence() {
        let channel = RecordingChannel::new(3);
        let result = PromptScheduler::new(StimulusSequence::new(Vec::new()), INTERVAL, channel);
        assert!(matches!(result, Err(BspError::ConfigurationError { .. })));
    }

    #[test]
    fn test_new_rejects_zero_interval() {
        let channel = RecordingChannel::new(3);
        let result = PromptScheduler::new(one_hot_sequence(3, 3), Duration::ZERO, channel);
        assert!(matches!(result, Err(BspError::ConfigurationError { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_beyond_instant_range_keeps_loop_alive() {
        let channel = RecordingChannel::new(3);
        let huge = Duration::from_secs_f64(1.5e19);
        let mut scheduler =
            PromptScheduler::new(one_hot_sequence(3, 3), huge, channel.clone()).unwrap();

        scheduler.start().unwrap();
        sleep(Duration::from_millis(50)).await;
        scheduler.stop();
        scheduler.join().await.unwrap();

        assert_eq!(channel.attempts(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn test_new_rejects_width_mismatch() {
        let channel = RecordingChannel::new(4);
        let result = PromptScheduler::new(one_hot_sequence(3, 3), INTERVAL, channel);
        assert!(result.is_err());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let channel = RecordingChannel::new(3);
        let mut scheduler = PromptScheduler::new(one_hot_sequence(3, 3), INTERVAL, channel).unwrap();
        assert!(matches!(
            scheduler.start(),
            Err(BspError::LifecycleError { .. })
        ));
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_intervals_publish_three_states_in_order() {
        let sequence = one_hot_sequence(5, 5);
        let channel = RecordingChannel::new(5);
        let mut scheduler =
            PromptScheduler::new(sequence.clone(), INTERVAL, channel.clone()).unwrap();

        scheduler.start().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        sleep(INTERVAL * 3 - Duration::from_millis(1)).await;
        scheduler.stop();
        scheduler.join().await.unwrap();

        assert_eq!(
            channel.published(),
            vec![values(&sequence, 0), values(&sequence, 1), values(&sequence, 2)]
        );
        assert_eq!(scheduler.stats().ticks, 3);
        assert_eq!(scheduler.stats().cursor, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_sequence_wraps_within_three_intervals() {
        let sequence = one_hot_sequence(3, 2);
        let channel = RecordingChannel::new(3);
        let mut scheduler =
            PromptScheduler::new(sequence.clone(), INTERVAL, channel.clone()).unwrap();

        scheduler.start().unwrap();
        sleep(INTERVAL * 3 - Duration::from_millis(1)).await;
        scheduler.stop();
        scheduler.join().await.unwrap();

        assert_eq!(
            channel.published(),
            vec![values(&sequence, 0), values(&sequence, 1), values(&sequence, 0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_after_full_cycle_repeats_first_state() {
        let len = 4;
        let sequence = one_hot_sequence(4, len);
        let channel = RecordingChannel::new(4);
        let mut scheduler =
            PromptScheduler::new(sequence.clone(), INTERVAL, channel.clone()).unwrap();

        scheduler.start().unwrap();
        sleep(INTERVAL * (len as u32 + 1) - Duration::from_millis(1)).await;
        scheduler.stop();
        scheduler.join().await.unwrap();

        let published = channel.published();
        assert_eq!(published.len(), len + 1);
        assert_eq!(published[len], values(&sequence, 0));
        assert_eq!(scheduler.stats().cursor, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_immediately_after_start() {
        let channel = RecordingChannel::new(3);
        let mut scheduler =
            PromptScheduler::new(one_hot_sequence(3, 3), INTERVAL, channel.clone()).unwrap();

        scheduler.start().unwrap();
        scheduler.stop();
        let published_at_stop = channel.attempts();

        timeout(INTERVAL, scheduler.join())
            .await
            .expect("loop should exit within one interval")
            .unwrap();

        assert!(channel.attempts() <= published_at_stop + 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_sleep() {
        let channel = RecordingChannel::new(3);
        let long = Duration::from_secs(60);
        let mut scheduler =
            PromptScheduler::new(one_hot_sequence(3, 3), long, channel.clone()).unwrap();

        scheduler.start().unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(channel.attempts(), 1);

        let started = Instant::now();
        scheduler.stop();
        scheduler.join().await.unwrap();
        assert!(started.elapsed() < long);
        assert_eq!(channel.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_error_does_not_stop_loop() {
        let sequence = one_hot_sequence(3, 3);
        let channel = RecordingChannel::failing(3, vec![0]);
        let mut scheduler =
            PromptScheduler::new(sequence.clone(), INTERVAL, channel.clone()).unwrap();

        scheduler.start().unwrap();
        sleep(INTERVAL * 3 - Duration::from_millis(1)).await;
        scheduler.stop();
        scheduler.join().await.unwrap();

        let stats = scheduler.stats();
        assert_eq!(channel.attempts(), 3);
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.publish_failures, 1);
        // The failed tick still advances the cursor
        assert_eq!(
            channel.published(),
            vec![values(&sequence, 1), values(&sequence, 2)]
        );
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let channel = RecordingChannel::new(3);
        let mut scheduler =
            PromptScheduler::new(one_hot_sequence(3, 3), INTERVAL, channel).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        // Stopping an idle scheduler is a no-op
        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        scheduler.start().unwrap();
        assert!(matches!(
            scheduler.start(),
            Err(BspError::LifecycleError { .. })
        ));

        scheduler.stop();
        scheduler.stop();
        scheduler.join().await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(scheduler.start().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_handle_stops_from_another_task() {
        let channel = RecordingChannel::new(3);
        let mut scheduler =
            PromptScheduler::new(one_hot_sequence(3, 3), INTERVAL, channel.clone()).unwrap();
        let handle = scheduler.control_handle();

        scheduler.start().unwrap();
        tokio::spawn(async move {
            sleep(INTERVAL + INTERVAL / 2).await;
            handle.stop();
        });
        scheduler.join().await.unwrap();

        assert_eq!(channel.attempts(), 2);
        assert_eq!(scheduler.control_handle().state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_control_handle_stops_from_os_thread() {
        let channel = RecordingChannel::new(3);
        let mut scheduler =
            PromptScheduler::new(one_hot_sequence(3, 3), INTERVAL, channel.clone()).unwrap();
        let handle = scheduler.control_handle();

        scheduler.start().unwrap();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            handle.stop();
            handle.state()
        });

        timeout(Duration::from_secs(5), scheduler.join())
            .await
            .expect("loop should exit after a stop from another thread")
            .unwrap();

        assert_eq!(stopper.join().unwrap(), SchedulerState::Stopped);
        assert!(channel.attempts() >= 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }
}
