//! Stopwatch producing timed results for the score upsert path.
//!
//! Elapsed time is authoritative from the start reference; the periodic
//! sampler only feeds displays and runs solely while the stopwatch runs.

use serde::Deserialize;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Duration, Instant, MissedTickBehavior},
};

use crate::{
    runtime::handle::{RuntimeError, SportsDayHandle},
    types::{EventId, ParticipantId},
    upsert::UpsertOutcome,
};

/// Stopwatch tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StopwatchConfig {
    /// Display sampling period while running.
    pub sample_interval_ms: u64,
}

impl Default for StopwatchConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 10,
        }
    }
}

impl StopwatchConfig {
    /// Sampling period, never shorter than one millisecond.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }
}

/// Observable stopwatch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopwatchState {
    /// Never started, or reset.
    Idle,
    /// Counting.
    Running,
    /// Frozen; resumes from the frozen time.
    Stopped,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    Running { reference: Instant },
    Stopped { elapsed: Duration },
}

/// Measures elapsed time for one timed attempt.
///
/// Needs a tokio runtime only for display sampling; without one the
/// stopwatch still measures, it just publishes no samples while running.
pub struct Stopwatch {
    phase: Phase,
    laps: Vec<Duration>,
    config: StopwatchConfig,
    display_tx: watch::Sender<Duration>,
    sampler: Option<JoinHandle<()>>,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new(StopwatchConfig::default())
    }
}

impl Stopwatch {
    /// An idle stopwatch.
    pub fn new(config: StopwatchConfig) -> Self {
        let (display_tx, _) = watch::channel(Duration::ZERO);
        Self {
            phase: Phase::Idle,
            laps: Vec::new(),
            config,
            display_tx,
            sampler: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> StopwatchState {
        match self.phase {
            Phase::Idle => StopwatchState::Idle,
            Phase::Running { .. } => StopwatchState::Running,
            Phase::Stopped { .. } => StopwatchState::Stopped,
        }
    }

    /// Time counted so far, live while running.
    pub fn elapsed(&self) -> Duration {
        match self.phase {
            Phase::Idle => Duration::ZERO,
            Phase::Running { reference } => reference.elapsed(),
            Phase::Stopped { elapsed } => elapsed,
        }
    }

    /// Starts from idle or resumes from stopped, keeping the elapsed time.
    /// No-op while running.
    pub fn start(&mut self) {
        if matches!(self.phase, Phase::Running { .. }) {
            return;
        }
        let now = Instant::now();
        let reference = now.checked_sub(self.elapsed()).unwrap_or(now);
        self.phase = Phase::Running { reference };
        self.spawn_sampler(reference);
    }

    /// Freezes the elapsed time. No-op unless running.
    pub fn stop(&mut self) {
        let Phase::Running { reference } = self.phase else {
            return;
        };
        let elapsed = reference.elapsed();
        self.phase = Phase::Stopped { elapsed };
        self.cancel_sampler();
        self.display_tx.send_replace(elapsed);
    }

    /// Records a lap mark. Only valid while running; otherwise returns
    /// `None` and records nothing.
    pub fn lap(&mut self) -> Option<Duration> {
        let Phase::Running { reference } = self.phase else {
            return None;
        };
        let mark = reference.elapsed();
        self.laps.push(mark);
        Some(mark)
    }

    /// Back to idle from any state: elapsed zero, laps cleared.
    pub fn reset(&mut self) {
        self.cancel_sampler();
        self.phase = Phase::Idle;
        self.laps.clear();
        self.display_tx.send_replace(Duration::ZERO);
    }

    /// Lap marks as elapsed time since start, in recording order.
    pub fn laps(&self) -> &[Duration] {
        &self.laps
    }

    /// Time between consecutive lap marks; the first split is measured from
    /// zero.
    pub fn lap_splits(&self) -> Vec<Duration> {
        let mut prev = Duration::ZERO;
        self.laps
            .iter()
            .map(|mark| {
                let split = mark.saturating_sub(prev);
                prev = *mark;
                split
            })
            .collect()
    }

    /// Periodic elapsed samples for display.
    pub fn display(&self) -> watch::Receiver<Duration> {
        self.display_tx.subscribe()
    }

    /// True while a display sampler task is alive.
    pub fn is_sampling(&self) -> bool {
        self.sampler.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Elapsed time in seconds, at millisecond resolution.
    pub fn score_value(&self) -> f64 {
        self.elapsed().as_millis() as f64 / 1000.0
    }

    /// Elapsed seconds as a score candidate string.
    pub fn candidate(&self) -> String {
        self.score_value().to_string()
    }

    /// Saves the current elapsed time as the pair's score. Saving again
    /// overwrites the same score record.
    pub async fn save_to(
        &self,
        handle: &SportsDayHandle,
        event_id: EventId,
        participant_id: ParticipantId,
    ) -> Result<UpsertOutcome, RuntimeError> {
        let candidate = self.candidate();
        tracing::debug!(event_id, participant_id, %candidate, "saving timed result");
        handle.save_score(event_id, participant_id, &candidate).await
    }

    fn spawn_sampler(&mut self, reference: Instant) {
        self.cancel_sampler();
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let tx = self.display_tx.clone();
        let every = self.config.sample_interval();
        self.sampler = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tx.send_replace(reference.elapsed());
            }
        }));
    }

    fn cancel_sampler(&mut self) {
        if let Some(task) = self.sampler.take() {
            task.abort();
        }
    }
}

impl Drop for Stopwatch {
    fn drop(&mut self) {
        self.cancel_sampler();
    }
}

/// Formats a duration as `MM:SS.cc`; minutes grow past 99 if needed.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    format!(
        "{:02}:{:02}.{:02}",
        total_secs / 60,
        total_secs % 60,
        elapsed.subsec_millis() / 10
    )
}
