use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ProgressConfig;

/// Highest ceiling the estimator accepts. 100 is reserved for real completion.
pub const MAX_CEILING: f64 = 99.0;

const MIN_STEP: f64 = 0.01;
const MAX_STEP: f64 = 100.0;
const MIN_TICK: Duration = Duration::from_millis(1);

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Fake progress signal for requests with no observable progress.
///
/// Each tick adds a random step to the estimate until it reaches the ceiling,
/// then the task ends on its own. The values are never authoritative and
/// never reach 100.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    config: ProgressConfig,
    seed: Option<u64>,
}

impl ProgressEstimator {
    /// Non-finite or out-of-range settings fall back to usable values, so
    /// the tick task can never panic on them.
    pub fn new(mut config: ProgressConfig) -> Self {
        let defaults = ProgressConfig::default();
        config.tick = config.tick.max(MIN_TICK);
        config.ceiling = finite_or(config.ceiling, defaults.ceiling).clamp(0.0, MAX_CEILING);
        config.min_step = finite_or(config.min_step, defaults.min_step).clamp(MIN_STEP, MAX_STEP);
        config.max_step = finite_or(config.max_step, defaults.max_step).min(MAX_STEP);
        if config.max_step <= config.min_step {
            config.max_step = config.min_step * 2.0;
        }
        Self { config, seed: None }
    }

    /// Fix the random sequence, mostly for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn ceiling(&self) -> f64 {
        self.config.ceiling
    }

    /// Spawn the ticking task. `on_tick` receives each new estimate.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(&self, on_tick: F) -> ProgressHandle
    where
        F: FnMut(f64) + Send + 'static,
    {
        self.start_linked(&CancellationToken::new(), on_tick)
    }

    /// Like [`start`](Self::start), but ticking also stops as soon as
    /// `parent` is cancelled.
    pub fn start_linked<F>(&self, parent: &CancellationToken, mut on_tick: F) -> ProgressHandle
    where
        F: FnMut(f64) + Send + 'static,
    {
        let token = parent.child_token();
        let child = token.clone();
        let ProgressConfig {
            tick,
            min_step,
            max_step,
            ceiling,
        } = self.config.clone();
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            // The first tick of an interval completes immediately.
            interval.tick().await;

            let mut value = 0.0_f64;
            while value < ceiling {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = interval.tick() => {}
                }
                value = (value + rng.random_range(min_step..max_step)).min(ceiling);
                on_tick(value);
            }
        });

        ProgressHandle {
            token,
            task: Some(task),
        }
    }
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new(ProgressConfig::default())
    }
}

/// Owner of a running estimator. Stopping or dropping it ends the ticks.
#[derive(Debug)]
pub struct ProgressHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ProgressHandle {
    /// Stop ticking immediately.
    pub fn stop(mut self) {
        self.halt();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }

    fn halt(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ProgressHandle {
    fn drop(&mut self) {
        self.halt();
    }
}
