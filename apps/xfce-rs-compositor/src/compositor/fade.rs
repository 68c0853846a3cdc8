//! Opacity animation.
//!
//! The engine only interpolates numbers. Applying the opacity to a window
//! and running completion actions is left to the caller, which lets an
//! action purge the window without the engine ever touching freed state.

use std::time::{Duration, Instant};

use crate::compositor::window::WindowKey;

/// Work to run once a fade reaches its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeCompletion {
    FinishUnmap,
    FinishDestroy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FadeJob {
    pub window: WindowKey,
    pub current: f64,
    pub target: f64,
    pub step: f64,
    pub on_complete: Option<FadeCompletion>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeRequest {
    pub from: f64,
    pub to: f64,
    /// Magnitude of one tick; the sign is derived from `from` and `to`.
    pub step: f64,
    pub on_complete: Option<FadeCompletion>,
    /// Replace a running job instead of leaving it alone.
    pub override_existing: bool,
    /// When replacing, hand back the old job's completion to be run.
    pub run_previous: bool,
}

/// Result of a start request that was not ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeStart {
    /// Opacity the window should show right now.
    pub current: f64,
    /// Completion of the replaced job, to be run by the caller.
    pub previous: Option<FadeCompletion>,
}

/// One job's progress during a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeStep {
    pub window: WindowKey,
    pub opacity: f64,
    pub finished: bool,
    pub on_complete: Option<FadeCompletion>,
}

#[derive(Debug)]
pub struct FadeEngine {
    jobs: Vec<FadeJob>,
    interval: Duration,
    next_tick: Instant,
}

impl FadeEngine {
    pub fn new(interval: Duration) -> Self {
        Self {
            jobs: Vec::new(),
            interval,
            next_tick: Instant::now(),
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    #[cfg(test)]
    pub fn job(&self, window: WindowKey) -> Option<&FadeJob> {
        self.jobs.iter().find(|job| job.window == window)
    }

    /// When the next tick is due, if any job is running.
    pub fn next_tick(&self) -> Option<Instant> {
        (!self.jobs.is_empty()).then_some(self.next_tick)
    }

    /// Create or retarget the fade for `window`.
    ///
    /// Returns `None` if a job exists and the request does not override it.
    /// A replaced job keeps its current value and only changes direction,
    /// target and completion.
    pub fn start_or_update(&mut self, window: WindowKey, request: FadeRequest, now: Instant) -> Option<FadeStart> {
        let mut previous = None;
        let index = match self.jobs.iter().position(|job| job.window == window) {
            Some(_) if !request.override_existing => return None,
            Some(index) => {
                let old = self.jobs[index].on_complete.take();
                if request.run_previous {
                    previous = old;
                }
                index
            }
            None => {
                if self.jobs.is_empty() {
                    self.next_tick = now + self.interval;
                }
                self.jobs.push(FadeJob {
                    window,
                    current: request.from.clamp(0.0, 1.0),
                    target: request.to,
                    step: request.step,
                    on_complete: None,
                });
                self.jobs.len() - 1
            }
        };

        let job = &mut self.jobs[index];
        job.target = request.to.clamp(0.0, 1.0);
        let magnitude = request.step.abs();
        job.step = if job.current > job.target { -magnitude } else { magnitude };
        job.on_complete = request.on_complete;

        Some(FadeStart {
            current: job.current,
            previous,
        })
    }

    /// Drop the job for `window` without running its completion.
    pub fn cancel(&mut self, window: WindowKey) -> Option<FadeJob> {
        let index = self.jobs.iter().position(|job| job.window == window)?;
        Some(self.jobs.remove(index))
    }

    /// Advance every job if the tick is due.
    ///
    /// A late tick catches up by applying several steps at once. Finished
    /// jobs are removed before this returns; their completion is reported
    /// exactly once in the returned steps.
    pub fn tick(&mut self, now: Instant) -> Vec<FadeStep> {
        if self.jobs.is_empty() || now < self.next_tick {
            return Vec::new();
        }
        let interval = self.interval.as_millis().max(1);
        let late = now.duration_since(self.next_tick).as_millis();
        let steps = (1 + late / interval) as f64;

        let mut progress = Vec::with_capacity(self.jobs.len());
        self.jobs.retain_mut(|job| {
            job.current = (job.current + job.step * steps).clamp(0.0, 1.0);
            // Repeated float steps drift; a remainder below this counts as arrived.
            let tolerance = job.step.abs() * 1e-6;
            let finished = if job.step > 0.0 {
                job.current >= job.target - tolerance
            } else {
                job.current <= job.target + tolerance
            };
            if finished {
                job.current = job.target;
            }
            progress.push(FadeStep {
                window: job.window,
                opacity: job.current,
                finished,
                on_complete: if finished { job.on_complete.take() } else { None },
            });
            !finished
        });

        self.next_tick = now + self.interval;
        progress
    }
}
