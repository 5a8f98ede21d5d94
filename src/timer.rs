//! Per-stage timing and frame rate logging.

use std::{
    fmt,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::filter::{
    ema::{Ema, EmaState},
    Filter,
};

const EMA_ALPHA: f32 = 0.3;

/// Measures how long an operation takes, smoothed over several runs.
///
/// Displaying a timer with `{}` prints the smoothed duration and the number of samples taken since
/// it was last displayed, then starts a new measurement window.
pub struct Timer {
    name: &'static str,
    ema: Ema,
    state: Mutex<TimerState>,
}

#[derive(Default)]
struct TimerState {
    ema: EmaState,
    avg_secs: f32,
    samples: usize,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ema: Ema::new(EMA_ALPHA),
            state: Mutex::new(TimerState::default()),
        }
    }

    /// Runs `f`, recording how long it took.
    pub fn time<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.start();
        f()
    }

    /// Starts a measurement that ends when the returned guard is dropped.
    pub fn start(&self) -> TimerGuard<'_> {
        TimerGuard {
            timer: self,
            start: Instant::now(),
        }
    }

    fn record(&self, elapsed: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *state;
        state.avg_secs = self.ema.filter(&mut state.ema, elapsed.as_secs_f32());
        state.samples += 1;
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = std::mem::take(&mut *self.state.lock().unwrap_or_else(|e| e.into_inner()));
        write!(
            f,
            "{}: {}x{:.01}ms",
            self.name,
            state.samples,
            state.avg_secs * 1000.0
        )
    }
}

/// Measurement guard returned by [`Timer::start`].
pub struct TimerGuard<'a> {
    timer: &'a Timer,
    start: Instant,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.record(self.start.elapsed());
    }
}

/// Counts processed frames and logs the frame rate once per second.
pub struct FpsCounter {
    name: String,
    frames: u32,
    window_start: Instant,
}

impl FpsCounter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frames: 0,
            window_start: Instant::now(),
        }
    }

    /// Counts one frame; once per second, logs the frame rate followed by `extra` (typically
    /// [`Timer`]s, which are reset by being displayed).
    pub fn tick_with<D: fmt::Display>(&mut self, extra: impl IntoIterator<Item = D>) {
        self.frames += 1;
        if self.window_start.elapsed() < Duration::from_secs(1) {
            return;
        }

        let extra = extra.into_iter().map(|d| d.to_string()).collect::<Vec<_>>();
        if extra.is_empty() {
            log::debug!("{}: {} FPS", self.name, self.frames);
        } else {
            log::debug!("{}: {} FPS ({})", self.name, self.frames, extra.join(", "));
        }

        self.frames = 0;
        self.window_start = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_resets() {
        let timer = Timer::new("work");
        timer.time(|| ());
        timer.record(Duration::from_millis(10));

        let shown = timer.to_string();
        assert!(shown.starts_with("work: 2x"), "{shown}");
        assert_eq!(timer.to_string(), "work: 0x0.0ms");
    }
}
