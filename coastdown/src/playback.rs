use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::surface::TimeSlider;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
}

/// Shared stop flag, checked before every tick.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Steps the window start along a slider, looping back to the start.
#[derive(Clone, Debug)]
pub struct Player {
    slider: TimeSlider,
    position: f64,
    state: PlaybackState,
}

impl Player {
    pub fn new(slider: TimeSlider) -> Self {
        Self {
            position: slider.from,
            slider,
            state: PlaybackState::Idle,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Move the slider by hand; the value is clamped to the slider range.
    pub fn seek(&mut self, t: f64) {
        self.position = t.clamp(self.slider.from, self.slider.to);
    }

    pub fn start(&mut self) {
        self.state = PlaybackState::Playing;
    }

    pub fn stop(&mut self) {
        self.state = PlaybackState::Idle;
    }

    /// Advance one step if still playing and not cancelled. A cancelled token
    /// drops the player back to idle.
    pub fn tick(&mut self, token: &CancelToken) -> Option<f64> {
        if token.is_cancelled() {
            self.state = PlaybackState::Idle;
        }
        if self.state != PlaybackState::Playing {
            return None;
        }
        self.position = self.slider.advance(self.position);
        Some(self.position)
    }

    /// Play from the current position, calling `on_frame` with it and then
    /// with every tick, sleeping `delay` between ticks. Stops when the token is
    /// cancelled, `max_frames` frames were produced, or `on_frame` fails.
    /// Returns the number of frames produced.
    pub fn run<E>(
        &mut self,
        token: &CancelToken,
        delay: Duration,
        max_frames: Option<usize>,
        mut on_frame: impl FnMut(f64) -> Result<(), E>,
    ) -> Result<usize, E> {
        self.start();
        let mut frames = 0;
        let mut next = if token.is_cancelled() {
            None
        } else {
            Some(self.position)
        };
        while let Some(t) = next {
            if let Err(err) = on_frame(t) {
                self.stop();
                return Err(err);
            }
            frames += 1;
            if max_frames.is_some_and(|max| frames >= max) {
                break;
            }
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            next = self.tick(token);
        }
        self.stop();
        Ok(frames)
    }
}
