// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reconnect backoff timer machine.
//!
//! Each `start` arms a timer for the current delay and doubles the delay
//! for the next attempt, up to the configured cap. `reset` returns the
//! delay to the initial interval; the owner calls it on any successful
//! transition into its active state.

use std::time::Duration;

use crate::reactor::event::{BackoffEvent, Event, Source, TimerId};
use crate::reactor::Ctx;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BackoffState {
    /// Not armed.
    Idle,

    /// Timer armed, waiting for the delay to elapse.
    Armed,

    /// Timeout raised; waiting for the owner to stop us.
    Fired,

    /// Stop commanded; terminal event not yet observed by the owner.
    Stopping,
}

/// Exponential reconnect timer.
pub(crate) struct Backoff {
    tag: Source,
    state: BackoffState,
    min_ivl: Duration,
    max_ivl: Duration,
    current: Duration,
    timer: Option<TimerId>,
}

impl Backoff {
    /// Create an idle backoff whose delay grows from `min_ivl` up to
    /// `max_ivl` (the owner derives the effective cap from its options).
    pub fn new(tag: Source, min_ivl: Duration, max_ivl: Duration) -> Self {
        Self {
            tag,
            state: BackoffState::Idle,
            min_ivl,
            max_ivl,
            current: min_ivl,
            timer: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == BackoffState::Idle
    }

    /// Arm the timer for the current delay and advance the delay.
    pub fn start(&mut self, ctx: &mut Ctx<'_>) {
        debug_assert_eq!(self.state, BackoffState::Idle);
        let delay = self.current;
        self.advance();
        self.timer = Some(ctx.set_timer(delay, self.tag));
        self.state = BackoffState::Armed;
        log::debug!("backoff armed for {:?}", delay);
    }

    /// A reactor timer fired; raise `Timeout` if it is ours.
    pub fn on_timer(&mut self, ctx: &mut Ctx<'_>, id: TimerId) {
        if self.state != BackoffState::Armed || self.timer != Some(id) {
            log::trace!("stale timer {} ignored", id);
            return;
        }
        self.timer = None;
        self.state = BackoffState::Fired;
        ctx.raise(self.tag, Event::Backoff(BackoffEvent::Timeout));
    }

    /// Stop the timer. A pending fire is cancelled lazily (the stale id
    /// is ignored when it pops).
    pub fn stop(&mut self, ctx: &mut Ctx<'_>) {
        match self.state {
            BackoffState::Idle | BackoffState::Stopping => {}
            BackoffState::Armed | BackoffState::Fired => {
                self.timer = None;
                self.state = BackoffState::Stopping;
                ctx.raise(self.tag, Event::Backoff(BackoffEvent::Stopped));
            }
        }
    }

    /// Return the delay sequence to the initial interval.
    pub fn reset(&mut self) {
        self.current = self.min_ivl;
    }

    /// The owner observed the terminal `Stopped` event.
    pub fn confirm_stopped(&mut self) {
        debug_assert_eq!(self.state, BackoffState::Stopping);
        self.state = BackoffState::Idle;
    }

    fn advance(&mut self) {
        self.current = (self.current * 2).min(self.max_ivl);
    }
}

// ============================================================================
// Tests
// ============================================================================
