// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::ops::ControlFlow;
use std::time::Duration;

/// Decides whether (and when) a lost connection should be opened again.
///
/// `attempts` counts the consecutive failures since the last connection
/// that was known to work, starting at 1.
pub trait ReconnectionPolicy: Send + Sync {
    fn should_retry(&self, attempts: usize) -> ControlFlow<(), Duration>;
}

/// Reconnect forever, waiting a little longer after every failure (up to
/// a couple of seconds).
pub struct AlwaysReconnect;

/// Never reconnect. The transport stays disconnected until reset.
pub struct NoReconnect;

/// Reconnect up to `attempts` times in a row, waiting `delay` every time.
pub struct FixedReconnect {
    pub attempts: usize,
    pub delay: Duration,
}

const BACKOFF_STEP: Duration = Duration::from_millis(200);
const MAX_BACKOFF_STEPS: u32 = 10;

impl ReconnectionPolicy for AlwaysReconnect {
    fn should_retry(&self, attempts: usize) -> ControlFlow<(), Duration> {
        let steps = attempts.saturating_sub(1).min(MAX_BACKOFF_STEPS as usize) as u32;
        ControlFlow::Continue(BACKOFF_STEP * steps)
    }
}

impl ReconnectionPolicy for NoReconnect {
    fn should_retry(&self, _: usize) -> ControlFlow<(), Duration> {
        ControlFlow::Break(())
    }
}

impl ReconnectionPolicy for FixedReconnect {
    fn should_retry(&self, attempts: usize) -> ControlFlow<(), Duration> {
        if attempts <= self.attempts {
            ControlFlow::Continue(self.delay)
        } else {
            ControlFlow::Break(())
        }
    }
}
