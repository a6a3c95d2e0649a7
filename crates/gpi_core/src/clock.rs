//! Clock drivers: a signal toggled by a self-rearming timed callback.
//!
//! A clock never involves the scheduler. Each firing writes the next level
//! and registers the timer for the following half period, so a running
//! clock holds exactly one pending registration.

use crate::backend::{SignalValue, WriteAction};
use crate::dispatch::Handler;
use crate::error::GpiError;
use crate::handle::{CallbackHandle, ObjectHandle};
use crate::ids::ClockId;
use crate::runtime::Runtime;
use gpi_common::LogicVec;
use tracing::{debug, trace};

/// State of one clock driver.
#[derive(Debug)]
pub struct GpiClock {
    signal: ObjectHandle,
    period: u64,
    high: u64,
    start_high: bool,
    action: WriteAction,
    level: bool,
    callback: Option<CallbackHandle>,
    running: bool,
}

impl GpiClock {
    fn new(signal: ObjectHandle) -> Self {
        Self {
            signal,
            period: 0,
            high: 0,
            start_high: true,
            action: WriteAction::Deposit,
            level: false,
            callback: None,
            running: false,
        }
    }

    /// Driven signal.
    pub fn signal(&self) -> &ObjectHandle {
        &self.signal
    }

    /// Period in simulator steps.
    pub fn period(&self) -> u64 {
        self.period
    }

    /// Steps spent high per period.
    pub fn high_time(&self) -> u64 {
        self.high
    }

    /// Whether the first level written was high.
    pub fn starts_high(&self) -> bool {
        self.start_high
    }

    /// Steps until the next toggle from the current level.
    fn half(&self) -> u64 {
        if self.level {
            self.high
        } else {
            self.period - self.high
        }
    }
}

impl Runtime {
    /// Creates a stopped clock for `signal`.
    pub fn create_clock(&mut self, signal: ObjectHandle) -> ClockId {
        debug!(signal = signal.full_name(), "clock created");
        self.clocks.alloc(Some(GpiClock::new(signal)))
    }

    /// Starts a clock: writes the first level now and toggles after each
    /// half period.
    ///
    /// `period` and `high` are in simulator steps and need
    /// `period >= 2` and `1 <= high < period`.
    pub fn clock_start(
        &mut self,
        id: ClockId,
        period: u64,
        high: u64,
        start_high: bool,
        action: WriteAction,
    ) -> Result<(), GpiError> {
        if period < 2 {
            return Err(GpiError::InvalidArgument(format!(
                "clock period must be at least 2 steps, got {period}"
            )));
        }
        if high < 1 || high >= period {
            return Err(GpiError::InvalidArgument(format!(
                "clock high time must be within 1..{period}, got {high}"
            )));
        }
        let clock = self.clock_mut(id)?;
        if clock.running {
            return Err(GpiError::Busy(format!(
                "clock on {} is already running",
                clock.signal.full_name()
            )));
        }
        clock.period = period;
        clock.high = high;
        clock.start_high = start_high;
        clock.action = action;
        clock.level = start_high;
        clock.running = true;
        debug!(?id, period, high, start_high, "clock started");
        self.clock_drive(id)
    }

    /// Stops a clock, cancelling its pending toggle. Stopping a stopped
    /// clock does nothing.
    pub fn clock_stop(&mut self, id: ClockId) -> Result<(), GpiError> {
        let clock = self.clock_mut(id)?;
        let was_running = std::mem::replace(&mut clock.running, false);
        let callback = clock.callback.take();
        if let Some(callback) = callback {
            self.deregister(callback)?;
        }
        if was_running {
            debug!(?id, "clock stopped");
        }
        Ok(())
    }

    /// Stops and releases a clock. The id is dead afterwards.
    pub fn destroy_clock(&mut self, id: ClockId) -> Result<(), GpiError> {
        self.clock_stop(id)?;
        self.clocks[id] = None;
        Ok(())
    }

    /// Level the clock last wrote.
    pub fn clock_level(&self, id: ClockId) -> Result<bool, GpiError> {
        self.clock_ref(id).map(|c| c.level)
    }

    /// Whether the clock is toggling.
    pub fn clock_is_running(&self, id: ClockId) -> Result<bool, GpiError> {
        self.clock_ref(id).map(|c| c.running)
    }

    /// Clock details.
    pub fn clock(&self, id: ClockId) -> Result<&GpiClock, GpiError> {
        self.clock_ref(id)
    }

    /// Ids of clocks that have not been destroyed.
    pub fn clocks(&self) -> Vec<ClockId> {
        self.clocks
            .iter()
            .filter(|(_, slot)| slot.is_some())
            .map(|(id, _)| id)
            .collect()
    }

    /// Handler for a clock's timer: flip the level, write it and re-arm.
    pub(crate) fn clock_toggle(&mut self, id: ClockId) -> Result<(), GpiError> {
        let clock = self.clock_mut(id)?;
        // The one-shot that got us here is consumed.
        clock.callback = None;
        if !clock.running {
            return Ok(());
        }
        clock.level = !clock.level;
        trace!(?id, level = clock.level, "clock toggle");
        self.clock_drive(id)
    }

    fn clock_drive(&mut self, id: ClockId) -> Result<(), GpiError> {
        let clock = self.clock_ref(id)?;
        let signal = clock.signal.clone();
        let level = clock.level;
        let action = clock.action;
        let delay = clock.half();

        let written = self.set_value(&signal, &SignalValue::BinStr(LogicVec::from_bool(level)), action);
        let armed = written.and_then(|()| self.register_timed(delay, Handler::Clock(id)));
        let clock = self.clock_mut(id)?;
        match armed {
            Ok(callback) => {
                clock.callback = Some(callback);
                Ok(())
            }
            Err(e) => {
                clock.running = false;
                Err(e)
            }
        }
    }

    fn clock_ref(&self, id: ClockId) -> Result<&GpiClock, GpiError> {
        self.clocks
            .try_get(id)
            .and_then(Option::as_ref)
            .ok_or(GpiError::UnknownClock(id))
    }

    fn clock_mut(&mut self, id: ClockId) -> Result<&mut GpiClock, GpiError> {
        self.clocks
            .try_get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(GpiError::UnknownClock(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_runtime, Mock};

    fn written(mock: &std::rc::Rc<std::cell::RefCell<crate::testing::MockState>>) -> Vec<String> {
        mock.borrow()
            .writes
            .iter()
            .map(|(_, v)| v.to_string())
            .collect()
    }

    #[test]
    fn toggles_on_half_periods() {
        let (mut rt, mock) = mock_runtime();
        let clk = rt.handle("top.clk").unwrap().unwrap();
        let id = rt.create_clock(clk);
        rt.clock_start(id, 10, 5, true, WriteAction::Deposit).unwrap();
        assert_eq!(written(&mock), vec!["1"]);
        Mock::advance(&mock, &mut rt, 4);
        assert_eq!(written(&mock).len(), 1);
        Mock::advance(&mock, &mut rt, 1);
        assert_eq!(written(&mock), vec!["1", "0"]);
        Mock::advance(&mock, &mut rt, 15);
        assert_eq!(written(&mock), vec!["1", "0", "1", "0", "1"]);
        assert_eq!(mock.borrow().live_callbacks(), 1);
    }

    #[test]
    fn asymmetric_duty_starting_low() {
        let (mut rt, mock) = mock_runtime();
        let clk = rt.handle("top.clk").unwrap().unwrap();
        let id = rt.create_clock(clk);
        rt.clock_start(id, 10, 3, false, WriteAction::Deposit).unwrap();
        // Low for 7, high for 3.
        Mock::advance(&mock, &mut rt, 6);
        assert!(!rt.clock_level(id).unwrap());
        Mock::advance(&mock, &mut rt, 1);
        assert!(rt.clock_level(id).unwrap());
        Mock::advance(&mock, &mut rt, 3);
        assert!(!rt.clock_level(id).unwrap());
    }

    #[test]
    fn smallest_period() {
        let (mut rt, mock) = mock_runtime();
        let clk = rt.handle("top.clk").unwrap().unwrap();
        let id = rt.create_clock(clk);
        rt.clock_start(id, 2, 1, true, WriteAction::Deposit).unwrap();
        Mock::advance(&mock, &mut rt, 4);
        assert_eq!(written(&mock), vec!["1", "0", "1", "0", "1"]);
    }

    #[test]
    fn rejects_bad_arguments() {
        let (mut rt, _mock) = mock_runtime();
        let clk = rt.handle("top.clk").unwrap().unwrap();
        let id = rt.create_clock(clk);
        for (period, high) in [(1, 1), (0, 0), (10, 0), (10, 10), (10, 11)] {
            assert!(matches!(
                rt.clock_start(id, period, high, true, WriteAction::Deposit),
                Err(GpiError::InvalidArgument(_))
            ));
        }
        assert!(!rt.clock_is_running(id).unwrap());
    }

    #[test]
    fn start_twice_is_busy() {
        let (mut rt, _mock) = mock_runtime();
        let clk = rt.handle("top.clk").unwrap().unwrap();
        let id = rt.create_clock(clk);
        rt.clock_start(id, 4, 2, true, WriteAction::Deposit).unwrap();
        assert!(matches!(
            rt.clock_start(id, 4, 2, true, WriteAction::Deposit),
            Err(GpiError::Busy(_))
        ));
    }

    #[test]
    fn stop_is_idempotent_and_halts_writes() {
        let (mut rt, mock) = mock_runtime();
        let clk = rt.handle("top.clk").unwrap().unwrap();
        let id = rt.create_clock(clk);
        rt.clock_start(id, 4, 2, true, WriteAction::Deposit).unwrap();
        Mock::advance(&mock, &mut rt, 2);
        rt.clock_stop(id).unwrap();
        rt.clock_stop(id).unwrap();
        assert_eq!(mock.borrow().live_callbacks(), 0);
        let before = written(&mock).len();
        Mock::advance(&mock, &mut rt, 20);
        assert_eq!(written(&mock).len(), before);
        // A stopped clock can be started again.
        rt.clock_start(id, 4, 2, false, WriteAction::Deposit).unwrap();
        assert!(rt.clock_is_running(id).unwrap());
    }

    #[test]
    fn destroyed_clock_is_unknown() {
        let (mut rt, _mock) = mock_runtime();
        let clk = rt.handle("top.clk").unwrap().unwrap();
        let id = rt.create_clock(clk);
        rt.clock_start(id, 4, 2, true, WriteAction::Deposit).unwrap();
        rt.destroy_clock(id).unwrap();
        assert_eq!(rt.clock_level(id), Err(GpiError::UnknownClock(id)));
        assert_eq!(rt.destroy_clock(id), Err(GpiError::UnknownClock(id)));
        assert!(rt.clocks().is_empty());
    }

    #[test]
    fn constant_signal_cannot_be_clocked() {
        let (mut rt, _mock) = mock_runtime();
        let width = rt.handle("top.WIDTH").unwrap().unwrap();
        let id = rt.create_clock(width);
        assert!(matches!(
            rt.clock_start(id, 4, 2, true, WriteAction::Deposit),
            Err(GpiError::InvalidOperation(_))
        ));
        assert!(!rt.clock_is_running(id).unwrap());
    }
}
