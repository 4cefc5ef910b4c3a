//! Simulation clock.
//!
//! The backend signals time as opaque step advances; this converts them into
//! human-readable game time. Wall-clock time/date are a pure function of the
//! step counter and the configured start instant, never stored or patched
//! independently.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::config::SessionConfig;
use crate::error::ViewerError;

/// Output format for the date half of the readout, e.g. `February 13, 2023`.
const DATE_FORMAT: &str = "%B %-d, %Y";
/// Output format for the time half of the readout, e.g. `07:30:00`.
const TIME_FORMAT: &str = "%H:%M:%S";

/// Parameters the clock cannot run without.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClockParams {
    sec_per_step: u32,
    start: NaiveDateTime,
}

/// Step-driven game clock.
#[derive(Debug, Clone)]
pub struct SimClock {
    step: u64,
    params: Option<ClockParams>,
}

/// Serialized clock state carried in `ui.tick` and snapshots.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ClockReadout {
    pub step: u64,
    pub time: String,
    pub date: String,
}

impl SimClock {
    /// Builds a clock from session config. Missing parameters are tolerated
    /// here; [`SimClock::advance`] refuses to run without them.
    pub fn from_config(cfg: &SessionConfig) -> Self {
        let params = match (cfg.sec_per_step, cfg.start_datetime()) {
            (Some(sec_per_step), Some(start)) if sec_per_step > 0 => Some(ClockParams {
                sec_per_step,
                start,
            }),
            _ => None,
        };
        Self {
            step: cfg.step,
            params,
        }
    }

    /// Clock with explicit parameters, for direct construction.
    pub fn new(sec_per_step: u32, start_date: NaiveDate, start_time: NaiveTime) -> Self {
        Self {
            step: 0,
            params: Some(ClockParams {
                sec_per_step,
                start: start_date.and_time(start_time),
            }),
        }
    }

    /// Current step counter. Monotone non-decreasing.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Advances the step counter. `advance(n)` then `advance(m)` is the same
    /// as `advance(n + m)`. Fails without mutating when the clock was never
    /// given `sec_per_step` or a start instant; no defaults are guessed.
    pub fn advance(&mut self, steps: u32) -> Result<(), ViewerError> {
        self.require_params()?;
        self.step += u64::from(steps);
        Ok(())
    }

    /// Game-world instant for the current step.
    pub fn game_time(&self) -> Result<NaiveDateTime, ViewerError> {
        let params = self.require_params()?;
        let elapsed = self.step as i64 * i64::from(params.sec_per_step);
        Ok(params.start + Duration::seconds(elapsed))
    }

    /// Readout for outbound messages. Day overflow past midnight rolls the
    /// date forward; no timezone or leap-second handling.
    pub fn readout(&self) -> Result<ClockReadout, ViewerError> {
        let now = self.game_time()?;
        Ok(ClockReadout {
            step: self.step,
            time: now.time().format(TIME_FORMAT).to_string(),
            date: now.date().format(DATE_FORMAT).to_string(),
        })
    }

    fn require_params(&self) -> Result<ClockParams, ViewerError> {
        self.params.ok_or_else(|| {
            ViewerError::Configuration("sec_per_step and start date/time must be set".to_string())
        })
    }
}

/// Days elapsed in game time since session start.
pub fn days_elapsed(clock: &SimClock) -> Result<i32, ViewerError> {
    let now = clock.game_time()?;
    let start = SimClock {
        step: 0,
        params: clock.params,
    }
    .game_time()?;
    Ok(now.num_days_from_ce() - start.num_days_from_ce())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_at(time: &str, sec_per_step: u32) -> SimClock {
        SimClock::new(
            sec_per_step,
            NaiveDate::from_ymd_opt(2023, 2, 13).unwrap(),
            time.parse().unwrap(),
        )
    }

    #[test]
    fn advance_is_additive() {
        let mut a = clock_at("07:00:00", 10);
        let mut b = a.clone();

        a.advance(4).unwrap();
        a.advance(9).unwrap();
        b.advance(13).unwrap();

        assert_eq!(a.step(), b.step());
        assert_eq!(a.readout().unwrap(), b.readout().unwrap());
    }

    #[test]
    fn advance_zero_is_a_noop() {
        let mut clock = clock_at("07:00:00", 10);
        clock.advance(0).unwrap();
        assert_eq!(clock.step(), 0);
    }

    #[test]
    fn midnight_rollover_increments_date() {
        let mut clock = clock_at("23:59:00", 60);
        clock.advance(2).unwrap();

        let readout = clock.readout().unwrap();
        assert_eq!(readout.time, "00:01:00");
        assert_eq!(readout.date, "February 14, 2023");
        assert_eq!(days_elapsed(&clock).unwrap(), 1);
    }

    #[test]
    fn unconfigured_clock_refuses_to_advance() {
        let cfg = SessionConfig::default();
        let mut clock = SimClock::from_config(&cfg);

        assert!(matches!(
            clock.advance(1),
            Err(ViewerError::Configuration(_))
        ));
        assert_eq!(clock.step(), 0);
    }
}
