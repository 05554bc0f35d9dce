use std::time::Duration;

/// Rate limiter for detection requests on a frame stream.
///
/// Runs at `detection_period` while the tag keeps being found. After two
/// consecutive misses it backs off to `no_detection_period` until the next hit.
/// Only one request is in flight at a time; a tick that falls due while one is
/// running is skipped but still restarts the period.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionScheduler {
    detection_period: Duration,
    no_detection_period: Duration,
    period: Duration,
    last_tick: Option<Duration>,
    in_flight: bool,
    failed_once: bool,
}

impl Default for DetectionScheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_millis(500))
    }
}

impl DetectionScheduler {
    /// Creates a scheduler starting at the fast period.
    pub fn new(detection_period: Duration, no_detection_period: Duration) -> Self {
        Self {
            detection_period,
            no_detection_period,
            period: detection_period,
            last_tick: None,
            in_flight: false,
            failed_once: false,
        }
    }

    /// Decides whether to start a detection at `now`, and marks it started if so.
    ///
    /// `now` is measured from any fixed epoch chosen by the caller.
    pub fn should_run(&mut self, now: Duration) -> bool {
        let due = self
            .last_tick
            .map_or(true, |last| now.saturating_sub(last) >= self.period);
        if !due {
            return false;
        }

        self.last_tick = Some(now);
        if self.in_flight {
            return false;
        }

        self.in_flight = true;
        true
    }

    /// Records the end of the detection in flight.
    pub fn finish(&mut self, success: bool) {
        self.in_flight = false;

        if success {
            self.period = self.detection_period;
            self.failed_once = false;
        } else if self.failed_once {
            if self.period != self.no_detection_period {
                log::debug!("tag lost, backing off to {:?}", self.no_detection_period);
            }
            self.period = self.no_detection_period;
        } else {
            self.failed_once = true;
        }
    }

    /// The current period between detections.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether a detection is running.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_runs_once_per_period() {
        let mut scheduler = DetectionScheduler::new(ms(50), ms(500));

        assert!(scheduler.should_run(ms(0)));
        assert!(scheduler.in_flight());
        assert!(!scheduler.should_run(ms(20)));

        scheduler.finish(true);
        assert!(!scheduler.should_run(ms(40)));
        assert!(scheduler.should_run(ms(50)));
    }

    #[test]
    fn test_tick_during_flight_restarts_period() {
        let mut scheduler = DetectionScheduler::new(ms(50), ms(500));

        assert!(scheduler.should_run(ms(0)));
        // due, but the first detection is still running
        assert!(!scheduler.should_run(ms(100)));
        scheduler.finish(true);

        assert!(!scheduler.should_run(ms(120)));
        assert!(scheduler.should_run(ms(150)));
    }

    #[test]
    fn test_backs_off_after_two_misses() {
        let mut scheduler = DetectionScheduler::default();

        assert!(scheduler.should_run(ms(0)));
        scheduler.finish(false);
        assert_eq!(scheduler.period(), ms(50));

        assert!(scheduler.should_run(ms(60)));
        scheduler.finish(false);
        assert_eq!(scheduler.period(), ms(500));

        assert!(!scheduler.should_run(ms(200)));
        assert!(scheduler.should_run(ms(560)));
        scheduler.finish(true);
        assert_eq!(scheduler.period(), ms(50));

        // a single miss after a hit keeps the fast period
        assert!(scheduler.should_run(ms(610)));
        scheduler.finish(false);
        assert_eq!(scheduler.period(), ms(50));
    }

    #[test]
    fn test_clock_going_backwards() {
        let mut scheduler = DetectionScheduler::new(ms(50), ms(500));
        assert!(scheduler.should_run(ms(100)));
        scheduler.finish(true);
        assert!(!scheduler.should_run(ms(20)));
    }
}
