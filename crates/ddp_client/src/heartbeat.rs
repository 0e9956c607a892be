//! Heartbeat monitoring.

use std::time::{Duration, Instant};

/// What the client should do after a heartbeat check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatAction {
    /// Nothing to do.
    Ok,
    /// The connection has been idle; send a ping.
    SendPing,
    /// Nothing arrived after the ping.
    TimedOut,
}

/// Ping/pong bookkeeping for one connection.
///
/// Any inbound message counts as a sign of life, not just `pong`.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    next_ping: Option<Instant>,
    pong_deadline: Option<Instant>,
}

impl Heartbeat {
    pub(crate) fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            next_ping: None,
            pong_deadline: None,
        }
    }

    pub(crate) fn start(&mut self, now: Instant) {
        self.next_ping = Some(now + self.interval);
        self.pong_deadline = None;
    }

    pub(crate) fn stop(&mut self) {
        self.next_ping = None;
        self.pong_deadline = None;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.next_ping.is_some() || self.pong_deadline.is_some()
    }

    /// Records inbound traffic.
    pub(crate) fn record_message(&mut self, now: Instant) {
        if self.is_running() {
            self.start(now);
        }
    }

    /// Checks the timers.
    pub(crate) fn check(&mut self, now: Instant) -> HeartbeatAction {
        if let Some(deadline) = self.pong_deadline {
            if now >= deadline {
                self.stop();
                return HeartbeatAction::TimedOut;
            }
            return HeartbeatAction::Ok;
        }

        match self.next_ping {
            Some(at) if now >= at => {
                self.next_ping = None;
                self.pong_deadline = Some(now + self.timeout);
                HeartbeatAction::SendPing
            }
            _ => HeartbeatAction::Ok,
        }
    }

    /// Earliest instant at which `check` may act.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pong_deadline.or(self.next_ping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat() -> Heartbeat {
        Heartbeat::new(Duration::from_secs(10), Duration::from_secs(5))
    }

    #[test]
    fn idle_connection_is_pinged_then_times_out() {
        let start = Instant::now();
        let mut hb = heartbeat();
        hb.start(start);

        assert_eq!(hb.check(start + Duration::from_secs(9)), HeartbeatAction::Ok);
        assert_eq!(
            hb.check(start + Duration::from_secs(10)),
            HeartbeatAction::SendPing
        );
        assert_eq!(
            hb.next_deadline(),
            Some(start + Duration::from_secs(15))
        );
        assert_eq!(hb.check(start + Duration::from_secs(14)), HeartbeatAction::Ok);
        assert_eq!(
            hb.check(start + Duration::from_secs(15)),
            HeartbeatAction::TimedOut
        );
        assert!(!hb.is_running());
    }

    #[test]
    fn traffic_resets_the_timers() {
        let start = Instant::now();
        let mut hb = heartbeat();
        hb.start(start);

        assert_eq!(
            hb.check(start + Duration::from_secs(10)),
            HeartbeatAction::SendPing
        );
        hb.record_message(start + Duration::from_secs(12));
        assert_eq!(hb.check(start + Duration::from_secs(20)), HeartbeatAction::Ok);
        assert_eq!(
            hb.next_deadline(),
            Some(start + Duration::from_secs(22))
        );
    }

    #[test]
    fn stopped_heartbeat_ignores_traffic() {
        let mut hb = heartbeat();
        hb.record_message(Instant::now());
        assert!(!hb.is_running());
        assert_eq!(hb.next_deadline(), None);
    }
}
