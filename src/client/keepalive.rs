//! Keepalive probing
//!
//! A PINGREQ goes out at 60% of the keepalive interval so the probe always
//! lands before the broker's own deadline. Each probe then has the full
//! interval to be answered.

use crate::client::actions::{Action, TimerKind};
use crate::protocol::codec::encode_pingreq;
use std::time::Duration;

/// Probe delay as a fraction of the interval, in per-mille
const PROBE_PER_MILLE: u64 = 600;

#[derive(Debug, Clone)]
pub struct KeepAliveMonitor {
    interval: Option<Duration>,
    outstanding: bool,
}

impl KeepAliveMonitor {
    /// A zero interval disables probing
    pub fn new(keep_alive_secs: u16) -> Self {
        let interval = (keep_alive_secs > 0).then(|| Duration::from_secs(keep_alive_secs.into()));
        Self {
            interval,
            outstanding: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// True while a PINGREQ is waiting for its PINGRESP
    pub fn is_outstanding(&self) -> bool {
        self.outstanding
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Delay between connect (or a PINGRESP) and the next probe
    pub fn probe_delay(&self) -> Option<Duration> {
        self.interval
            .map(|interval| Duration::from_millis(interval.as_secs() * PROBE_PER_MILLE))
    }

    /// Schedule the first probe after a successful CONNACK
    pub fn start(&mut self) -> Vec<Action> {
        self.outstanding = false;
        self.schedule_probe()
    }

    /// The probe timer fired. Ignored while a probe is already outstanding.
    pub fn ping_due(&mut self) -> Vec<Action> {
        let Some(interval) = self.interval else {
            return Vec::new();
        };
        if self.outstanding {
            tracing::debug!(target: "mqtt_client", "Ping already outstanding, skipping probe");
            return Vec::new();
        }
        self.outstanding = true;
        vec![
            Action::Send(encode_pingreq()),
            Action::arm(TimerKind::PingTimeout, interval),
        ]
    }

    /// A PINGRESP arrived: clear the deadline and schedule the next probe
    pub fn pong_received(&mut self) -> Vec<Action> {
        self.outstanding = false;
        let mut actions = vec![Action::CancelTimer(TimerKind::PingTimeout)];
        actions.extend(self.schedule_probe());
        actions
    }

    /// The probe deadline fired. Returns true when this is a real timeout.
    pub fn deadline_passed(&mut self) -> bool {
        let expired = self.outstanding;
        self.outstanding = false;
        expired
    }

    /// Forget any outstanding probe. The caller cancels the timers.
    pub fn stop(&mut self) {
        self.outstanding = false;
    }

    fn schedule_probe(&self) -> Vec<Action> {
        self.probe_delay()
            .map(|delay| vec![Action::arm(TimerKind::Ping, delay)])
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_at_sixty_percent() {
        let monitor = KeepAliveMonitor::new(10);
        assert_eq!(monitor.probe_delay(), Some(Duration::from_secs(6)));
        assert_eq!(
            KeepAliveMonitor::new(30).probe_delay(),
            Some(Duration::from_secs(18))
        );
        assert_eq!(
            KeepAliveMonitor::new(1).probe_delay(),
            Some(Duration::from_millis(600))
        );
    }

    #[test]
    fn test_start_arms_probe() {
        let mut monitor = KeepAliveMonitor::new(10);
        assert_eq!(
            monitor.start(),
            vec![Action::arm(TimerKind::Ping, Duration::from_secs(6))]
        );
    }

    #[test]
    fn test_ping_sends_and_arms_deadline() {
        let mut monitor = KeepAliveMonitor::new(10);
        monitor.start();
        let actions = monitor.ping_due();
        assert_eq!(
            actions,
            vec![
                Action::Send(encode_pingreq()),
                Action::arm(TimerKind::PingTimeout, Duration::from_secs(10)),
            ]
        );
        assert!(monitor.is_outstanding());
    }

    #[test]
    fn test_second_ping_while_outstanding_is_ignored() {
        let mut monitor = KeepAliveMonitor::new(10);
        monitor.ping_due();
        assert!(monitor.ping_due().is_empty());
    }

    #[test]
    fn test_pong_cancels_deadline_and_reschedules() {
        let mut monitor = KeepAliveMonitor::new(10);
        monitor.ping_due();
        let actions = monitor.pong_received();
        assert_eq!(
            actions,
            vec![
                Action::CancelTimer(TimerKind::PingTimeout),
                Action::arm(TimerKind::Ping, Duration::from_secs(6)),
            ]
        );
        assert!(!monitor.is_outstanding());
        assert!(!monitor.deadline_passed());
    }

    #[test]
    fn test_deadline_without_pong_is_timeout() {
        let mut monitor = KeepAliveMonitor::new(10);
        monitor.ping_due();
        assert!(monitor.deadline_passed());
    }

    #[test]
    fn test_zero_interval_disables_probing() {
        let mut monitor = KeepAliveMonitor::new(0);
        assert!(!monitor.is_enabled());
        assert!(monitor.start().is_empty());
        assert!(monitor.ping_due().is_empty());
        assert_eq!(monitor.pong_received().len(), 1);
    }

    #[test]
    fn test_stop_clears_outstanding_probe() {
        let mut monitor = KeepAliveMonitor::new(10);
        monitor.ping_due();
        monitor.stop();
        assert!(!monitor.is_outstanding());
        assert!(!monitor.deadline_passed());
        assert_eq!(monitor.ping_due().len(), 2);
    }
}
