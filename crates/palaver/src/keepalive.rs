//! Keep-Alive Ticker
//!
//! Cooperative ping scheduling for the server loop. The ticker holds no
//! timer of its own; the loop calls `tick` every iteration and sends a
//! ping whenever one is due.

use std::time::{Duration, Instant};

/// What to do when a ping goes unanswered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PingPolicy {
    /// Log the timeout and keep the connection open.
    #[default]
    Lenient,
    /// Close the connection on an unanswered ping.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickerState {
    Idle,
    Running,
}

/// Default interval between pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Cooperative keep-alive ticker.
#[derive(Debug)]
pub struct KeepAlive {
    interval: Duration,
    state: TickerState,
    last_tick: Instant,
    policy: PingPolicy,
}

impl KeepAlive {
    /// Create a ticker with the default 30 second interval.
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_PING_INTERVAL)
    }

    /// Create a ticker with a custom interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            state: TickerState::Idle,
            last_tick: Instant::now(),
            policy: PingPolicy::default(),
        }
    }

    /// Set the unanswered-ping policy.
    pub fn with_policy(mut self, policy: PingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The configured unanswered-ping policy.
    pub fn policy(&self) -> PingPolicy {
        self.policy
    }

    /// Start ticking. The first ping is due one full interval from now.
    pub fn start(&mut self) {
        self.state = TickerState::Running;
        self.last_tick = Instant::now();
    }

    /// Stop ticking; subsequent `tick` calls are no-ops until restarted.
    pub fn stop(&mut self) {
        self.state = TickerState::Idle;
    }

    /// True while the ticker is running.
    pub fn is_running(&self) -> bool {
        self.state == TickerState::Running
    }

    /// Check whether a ping is due.
    ///
    /// Returns true at most once per interval; the caller owns building and
    /// sending the actual ping request.
    pub fn tick(&mut self) -> bool {
        if self.state != TickerState::Running {
            return false;
        }
        if self.last_tick.elapsed() >= self.interval {
            self.last_tick = Instant::now();
            return true;
        }
        false
    }
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self::new()
    }
}
