//! Minimum interval between resend requests per target

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::invite::ResendTarget;

pub const DEFAULT_RESEND_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct ResendThrottle {
    min_interval: Duration,
    last_sent: HashMap<ResendTarget, Instant>,
}

impl Default for ResendThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_RESEND_INTERVAL)
    }
}

impl ResendThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: HashMap::new(),
        }
    }

    /// `Err` carries the time left before `target` may be sent to again.
    pub fn check_at(&self, target: &ResendTarget, now: Instant) -> Result<(), Duration> {
        match self.last_sent.get(target) {
            Some(last) => {
                let elapsed = now.saturating_duration_since(*last);
                if elapsed < self.min_interval {
                    Err(self.min_interval - elapsed)
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }

    pub fn try_acquire_at(&mut self, target: &ResendTarget, now: Instant) -> Result<(), Duration> {
        self.check_at(target, now)?;
        self.last_sent.insert(target.clone(), now);
        self.last_sent
            .retain(|_, sent| now.saturating_duration_since(*sent) < self.min_interval);
        Ok(())
    }

    pub fn try_acquire(&mut self, target: &ResendTarget) -> Result<(), Duration> {
        self.try_acquire_at(target, Instant::now())
    }
}
