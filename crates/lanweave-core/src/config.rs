//! Node timing configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    CORE_TIMER_GRANULARITY, DESPERATION_INCREMENT, HOUSEKEEPING_PERIOD,
    NETWORK_AUTOCONF_DELAY, PING_CHECK_INTERVAL,
};

/// Timing knobs of the background task engine
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Interval between peer liveness sweeps
    pub ping_check_interval: Duration,

    /// Interval between housekeeping passes (expired peer and group cleanup)
    pub housekeeping_period: Duration,

    /// Re-request a network's configuration when older than this
    pub network_autoconf_delay: Duration,

    /// Lower bound for the background deadline
    pub timer_granularity: Duration,

    /// Ping-check intervals of supernode silence per desperation step
    pub desperation_increment: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            ping_check_interval: PING_CHECK_INTERVAL,
            housekeeping_period: HOUSEKEEPING_PERIOD,
            network_autoconf_delay: NETWORK_AUTOCONF_DELAY,
            timer_granularity: CORE_TIMER_GRANULARITY,
            desperation_increment: DESPERATION_INCREMENT,
        }
    }
}

impl NodeConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.ping_check_interval.is_zero() {
            return Err("Ping check interval must be non-zero".into());
        }
        if self.housekeeping_period.is_zero() {
            return Err("Housekeeping period must be non-zero".into());
        }
        if self.network_autoconf_delay.is_zero() {
            return Err("Network autoconf delay must be non-zero".into());
        }
        if self.timer_granularity.is_zero() {
            return Err("Timer granularity must be non-zero".into());
        }
        if self.timer_granularity > self.ping_check_interval {
            return Err(format!(
                "Timer granularity {:?} exceeds ping check interval {:?}",
                self.timer_granularity, self.ping_check_interval
            ));
        }
        if self.desperation_increment == 0 {
            return Err("Desperation increment must be at least 1".into());
        }
        Ok(())
    }
}
