use std::time::Duration;

use crate::Error;

/// Smallest path MTU we accept (256 minus IP/UDP overhead of 28).
pub const MIN_MTU: usize = 228;

/// Path MTU assumed when the transport offers no guidance
/// (1500 minus IP/UDP overhead of 28).
pub const DEFAULT_MTU: usize = 1472;

/// Delivery layer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    mtu: usize,
    initial_rto: Duration,
    max_message_size: usize,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            mtu: DEFAULT_MTU,
            initial_rto: Duration::from_secs(1),
            max_message_size: 16_384,
        }
    }

    /// Max transmission unit.
    ///
    /// The largest size packets we will produce.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Timeout before the first retransmission of a flight.
    ///
    /// Doubled for every retransmission, capped at 60 seconds.
    #[inline(always)]
    pub fn initial_rto(&self) -> Duration {
        self.initial_rto
    }

    /// Max total length of a single handshake message, sent or received.
    #[inline(always)]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    mtu: usize,
    initial_rto: Duration,
    max_message_size: usize,
}

impl ConfigBuilder {
    /// Set the max transmission unit (MTU).
    ///
    /// The largest size packets we will produce.
    /// Defaults to 1472.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the timeout before the first retransmission of a flight.
    ///
    /// Every flight restarts with this value. Doubled per retransmission,
    /// capped at 60 seconds.
    /// Defaults to 1 second.
    pub fn initial_rto(mut self, rto: Duration) -> Self {
        self.initial_rto = rto;
        self
    }

    /// Set the max total length of a single handshake message.
    ///
    /// Defaults to 16384.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::Config` if the MTU is below the minimum path MTU or
    /// the initial RTO is zero.
    pub fn build(self) -> Result<Config, Error> {
        if self.mtu < MIN_MTU {
            return Err(Error::Config("mtu below minimum path MTU"));
        }
        if self.initial_rto.is_zero() {
            return Err(Error::Config("initial_rto must be non-zero"));
        }
        Ok(Config {
            mtu: self.mtu,
            initial_rto: self.initial_rto,
            max_message_size: self.max_message_size,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}
