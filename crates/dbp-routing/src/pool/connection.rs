//! Worker-owned database connection with lazy connect and idle re-ping.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::domain::{DriverError, ServerRow};
use crate::ports::{DatabaseDriver, DriverFactory};

/// One connection, owned by one worker thread.
pub struct WorkerConnection {
    factory: Arc<dyn DriverFactory>,
    server: ServerRow,
    driver: Option<Box<dyn DatabaseDriver>>,
    last_used: Instant,
    reping_interval: Duration,
}

impl WorkerConnection {
    /// Unconnected handle; the first [`WorkerConnection::acquire`] connects.
    pub fn new(factory: Arc<dyn DriverFactory>, server: ServerRow, reping_interval: Duration) -> Self {
        Self {
            factory,
            server,
            driver: None,
            last_used: Instant::now(),
            reping_interval,
        }
    }

    /// Server this connection targets.
    pub fn server(&self) -> &ServerRow {
        &self.server
    }

    /// A driver is currently held.
    pub fn is_connected(&self) -> bool {
        self.driver.is_some()
    }

    /// Usable driver, reconnecting if the link was dropped or fails its
    /// idle ping.
    pub fn acquire(&mut self) -> Result<&mut Box<dyn DatabaseDriver>, DriverError> {
        let idle = self.last_used.elapsed() >= self.reping_interval;
        if let Some(driver) = self.driver.as_mut() {
            if idle && !driver.ping() {
                warn!(
                    "[dbp] Connection to {} failed ping, reconnecting",
                    self.server.endpoint()
                );
                self.driver = None;
            }
        }

        if self.driver.is_none() {
            match self.factory.connect(&self.server) {
                Ok(driver) => self.driver = Some(driver),
                Err(e) => {
                    warn!("[dbp] Connect to {} failed: {}", self.server.endpoint(), e);
                    return Err(e);
                }
            }
        }

        self.last_used = Instant::now();
        self.driver
            .as_mut()
            .ok_or_else(|| DriverError::connection_lost(self.server.endpoint()))
    }

    /// Record the outcome of a statement; a lost link drops the driver.
    pub fn settle(&mut self, connection_lost: bool) {
        if connection_lost {
            warn!(
                "[dbp] Connection to {} lost, will reconnect on next task",
                self.server.endpoint()
            );
            self.driver = None;
        }
        self.last_used = Instant::now();
    }
}
