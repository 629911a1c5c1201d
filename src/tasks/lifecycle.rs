//! Hosted Service Lifecycle
//!
//! Background services started with the process and stopped on shutdown.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Result;

/// A long-running background service.
///
/// `start` and `stop` must be idempotent. Services that cannot pause keep the
/// default no-op `pause`/`resume`.
#[async_trait]
pub trait HostedService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn pause(&self) -> Result<()> {
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        Ok(())
    }
}

/// Starts services in registration order and stops them in reverse.
#[derive(Default)]
pub struct ServiceHost {
    services: Vec<Arc<dyn HostedService>>,
}

impl ServiceHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service: Arc<dyn HostedService>) {
        self.services.push(service);
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Starts every service, stopping at the first failure.
    pub async fn start_all(&self) -> Result<()> {
        for service in &self.services {
            service.start().await?;
            info!(service = service.name(), "Service started");
        }
        Ok(())
    }

    /// Stops every service. Failures are logged and do not stop the rest.
    pub async fn stop_all(&self) {
        for service in self.services.iter().rev() {
            match service.stop().await {
                Ok(()) => info!(service = service.name(), "Service stopped"),
                Err(e) => warn!(service = service.name(), error = %e, "Service failed to stop"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl HostedService for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn start(&self) -> Result<()> {
            self.log.lock().push(format!("start {}", self.name));
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.log.lock().push(format!("stop {}", self.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_host_stops_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut host = ServiceHost::new();
        for name in ["a", "b"] {
            host.register(Arc::new(Recorder {
                name,
                log: log.clone(),
            }));
        }

        host.start_all().await.unwrap();
        host.stop_all().await;

        assert_eq!(*log.lock(), vec!["start a", "start b", "stop b", "stop a"]);
    }
}
