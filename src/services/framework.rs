//! Service Framework
//!
//! Provides the core framework for managing background services:
//! - Service trait for implementing custom services
//! - ServiceManager for coordinating service lifecycle
//! - Graceful shutdown handling

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

// ============================================================================
// Service Trait
// ============================================================================

/// Trait for implementing background services
///
/// Services are long-running background tasks such as the scheduled
/// importer. They run until the shutdown signal fires.
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// Start the service
    ///
    /// This method should initialize the service and begin its main loop.
    /// It should respect the shutdown signal for graceful termination.
    async fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError>;

    /// Get the service name for logging and identification
    fn name(&self) -> &'static str;

    /// Get the current status of the service
    fn status(&self) -> ServiceStatus;
}

// ============================================================================
// Service Status
// ============================================================================

/// Status of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Service is initializing
    Starting,

    /// Service is running normally
    Running,

    /// Service is shutting down
    Stopping,

    /// Service has stopped
    Stopped,

    /// Service failed with an error
    Failed(String),
}

impl ServiceStatus {
    /// Check if the service is in a healthy state
    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceStatus::Running)
    }

    /// Check if the service has stopped (normally or due to failure)
    pub fn is_stopped(&self) -> bool {
        matches!(self, ServiceStatus::Stopped | ServiceStatus::Failed(_))
    }
}

// ============================================================================
// Service Error
// ============================================================================

/// Errors that can occur in services
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Service failed during initialization phase
    #[error("Service initialization failed: {0}")]
    InitializationFailed(String),

    /// Service encountered an error during execution
    #[error("Service runtime error: {0}")]
    RuntimeError(String),

    /// Attempted to start a service that is already running
    #[error("Service already running")]
    AlreadyRunning,

    /// The requested service was not found in the registry
    #[error("Service not found: {0}")]
    NotFound(String),
}

// ============================================================================
// Service Config
// ============================================================================

/// Configuration for the service manager
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Timeout for graceful shutdown
    pub shutdown_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// Service Manager
// ============================================================================

/// Handle for a running service
struct ServiceHandle {
    service: Arc<dyn Service>,
    task: Option<JoinHandle<Result<(), ServiceError>>>,
    started_at: Option<Instant>,
}

/// Manager for coordinating background services
///
/// Handles starting registered services, broadcasting the shutdown
/// signal, and waiting for them to drain within a timeout.
pub struct ServiceManager {
    config: ServiceConfig,
    services: RwLock<HashMap<&'static str, ServiceHandle>>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_notify: Arc<Notify>,
    running: RwLock<bool>,
}

/// Shared service manager for use across threads
pub type SharedServiceManager = Arc<ServiceManager>;

impl ServiceManager {
    /// Create a new service manager
    pub fn new(config: ServiceConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            services: RwLock::new(HashMap::new()),
            shutdown_tx,
            shutdown_notify: Arc::new(Notify::new()),
            running: RwLock::new(false),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(ServiceConfig::default())
    }

    /// Register a service with the manager
    pub fn register(&self, service: Arc<dyn Service>) -> Result<(), ServiceError> {
        let name = service.name();
        let mut services = self.services.write();

        if services.contains_key(name) {
            return Err(ServiceError::AlreadyRunning);
        }

        services.insert(
            name,
            ServiceHandle {
                service,
                task: None,
                started_at: None,
            },
        );

        tracing::debug!(service = name, "Service registered");
        Ok(())
    }

    /// Start all registered services
    pub async fn start_all(&self) -> Result<(), ServiceError> {
        {
            let mut running = self.running.write();
            if *running {
                return Err(ServiceError::AlreadyRunning);
            }
            *running = true;
        }

        let names: Vec<&'static str> = self.services.read().keys().copied().collect();
        for name in names {
            self.start_service(name)?;
        }

        tracing::debug!("All services started");
        Ok(())
    }

    /// Start a specific service
    pub fn start_service(&self, name: &'static str) -> Result<(), ServiceError> {
        let mut services = self.services.write();
        let handle = services
            .get_mut(name)
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;

        if handle.task.is_some() {
            return Err(ServiceError::AlreadyRunning);
        }

        let service = handle.service.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        handle.task = Some(tokio::spawn(async move { service.start(shutdown_rx).await }));
        handle.started_at = Some(Instant::now());

        tracing::debug!(service = name, "Service started");
        Ok(())
    }

    /// Stop all services gracefully
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        tracing::info!("Initiating graceful shutdown");

        let _ = self.shutdown_tx.send(());

        // Collect tasks first so no lock is held across an await.
        let tasks: Vec<(&'static str, JoinHandle<Result<(), ServiceError>>)> = {
            let mut services = self.services.write();
            services
                .iter_mut()
                .filter_map(|(name, handle)| handle.task.take().map(|task| (*name, task)))
                .collect()
        };

        let deadline = Instant::now() + self.config.shutdown_timeout;
        for (name, task) in tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, task).await {
                Ok(Ok(Ok(()))) => {
                    tracing::debug!(service = name, "Service stopped gracefully");
                }
                Ok(Ok(Err(e))) => {
                    tracing::warn!(service = name, error = %e, "Service stopped with error");
                }
                Ok(Err(e)) => {
                    tracing::error!(service = name, error = %e, "Service task panicked");
                }
                Err(_) => {
                    tracing::warn!(service = name, "Service shutdown timed out, aborting");
                }
            }
        }

        *self.running.write() = false;
        self.shutdown_notify.notify_waiters();

        tracing::info!("Shutdown complete");
        Ok(())
    }

    /// Wait for shutdown to complete
    pub async fn wait_for_shutdown(&self) {
        self.shutdown_notify.notified().await;
    }

    /// Get the status of all services
    pub fn status(&self) -> HashMap<&'static str, ServiceStatus> {
        let services = self.services.read();
        services
            .iter()
            .map(|(name, handle)| (*name, handle.service.status()))
            .collect()
    }

    /// Get the status of a specific service
    pub fn service_status(&self, name: &str) -> Option<ServiceStatus> {
        let services = self.services.read();
        services.get(name).map(|h| h.service.status())
    }

    /// Get the uptime of a specific service
    pub fn service_uptime(&self, name: &str) -> Option<Duration> {
        let services = self.services.read();
        services
            .get(name)
            .and_then(|h| h.started_at.map(|started| started.elapsed()))
    }

    /// Check if all services are healthy
    pub fn is_healthy(&self) -> bool {
        let services = self.services.read();
        services.values().all(|h| h.service.status().is_healthy())
    }
}

// ============================================================================
// Tests
// ============================================================================
