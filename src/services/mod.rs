//! Background Services Module
//!
//! Provides the scheduled import pipeline and the framework that
//! manages its lifecycle.
//!
//! # Services
//!
//! - **ServiceManager**: Coordinates lifecycle of background services
//! - **ImportService**: Lock-guarded scheduled import + aggregation runs
//!
//! # Example
//!
//! ```rust
//! use recommendations::services::{ServiceManager, ServiceConfig};
//!
//! // Create service manager with default config
//! let config = ServiceConfig::default();
//! let manager = ServiceManager::new(config);
//!
//! // Check service status
//! let status = manager.status();
//! assert_eq!(status.len(), 0); // No services registered yet
//! ```

pub mod framework;
pub mod importer;

pub use framework::{Service, ServiceConfig, ServiceManager, ServiceStatus, SharedServiceManager};
pub use importer::{ImportService, ImportServiceConfig};
