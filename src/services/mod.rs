// src/services/mod.rs

pub mod audit_service;
pub mod bootstrap_service;
pub mod isolation_service;
pub mod scope_service;

pub use audit_service::Auditor;
pub use bootstrap_service::{BootstrapService, BootstrapSummary};
pub use isolation_service::{Isolation, IsolationService};
pub use scope_service::ContextScope;
