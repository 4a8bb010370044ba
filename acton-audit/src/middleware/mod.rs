//! Middleware modules

pub mod audit;

pub use audit::{build_event, AuditMiddleware, AuditMiddlewareBuilder, AuditPlan};
