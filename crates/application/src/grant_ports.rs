mod audit;
mod repository;

pub use audit::{GrantAuditEvent, GrantAuditRepository};
pub use repository::GrantRepository;
