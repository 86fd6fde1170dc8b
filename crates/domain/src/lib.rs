//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod command;
mod grant;
mod lifecycle;
mod role_catalog;
mod status;

pub use command::{InboundCommand, REMOVE_ROLE_CUSTOM_ID, RenewalAnswer};
pub use grant::{DeactivationReason, Grant, GrantId, RenewalState};
pub use lifecycle::{
    ClaimRequest, DeactivateGrant, Decision, GrantAuditAction, GrantPolicy, GrantWrite,
    LifecycleEngine, MAX_POLICY_DAYS, NewGrant, ReclaimGrant, SideEffect,
};
pub use role_catalog::{RoleCatalog, RoleChoice};
pub use status::{STATUS_MARKER, StatusLine, render_status};
