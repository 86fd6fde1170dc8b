//! Application services and ports.

#![forbid(unsafe_code)]

mod command_router;
mod expiry_scanner;
mod grant_lifecycle_service;
mod grant_ports;
mod platform_ports;
mod renewal_timer;
mod role_menu_service;
mod status_projector;
mod work_queue;

#[cfg(test)]
mod test_support;

pub use command_router::{Actor, CommandRouter};
pub use expiry_scanner::{ExpiryScanner, ScanReport};
pub use grant_lifecycle_service::{
    ClaimOutcome, ExpireOutcome, GrantLifecycleService, RemovalOutcome, RenewalOutcome,
    TimeoutOutcome,
};
pub use grant_ports::{GrantAuditEvent, GrantAuditRepository, GrantRepository};
pub use platform_ports::{
    ActionStyle, ChannelMessage, ChatPlatform, Clock, MessageAction, OutgoingMessage,
};
pub use renewal_timer::{RenewalTimer, RenewalWakeup, SweepReport};
pub use role_menu_service::RoleMenuService;
pub use status_projector::{STATUS_DISCOVERY_LIMIT, StatusProjector};
pub use work_queue::SubjectWorkQueue;
