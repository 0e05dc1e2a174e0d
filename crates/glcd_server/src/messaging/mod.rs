//! Message handling for bus traffic.
//!
//! This module provides the envelope codec and the dispatcher that routes
//! decoded messages to the hub's services.

pub mod router;
pub mod types;

pub use router::{
    service_channels, DispatchStats, Dispatched, Dispatcher, ServiceInbox, ServiceInboxes,
    ServiceKind, ServiceSenders,
};
pub use types::{Envelope, HubMessage, Inbound, MessageKind, Outbound};
