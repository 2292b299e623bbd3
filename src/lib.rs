//! # UPnP Host Bridge
//!
//! This library lets a multi-threaded UPnP protocol engine and its IXML DOM
//! library be driven from a single-threaded, garbage-collected scripting host.
//!
//! ## Architecture
//!
//! ```text
//! Protocol engine worker threads
//!     │
//!     │ Dispatcher::on_event (deep copy)
//!     ▼
//! Bridge (delivery queue + reply slots)
//!     │
//!     │ Bridge::host_pump (host thread)
//!     ▼
//! HostHandler (script callbacks, proxies)
//! ```
//!
//! ## Features
//!
//! - **Proxy Registry**: One proxy per native object; native frees tombstone it
//! - **Event Bridge**: Fire-and-forget events queue, request events block for a reply
//! - **Deep Copy**: Payloads outlive the engine callback that produced them
//! - **Shutdown Safety**: Blocked workers are released when the host goes away

#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod host;
pub mod logging;
pub mod marshal;
pub mod metrics;
pub mod native;
pub mod registry;
pub mod report;
pub mod testing;

// Re-export commonly used types
pub use bridge::{Bridge, PumpStats};
pub use config::BridgeConfig;
pub use dispatch::{DispatchStatus, Dispatcher};
pub use error::{BridgeError, ContractViolation, DeliveryError, ErrorCode, SoftError};
pub use events::{EventPayload, EventType};
pub use host::{HostEvent, HostHandler, HostValue, Reply};
pub use metrics::{BridgeMetrics, BridgeStats};
pub use native::{DomLibrary, NativeHandle, ProtocolEngine, ProxyKind};
pub use registry::{Proxy, ProxyRegistry};
pub use report::ErrorReport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
