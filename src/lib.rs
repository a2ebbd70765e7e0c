//! Hostbridge - control-plane bridge for tool-driven host applications.
//!
//! This crate carries command requests and results between an external
//! tool-calling client and a long-lived host application over a pluggable
//! wire protocol, and keeps that channel alive across disconnects and
//! host-triggered in-process resets.
//!
//! # Architecture
//!
//! The crate follows an explicit composition-root pattern:
//!
//! - **Bridge** - service instance constructed once, owns everything below
//! - **TransportManager** - owns the single active transport
//! - **Transports** - framed socket, HTTP, and WebSocket implementations
//! - **ReloadController** - resume-intent persistence around host resets
//! - **StateStore** - on-disk key-value state that survives resets
//!
//! # Modules
//!
//! - [`transport`] - the transport trait, implementations, and manager
//! - [`reload`] - suspend/resume resilience
//! - [`config`] - configuration loading/saving
//! - [`dispatch`] - the external command dispatcher contract

// Library modules
pub mod bridge;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod reload;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use bridge::Bridge;
pub use config::Config;
pub use dispatch::{CommandDispatcher, DispatchError, NullDispatcher};
pub use reload::{ReloadController, ResumeIntent};
pub use session::Session;
pub use store::StateStore;
pub use transport::manager::TransportManager;
pub use transport::{
    TransportClient, TransportError, TransportMode, TransportState, VerifyReport,
};
