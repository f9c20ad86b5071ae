//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! listen directive (resolved by config walk)
//!     → socket.rs (resolve addresses, open + tune one socket each)
//!     → listener.rs (dedup by address, host binding metadata)
//!     → ordered Listener list handed to the external accept loop
//! ```
//!
//! # Design Decisions
//! - Provisioning is synchronous; the only blocking calls are OS socket
//!   and resolution operations
//! - Accepting connections and protocol handling live outside this crate;
//!   listeners expose raw descriptors for that layer

pub mod address;
pub mod listener;
pub mod socket;

pub use address::ListenAddress;
pub use listener::{Listener, ListenerRegistry};
pub use socket::{SocketCapabilities, SocketOwner};
