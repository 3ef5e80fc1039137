//! Kernel CAN interfaces
//!
//! Link management in [`link`] only needs the `ip` tool, and is available everywhere. The channel
//! itself requires SocketCAN, and so Linux and the `socketcan` feature.
#[cfg(all(feature = "socketcan", target_os = "linux"))]
mod channel;
pub mod link;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub use channel::{KernelCanChannel, KernelChannelError};
pub use link::{bring_up, IpLink, LinkControl, LinkError, LinkState, LinkTransition};
