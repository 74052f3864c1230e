//! Host network devices for microVM interfaces.
//!
//! Each guest interface is backed by a TAP or macvtap device on the host.
//! Device names are short (`kt`/`kvt` plus seven random characters) to fit
//! within IFNAMSIZ.

mod names;
mod tap;

pub use names::new_iface_name;
pub use tap::{TapError, TapNetworkService};
