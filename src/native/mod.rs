//! Native helper: a separate process that runs allow-listed repair scripts and
//! launch targets on behalf of the dashboard, speaking length-prefixed JSON.

pub mod allowlist;
pub mod bridge;
pub mod host;
pub mod protocol;

pub use allowlist::{repair_command, RepairCategory, RepairCommand, REPAIR_COMMANDS};
pub use bridge::{NativeBridge, NativeTransport, ProcessTransport, RepairLogEntry};
pub use host::{NativeHost, ProcessRunner, SystemRunner};
pub use protocol::{HostRequest, HostResponse, HOST_NAME};
