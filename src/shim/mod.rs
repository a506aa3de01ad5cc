//! Component E — the shim process (spec §2 "Shim process (S)", §4.E).

mod registry;
mod server;

pub use registry::SessionMapping;
pub use server::ShimServer;
