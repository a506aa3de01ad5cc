//! Component C — a disk-backed, chunked scrollback archive per PTY (spec
//! §4.C). The global cross-PTY byte budget (spec §4.C "a manager
//! coordinates a global byte budget") is enforced by
//! `shim::ShimServer::enforce_scrollback_budget`, which walks the PTY
//! registry directly rather than through a separate owning type: each
//! archive is already exclusively owned by its `PtySession` (spec §5), so a
//! second owner would just be indirection.

mod archive;

pub use archive::{ChunkMeta, ScrollbackArchive, ScrollbackConfig};
