//! A minimal single-block-per-object file system on top of any block device.
//!
//! The on-disk image is five fixed regions: superblock, inode table, inode
//! bitmap, block bitmap, then data blocks. Every file or directory owns at most
//! one data block. [`SFS`] is the entry point; the lower modules expose the
//! individual layers for tools that need to inspect an image.

pub mod alloc;
pub mod dir;
pub mod error;
mod fs;
pub mod io;
pub mod layout;
pub mod mkfs;
pub mod node;
pub mod sb;

#[cfg(test)]
mod test_support;

pub use crate::error::{SFSError, SuperblockError};
pub use crate::fs::{InodeHandle, StatFs, SFS};
pub use crate::mkfs::FormatOptions;
pub use crate::node::{Inode, InodeKind, Owner};
