mod block;
mod diskemu;

pub use block::{BlockNumber, BlockStorage};
pub use diskemu::{FileBlockEmulator, FileBlockEmulatorBuilder};

use crate::error::SFSError;
use crate::layout::{Block, BLOCK_SIZE};

/// Reads a whole block into a fresh buffer.
pub(crate) fn read<T: BlockStorage>(dev: &mut T, blocknr: BlockNumber) -> Result<Block, SFSError> {
    let mut buf = [0; BLOCK_SIZE];
    dev.read_block(blocknr, &mut buf)?;
    Ok(buf)
}

/// Writes a whole block and waits for it to reach the device.
pub(crate) fn write_sync<T: BlockStorage>(
    dev: &mut T,
    blocknr: BlockNumber,
    buf: &[u8],
) -> Result<(), SFSError> {
    debug_assert_eq!(buf.len(), BLOCK_SIZE);
    dev.write_block(blocknr, buf)?;
    dev.sync_disk()?;
    Ok(())
}
