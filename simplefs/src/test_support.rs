//! Shared fixtures for unit tests.

use crate::io::{BlockNumber, BlockStorage, FileBlockEmulator, FileBlockEmulatorBuilder};
use crate::mkfs::{format, FormatOptions};
use crate::sb::SuperBlock;

/// A freshly formatted temporary device with default options.
pub(crate) fn formatted_device(blocks: usize) -> (FileBlockEmulator, SuperBlock) {
    let mut dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
        .with_block_count(blocks)
        .build()
        .expect("Could not initialize disk emulator.");
    let sb = format(&mut dev, &FormatOptions::default()).unwrap();
    (dev, sb)
}

/// Fails every write aimed at one block while armed.
pub(crate) struct FlakyDevice<T> {
    inner: T,
    failing: Option<BlockNumber>,
}

impl<T: BlockStorage> FlakyDevice<T> {
    pub(crate) fn new(inner: T) -> Self {
        Self {
            inner,
            failing: None,
        }
    }

    pub(crate) fn fail_writes_to(&mut self, block: Option<BlockNumber>) {
        self.failing = block;
    }
}

impl<T: BlockStorage> BlockStorage for FlakyDevice<T> {
    fn block_count(&self) -> usize {
        self.inner.block_count()
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.inner.read_block(blocknr, buf)
    }

    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        if self.failing == Some(blocknr) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected write failure on block {}", blocknr),
            ));
        }
        self.inner.write_block(blocknr, buf)
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.inner.sync_disk()
    }
}
