use super::{BlockNumber, BlockStorage};
use crate::layout::BLOCK_SIZE;
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};
use std::path::Path;

/// A block device backed by a regular file, used for image files and tests.
#[derive(Debug)]
pub struct FileBlockEmulator {
    /// The file must be a fixed-size file some exact multiple of the size of a block.
    fd: File,
    /// The total number of blocks available in the file store.
    block_count: usize,
}

impl FileBlockEmulator {
    /// Opens an existing file as a device of `nblocks` blocks. Contents are not checked;
    /// mounting does that.
    pub fn open_disk<P: AsRef<Path>>(dest: P, nblocks: usize) -> std::io::Result<Self> {
        // Return error if the file does not exist rather than create one.
        let fd = OpenOptions::new().read(true).write(true).open(dest)?;
        Ok(FileBlockEmulator {
            fd,
            block_count: nblocks,
        })
    }

    /// Opens an existing image and sizes the device from the file length, rounded down
    /// to whole blocks.
    pub fn open_image<P: AsRef<Path>>(dest: P) -> std::io::Result<Self> {
        let len = std::fs::metadata(dest.as_ref())?.len();
        Self::open_disk(dest, (len / BLOCK_SIZE as u64) as usize)
    }

    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check_range(&self, blocknr: BlockNumber) -> std::io::Result<()> {
        if blocknr as usize >= self.block_count {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("block {} out of range", blocknr),
            ));
        }
        Ok(())
    }
}

impl BlockStorage for FileBlockEmulator {
    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(blocknr)?;
        if buf.len() < BLOCK_SIZE {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space to read block",
            ));
        }
        self.fd
            .seek(SeekFrom::Start(blocknr as u64 * BLOCK_SIZE as u64))?;
        // Limit the read to just the block specified.
        self.fd.read_exact(&mut buf[..BLOCK_SIZE])
    }

    /// This method truncates writes that exceed the total block size.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(blocknr)?;
        self.fd
            .seek(SeekFrom::Start(blocknr as u64 * BLOCK_SIZE as u64))?;

        let max = BLOCK_SIZE.min(buf.len());
        self.fd.write_all(&buf[0..max])
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    block_count: usize,
    clear_medium: bool,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            // A better default here might be the size of the file rounded down
            // to the nearest block.
            block_count: 0,
            clear_medium: true,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the number of desired blocks in the block store device.
    pub fn with_block_count(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// Zeroing the medium is the default. Disable it to reopen a device that already
    /// holds a file system.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear_medium = clear;
        self
    }

    /// This builder assumed ownership of the file descriptor used and does
    /// destructive things to prepare the file for use. Additionally, ownership
    /// of the file is transfered to the emulator meaning this builder can only
    /// be used to create one emulator.
    pub fn build(mut self) -> std::io::Result<FileBlockEmulator> {
        if self.block_count == 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block device must have at least one block",
            ));
        }
        if self.clear_medium {
            self.zero_blocks()?;
        }
        Ok(FileBlockEmulator {
            fd: self.fd,
            block_count: self.block_count,
        })
    }

    fn zero_blocks(&mut self) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(0))?;
        let mut bfd = BufWriter::new(&self.fd);
        // Zero out the "disk" block, buffering each write to prevent excessive reads.
        let zeroes = [0x00; BLOCK_SIZE];
        for _ in 0..self.block_count {
            bfd.write_all(&zeroes)?;
        }
        bfd.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(blocks: usize) -> FileBlockEmulator {
        FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(blocks)
            .build()
            .expect("failed to allocate file block")
    }

    #[test]
    fn image_spans_whole_blocks() {
        let mut emu = device(4);
        emu.sync_disk().unwrap();
        assert_eq!(emu.block_count(), 4);
        assert_eq!(
            emu.into_file().metadata().unwrap().len(),
            4 * BLOCK_SIZE as u64
        );
    }

    #[test]
    fn blocks_are_independent() {
        let mut emu = device(4);
        emu.write_block(2, &[0x55; BLOCK_SIZE]).unwrap();
        emu.sync_disk().unwrap();

        let mut buf = [0xFF; BLOCK_SIZE];
        emu.read_block(3, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        emu.read_block(2, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x55));

        // Oversized buffers are cut at the block boundary.
        emu.write_block(1, &[0x11; BLOCK_SIZE + 8]).unwrap();
        emu.read_block(2, &mut buf).unwrap();
        assert_eq!(buf[0], 0x55);
    }

    #[test]
    fn access_beyond_range_returns_error() {
        let mut emu = device(1);
        assert!(emu.write_block(1, &[0x55; BLOCK_SIZE]).is_err());
        let mut buf = [0; BLOCK_SIZE];
        let err = emu.read_block(1, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn short_buffer_reads_are_rejected() {
        let mut buf = vec![0; 512];
        let err = device(1).read_block(0, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn reopening_without_clearing_keeps_contents() {
        let disk = tempfile::NamedTempFile::new().unwrap();
        let mut first = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
            .with_block_count(2)
            .build()
            .unwrap();
        first.write_block(1, &[0xAA; 4096]).unwrap();
        first.sync_disk().unwrap();

        let mut second = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
            .with_block_count(2)
            // Don't reset initialized disk.
            .clear_medium(false)
            .build()
            .unwrap();
        let mut buf = vec![0; 4096];
        second.read_block(1, &mut buf).unwrap();
        assert_eq!(buf, vec![0xAA; 4096]);

        let mut third = FileBlockEmulator::open_image(disk.path()).unwrap();
        assert_eq!(third.block_count(), 2);
        third.read_block(1, &mut buf).unwrap();
        assert_eq!(buf, vec![0xAA; 4096]);
    }

    #[test]
    fn zero_sized_device_is_rejected() {
        let fs_block = tempfile::tempfile().unwrap();
        assert!(FileBlockEmulatorBuilder::from(fs_block).build().is_err());
    }
}
