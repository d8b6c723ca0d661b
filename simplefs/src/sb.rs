use log::{debug, info};
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::error::{SFSError, SuperblockError};
use crate::io::{self, BlockStorage};
use crate::layout::{
    BLOCK_BITMAP_BLOCK, BLOCK_SIZE, FIRST_DATA_BLOCK, INODES_PER_BLOCK, INODE_BITMAP_BLOCK,
    MAX_BLOCKS, MAX_INODES, SFS_MAGIC, SUPERBLOCK_BLOCK,
};

/// Wire format of the superblock, stored at the start of block 0.
#[repr(C)]
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy)]
struct RawSuperBlock {
    magic: U32<LittleEndian>,
    nr_blocks: U32<LittleEndian>,
    nr_inodes: U32<LittleEndian>,
    nr_free_blocks: U32<LittleEndian>,
    nr_free_inodes: U32<LittleEndian>,
    inode_bitmap_block: U32<LittleEndian>,
    block_bitmap_block: U32<LittleEndian>,
    first_data_block: U32<LittleEndian>,
}

impl RawSuperBlock {
    fn decode(buf: &[u8]) -> Self {
        assert_eq!(
            buf.len(),
            BLOCK_SIZE,
            "Length of buffer to parse must equal block size."
        );
        // The buffer is a whole block so the prefix always fits.
        RawSuperBlock::read_from_prefix(buf).unwrap_or_else(RawSuperBlock::new_zeroed)
    }
}

/// The first block of the file system storing information critical for mounting
/// the file system and verifying the underlying disk is formatted correctly.
///
/// Besides the fixed geometry it carries the live free-space counters. Those are
/// the only fields the engine ever changes after formatting, and every change is
/// flushed with [`SuperBlock::persist`] before the mutating call returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    /// A 32-bit identifying constant, 0xDEADBEEF.
    pub sb_magic: u32,
    /// Total blocks on the device, metadata blocks included.
    pub blocks_count: u32,
    /// Total inode numbers the inode bitmap tracks.
    pub inodes_count: u32,
    /// All blocks available to be allocated by the system.
    pub free_blocks_count: u32,
    /// The number of remaining available inodes.
    pub free_inodes_count: u32,
    pub inode_bitmap_block: u32,
    pub block_bitmap_block: u32,
    /// Data blocks are only ever allocated at or after this block.
    pub first_data_block: u32,
}

impl SuperBlock {
    /// A superblock for the fixed layout with every object free. The formatter
    /// accounts for the reserved objects afterwards.
    pub fn new(blocks_count: u32, inodes_count: u32) -> Self {
        Self {
            sb_magic: SFS_MAGIC,
            blocks_count,
            inodes_count,
            free_blocks_count: blocks_count,
            free_inodes_count: inodes_count,
            inode_bitmap_block: INODE_BITMAP_BLOCK,
            block_bitmap_block: BLOCK_BITMAP_BLOCK,
            first_data_block: FIRST_DATA_BLOCK,
        }
    }

    /// Reads a the super block from a buffer of of exactly size BLOCK_SIZE and
    /// validates it. Passing a slice of any other size will result in a panic.
    pub fn parse(buf: &[u8]) -> Result<Self, SuperblockError> {
        let raw = RawSuperBlock::decode(buf);
        let sb = Self {
            sb_magic: raw.magic.get(),
            blocks_count: raw.nr_blocks.get(),
            inodes_count: raw.nr_inodes.get(),
            free_blocks_count: raw.nr_free_blocks.get(),
            free_inodes_count: raw.nr_free_inodes.get(),
            inode_bitmap_block: raw.inode_bitmap_block.get(),
            block_bitmap_block: raw.block_bitmap_block.get(),
            first_data_block: raw.first_data_block.get(),
        };
        sb.validate()?;
        Ok(sb)
    }

    /// Serializes the SuperBlock into the head of a BLOCK_SIZE buffer. Bytes past
    /// the header are left untouched.
    pub fn serialize_into(&self, buf: &mut [u8]) {
        let raw = RawSuperBlock {
            magic: U32::new(self.sb_magic),
            nr_blocks: U32::new(self.blocks_count),
            nr_inodes: U32::new(self.inodes_count),
            nr_free_blocks: U32::new(self.free_blocks_count),
            nr_free_inodes: U32::new(self.free_inodes_count),
            inode_bitmap_block: U32::new(self.inode_bitmap_block),
            block_bitmap_block: U32::new(self.block_bitmap_block),
            first_data_block: U32::new(self.first_data_block),
        };
        buf[..std::mem::size_of::<RawSuperBlock>()].copy_from_slice(raw.as_bytes());
    }

    pub fn validate(&self) -> Result<(), SuperblockError> {
        if self.sb_magic != SFS_MAGIC {
            return Err(SuperblockError::BadMagic {
                expected: SFS_MAGIC,
                found: self.sb_magic,
            });
        }
        if self.blocks_count == 0 {
            return Err(SuperblockError::NoBlocks);
        }
        if self.inodes_count == 0 {
            return Err(SuperblockError::NoInodes);
        }
        if self.blocks_count > MAX_BLOCKS {
            return Err(SuperblockError::TooManyBlocks(self.blocks_count));
        }
        if self.inodes_count > MAX_INODES {
            return Err(SuperblockError::TooManyInodes(self.inodes_count));
        }
        if self.inode_bitmap_block >= self.blocks_count {
            return Err(SuperblockError::BitmapOutOfRange {
                which: "inode",
                block: self.inode_bitmap_block,
            });
        }
        if self.block_bitmap_block >= self.blocks_count {
            return Err(SuperblockError::BitmapOutOfRange {
                which: "block",
                block: self.block_bitmap_block,
            });
        }
        if self.first_data_block >= self.blocks_count {
            return Err(SuperblockError::FirstDataOutOfRange(self.first_data_block));
        }
        if self.free_blocks_count > self.blocks_count {
            return Err(SuperblockError::FreeCountExceedsTotal {
                which: "block",
                free: self.free_blocks_count,
                total: self.blocks_count,
            });
        }
        if self.free_inodes_count > self.inodes_count {
            return Err(SuperblockError::FreeCountExceedsTotal {
                which: "inode",
                free: self.free_inodes_count,
                total: self.inodes_count,
            });
        }
        Ok(())
    }

    /// Reads and validates the superblock of a device.
    pub fn load<T: BlockStorage>(dev: &mut T) -> Result<Self, SFSError> {
        let buf = io::read(dev, SUPERBLOCK_BLOCK)?;
        let sb = Self::parse(&buf)?;
        if dev.block_count() < sb.blocks_count as usize {
            return Err(SuperblockError::DeviceTooSmall {
                device: dev.block_count(),
                blocks: sb.blocks_count,
            }
            .into());
        }
        info!(
            "Loaded superblock: {} blocks ({} free), {} inodes ({} free), first data block {}",
            sb.blocks_count,
            sb.free_blocks_count,
            sb.inodes_count,
            sb.free_inodes_count,
            sb.first_data_block
        );
        Ok(sb)
    }

    /// Flushes the free counters to disk. The on-disk record is re-read first so
    /// that only the counters are overwritten.
    pub fn persist<T: BlockStorage>(&self, dev: &mut T) -> Result<(), SFSError> {
        let mut buf = io::read(dev, SUPERBLOCK_BLOCK)?;
        let mut raw = RawSuperBlock::decode(&buf);
        if raw.magic.get() != SFS_MAGIC {
            return Err(SFSError::Corrupt(format!(
                "superblock magic changed on disk to {:#x}",
                raw.magic.get()
            )));
        }
        raw.nr_free_blocks = U32::new(self.free_blocks_count);
        raw.nr_free_inodes = U32::new(self.free_inodes_count);
        buf[..std::mem::size_of::<RawSuperBlock>()].copy_from_slice(raw.as_bytes());
        io::write_sync(dev, SUPERBLOCK_BLOCK, &buf)?;
        debug!(
            "Persisted counters: {} free blocks, {} free inodes",
            self.free_blocks_count, self.free_inodes_count
        );
        Ok(())
    }

    /// Replaces the in-memory counters with the ones on disk. Status queries trust
    /// the disk over memory so drift from a partially failed call is not reported.
    pub fn refresh_counters<T: BlockStorage>(&mut self, dev: &mut T) -> Result<(), SFSError> {
        let buf = io::read(dev, SUPERBLOCK_BLOCK)?;
        let raw = RawSuperBlock::decode(&buf);
        self.free_blocks_count = raw.nr_free_blocks.get();
        self.free_inodes_count = raw.nr_free_inodes.get();
        Ok(())
    }

    /// Last persist before the device is released.
    pub fn finalize<T: BlockStorage>(&self, dev: &mut T) -> Result<(), SFSError> {
        self.persist(dev)?;
        info!("Superblock finalized");
        Ok(())
    }

    /// Inode numbers that fit in the single inode table block. The bitmap may claim
    /// to track more, those numbers are never handed out.
    pub fn addressable_inodes(&self) -> u32 {
        self.inodes_count.min(INODES_PER_BLOCK)
    }

    pub fn is_data_block(&self, block: u32) -> bool {
        block >= self.first_data_block && block < self.blocks_count
    }
}
