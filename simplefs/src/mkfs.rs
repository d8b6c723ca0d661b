use log::info;

use crate::alloc::Bitmap;
use crate::dir::DirBlock;
use crate::error::SFSError;
use crate::io::{self, BlockStorage};
use crate::layout::{
    BLOCK_SIZE, FIRST_DATA_BLOCK, INODES_PER_BLOCK, INODE_TABLE_BLOCK, MAX_BLOCKS,
    RESERVED_INODE, ROOT_INODE, SUPERBLOCK_BLOCK,
};
use crate::node::{self, Inode, InodeKind, Owner};
use crate::sb::SuperBlock;

/// The root directory always lives in the first data block.
pub const ROOT_DIR_BLOCK: u32 = FIRST_DATA_BLOCK;

/// Geometry and root attributes for a new file system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    /// Total blocks, defaults to the whole device.
    blocks: Option<u32>,
    inodes: u32,
    root_mode: u32,
    root_owner: Owner,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            blocks: None,
            inodes: INODES_PER_BLOCK,
            root_mode: 0o755,
            root_owner: Owner::default(),
        }
    }
}

impl FormatOptions {
    pub fn with_blocks(mut self, blocks: u32) -> Self {
        self.blocks = Some(blocks);
        self
    }

    /// Inode numbers tracked by the file system, inode 0 included.
    pub fn with_inodes(mut self, inodes: u32) -> Self {
        self.inodes = inodes;
        self
    }

    pub fn with_root_mode(mut self, mode: u32) -> Self {
        self.root_mode = mode;
        self
    }

    pub fn with_root_owner(mut self, owner: Owner) -> Self {
        self.root_owner = owner;
        self
    }

    fn geometry<T: BlockStorage>(&self, dev: &T) -> Result<(u32, u32), SFSError> {
        let device_blocks = dev.block_count().min(MAX_BLOCKS as usize) as u32;
        let blocks = self.blocks.unwrap_or(device_blocks);
        if blocks <= ROOT_DIR_BLOCK {
            return Err(SFSError::InvalidArgument(format!(
                "{} blocks leave no room for the root directory",
                blocks
            )));
        }
        if blocks > MAX_BLOCKS || blocks as usize > dev.block_count() {
            return Err(SFSError::InvalidArgument(format!(
                "{} blocks do not fit the device ({} blocks) or the block bitmap",
                blocks,
                dev.block_count()
            )));
        }
        // The inode table is a single block; numbers past it could never be read.
        if self.inodes <= ROOT_INODE || self.inodes > INODES_PER_BLOCK {
            return Err(SFSError::InvalidArgument(format!(
                "inode count must be between {} and {}, got {}",
                ROOT_INODE + 1,
                INODES_PER_BLOCK,
                self.inodes
            )));
        }
        Ok((blocks, self.inodes))
    }
}

/// Writes an empty file system onto `dev`: superblock, inode table holding the
/// root directory, both bitmaps, and the root directory block.
pub fn format<T: BlockStorage>(dev: &mut T, opts: &FormatOptions) -> Result<SuperBlock, SFSError> {
    let (blocks, inodes) = opts.geometry(dev)?;
    let mut sb = SuperBlock::new(blocks, inodes);
    info!(
        "Formatting: {} blocks, {} inodes, root directory in block {}",
        blocks, inodes, ROOT_DIR_BLOCK
    );

    // Inode 0 is marked so the bitmap population always matches the counter.
    let mut inode_map = Bitmap::new();
    inode_map.set_reserved(RESERVED_INODE);
    inode_map.set_reserved(ROOT_INODE);
    sb.free_inodes_count -= 2;

    let mut block_map = Bitmap::new();
    for reserved in 0..=ROOT_DIR_BLOCK {
        block_map.set_reserved(reserved);
    }
    sb.free_blocks_count -= ROOT_DIR_BLOCK + 1;

    let mut block_buffer = [0; BLOCK_SIZE];
    sb.serialize_into(&mut block_buffer);
    io::write_sync(dev, SUPERBLOCK_BLOCK, &block_buffer)?;

    io::write_sync(dev, INODE_TABLE_BLOCK, &[0; BLOCK_SIZE])?;
    io::write_sync(dev, sb.inode_bitmap_block, inode_map.serialize())?;
    io::write_sync(dev, sb.block_bitmap_block, block_map.serialize())?;

    let mut root = Inode::new(InodeKind::Directory, opts.root_mode, opts.root_owner);
    root.block = ROOT_DIR_BLOCK;
    node::write(dev, &sb, ROOT_INODE, &root)?;

    let mut block_buffer = [0; BLOCK_SIZE];
    DirBlock::empty().serialize_into(&mut block_buffer);
    io::write_sync(dev, ROOT_DIR_BLOCK, &block_buffer)?;

    info!(
        "Format complete: {} free blocks, {} free inodes",
        sb.free_blocks_count, sb.free_inodes_count
    );
    Ok(sb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Usage;
    use crate::io::FileBlockEmulatorBuilder;

    fn device(blocks: usize) -> crate::io::FileBlockEmulator {
        FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(blocks)
            .build()
            .unwrap()
    }

    #[test]
    fn fresh_image_accounts_for_reserved_objects() {
        let mut dev = device(64);
        let sb = format(&mut dev, &FormatOptions::default()).unwrap();

        assert_eq!(sb.blocks_count, 64);
        assert_eq!(sb.free_blocks_count, 59);
        assert_eq!(sb.inodes_count, INODES_PER_BLOCK);
        assert_eq!(sb.free_inodes_count, INODES_PER_BLOCK - 2);
        assert_eq!(SuperBlock::load(&mut dev).unwrap(), sb);
        assert!(Usage::read(&mut dev, &sb).unwrap().matches(&sb));

        let root = node::read(&mut dev, &sb, ROOT_INODE).unwrap();
        assert_eq!(root.kind(), Some(InodeKind::Directory));
        assert_eq!(root.block, ROOT_DIR_BLOCK);
        assert_eq!(root.links_count, 2);
        assert_eq!(root.permissions(), 0o755);
    }

    #[test]
    fn rejects_geometry_that_does_not_fit() {
        let mut dev = device(8);
        assert!(format(&mut dev, &FormatOptions::default().with_blocks(9)).is_err());
        assert!(format(&mut dev, &FormatOptions::default().with_blocks(4)).is_err());
        assert!(format(
            &mut dev,
            &FormatOptions::default().with_inodes(INODES_PER_BLOCK + 1)
        )
        .is_err());
        assert!(format(&mut dev, &FormatOptions::default().with_inodes(1)).is_err());
    }

    #[test]
    fn can_format_part_of_a_device() {
        let mut dev = device(32);
        let sb = format(&mut dev, &FormatOptions::default().with_blocks(16)).unwrap();
        assert_eq!(sb.blocks_count, 16);
        assert_eq!(sb.free_blocks_count, 11);
    }
}
