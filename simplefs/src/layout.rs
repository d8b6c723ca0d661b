//! On-disk geometry shared by every component.
//!
//! # Layout
//! ==============================================================================
//! | SuperBlock | Inode table | Bitmap (inodes) | Bitmap (blocks) | Data Region |
//! ==============================================================================
//!
//! Every structure is stored little endian and must stay bit-exact with images
//! produced by `mkfs.simplefs`.

/// 4k is a common block size for file systems and the only one supported here.
pub const BLOCK_SIZE: usize = 4096;

pub const SFS_MAGIC: u32 = 0xDEAD_BEEF;

/// Known locations.
pub const SUPERBLOCK_BLOCK: u32 = 0;
pub const INODE_TABLE_BLOCK: u32 = 1;
pub const INODE_BITMAP_BLOCK: u32 = 2;
pub const BLOCK_BITMAP_BLOCK: u32 = 3;
pub const FIRST_DATA_BLOCK: u32 = 4;

/// A single bitmap block tracks 4096 * 8 objects.
pub const BITS_PER_BLOCK: u32 = (BLOCK_SIZE * 8) as u32;
pub const MAX_INODES: u32 = BITS_PER_BLOCK;
pub const MAX_BLOCKS: u32 = BITS_PER_BLOCK;

/// Six little endian u32 fields.
pub const INODE_SIZE: usize = 24;
/// The inode table is one block, so only this many inode numbers are addressable
/// regardless of what the inode bitmap could track.
pub const INODES_PER_BLOCK: u32 = (BLOCK_SIZE / INODE_SIZE) as u32;

pub const ROOT_INODE: u32 = 1;
/// Inode 0 is never handed out.
pub const RESERVED_INODE: u32 = 0;

/// Size of the name field in a directory entry, including the NUL terminator.
pub const FILENAME_LEN: usize = 255;
pub const MAX_NAME_LEN: usize = FILENAME_LEN - 1;
/// `char filename[255]` followed by an aligned `__le32 inode`.
pub const DIR_ENTRY_SIZE: usize = 260;
pub const DIR_HEADER_SIZE: usize = 4;
pub const MAX_DIR_ENTRIES: usize = (BLOCK_SIZE - DIR_HEADER_SIZE) / DIR_ENTRY_SIZE;

pub const S_IFMT: u32 = 0o170_000;
pub const S_IFDIR: u32 = 0o040_000;
pub const S_IFREG: u32 = 0o100_000;
pub const PERMISSION_MASK: u32 = 0o7777;

pub type Block = [u8; BLOCK_SIZE];
