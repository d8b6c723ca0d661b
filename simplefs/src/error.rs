use thiserror::Error;

/// Reasons a superblock is refused at mount.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SuperblockError {
    #[error("bad magic number: expected {expected:#x}, got {found:#x}")]
    BadMagic { expected: u32, found: u32 },
    #[error("file system has no blocks")]
    NoBlocks,
    #[error("file system has no inodes")]
    NoInodes,
    #[error("{0} blocks exceed what one bitmap block can track")]
    TooManyBlocks(u32),
    #[error("{0} inodes exceed what one bitmap block can track")]
    TooManyInodes(u32),
    #[error("{which} bitmap block {block} is outside the file system")]
    BitmapOutOfRange { which: &'static str, block: u32 },
    #[error("first data block {0} is outside the file system")]
    FirstDataOutOfRange(u32),
    #[error("free {which} count {free} exceeds total {total}")]
    FreeCountExceedsTotal {
        which: &'static str,
        free: u32,
        total: u32,
    },
    #[error("device holds {device} blocks but file system spans {blocks}")]
    DeviceTooSmall { device: usize, blocks: u32 },
}

#[derive(Error, Debug)]
pub enum SFSError {
    #[error("block device I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("no free data blocks")]
    OutOfSpace,
    #[error("no free inodes")]
    OutOfInodes,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("inode {0} is out of range")]
    InvalidInode(u32),
    #[error("invalid file name {0:?}")]
    InvalidName(String),
    #[error("invalid superblock: {0}")]
    InvalidSuperblock(#[from] SuperblockError),
    #[error("corrupt file system: {0}")]
    Corrupt(String),
    #[error("found no file at path")]
    NotFound,
    #[error("an entry with that name already exists")]
    Exists,
    #[error("directory has no free entries")]
    Full,
    #[error("inode {0} is not a directory")]
    NotADirectory(u32),
    #[error("inode {0} is a directory")]
    IsADirectory(u32),
}

impl SFSError {
    /// Exhaustion the caller can recover from by freeing something.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, SFSError::OutOfSpace | SFSError::OutOfInodes)
    }
}
