use log::debug;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::alloc;
use crate::error::SFSError;
use crate::io::{self, BlockStorage};
use crate::layout::{
    BLOCK_SIZE, INODE_SIZE, INODE_TABLE_BLOCK, MAX_BLOCKS, PERMISSION_MASK, S_IFDIR, S_IFMT,
    S_IFREG,
};
use crate::sb::SuperBlock;

#[repr(C)]
#[derive(AsBytes, FromBytes, Unaligned, Copy, Clone)]
/// This structure __must be exactly 24 bytes.__
struct RawInode {
    mode: U32<LittleEndian>,
    uid: U32<LittleEndian>,
    gid: U32<LittleEndian>,
    size: U32<LittleEndian>,
    nlink: U32<LittleEndian>,
    ei_block: U32<LittleEndian>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    File,
    Directory,
}

impl InodeKind {
    fn type_bits(self) -> u32 {
        match self {
            InodeKind::File => S_IFREG,
            InodeKind::Directory => S_IFDIR,
        }
    }
}

/// The ids stamped on newly created objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

/// Decoded inode record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    /// The file mode, type and permission bits (e.g. drwxr-xr-x).
    pub mode: u32,
    /// The id of the owning user.
    pub uid: u32,
    /// The id of the owning group.
    pub gid: u32,
    /// The total size of the file in bytes.
    pub size: u32,
    /// The number of links to this file.
    pub links_count: u32,
    /// The single data block of the file or directory, 0 when none is assigned.
    pub block: u32,
}

impl Inode {
    /// A zeroed record of the given kind. Directories start with two links (self
    /// and parent) and span their whole block, files start empty with one link.
    pub fn new(kind: InodeKind, perm: u32, owner: Owner) -> Self {
        let (links_count, size) = match kind {
            InodeKind::File => (1, 0),
            InodeKind::Directory => (2, BLOCK_SIZE as u32),
        };
        Self {
            mode: kind.type_bits() | (perm & PERMISSION_MASK),
            uid: owner.uid,
            gid: owner.gid,
            size,
            links_count,
            block: 0,
        }
    }

    pub fn kind(&self) -> Option<InodeKind> {
        match self.mode & S_IFMT {
            S_IFREG => Some(InodeKind::File),
            S_IFDIR => Some(InodeKind::Directory),
            _ => None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == Some(InodeKind::Directory)
    }

    pub fn is_file(&self) -> bool {
        self.kind() == Some(InodeKind::File)
    }

    pub fn permissions(&self) -> u32 {
        self.mode & PERMISSION_MASK
    }

    fn decode(raw: &RawInode) -> Self {
        Self {
            mode: raw.mode.get(),
            uid: raw.uid.get(),
            gid: raw.gid.get(),
            size: raw.size.get(),
            links_count: raw.nlink.get(),
            block: raw.ei_block.get(),
        }
    }

    fn encode(&self) -> RawInode {
        RawInode {
            mode: U32::new(self.mode),
            uid: U32::new(self.uid),
            gid: U32::new(self.gid),
            size: U32::new(self.size),
            nlink: U32::new(self.links_count),
            ei_block: U32::new(self.block),
        }
    }
}

/// Byte offset of an inode inside the table block, after checking the number is
/// addressable.
fn locate(sb: &SuperBlock, ino: u32) -> Result<usize, SFSError> {
    if ino == 0 || ino >= sb.addressable_inodes() {
        return Err(SFSError::InvalidInode(ino));
    }
    Ok(ino as usize * INODE_SIZE)
}

/// Reads and checks an inode record.
pub fn read<T: BlockStorage>(dev: &mut T, sb: &SuperBlock, ino: u32) -> Result<Inode, SFSError> {
    let offset = locate(sb, ino)?;
    let table = io::read(dev, INODE_TABLE_BLOCK)?;
    let raw = RawInode::read_from(&table[offset..offset + INODE_SIZE])
        .ok_or_else(|| SFSError::Corrupt(format!("inode {} record is truncated", ino)))?;
    let inode = Inode::decode(&raw);

    if inode.kind().is_none() {
        return Err(SFSError::Corrupt(format!(
            "inode {} has unknown mode {:#o}",
            ino, inode.mode
        )));
    }
    // A generous sanity ceiling, the exact range is checked before the block is used.
    if inode.block >= MAX_BLOCKS {
        return Err(SFSError::Corrupt(format!(
            "inode {} points at implausible block {}",
            ino, inode.block
        )));
    }
    debug!(
        "Inode {}: mode={:#o}, size={}, block={}",
        ino, inode.mode, inode.size, inode.block
    );
    Ok(inode)
}

/// Overwrites a whole inode record.
pub fn write<T: BlockStorage>(
    dev: &mut T,
    sb: &SuperBlock,
    ino: u32,
    inode: &Inode,
) -> Result<(), SFSError> {
    let offset = locate(sb, ino)?;
    let mut table = io::read(dev, INODE_TABLE_BLOCK)?;
    table[offset..offset + INODE_SIZE].copy_from_slice(inode.encode().as_bytes());
    io::write_sync(dev, INODE_TABLE_BLOCK, &table)
}

/// Claims an inode number and builds a fresh record for it. Nothing is written to
/// the inode table; the data block is left unassigned for the caller to fill in.
pub fn allocate<T: BlockStorage>(
    dev: &mut T,
    sb: &mut SuperBlock,
    kind: InodeKind,
    perm: u32,
    owner: Owner,
) -> Result<(u32, Inode), SFSError> {
    let ino = alloc::alloc_inode(dev, sb)?;
    Ok((ino, Inode::new(kind, perm, owner)))
}
