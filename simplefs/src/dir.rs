use log::{debug, warn};
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::error::SFSError;
use crate::io::{self, BlockStorage};
use crate::layout::{FILENAME_LEN, MAX_DIR_ENTRIES, MAX_NAME_LEN};
use crate::node::Inode;
use crate::sb::SuperBlock;

/// Mirrors `struct { char filename[255]; __le32 inode; }` including the pad byte
/// the C compiler places before `inode`.
#[repr(C)]
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy)]
struct RawDirEntry {
    filename: [u8; FILENAME_LEN],
    _pad: u8,
    inode: U32<LittleEndian>,
}

#[repr(C)]
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy)]
struct RawDirBlock {
    nr_files: U32<LittleEndian>,
    files: [RawDirEntry; MAX_DIR_ENTRIES],
}

impl RawDirEntry {
    /// The stored name, or `None` when the slot is empty or unterminated.
    fn name(&self) -> Option<&[u8]> {
        let end = self.filename.iter().position(|&b| b == 0)?;
        if end == 0 {
            return None;
        }
        Some(&self.filename[..end])
    }
}

/// A stored name and the inode it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Index of the entry in the directory block.
    pub index: usize,
    pub name: String,
    pub inode: u32,
}

/// The contents of one directory data block.
pub struct DirBlock {
    raw: RawDirBlock,
}

impl DirBlock {
    pub fn empty() -> Self {
        Self {
            raw: RawDirBlock::new_zeroed(),
        }
    }

    /// Decodes a directory block, refusing entry counts beyond the capacity.
    pub fn parse(buf: &[u8]) -> Result<Self, SFSError> {
        let raw = RawDirBlock::read_from_prefix(buf)
            .ok_or_else(|| SFSError::Corrupt("directory block is truncated".to_string()))?;
        let nr_files = raw.nr_files.get() as usize;
        if nr_files > MAX_DIR_ENTRIES {
            return Err(SFSError::Corrupt(format!(
                "directory claims {} entries, capacity is {}",
                nr_files, MAX_DIR_ENTRIES
            )));
        }
        Ok(Self { raw })
    }

    /// Writes the block image into the head of `buf`. Trailing bytes are left as is.
    pub fn serialize_into(&self, buf: &mut [u8]) {
        buf[..std::mem::size_of::<RawDirBlock>()].copy_from_slice(self.raw.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.raw.nr_files.get() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= MAX_DIR_ENTRIES
    }

    /// Valid entries starting at `start`. Slots with a zero inode or a broken name
    /// are skipped.
    pub fn entries(&self, start: usize) -> impl Iterator<Item = DirEntry> + '_ {
        (start..self.len()).filter_map(move |index| self.entry_at(index))
    }

    /// Like [`DirBlock::entries`], but the iterator owns the block.
    pub fn into_entries(self, start: usize) -> Entries {
        Entries {
            block: self,
            next: start,
        }
    }

    fn entry_at(&self, index: usize) -> Option<DirEntry> {
        let file = &self.raw.files[index];
        let inode = file.inode.get();
        match file.name() {
            Some(name) if inode != 0 => Some(DirEntry {
                index,
                name: String::from_utf8_lossy(name).into_owned(),
                inode,
            }),
            _ => {
                warn!("Skipping corrupt directory entry {}", index);
                None
            }
        }
    }

    /// First exact match for `name`.
    pub fn find(&self, name: &[u8]) -> Option<u32> {
        self.raw.files[..self.len()]
            .iter()
            .find(|file| file.inode.get() != 0 && file.name() == Some(name))
            .map(|file| file.inode.get())
    }

    /// Checks that `name` could be appended.
    pub fn check_insert(&self, name: &[u8]) -> Result<(), SFSError> {
        if self.find(name).is_some() {
            return Err(SFSError::Exists);
        }
        if self.is_full() {
            return Err(SFSError::Full);
        }
        Ok(())
    }

    /// Appends an entry at index `len()`.
    pub fn push(&mut self, name: &[u8], ino: u32) -> Result<(), SFSError> {
        self.check_insert(name)?;
        let index = self.len();
        let file = &mut self.raw.files[index];
        file.filename = [0; FILENAME_LEN];
        file.filename[..name.len()].copy_from_slice(name);
        file._pad = 0;
        file.inode = U32::new(ino);
        self.raw.nr_files = U32::new(index as u32 + 1);
        Ok(())
    }

    /// Drops the last entry if it points at `ino`.
    fn pop(&mut self, ino: u32) -> bool {
        match self.len().checked_sub(1) {
            Some(last) if self.raw.files[last].inode.get() == ino => {
                self.raw.files[last] = RawDirEntry::new_zeroed();
                self.raw.nr_files = U32::new(last as u32);
                true
            }
            _ => false,
        }
    }
}

/// Entries of a directory block read once, decoded as the consumer asks for them.
pub struct Entries {
    block: DirBlock,
    next: usize,
}

impl Iterator for Entries {
    type Item = DirEntry;

    fn next(&mut self) -> Option<DirEntry> {
        while self.next < self.block.len() {
            let index = self.next;
            self.next += 1;
            if let Some(entry) = self.block.entry_at(index) {
                return Some(entry);
            }
        }
        None
    }
}

/// Rejects names that cannot be stored in an entry.
pub fn validate_name(name: &str) -> Result<&[u8], SFSError> {
    let bytes = name.as_bytes();
    if bytes.is_empty()
        || bytes.len() > MAX_NAME_LEN
        || name == "."
        || name == ".."
        || bytes.iter().any(|&b| b == b'/' || b == 0)
    {
        return Err(SFSError::InvalidName(name.to_string()));
    }
    Ok(bytes)
}

/// The data block of a directory, after checking it is one and the pointer is sane.
fn data_block(sb: &SuperBlock, ino: u32, dir: &Inode) -> Result<u32, SFSError> {
    if !dir.is_dir() {
        return Err(SFSError::NotADirectory(ino));
    }
    if !sb.is_data_block(dir.block) {
        return Err(SFSError::Corrupt(format!(
            "directory inode {} points at block {}",
            ino, dir.block
        )));
    }
    Ok(dir.block)
}

pub fn load<T: BlockStorage>(
    dev: &mut T,
    sb: &SuperBlock,
    ino: u32,
    dir: &Inode,
) -> Result<DirBlock, SFSError> {
    let block = data_block(sb, ino, dir)?;
    DirBlock::parse(&io::read(dev, block)?)
}

fn store<T: BlockStorage>(
    dev: &mut T,
    sb: &SuperBlock,
    ino: u32,
    dir: &Inode,
    contents: &DirBlock,
) -> Result<(), SFSError> {
    let block = data_block(sb, ino, dir)?;
    let mut buf = io::read(dev, block)?;
    contents.serialize_into(&mut buf);
    io::write_sync(dev, block, &buf)
}

/// Reads the directory block once and yields its entries from index `start` on.
pub fn iterate<T: BlockStorage>(
    dev: &mut T,
    sb: &SuperBlock,
    ino: u32,
    dir: &Inode,
    start: usize,
) -> Result<Entries, SFSError> {
    Ok(load(dev, sb, ino, dir)?.into_entries(start))
}

/// Looks `name` up in the directory.
pub fn find<T: BlockStorage>(
    dev: &mut T,
    sb: &SuperBlock,
    ino: u32,
    dir: &Inode,
    name: &str,
) -> Result<u32, SFSError> {
    let name = validate_name(name)?;
    let contents = load(dev, sb, ino, dir)?;
    let found = contents.find(name).ok_or(SFSError::NotFound)?;
    debug!(
        "Found {:?} -> inode {} in directory {}",
        String::from_utf8_lossy(name),
        found,
        ino
    );
    Ok(found)
}

/// Appends `name -> target` to the directory and writes the block back.
pub fn insert<T: BlockStorage>(
    dev: &mut T,
    sb: &SuperBlock,
    ino: u32,
    dir: &Inode,
    name: &str,
    target: u32,
) -> Result<(), SFSError> {
    let name = validate_name(name)?;
    let mut contents = load(dev, sb, ino, dir)?;
    contents.push(name, target)?;
    store(dev, sb, ino, dir, &contents)?;
    debug!(
        "Linked {:?} -> inode {} in directory {}",
        String::from_utf8_lossy(name),
        target,
        ino
    );
    Ok(())
}

/// Undoes the most recent [`insert`] of `target`. Returns whether an entry was removed.
pub(crate) fn remove_last<T: BlockStorage>(
    dev: &mut T,
    sb: &SuperBlock,
    ino: u32,
    dir: &Inode,
    target: u32,
) -> Result<bool, SFSError> {
    let mut contents = load(dev, sb, ino, dir)?;
    if !contents.pop(target) {
        return Ok(false);
    }
    store(dev, sb, ino, dir, &contents)?;
    Ok(true)
}
