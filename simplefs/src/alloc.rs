use std::ops::Range;

use log::{debug, error, info, warn};

use crate::error::SFSError;
use crate::io::{self, BlockStorage};
use crate::layout::{Block, BLOCK_SIZE, RESERVED_INODE};
use crate::sb::SuperBlock;

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

/// Stores 4096 bytes mapping each bit to an object on disk. A 4K bitmap supports
/// tracking up to 4096 * 8 objects. Bit `i` lives in byte `i / 8`, least
/// significant bit first.
#[derive(Clone)]
pub struct Bitmap {
    bits: Block,
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl Bitmap {
    pub fn new() -> Self {
        Self {
            bits: [0; BLOCK_SIZE],
        }
    }

    pub fn parse(buf: &[u8]) -> Self {
        let mut bits = [0; BLOCK_SIZE];
        bits.copy_from_slice(&buf[..BLOCK_SIZE]);
        Self { bits }
    }

    pub fn serialize(&self) -> &[u8] {
        &self.bits
    }

    pub fn get(&self, nr: u32) -> State {
        let (byte, mask) = Self::locate(nr);
        if self.bits[byte] & mask == 0 {
            State::Free
        } else {
            State::Used
        }
    }

    pub fn set_reserved(&mut self, nr: u32) {
        let (byte, mask) = Self::locate(nr);
        self.bits[byte] |= mask;
    }

    pub fn set_free(&mut self, nr: u32) {
        let (byte, mask) = Self::locate(nr);
        self.bits[byte] &= !mask;
    }

    /// Number of used bits within `range`.
    pub fn count_used(&self, range: Range<u32>) -> u32 {
        range.filter(|&nr| self.get(nr) == State::Used).count() as u32
    }

    fn locate(nr: u32) -> (usize, u8) {
        assert!((nr as usize) < BLOCK_SIZE * 8, "bit {} outside bitmap", nr);
        (nr as usize / 8, 1 << (nr % 8))
    }
}

/// Implements a naive allocation policy. On each call to the iterator it returns the
/// next free slot after the previous one, scanning linearly over `range`.
///
/// ## Other Pre-Allocation Policies
///
/// 1. Allocation that attempts to find enough contiguous available blocks so data can be allocated
///    close together (speed ups through sequential reads).
/// 2. Allocation that attempts to spread randomly over blocks to prevent wear of physical devices
///    in the front section (that may be rewritten many times before allocating to the back).
pub struct NextAvailableAllocation<'a> {
    /// Keeps track of the next starting place for looking for available slots.
    marker: u32,
    bitmap: &'a Bitmap,
    /// One past the last allocatable slot.
    cap: u32,
}

impl<'a> NextAvailableAllocation<'a> {
    pub fn new(bitmap: &'a Bitmap, range: Range<u32>) -> Self {
        Self {
            marker: range.start,
            bitmap,
            cap: range.end,
        }
    }
}

impl Iterator for NextAvailableAllocation<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<Self::Item> {
        while self.marker < self.cap {
            let candidate = self.marker;
            self.marker += 1;
            if let State::Free = self.bitmap.get(candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

/// The two kinds of objects tracked by a bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    Inode,
    Block,
}

impl Resource {
    fn name(self) -> &'static str {
        match self {
            Resource::Inode => "inode",
            Resource::Block => "block",
        }
    }

    fn bitmap_block(self, sb: &SuperBlock) -> u32 {
        match self {
            Resource::Inode => sb.inode_bitmap_block,
            Resource::Block => sb.block_bitmap_block,
        }
    }

    fn free_counter(self, sb: &mut SuperBlock) -> &mut u32 {
        match self {
            Resource::Inode => &mut sb.free_inodes_count,
            Resource::Block => &mut sb.free_blocks_count,
        }
    }

    /// Numbers the allocator may hand out.
    fn allocatable(self, sb: &SuperBlock) -> Range<u32> {
        match self {
            Resource::Inode => RESERVED_INODE + 1..sb.addressable_inodes(),
            Resource::Block => sb.first_data_block..sb.blocks_count,
        }
    }

    /// Numbers a caller may release.
    fn releasable(self, sb: &SuperBlock) -> Range<u32> {
        match self {
            Resource::Inode => RESERVED_INODE + 1..sb.inodes_count,
            Resource::Block => sb.first_data_block..sb.blocks_count,
        }
    }

    fn exhausted(self) -> SFSError {
        match self {
            Resource::Inode => SFSError::OutOfInodes,
            Resource::Block => SFSError::OutOfSpace,
        }
    }
}

/// Claims the first free inode number.
pub fn alloc_inode<T: BlockStorage>(dev: &mut T, sb: &mut SuperBlock) -> Result<u32, SFSError> {
    claim(dev, sb, Resource::Inode)
}

/// Claims the first free data block.
pub fn alloc_block<T: BlockStorage>(dev: &mut T, sb: &mut SuperBlock) -> Result<u32, SFSError> {
    claim(dev, sb, Resource::Block)
}

/// Releases an inode number. Releasing a free number is a no-op.
pub fn free_inode<T: BlockStorage>(
    dev: &mut T,
    sb: &mut SuperBlock,
    ino: u32,
) -> Result<(), SFSError> {
    release(dev, sb, Resource::Inode, ino)
}

/// Releases a data block. Releasing a free block is a no-op.
pub fn free_block<T: BlockStorage>(
    dev: &mut T,
    sb: &mut SuperBlock,
    block: u32,
) -> Result<(), SFSError> {
    release(dev, sb, Resource::Block, block)
}

/// Population of both bitmaps over the ranges the superblock declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub inodes_used: u32,
    pub blocks_used: u32,
}

impl Usage {
    pub fn read<T: BlockStorage>(dev: &mut T, sb: &SuperBlock) -> Result<Self, SFSError> {
        let inodes = Bitmap::parse(&io::read(dev, sb.inode_bitmap_block)?);
        let blocks = Bitmap::parse(&io::read(dev, sb.block_bitmap_block)?);
        Ok(Self {
            inodes_used: inodes.count_used(0..sb.inodes_count),
            blocks_used: blocks.count_used(0..sb.blocks_count),
        })
    }

    /// Whether free counters and bitmap populations add up to the totals.
    pub fn matches(&self, sb: &SuperBlock) -> bool {
        self.inodes_used + sb.free_inodes_count == sb.inodes_count
            && self.blocks_used + sb.free_blocks_count == sb.blocks_count
    }
}

fn claim<T: BlockStorage>(
    dev: &mut T,
    sb: &mut SuperBlock,
    kind: Resource,
) -> Result<u32, SFSError> {
    debug!(
        "Allocating {}: {} free",
        kind.name(),
        *kind.free_counter(sb)
    );
    if *kind.free_counter(sb) == 0 {
        return Err(kind.exhausted());
    }

    let bitmap_block = kind.bitmap_block(sb);
    let mut bitmap = Bitmap::parse(&io::read(dev, bitmap_block)?);
    let nr = match NextAvailableAllocation::new(&bitmap, kind.allocatable(sb)).next() {
        Some(nr) => nr,
        None => {
            warn!(
                "Counter reports free {}s but none is clear in {:?}",
                kind.name(),
                kind.allocatable(sb)
            );
            return Err(kind.exhausted());
        }
    };

    bitmap.set_reserved(nr);
    io::write_sync(dev, bitmap_block, bitmap.serialize())?;
    *kind.free_counter(sb) -= 1;

    if let Err(e) = sb.persist(dev) {
        error!(
            "Could not persist superblock after claiming {} {}: {}",
            kind.name(),
            nr,
            e
        );
        bitmap.set_free(nr);
        *kind.free_counter(sb) += 1;
        if let Err(undo) = io::write_sync(dev, bitmap_block, bitmap.serialize()) {
            error!("Could not roll back {} {}: {}", kind.name(), nr, undo);
        }
        return Err(e);
    }

    info!(
        "Allocated {} {} (remaining: {})",
        kind.name(),
        nr,
        *kind.free_counter(sb)
    );
    Ok(nr)
}

fn release<T: BlockStorage>(
    dev: &mut T,
    sb: &mut SuperBlock,
    kind: Resource,
    nr: u32,
) -> Result<(), SFSError> {
    if !kind.releasable(sb).contains(&nr) {
        return Err(SFSError::InvalidArgument(format!(
            "{} {} cannot be freed",
            kind.name(),
            nr
        )));
    }

    let bitmap_block = kind.bitmap_block(sb);
    let mut bitmap = Bitmap::parse(&io::read(dev, bitmap_block)?);
    if bitmap.get(nr) == State::Free {
        warn!("Trying to free already free {} {}", kind.name(), nr);
        return Ok(());
    }

    bitmap.set_free(nr);
    io::write_sync(dev, bitmap_block, bitmap.serialize())?;
    *kind.free_counter(sb) += 1;

    if let Err(e) = sb.persist(dev) {
        error!(
            "Could not persist superblock after freeing {} {}: {}",
            kind.name(),
            nr,
            e
        );
        bitmap.set_reserved(nr);
        *kind.free_counter(sb) -= 1;
        if let Err(undo) = io::write_sync(dev, bitmap_block, bitmap.serialize()) {
            error!(
                "Could not roll back release of {} {}: {}",
                kind.name(),
                nr,
                undo
            );
        }
        return Err(e);
    }

    info!("Freed {} {}", kind.name(), nr);
    Ok(())
}
