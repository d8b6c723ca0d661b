use std::path::{Component, Path};

use log::{debug, error, info};

use crate::alloc::{self, Usage};
use crate::dir;
use crate::error::SFSError;
use crate::io::{self, BlockStorage};
use crate::layout::{BLOCK_SIZE, MAX_DIR_ENTRIES, MAX_NAME_LEN, ROOT_INODE};
use crate::mkfs::{self, FormatOptions};
use crate::node::{self, Inode, InodeKind, Owner};
use crate::sb::SuperBlock;

/// A live file system object: its inode number, the directory it was reached
/// from, and a copy of its record. Handles are plain values owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeHandle {
    ino: u32,
    parent: u32,
    inode: Inode,
}

impl InodeHandle {
    pub fn ino(&self) -> u32 {
        self.ino
    }

    /// The directory this handle was looked up in. The root is its own parent.
    pub fn parent(&self) -> u32 {
        self.parent
    }

    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    pub fn size(&self) -> u32 {
        self.inode.size
    }

    pub fn is_dir(&self) -> bool {
        self.inode.is_dir()
    }
}

/// File system status as reported by [`SFS::statfs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub magic: u32,
    pub block_size: u32,
    pub blocks: u32,
    pub blocks_free: u32,
    pub blocks_available: u32,
    pub files: u32,
    pub files_free: u32,
    /// Longest storable name. The 255-byte name field keeps one byte for the NUL
    /// terminator, so this is 254.
    pub name_max: u32,
}

/// An inode number and data block claimed by an in-flight create or mkdir.
struct Reservation {
    ino: u32,
    block: Option<u32>,
}

/// A mounted file system on owned block storage.
///
/// Every method takes `&mut self`, there is exactly one mutator at a time. Each
/// mutating call flushes all of its writes before returning and undoes its
/// resource claims if a later step fails.
pub struct SFS<T: BlockStorage> {
    dev: T,
    super_block: SuperBlock,
    root: InodeHandle,
    owner: Owner,
}

impl<T: BlockStorage> SFS<T> {
    /// Initializes an empty file system onto owned block storage and mounts it.
    pub fn format(mut dev: T, opts: &FormatOptions) -> Result<Self, SFSError> {
        mkfs::format(&mut dev, opts)?;
        Self::mount(dev)
    }

    /// Loads the superblock and the root directory. Either failing fails the mount.
    pub fn mount(mut dev: T) -> Result<Self, SFSError> {
        let super_block = SuperBlock::load(&mut dev)?;
        let root = node::read(&mut dev, &super_block, ROOT_INODE)?;
        if !root.is_dir() {
            return Err(SFSError::Corrupt("root inode is not a directory".to_string()));
        }
        info!(
            "Mounted file system: {} blocks, {} inodes, root directory in block {}",
            super_block.blocks_count, super_block.inodes_count, root.block
        );

        Ok(SFS {
            dev,
            super_block,
            root: InodeHandle {
                ino: ROOT_INODE,
                parent: ROOT_INODE,
                inode: root,
            },
            owner: Owner::default(),
        })
    }

    /// Persists the superblock one last time and returns the device.
    pub fn unmount(mut self) -> Result<T, SFSError> {
        self.super_block.finalize(&mut self.dev)?;
        info!("Unmounted file system");
        Ok(self.dev)
    }

    pub fn root(&self) -> InodeHandle {
        self.root.clone()
    }

    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    /// Sets the uid and gid recorded on objects created from now on.
    pub fn set_owner(&mut self, owner: Owner) {
        self.owner = owner;
    }

    pub fn lookup(&mut self, dir: &InodeHandle, name: &str) -> Result<InodeHandle, SFSError> {
        let ino = dir::find(&mut self.dev, &self.super_block, dir.ino, &dir.inode, name)?;
        let inode = node::read(&mut self.dev, &self.super_block, ino)?;
        Ok(InodeHandle {
            ino,
            parent: dir.ino,
            inode,
        })
    }

    /// Walks an absolute path from the root directory.
    pub fn resolve<P: AsRef<Path>>(&mut self, path: P) -> Result<InodeHandle, SFSError> {
        let mut parts = path.as_ref().components();
        if Some(Component::RootDir) != parts.next() {
            return Err(SFSError::InvalidArgument(
                "path must start with \"/\"".to_string(),
            ));
        }

        // Handles from the root down, `..` pops one.
        let mut walked = vec![self.root()];
        for part in parts {
            match part {
                Component::Normal(name) => {
                    let name = name
                        .to_str()
                        .ok_or_else(|| SFSError::InvalidName(name.to_string_lossy().into_owned()))?;
                    let current = walked.last().cloned().unwrap_or_else(|| self.root());
                    let next = self.lookup(&current, name)?;
                    walked.push(next);
                }
                Component::ParentDir => {
                    if walked.len() > 1 {
                        walked.pop();
                    }
                }
                Component::CurDir => {}
                _ => {
                    return Err(SFSError::InvalidArgument(format!(
                        "unsupported path component {:?}",
                        part
                    )))
                }
            }
        }
        Ok(walked.pop().unwrap_or_else(|| self.root()))
    }

    /// Emits directory entries starting at position `offset`. Positions 0 and 1
    /// are `.` and `..`, stored entry `i` is position `i + 2`. Emission stops when
    /// `emit` returns false. Returns the position to resume from.
    pub fn readdir<F>(
        &mut self,
        dir: &InodeHandle,
        offset: u64,
        mut emit: F,
    ) -> Result<u64, SFSError>
    where
        F: FnMut(&str, u32) -> bool,
    {
        if !dir.is_dir() {
            return Err(SFSError::NotADirectory(dir.ino));
        }
        let mut pos = offset;
        if pos > (MAX_DIR_ENTRIES + 2) as u64 {
            return Ok(pos);
        }
        if pos == 0 {
            if !emit(".", dir.ino) {
                return Ok(pos);
            }
            pos = 1;
        }
        if pos == 1 {
            if !emit("..", dir.parent) {
                return Ok(pos);
            }
            pos = 2;
        }

        let start = (pos - 2) as usize;
        for entry in dir::iterate(&mut self.dev, &self.super_block, dir.ino, &dir.inode, start)? {
            if !emit(&entry.name, entry.inode) {
                return Ok(entry.index as u64 + 2);
            }
            pos = entry.index as u64 + 3;
        }
        debug!("Directory {} iteration ended at position {}", dir.ino, pos);
        Ok(pos)
    }

    /// Creates an empty regular file named `name` in `dir`.
    ///
    /// The entry is linked before the inode record and the data block are written.
    /// If either write fails the entry is dropped again and both claims released.
    pub fn create(
        &mut self,
        dir: &InodeHandle,
        name: &str,
        mode: u32,
    ) -> Result<InodeHandle, SFSError> {
        self.check_room(dir, name)?;
        let (reservation, inode) = self.reserve(InodeKind::File, mode)?;
        let ino = reservation.ino;

        if let Err(e) = self.link_file(dir, name, ino, &inode) {
            self.rollback(reservation);
            return Err(e);
        }
        info!(
            "Created file {:?} as inode {} in directory {}",
            name, ino, dir.ino
        );
        Ok(InodeHandle {
            ino,
            parent: dir.ino,
            inode,
        })
    }

    /// Creates an empty directory named `name` in `dir`.
    ///
    /// The parent entry is written last, once the child record and its directory
    /// block are on disk.
    pub fn mkdir(
        &mut self,
        dir: &InodeHandle,
        name: &str,
        mode: u32,
    ) -> Result<InodeHandle, SFSError> {
        self.check_room(dir, name)?;
        let (reservation, inode) = self.reserve(InodeKind::Directory, mode)?;
        let ino = reservation.ino;

        if let Err(e) = self.link_directory(dir, name, ino, &inode) {
            self.rollback(reservation);
            return Err(e);
        }
        info!(
            "Created directory {:?} as inode {} in directory {}",
            name, ino, dir.ino
        );
        Ok(InodeHandle {
            ino,
            parent: dir.ino,
            inode,
        })
    }

    /// Reads `len` bytes at `offset`. Anything past the end of the file, or past
    /// the single data block, reads as zero.
    ///
    /// Size and data block come from the on-disk record, not from the handle.
    pub fn read(
        &mut self,
        file: &InodeHandle,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, SFSError> {
        if file.is_dir() {
            return Err(SFSError::IsADirectory(file.ino));
        }
        let inode = self.current(file)?;
        let mut out = vec![0; len];
        let end_of_data = u64::from(inode.size).min(BLOCK_SIZE as u64);
        if len == 0 || offset >= end_of_data || inode.block == 0 {
            return Ok(out);
        }
        self.check_data_block(file.ino, &inode)?;

        let block = io::read(&mut self.dev, inode.block)?;
        let start = offset as usize;
        let end = offset.saturating_add(len as u64).min(end_of_data) as usize;
        out[..end - start].copy_from_slice(&block[start..end]);
        Ok(out)
    }

    /// Writes `data` at `offset` with a synchronous read-modify-write of the data
    /// block, then records the new size. Writes must fit inside the single block.
    ///
    /// The record is reloaded first, so an outdated handle never shrinks the file.
    /// On success the handle is refreshed with the record that was written.
    pub fn write(
        &mut self,
        file: &mut InodeHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<usize, SFSError> {
        if file.is_dir() {
            return Err(SFSError::IsADirectory(file.ino));
        }
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= BLOCK_SIZE as u64)
            .ok_or_else(|| {
                SFSError::InvalidArgument(format!(
                    "{} bytes at offset {} do not fit in one {} byte block",
                    data.len(),
                    offset,
                    BLOCK_SIZE
                ))
            })? as usize;
        if data.is_empty() {
            return Ok(0);
        }

        let mut inode = self.current(file)?;
        let fresh_block = if inode.block == 0 {
            let block = alloc::alloc_block(&mut self.dev, &mut self.super_block)?;
            inode.block = block;
            true
        } else {
            self.check_data_block(file.ino, &inode)?;
            false
        };

        let start = offset as usize;
        let written = self.write_data(file.ino, &mut inode, start, end, data, fresh_block);
        if let Err(e) = written {
            if fresh_block {
                let block = inode.block;
                if let Err(undo) = alloc::free_block(&mut self.dev, &mut self.super_block, block) {
                    error!(
                        "Could not release block {} after failed write: {}",
                        block, undo
                    );
                }
            }
            return Err(e);
        }

        debug!(
            "Wrote {} bytes at offset {} of inode {}",
            data.len(),
            offset,
            file.ino
        );
        file.inode = inode;
        Ok(data.len())
    }

    /// Reports totals and free counts. Counters are refreshed from disk first.
    pub fn statfs(&mut self) -> Result<StatFs, SFSError> {
        self.super_block.refresh_counters(&mut self.dev)?;
        let sb = &self.super_block;
        Ok(StatFs {
            magic: sb.sb_magic,
            block_size: BLOCK_SIZE as u32,
            blocks: sb.blocks_count,
            blocks_free: sb.free_blocks_count,
            blocks_available: sb.free_blocks_count,
            files: sb.inodes_count,
            files_free: sb.free_inodes_count,
            name_max: MAX_NAME_LEN as u32,
        })
    }

    /// Forces the superblock counters to disk.
    pub fn sync(&mut self) -> Result<(), SFSError> {
        self.super_block.persist(&mut self.dev)
    }

    /// Counts the bits set in both bitmaps.
    pub fn usage(&mut self) -> Result<Usage, SFSError> {
        Usage::read(&mut self.dev, &self.super_block)
    }

    fn check_room(&self, dir: &InodeHandle, name: &str) -> Result<(), SFSError> {
        if !dir.is_dir() {
            return Err(SFSError::NotADirectory(dir.ino));
        }
        dir::validate_name(name)?;
        if self.super_block.free_inodes_count == 0 {
            return Err(SFSError::OutOfInodes);
        }
        if self.super_block.free_blocks_count == 0 {
            return Err(SFSError::OutOfSpace);
        }
        Ok(())
    }

    /// The record behind a handle as it is on disk now.
    fn current(&mut self, handle: &InodeHandle) -> Result<Inode, SFSError> {
        node::read(&mut self.dev, &self.super_block, handle.ino)
    }

    fn check_data_block(&self, ino: u32, inode: &Inode) -> Result<(), SFSError> {
        if !self.super_block.is_data_block(inode.block) {
            return Err(SFSError::Corrupt(format!(
                "inode {} points at block {} outside the data region",
                ino, inode.block
            )));
        }
        Ok(())
    }

    /// Claims an inode number and then a data block, releasing the inode if the
    /// block cannot be had.
    fn reserve(&mut self, kind: InodeKind, mode: u32) -> Result<(Reservation, Inode), SFSError> {
        let (ino, mut inode) =
            node::allocate(&mut self.dev, &mut self.super_block, kind, mode, self.owner)?;
        let mut reservation = Reservation { ino, block: None };

        match alloc::alloc_block(&mut self.dev, &mut self.super_block) {
            Ok(block) => {
                reservation.block = Some(block);
                inode.block = block;
                Ok((reservation, inode))
            }
            Err(e) => {
                self.rollback(reservation);
                Err(e)
            }
        }
    }

    /// Releases claims in reverse order: block first, then inode. Failures are
    /// logged, the caller reports the error that triggered the rollback.
    fn rollback(&mut self, reservation: Reservation) {
        if let Some(block) = reservation.block {
            if let Err(e) = alloc::free_block(&mut self.dev, &mut self.super_block, block) {
                error!(
                    "Could not release block {} during rollback: {}",
                    block, e
                );
            }
        }
        if let Err(e) = alloc::free_inode(&mut self.dev, &mut self.super_block, reservation.ino) {
            error!(
                "Could not release inode {} during rollback: {}",
                reservation.ino, e
            );
        }
    }

    fn link_file(
        &mut self,
        dir: &InodeHandle,
        name: &str,
        ino: u32,
        inode: &Inode,
    ) -> Result<(), SFSError> {
        dir::load(&mut self.dev, &self.super_block, dir.ino, &dir.inode)?
            .check_insert(name.as_bytes())?;
        dir::insert(&mut self.dev, &self.super_block, dir.ino, &dir.inode, name, ino)?;

        if let Err(e) = self.write_file_record(ino, inode) {
            match dir::remove_last(&mut self.dev, &self.super_block, dir.ino, &dir.inode, ino) {
                Ok(true) => {}
                Ok(false) => error!(
                    "Entry {:?} vanished from directory {} during rollback",
                    name, dir.ino
                ),
                Err(undo) => error!(
                    "Could not unlink {:?} from directory {}: {}",
                    name, dir.ino, undo
                ),
            }
            return Err(e);
        }
        Ok(())
    }

    fn write_file_record(&mut self, ino: u32, inode: &Inode) -> Result<(), SFSError> {
        node::write(&mut self.dev, &self.super_block, ino, inode)?;
        io::write_sync(&mut self.dev, inode.block, &[0; BLOCK_SIZE])
    }

    fn link_directory(
        &mut self,
        dir: &InodeHandle,
        name: &str,
        ino: u32,
        inode: &Inode,
    ) -> Result<(), SFSError> {
        dir::load(&mut self.dev, &self.super_block, dir.ino, &dir.inode)?
            .check_insert(name.as_bytes())?;

        node::write(&mut self.dev, &self.super_block, ino, inode)?;
        let mut block = [0; BLOCK_SIZE];
        dir::DirBlock::empty().serialize_into(&mut block);
        io::write_sync(&mut self.dev, inode.block, &block)?;

        dir::insert(&mut self.dev, &self.super_block, dir.ino, &dir.inode, name, ino)
    }

    fn write_data(
        &mut self,
        ino: u32,
        inode: &mut Inode,
        start: usize,
        end: usize,
        data: &[u8],
        fresh_block: bool,
    ) -> Result<(), SFSError> {
        let mut block = if fresh_block {
            [0; BLOCK_SIZE]
        } else {
            io::read(&mut self.dev, inode.block)?
        };
        block[start..end].copy_from_slice(data);
        io::write_sync(&mut self.dev, inode.block, &block)?;

        inode.size = inode.size.max(end as u32);
        node::write(&mut self.dev, &self.super_block, ino, inode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};
    use crate::layout::{S_IFDIR, S_IFREG};
    use crate::test_support::FlakyDevice;

    fn create_test_fs(blocks: usize) -> SFS<FileBlockEmulator> {
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(blocks)
            .build()
            .expect("Could not initialize disk emulator.");
        SFS::format(dev, &FormatOptions::default()).unwrap()
    }

    fn flaky_fs(blocks: usize) -> SFS<FlakyDevice<FileBlockEmulator>> {
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(blocks)
            .build()
            .unwrap();
        SFS::format(FlakyDevice::new(dev), &FormatOptions::default()).unwrap()
    }

    fn assert_consistent<D: BlockStorage>(fs: &mut SFS<D>) {
        let usage = fs.usage().unwrap();
        assert!(usage.matches(fs.super_block()), "{:?} vs {:?}", usage, fs.super_block());
    }

    #[test]
    fn root_dir_resolves_to_root_handle() {
        let mut fs = create_test_fs(64);
        let root = fs.resolve("/").unwrap();
        assert_eq!(root.ino(), ROOT_INODE);
        assert_eq!(root.parent(), ROOT_INODE);
        assert!(root.is_dir());
    }

    #[test]
    fn file_not_found_returns_error() {
        let mut fs = create_test_fs(64);
        assert!(matches!(fs.resolve("/foo"), Err(SFSError::NotFound)));
        assert!(matches!(fs.resolve("foo"), Err(SFSError::InvalidArgument(_))));
    }

    #[test]
    fn resolves_nested_paths() {
        let mut fs = create_test_fs(64);
        let root = fs.root();
        let docs = fs.mkdir(&root, "docs", 0o755).unwrap();
        let note = fs.create(&docs, "note.txt", 0o644).unwrap();

        let found = fs.resolve("/docs/note.txt").unwrap();
        assert_eq!(found, note);
        assert_eq!(found.parent(), docs.ino());
        assert_eq!(fs.resolve("/docs/../docs/./note.txt").unwrap().ino(), note.ino());
        assert!(matches!(
            fs.resolve("/docs/note.txt/more"),
            Err(SFSError::NotADirectory(_))
        ));
    }

    #[test]
    fn new_directory_is_linked_and_empty() {
        let mut fs = create_test_fs(64);
        let root = fs.root();
        let sub = fs.mkdir(&root, "sub", 0o700).unwrap();

        assert_eq!(sub.inode().mode, S_IFDIR | 0o700);
        assert_eq!(sub.inode().links_count, 2);
        assert_eq!(sub.size(), BLOCK_SIZE as u32);

        let mut names = Vec::new();
        fs.readdir(&sub, 0, |name, ino| {
            names.push((name.to_string(), ino));
            true
        })
        .unwrap();
        assert_eq!(
            names,
            vec![(".".to_string(), sub.ino()), ("..".to_string(), ROOT_INODE)]
        );
        assert_consistent(&mut fs);
    }

    #[test]
    fn readdir_resumes_where_consumer_stopped() {
        let mut fs = create_test_fs(64);
        let root = fs.root();
        for name in &["a", "b", "c"] {
            fs.create(&root, name, 0o644).unwrap();
        }

        let mut seen = Vec::new();
        let next = fs
            .readdir(&root, 0, |name, _| {
                seen.push(name.to_string());
                seen.len() < 3
            })
            .unwrap();
        assert_eq!(seen, vec![".", "..", "a"]);
        assert_eq!(next, 2);

        let mut rest = Vec::new();
        let end = fs
            .readdir(&root, 3, |name, _| {
                rest.push(name.to_string());
                true
            })
            .unwrap();
        assert_eq!(rest, vec!["b", "c"]);
        assert_eq!(end, 5);
    }

    #[test]
    fn outdated_handle_does_not_shrink_file() {
        let mut fs = create_test_fs(64);
        let root = fs.root();
        fs.create(&root, "f", 0o644).unwrap();
        let mut first = fs.lookup(&root, "f").unwrap();
        let mut second = fs.lookup(&root, "f").unwrap();
        let early = fs.lookup(&root, "f").unwrap();

        fs.write(&mut first, 0, &[b'A'; 100]).unwrap();
        fs.write(&mut second, 0, b"bb").unwrap();
        assert_eq!(second.size(), 100);

        let on_disk = fs.lookup(&root, "f").unwrap();
        assert_eq!(on_disk.size(), 100);
        let data = fs.read(&first, 0, 100).unwrap();
        assert_eq!(&data[..2], b"bb");
        assert!(data[2..].iter().all(|&b| b == b'A'));

        // A handle taken before any write still reads the current data.
        assert_eq!(early.size(), 0);
        assert_eq!(fs.read(&early, 0, 4).unwrap(), b"bbAA");
    }

    #[test]
    fn statfs_reports_counters_from_disk() {
        let mut fs = create_test_fs(64);
        let mut block = io::read(&mut fs.dev, crate::layout::SUPERBLOCK_BLOCK).unwrap();
        let mut on_disk = SuperBlock::parse(&block).unwrap();
        on_disk.free_blocks_count -= 3;
        on_disk.free_inodes_count -= 2;
        on_disk.serialize_into(&mut block);
        io::write_sync(&mut fs.dev, crate::layout::SUPERBLOCK_BLOCK, &block).unwrap();
        assert_ne!(fs.super_block(), &on_disk);

        let stat = fs.statfs().unwrap();
        assert_eq!(stat.blocks_free, on_disk.free_blocks_count);
        assert_eq!(stat.files_free, on_disk.free_inodes_count);
        assert_eq!(fs.super_block(), &on_disk);
    }

    #[test]
    fn lazily_assigns_block_to_files_without_one() {
        let mut fs = create_test_fs(64);
        let root = fs.root();
        let file = fs.create(&root, "f", 0o644).unwrap();

        // A record written by another tool, with no data block yet.
        let mut bare = *file.inode();
        alloc::free_block(&mut fs.dev, &mut fs.super_block, bare.block).unwrap();
        bare.block = 0;
        node::write(&mut fs.dev, &fs.super_block, file.ino(), &bare).unwrap();

        let mut handle = fs.resolve("/f").unwrap();
        assert_eq!(handle.inode().block, 0);
        assert_eq!(fs.write(&mut handle, 0, b"data").unwrap(), 4);
        assert_ne!(handle.inode().block, 0);
        assert_eq!(fs.read(&handle, 0, 4).unwrap(), b"data");
        assert_consistent(&mut fs);
    }

    #[test]
    fn failed_record_write_unlinks_and_releases() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut fs = flaky_fs(64);
        let root = fs.root();
        let before = fs.super_block().clone();

        fs.dev.fail_writes_to(Some(crate::layout::INODE_TABLE_BLOCK));
        assert!(matches!(fs.create(&root, "a.txt", 0o644), Err(SFSError::Io(_))));
        fs.dev.fail_writes_to(None);

        assert_eq!(fs.super_block(), &before);
        assert!(matches!(fs.lookup(&root, "a.txt"), Err(SFSError::NotFound)));
        assert_consistent(&mut fs);

        let file = fs.create(&root, "a.txt", 0o644).unwrap();
        assert_eq!(file.ino(), 2);
        assert_eq!(file.inode().mode, S_IFREG | 0o644);
    }

    #[test]
    fn failed_child_block_write_leaves_parent_untouched() {
        let mut fs = flaky_fs(64);
        let root = fs.root();
        let before = fs.super_block().clone();

        // mkdir claims block 5 for the child directory.
        fs.dev.fail_writes_to(Some(5));
        assert!(matches!(fs.mkdir(&root, "d", 0o755), Err(SFSError::Io(_))));
        fs.dev.fail_writes_to(None);

        assert_eq!(fs.super_block(), &before);
        assert!(matches!(fs.lookup(&root, "d"), Err(SFSError::NotFound)));
        assert_consistent(&mut fs);
    }

    #[test]
    fn failed_parent_link_releases_child() {
        let mut fs = flaky_fs(64);
        let root = fs.root();
        let before = fs.super_block().clone();

        fs.dev.fail_writes_to(Some(root.inode().block));
        assert!(matches!(fs.mkdir(&root, "d", 0o755), Err(SFSError::Io(_))));
        fs.dev.fail_writes_to(None);

        assert_eq!(fs.super_block(), &before);
        assert_consistent(&mut fs);
    }

    #[test]
    fn failed_write_releases_freshly_claimed_block() {
        let mut fs = flaky_fs(64);
        let root = fs.root();
        let file = fs.create(&root, "f", 0o644).unwrap();
        let mut bare = *file.inode();
        alloc::free_block(&mut fs.dev, &mut fs.super_block, bare.block).unwrap();
        bare.block = 0;
        node::write(&mut fs.dev, &fs.super_block, file.ino(), &bare).unwrap();
        let mut handle = fs.resolve("/f").unwrap();
        let before = fs.super_block().clone();

        fs.dev.fail_writes_to(Some(crate::layout::INODE_TABLE_BLOCK));
        assert!(fs.write(&mut handle, 0, b"data").is_err());
        fs.dev.fail_writes_to(None);

        assert_eq!(handle.inode().block, 0);
        assert_eq!(fs.super_block(), &before);
        assert_consistent(&mut fs);
    }
}
