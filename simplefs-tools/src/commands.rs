use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, bail, Context};
use log::info;
use simplefs::io::{FileBlockEmulator, FileBlockEmulatorBuilder};
use simplefs::{FormatOptions, InodeHandle, Owner, SFSError, SFS};

use crate::cli::{CreateArgs, ImageArgs, MkfsArgs, PathArgs, WriteArgs};

type Fs = SFS<FileBlockEmulator>;

fn mount(image: &Path) -> anyhow::Result<Fs> {
    let dev = FileBlockEmulator::open_image(image)
        .with_context(|| format!("could not open image {}", image.display()))?;
    SFS::mount(dev).with_context(|| format!("could not mount {}", image.display()))
}

/// Splits `/a/b/c` into the parent directory handle for `/a/b` and the name `c`.
fn parent_of<'a>(fs: &mut Fs, path: &'a str) -> anyhow::Result<(InodeHandle, &'a str)> {
    let path_ref = Path::new(path);
    let name = path_ref
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("{:?} does not name a file", path))?;
    let parent = path_ref.parent().unwrap_or_else(|| Path::new("/"));
    let dir = fs
        .resolve(parent)
        .with_context(|| format!("could not resolve {}", parent.display()))?;
    Ok((dir, name))
}

fn hint(err: SFSError) -> anyhow::Error {
    if err.is_exhaustion() {
        anyhow!(err).context("the image is full, run `sfs mkfs` with more blocks or inodes")
    } else {
        anyhow!(err)
    }
}

pub fn mkfs(args: MkfsArgs, out: &mut impl Write) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&args.image_file_path)
        .with_context(|| format!("could not create {}", args.image_file_path.display()))?;
    let dev = FileBlockEmulatorBuilder::from(file)
        .with_block_count(args.blocks as usize)
        .build()?;
    let opts = FormatOptions::default()
        .with_inodes(args.inode_count)
        .with_root_mode(args.mode);

    let mut fs = SFS::format(dev, &opts)?;
    let stat = fs.statfs()?;
    fs.unmount()?;
    info!("Formatted {}", args.image_file_path.display());
    writeln!(
        out,
        "{}: {} blocks, {} inodes",
        args.image_file_path.display(),
        stat.blocks,
        stat.files
    )?;
    Ok(())
}

pub fn stat(args: ImageArgs, out: &mut impl Write) -> anyhow::Result<()> {
    let mut fs = mount(&args.image_file_path)?;
    let stat = fs.statfs()?;
    writeln!(out, "magic:        {:#x}", stat.magic)?;
    writeln!(out, "block size:   {}", stat.block_size)?;
    writeln!(out, "blocks:       {} ({} free)", stat.blocks, stat.blocks_free)?;
    writeln!(out, "inodes:       {} ({} free)", stat.files, stat.files_free)?;
    writeln!(out, "max name len: {}", stat.name_max)?;
    Ok(())
}

pub fn ls(args: PathArgs, out: &mut impl Write) -> anyhow::Result<()> {
    let mut fs = mount(&args.image_file_path)?;
    let dir = fs.resolve(&args.path)?;
    let mut listing = Vec::new();
    fs.readdir(&dir, 0, |name, ino| {
        listing.push((name.to_string(), ino));
        true
    })?;

    for (name, ino) in listing {
        if name == "." || name == ".." {
            writeln!(out, "{:>5} d {:>6} {}", ino, "-", name)?;
            continue;
        }
        let entry = fs.lookup(&dir, &name)?;
        let kind = if entry.is_dir() { 'd' } else { '-' };
        writeln!(
            out,
            "{:>5} {} {:>6} {:o} {}",
            ino,
            kind,
            entry.size(),
            entry.inode().permissions(),
            name
        )?;
    }
    Ok(())
}

pub fn cat(args: PathArgs, out: &mut impl Write) -> anyhow::Result<()> {
    let mut fs = mount(&args.image_file_path)?;
    let file = fs.resolve(&args.path)?;
    let contents = fs.read(&file, 0, file.size() as usize)?;
    out.write_all(&contents)?;
    Ok(())
}

pub fn touch(args: CreateArgs) -> anyhow::Result<()> {
    create(args, false)
}

pub fn mkdir(args: CreateArgs) -> anyhow::Result<()> {
    create(args, true)
}

fn create(args: CreateArgs, directory: bool) -> anyhow::Result<()> {
    let mut fs = mount(&args.image_file_path)?;
    fs.set_owner(Owner {
        uid: args.uid,
        gid: args.gid,
    });
    let (dir, name) = parent_of(&mut fs, &args.path)?;
    let made = if directory {
        fs.mkdir(&dir, name, args.mode)
    } else {
        fs.create(&dir, name, args.mode)
    };
    let handle = made
        .map_err(hint)
        .with_context(|| format!("could not create {}", args.path))?;
    info!("{} is inode {}", args.path, handle.ino());
    fs.unmount()?;
    Ok(())
}

pub fn write(args: WriteArgs) -> anyhow::Result<()> {
    let mut fs = mount(&args.image_file_path)?;
    let mut file = match fs.resolve(&args.path) {
        Ok(file) => file,
        Err(SFSError::NotFound) => {
            let (dir, name) = parent_of(&mut fs, &args.path)?;
            fs.create(&dir, name, 0o644).map_err(hint)?
        }
        Err(e) => return Err(e.into()),
    };
    fs.write(&mut file, args.offset, args.data.as_bytes())
        .map_err(hint)
        .with_context(|| format!("could not write {}", args.path))?;
    fs.unmount()?;
    Ok(())
}

pub fn check(args: ImageArgs, out: &mut impl Write) -> anyhow::Result<()> {
    let mut fs = mount(&args.image_file_path)?;
    let usage = fs.usage()?;
    let sb = fs.super_block();
    writeln!(
        out,
        "inodes: {} used + {} free of {}",
        usage.inodes_used, sb.free_inodes_count, sb.inodes_count
    )?;
    writeln!(
        out,
        "blocks: {} used + {} free of {}",
        usage.blocks_used, sb.free_blocks_count, sb.blocks_count
    )?;
    if !usage.matches(sb) {
        bail!("bitmaps and superblock counters disagree");
    }
    writeln!(out, "clean")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn image(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("disk.img");
        mkfs(
            MkfsArgs {
                image_file_path: path.clone(),
                blocks: 64,
                inode_count: 170,
                mode: 0o755,
            },
            &mut std::io::sink(),
        )
        .unwrap();
        path
    }

    fn output(run: impl FnOnce(&mut Vec<u8>) -> anyhow::Result<()>) -> String {
        let mut out = Vec::new();
        run(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn fresh_image_is_clean() {
        let dir = TempDir::new().unwrap();
        let path = image(&dir);

        let report = output(|out| {
            check(
                ImageArgs {
                    image_file_path: path.clone(),
                },
                out,
            )
        });
        assert!(report.contains("inodes: 2 used + 168 free of 170"));
        assert!(report.contains("blocks: 5 used + 59 free of 64"));
        assert!(report.ends_with("clean\n"));
    }

    #[test]
    fn files_written_through_the_tool_read_back() {
        let dir = TempDir::new().unwrap();
        let path = image(&dir);

        mkdir(CreateArgs {
            image_file_path: path.clone(),
            path: "/docs".to_string(),
            mode: 0o755,
            uid: 0,
            gid: 0,
        })
        .unwrap();
        write(WriteArgs {
            image_file_path: path.clone(),
            path: "/docs/hello.txt".to_string(),
            data: "hello\n".to_string(),
            offset: 0,
        })
        .unwrap();

        let contents = output(|out| {
            cat(
                PathArgs {
                    image_file_path: path.clone(),
                    path: "/docs/hello.txt".to_string(),
                },
                out,
            )
        });
        assert_eq!(contents, "hello\n");

        let listing = output(|out| {
            ls(
                PathArgs {
                    image_file_path: path.clone(),
                    path: "/docs".to_string(),
                },
                out,
            )
        });
        assert!(listing.lines().any(|line| line.ends_with(" hello.txt")));
        assert_eq!(listing.lines().count(), 3);
    }

    #[test]
    fn duplicate_touch_fails() {
        let dir = TempDir::new().unwrap();
        let path = image(&dir);
        let args = || CreateArgs {
            image_file_path: path.clone(),
            path: "/a".to_string(),
            mode: 0o644,
            uid: 0,
            gid: 0,
        };

        touch(args()).unwrap();
        let err = touch(args()).unwrap_err();
        assert!(matches!(
            err.root_cause().downcast_ref::<SFSError>(),
            Some(SFSError::Exists)
        ));
    }
}
