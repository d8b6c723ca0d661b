use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, PartialEq)]
#[command(author, version, about, long_about = None)]
pub enum SfsCli {
    /// create a new file system image
    Mkfs(MkfsArgs),
    /// print superblock totals and free counts
    Stat(ImageArgs),
    /// list a directory
    Ls(PathArgs),
    /// print the contents of a file
    Cat(PathArgs),
    /// create an empty file
    Touch(CreateArgs),
    /// create an empty directory
    Mkdir(CreateArgs),
    /// write bytes into a file, creating it when missing
    Write(WriteArgs),
    /// compare bitmap usage against the superblock counters
    Check(ImageArgs),
}

/// make a new fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
pub struct MkfsArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: PathBuf,
    /// the number of 4 KiB blocks in the image
    #[clap(short, long, default_value_t = 64)]
    pub blocks: u32,
    /// the inode count of the file system, inode 0 included
    #[clap(short, long, default_value_t = 170)]
    pub inode_count: u32,
    /// permissions of the root directory, in octal
    #[clap(short, long, default_value = "755", value_parser = parse_mode)]
    pub mode: u32,
}

#[derive(clap::Args, Debug, PartialEq)]
pub struct ImageArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: PathBuf,
}

#[derive(clap::Args, Debug, PartialEq)]
pub struct PathArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: PathBuf,
    /// absolute path inside the file system
    #[clap(default_value = "/")]
    pub path: String,
}

#[derive(clap::Args, Debug, PartialEq)]
pub struct CreateArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: PathBuf,
    /// absolute path of the new object
    pub path: String,
    /// permissions of the new object, in octal
    #[clap(short, long, default_value = "644", value_parser = parse_mode)]
    pub mode: u32,
    #[clap(long, default_value_t = 0)]
    pub uid: u32,
    #[clap(long, default_value_t = 0)]
    pub gid: u32,
}

#[derive(clap::Args, Debug, PartialEq)]
pub struct WriteArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: PathBuf,
    /// absolute path of the file
    pub path: String,
    /// text to write
    pub data: String,
    /// byte offset to write at
    #[clap(short, long, default_value_t = 0)]
    pub offset: u64,
}

fn parse_mode(s: &str) -> Result<u32, String> {
    let mode = u32::from_str_radix(s, 8)
        .map_err(|e| format!("{:?} is not an octal mode: {}", s, e))?;
    if mode > 0o7777 {
        return Err(format!("mode {:o} has bits outside 7777", mode));
    }
    Ok(mode)
}

#[cfg(test)]
mod mkfs_parse_args_tests {
    use super::*;

    #[test]
    fn test_short_parameter_form() {
        let args = SfsCli::parse_from([
            "sfs", "mkfs", "-p", "disk.img", "-b", "128", "-i", "32",
        ]);
        assert_eq!(
            args,
            SfsCli::Mkfs(MkfsArgs {
                image_file_path: PathBuf::from("disk.img"),
                blocks: 128,
                inode_count: 32,
                mode: 0o755,
            })
        );
    }

    #[test]
    fn test_long_parameter_form() {
        let args = SfsCli::parse_from([
            "sfs",
            "mkfs",
            "--image-file-path",
            "disk.img",
            "--blocks",
            "16",
            "--mode",
            "700",
        ]);
        assert_eq!(
            args,
            SfsCli::Mkfs(MkfsArgs {
                image_file_path: PathBuf::from("disk.img"),
                blocks: 16,
                inode_count: 170,
                mode: 0o700,
            })
        );
    }

    #[test]
    fn test_rejects_non_octal_mode() {
        for mode in ["789", "17777"] {
            let parsed = SfsCli::try_parse_from(["sfs", "mkfs", "-p", "disk.img", "-m", mode]);
            assert!(parsed.is_err(), "accepted mode {}", mode);
        }
    }
}

#[cfg(test)]
mod namespace_parse_args_tests {
    use super::*;

    #[test]
    fn test_ls_defaults_to_root() {
        let args = SfsCli::parse_from(["sfs", "ls", "-p", "disk.img"]);
        assert_eq!(
            args,
            SfsCli::Ls(PathArgs {
                image_file_path: PathBuf::from("disk.img"),
                path: "/".to_string(),
            })
        );
    }

    #[test]
    fn test_touch_with_owner() {
        let args = SfsCli::parse_from([
            "sfs", "touch", "-p", "disk.img", "/a.txt", "--uid", "1000", "--gid", "100",
        ]);
        assert_eq!(
            args,
            SfsCli::Touch(CreateArgs {
                image_file_path: PathBuf::from("disk.img"),
                path: "/a.txt".to_string(),
                mode: 0o644,
                uid: 1000,
                gid: 100,
            })
        );
    }

    #[test]
    fn test_write_with_offset() {
        let args = SfsCli::parse_from([
            "sfs", "write", "-p", "disk.img", "/a.txt", "hello", "-o", "3",
        ]);
        assert_eq!(
            args,
            SfsCli::Write(WriteArgs {
                image_file_path: PathBuf::from("disk.img"),
                path: "/a.txt".to_string(),
                data: "hello".to_string(),
                offset: 3,
            })
        );
    }
}
