use simplefs::io::FileBlockEmulatorBuilder;
use simplefs::{FormatOptions, SFS};

pub fn main() -> Result<(), simplefs::SFSError> {
    env_logger::init();

    let tmp = tempfile::tempfile()?;
    let dev = FileBlockEmulatorBuilder::from(tmp)
        .with_block_count(64)
        .build()?;

    // Format a fresh image and drop a greeting in the root directory.
    let mut sfs = SFS::format(dev, &FormatOptions::default())?;
    let root = sfs.root();
    let mut hello = sfs.create(&root, "hello.txt", 0o644)?;
    sfs.write(&mut hello, 0, b"Hello, simplefs!\n")?;

    let contents = sfs.read(&hello, 0, hello.size() as usize)?;
    print!("{}", String::from_utf8_lossy(&contents));

    let stat = sfs.statfs()?;
    println!(
        "{} of {} blocks free, {} of {} inodes free",
        stat.blocks_free, stat.blocks, stat.files_free, stat.files
    );
    sfs.unmount()?;
    Ok(())
}
