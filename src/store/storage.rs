use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::core::{Error, Result};
use crate::store::block_file::{
    block_filename, block_temp_filename, decode_block, discover_blocks, encode_block,
    series_dir_name, BlockImage,
};

/// Durable home of flushed blocks.
pub trait BlockStorage: Send + Sync {
    /// Write one block durably. Must not leave a partially written block
    /// under its published name.
    fn write_block(&self, series: &str, index: u64, block: &BlockImage) -> Result<()>;

    /// Read and validate one block.
    fn read_block(&self, series: &str, index: u64) -> Result<BlockImage>;

    fn remove_block(&self, series: &str, index: u64) -> Result<()>;

    /// Delete every block of a series.
    fn remove_series(&self, series: &str) -> Result<()>;

    /// Sorted indices of the stored blocks of a series.
    fn list_blocks(&self, series: &str) -> Result<Vec<u64>>;
}

/// One file per block under `<root>/<series>/`.
#[derive(Debug, Clone)]
pub struct FsBlockStorage {
    root: PathBuf,
}

impl FsBlockStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn series_dir(&self, series: &str) -> PathBuf {
        self.root.join(series_dir_name(series))
    }

    pub fn block_path(&self, series: &str, index: u64) -> PathBuf {
        self.series_dir(series).join(block_filename(index))
    }
}

impl BlockStorage for FsBlockStorage {
    /// Write to `.blk.tmp`, fsync, then rename into place.
    fn write_block(&self, series: &str, index: u64, block: &BlockImage) -> Result<()> {
        let dir = self.series_dir(series);
        fs::create_dir_all(&dir)?;
        let temp_path = dir.join(block_temp_filename(index));
        let final_path = dir.join(block_filename(index));

        let image = encode_block(index, block);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&image)?;
        file.sync_all()?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(err.into());
        }
        Ok(())
    }

    fn read_block(&self, series: &str, index: u64) -> Result<BlockImage> {
        let file = File::open(self.block_path(series, index))?;
        if file.metadata()?.len() == 0 {
            return Err(Error::Corrupt("block file truncated"));
        }
        // Block files are only replaced by rename, never modified in place.
        let map = unsafe { Mmap::map(&file)? };
        decode_block(&map, index)
    }

    fn remove_block(&self, series: &str, index: u64) -> Result<()> {
        match fs::remove_file(self.block_path(series, index)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn remove_series(&self, series: &str) -> Result<()> {
        match fs::remove_dir_all(self.series_dir(series)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn list_blocks(&self, series: &str) -> Result<Vec<u64>> {
        discover_blocks(&self.series_dir(series))
    }
}
