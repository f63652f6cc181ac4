use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::{Mmap, MmapMut};

use crate::common::oti::SYMBOL_ALIGNMENT;
use crate::tools::error::{FerryError, Result};

/// Round a byte length up to the symbol alignment.
pub fn padded_size(size: u64) -> u64 {
    num_integer::div_ceil(size, u64::from(SYMBOL_ALIGNMENT)) * u64::from(SYMBOL_ALIGNMENT)
}

///
/// Read-only memory-mapped view of the file to transfer.
///
/// The padded length is what the encoder is sized for; bytes past the end of
/// the mapping are zero padding and are materialized by the symbol writer,
/// never read from the map. The mapping is released when the value drops,
/// on every exit path.
///
#[derive(Debug)]
pub struct FileMap {
    map: Mmap,
    file_size: u64,
}

impl FileMap {
    /// Map `path` read-only.
    pub fn open(path: &Path) -> Result<FileMap> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size == 0 {
            return Err(FerryError::new(format!("{:?} is empty", path)));
        }
        log::info!("mapping {:?}, {} bytes", path, file_size);
        let map = unsafe { Mmap::map(&file)? };
        Ok(FileMap { map, file_size })
    }

    /// The file bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    /// Length of the file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// File length rounded up to the symbol alignment.
    pub fn padded_size(&self) -> u64 {
        padded_size(self.file_size)
    }
}

///
/// Writable memory-mapped destination file.
///
/// Created pre-extended to the decoder's mapped size (a whole number of
/// symbols per block); [`FileMapMut::finalize`] flushes the mapping and
/// truncates the file back to its announced size, discarding the padding.
///
#[derive(Debug)]
pub struct FileMapMut {
    file: File,
    map: Option<MmapMut>,
    file_size: u64,
}

impl FileMapMut {
    /// Create `path` and map `mapped_size` writable bytes.
    pub fn create(path: &Path, mapped_size: u64, file_size: u64) -> Result<FileMapMut> {
        debug_assert!(file_size <= mapped_size);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(mapped_size)?;
        log::info!(
            "created {:?}, mapped {} bytes for {} bytes of content",
            path,
            mapped_size,
            file_size
        );
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(FileMapMut {
            file,
            map: Some(map),
            file_size,
        })
    }

    /// Mutable view of one decoded-block destination range.
    pub fn block_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        match self.map.as_mut() {
            Some(map) => &mut map[offset..offset + len],
            None => &mut [],
        }
    }

    /// Flush and unmap, then truncate the file to its announced size.
    pub fn finalize(mut self) -> Result<()> {
        if let Some(map) = self.map.take() {
            map.flush()?;
            drop(map);
        }
        self.file.set_len(self.file_size)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{padded_size, FileMap, FileMapMut};

    #[test]
    pub fn test_padded_size() {
        assert_eq!(padded_size(1), 4);
        assert_eq!(padded_size(4), 4);
        assert_eq!(padded_size(5), 8);
        assert_eq!(padded_size(1392), 1392);
    }

    #[test]
    pub fn test_filemap_read() {
        crate::tests::init();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.bin");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"hello").unwrap();
        drop(file);

        let map = FileMap::open(&path).unwrap();
        assert_eq!(map.file_size(), 5);
        assert_eq!(map.padded_size(), 8);
        assert_eq!(map.as_slice(), b"hello");
    }

    #[test]
    pub fn test_filemap_rejects_empty() {
        crate::tests::init();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::File::create(&path).unwrap();
        assert!(FileMap::open(&path).is_err());
    }

    #[test]
    pub fn test_filemap_mut_truncates() {
        crate::tests::init();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.bin");

        let mut out = FileMapMut::create(&path, 64, 10).unwrap();
        out.block_mut(0, 32).copy_from_slice(&[0xAA; 32]);
        out.block_mut(32, 32).copy_from_slice(&[0xBB; 32]);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 64);

        out.finalize().unwrap();
        let content = std::fs::read(&path).unwrap();
        assert_eq!(content, vec![0xAA; 10]);
    }
}
