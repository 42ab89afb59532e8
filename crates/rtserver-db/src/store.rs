//! Offset-addressable granule storage.
//!
//! The store performs byte-exact, bounds-checked transfers of whole granules
//! between callers and a backing medium. There is no cache; the directory
//! keeps names only.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::directory::DirectoryEntry;
use crate::error::{DbError, Result};
use crate::record::{Granule, RecordAddr, GRANULE_SIZE};

/// Physical medium behind a [`RecordStore`].
pub trait Backing: Send + Sync + std::fmt::Debug {
    /// Total length in bytes.
    fn len_bytes(&self) -> std::io::Result<u64>;

    /// Read into `buf` starting at byte `pos`. Returns the number of bytes
    /// read, which is short only at end of medium.
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write all of `buf` starting at byte `pos`.
    fn write_at(&self, pos: u64, buf: &[u8]) -> std::io::Result<()>;
}

/// In-memory backing buffer.
#[derive(Debug, Default)]
pub struct MemBacking {
    data: RwLock<Vec<u8>>,
}

impl MemBacking {
    /// Wrap an existing byte buffer.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }
}

impl Backing for MemBacking {
    fn len_bytes(&self) -> std::io::Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn read_at(&self, pos: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        let data = self.data.read();
        let start = (pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, pos: u64, buf: &[u8]) -> std::io::Result<()> {
        let mut data = self.data.write();
        let end = pos as usize + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[pos as usize..end].copy_from_slice(buf);
        Ok(())
    }
}

/// File backing; positioned I/O is serialized through a mutex.
#[derive(Debug)]
pub struct FileBacking {
    file: Mutex<File>,
}

impl FileBacking {
    /// Open `path`, for writing too unless `read_only`.
    pub fn open(path: &Path, read_only: bool) -> std::io::Result<Self> {
        let file = OpenOptions::new().read(true).write(!read_only).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl Backing for FileBacking {
    fn len_bytes(&self) -> std::io::Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn read_at(&self, pos: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pos))?;
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn write_at(&self, pos: u64, buf: &[u8]) -> std::io::Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(buf)?;
        file.flush()
    }
}

/// Bounded granule-level access to a backing medium.
#[derive(Debug)]
pub struct RecordStore {
    backing: Box<dyn Backing>,
    read_only: bool,
}

impl RecordStore {
    /// Create a store over any backing medium.
    pub fn new(backing: Box<dyn Backing>, read_only: bool) -> Self {
        Self { backing, read_only }
    }

    /// Writable in-memory store.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::new(Box::new(MemBacking::new(data)), false)
    }

    /// Read-only in-memory store.
    pub fn from_bytes_read_only(data: Vec<u8>) -> Self {
        Self::new(Box::new(MemBacking::new(data)), true)
    }

    /// Open a database file.
    pub fn open(path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let backing = FileBacking::open(path.as_ref(), read_only)?;
        Ok(Self::new(Box::new(backing), read_only))
    }

    /// Whether puts are refused.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Number of whole granules in the medium.
    pub fn len_granules(&self) -> Result<u64> {
        Ok(self.backing.len_bytes()? / GRANULE_SIZE as u64)
    }

    /// Read the granule at an absolute address.
    ///
    /// Returns `Ok(None)` at a clean end of medium and a read error for a
    /// trailing partial granule.
    pub fn read_granule(&self, addr: RecordAddr) -> Result<Option<Granule>> {
        let mut g = Granule::zeroed();
        let got = self.backing.read_at(addr * GRANULE_SIZE as u64, &mut g.0)?;
        match got {
            0 => Ok(None),
            GRANULE_SIZE => Ok(Some(g)),
            got => Err(DbError::Read {
                addr,
                wanted: GRANULE_SIZE,
                got,
            }),
        }
    }

    fn check_bounds(entry: &DirectoryEntry, offset: usize, len: usize) -> Result<()> {
        let end = offset.checked_add(len).unwrap_or(usize::MAX);
        if end > entry.length as usize {
            warn!(
                name = %entry.name,
                offset,
                end,
                valid = entry.length,
                "record access out of bounds"
            );
            return Err(DbError::Bounds {
                name: entry.name.clone(),
                offset,
                end,
                valid: entry.length,
            });
        }
        Ok(())
    }

    /// Read `len` granules of a record starting `offset` granules into it.
    pub fn get(&self, entry: &DirectoryEntry, offset: usize, len: usize) -> Result<Vec<Granule>> {
        Self::check_bounds(entry, offset, len)?;
        let mut out = vec![Granule::zeroed(); len];
        self.get_into(entry, offset, &mut out)?;
        Ok(out)
    }

    /// Read into a caller buffer.
    ///
    /// On a short physical read the first granule's kind tag is zeroed
    /// before the error is returned, so tolerant callers see "undefined".
    pub fn get_into(&self, entry: &DirectoryEntry, offset: usize, out: &mut [Granule]) -> Result<()> {
        Self::check_bounds(entry, offset, out.len())?;
        if out.is_empty() {
            return Ok(());
        }
        let addr = entry.location + offset as u64;
        let mut bytes = vec![0u8; out.len() * GRANULE_SIZE];
        let got = self.backing.read_at(addr * GRANULE_SIZE as u64, &mut bytes)?;
        for (g, chunk) in out.iter_mut().zip(bytes.chunks_exact(GRANULE_SIZE)) {
            g.0.copy_from_slice(chunk);
        }
        if got != bytes.len() {
            out[0].set_tag(0);
            warn!(name = %entry.name, addr, wanted = bytes.len(), got, "short read");
            return Err(DbError::Read {
                addr,
                wanted: bytes.len(),
                got,
            });
        }
        Ok(())
    }

    /// Overwrite granules of a record starting `offset` granules into it.
    pub fn put(&self, entry: &DirectoryEntry, offset: usize, records: &[Granule]) -> Result<()> {
        if self.read_only {
            return Err(DbError::ReadOnly);
        }
        Self::check_bounds(entry, offset, records.len())?;
        let addr = entry.location + offset as u64;
        let bytes: Vec<u8> = records.iter().flat_map(|g| g.0).collect();
        self.backing
            .write_at(addr * GRANULE_SIZE as u64, &bytes)
            .map_err(|source| DbError::Write { addr, source })
    }
}
