use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use super::{AccessCostMeter, Storage};
use crate::common::{PageId, Result, PAGE_SIZE};
use crate::storage::page::DiskPage;

/// FileStorage keeps pages in a single file, page `i` at byte offset
/// `i * PAGE_SIZE`. Sequential runs are read and written with one I/O call.
pub struct FileStorage {
    /// The database file
    file: Mutex<File>,
    /// Path to the database file
    path: PathBuf,
    /// Number of pages currently allocated
    num_pages: AtomicU32,
    cost: AccessCostMeter,
}

impl FileStorage {
    /// Opens the storage file, creating it if it doesn't exist.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let num_pages = (file.metadata()?.len() / PAGE_SIZE as u64) as u32;
        log::debug!(
            "opened {} with {} pages",
            path.as_ref().display(),
            num_pages
        );

        Ok(Self {
            file: Mutex::new(file),
            path: path.as_ref().to_path_buf(),
            num_pages: AtomicU32::new(num_pages),
            cost: AccessCostMeter::new(),
        })
    }

    /// Returns the number of pages currently allocated.
    pub fn num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Acquire)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes any buffered writes to the device.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn byte_offset(page_id: PageId) -> u64 {
        page_id.as_u32() as u64 * PAGE_SIZE as u64
    }

    /// Fills `buf` from `offset`; bytes past the end of the file read as zeros.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    fn write_at(&self, start: PageId, buf: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::byte_offset(start)))?;
        file.write_all(buf)?;
        file.flush()?;

        let end = start.as_u32() + (buf.len() / PAGE_SIZE) as u32;
        self.num_pages.fetch_max(end, Ordering::AcqRel);
        Ok(())
    }
}

impl Storage for FileStorage {
    fn read_page(&self, page_id: PageId) -> Result<DiskPage> {
        let mut page = DiskPage::new(page_id);
        self.read_at(Self::byte_offset(page_id), page.raw_bytes_mut())?;
        self.cost.random_access();
        Ok(page)
    }

    fn read_page_sequence(
        &self,
        start: PageId,
        count: usize,
        reader: &mut dyn FnMut(DiskPage) -> Result<()>,
    ) -> Result<()> {
        let mut buf = vec![0u8; count * PAGE_SIZE];
        self.read_at(Self::byte_offset(start), &mut buf)?;
        self.cost.random_access();
        self.cost.sequential_scan(count);

        for (i, chunk) in buf.chunks_exact(PAGE_SIZE).enumerate() {
            reader(DiskPage::from_bytes(start.offset(i), chunk))?;
        }
        Ok(())
    }

    fn write_page(&self, page: &DiskPage) -> Result<()> {
        self.write_at(page.id(), page.raw_bytes())?;
        self.cost.random_access();
        Ok(())
    }

    fn write_page_sequence(
        &self,
        start: Option<PageId>,
        pages: &mut dyn Iterator<Item = DiskPage>,
    ) -> Result<Vec<PageId>> {
        let start = start.unwrap_or_else(|| PageId::new(self.num_pages()));
        let mut buf = Vec::new();
        for page in pages {
            buf.extend_from_slice(page.raw_bytes());
        }
        let count = buf.len() / PAGE_SIZE;

        if count > 0 {
            self.write_at(start, &buf)?;
        }
        self.cost.random_access();
        self.cost.sequential_scan(count);
        Ok((0..count).map(|i| start.offset(i)).collect())
    }

    fn create_page(&self) -> Result<DiskPage> {
        let page = DiskPage::new(PageId::new(self.num_pages.fetch_add(1, Ordering::AcqRel)));
        self.write_at(page.id(), page.raw_bytes())?;
        self.cost.random_access();
        Ok(page)
    }

    fn total_access_cost(&self) -> f64 {
        self.cost.total()
    }
}
