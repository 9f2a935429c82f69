use crate::common::{PageId, Result, StrataError, PAGE_SIZE};
use crate::storage::disk::Storage;

use super::record::{FrameHeader, WalRecord, FRAME_HEADER_SIZE};

/// Upper bound on a frame payload; anything larger is treated as damage.
const MAX_PAYLOAD: usize = 64 * PAGE_SIZE;

/// Iterates the frames of a log laid over consecutive pages of a storage,
/// starting at page 0. Iteration ends at the first zero kind byte.
///
/// A frame that fails its checksum while reaching into a zeroed page is the
/// unfinished tail of a crashed writer: it ends iteration like the end marker
/// and [`WalReader::is_torn`] reports it. Any other damaged frame yields one
/// error and ends iteration.
pub struct WalReader<'a> {
    storage: &'a dyn Storage,
    next_page: PageId,
    buffer: Vec<u8>,
    /// Stream offset of `buffer[0]`.
    buffer_start: usize,
    cursor: usize,
    done: bool,
    torn: bool,
}

impl<'a> WalReader<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self {
            storage,
            next_page: PageId::new(0),
            buffer: Vec::with_capacity(2 * PAGE_SIZE),
            buffer_start: 0,
            cursor: 0,
            done: false,
            torn: false,
        }
    }

    /// Stream offset just past the last frame returned.
    pub fn offset(&self) -> usize {
        self.buffer_start + self.cursor
    }

    /// Whether iteration stopped at a partially written frame.
    pub fn is_torn(&self) -> bool {
        self.torn
    }

    /// Number of log pages read so far.
    pub fn pages_read(&self) -> u32 {
        self.next_page.as_u32()
    }

    /// Makes sure `n` unread bytes are buffered.
    fn fill(&mut self, n: usize) -> Result<()> {
        while self.buffer.len() - self.cursor < n {
            let page = self.storage.read_page(self.next_page)?;
            self.buffer.extend_from_slice(page.raw_bytes());
            self.next_page = self.next_page.offset(1);
        }
        Ok(())
    }

    fn compact(&mut self) {
        if self.cursor >= PAGE_SIZE {
            self.buffer.drain(..self.cursor);
            self.buffer_start += self.cursor;
            self.cursor = 0;
        }
    }

    fn read_frame(&mut self) -> Result<Option<WalRecord>> {
        self.fill(FRAME_HEADER_SIZE)?;
        let header = match FrameHeader::decode(&self.buffer[self.cursor..])? {
            Some(header) => header,
            None => return Ok(None),
        };
        if header.payload_len as usize > MAX_PAYLOAD {
            return Err(StrataError::WalCorrupted(format!(
                "frame at offset {} announces {} payload bytes",
                self.offset(),
                header.payload_len
            )));
        }
        self.fill(header.frame_len())?;
        let start = self.cursor + FRAME_HEADER_SIZE;
        let end = self.cursor + header.frame_len();
        let record = match WalRecord::from_frame(&header, &self.buffer[start..end]) {
            Ok(record) => record,
            Err(e) if self.reaches_zeroed_page(header.frame_len()) => {
                log::warn!("WAL ends in a torn frame at offset {}: {}", self.offset(), e);
                self.torn = true;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        self.cursor = end;
        self.compact();
        Ok(Some(record))
    }

    /// Whether a page starting inside the frame at the cursor is all zeros.
    /// Pages are written whole, so a frame cut short by a crash always crosses
    /// into a page that was never written.
    fn reaches_zeroed_page(&self, frame_len: usize) -> bool {
        let start = self.offset();
        let end = start + frame_len;
        let mut boundary = (start / PAGE_SIZE + 1) * PAGE_SIZE;
        while boundary < end {
            let from = boundary - self.buffer_start;
            let to = (from + PAGE_SIZE).min(self.buffer.len());
            if self.buffer[from..to].iter().all(|&byte| byte == 0) {
                return true;
            }
            boundary += PAGE_SIZE;
        }
        false
    }
}

impl Iterator for WalReader<'_> {
    type Item = Result<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_frame() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
