//! Slotted page layout (all integers are big-endian i32):
//!
//! ```text
//! +------------------+ 0
//! | Directory Size   |  (DIRECTORY_START_OFFSET bytes)
//! +------------------+ 4
//! | Directory        |  (grows toward the end of the page)
//! | [slot 0 offset]  |
//! | [slot 1 offset]  |
//! | ...              |
//! +------------------+
//! |                  |
//! | Free Space       |
//! |                  |
//! +------------------+ last record offset
//! | [record n-1]     |  (grows toward the start of the page)
//! | ...              |
//! | [record 0]       |
//! +------------------+ PAGE_SIZE
//! ```
//!
//! Record `i` occupies `[|offset i|, |offset i-1|)`, with `PAGE_SIZE` standing in
//! for the offset of slot -1. A negative offset marks a deleted record (tombstone);
//! its bytes stay in place and its slot is never reused.

use std::collections::BTreeMap;
use std::fmt;

use bytes::{Buf, BufMut};

use crate::common::{PageId, SlotId, DIRECTORY_ENTRY_SIZE, DIRECTORY_START_OFFSET, PAGE_SIZE};

/// Outcome of reading a record from a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetRecordResult {
    /// Live record payload
    Ok(Vec<u8>),
    /// The slot is a tombstone; carries the bytes still stored under it
    Deleted(Vec<u8>),
    /// The slot is outside the allocated directory
    OutOfRange,
}

impl GetRecordResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, GetRecordResult::Ok(_))
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, GetRecordResult::Deleted(_))
    }

    pub fn is_out_of_range(&self) -> bool {
        matches!(self, GetRecordResult::OutOfRange)
    }

    /// Returns the payload of a live record.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            GetRecordResult::Ok(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            GetRecordResult::Ok(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Outcome of putting a record into a page. Each variant carries the slot the
/// call addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutRecordResult {
    Ok(SlotId),
    OutOfSpace(SlotId),
    OutOfRange(SlotId),
}

impl PutRecordResult {
    pub fn slot(&self) -> SlotId {
        match self {
            PutRecordResult::Ok(slot)
            | PutRecordResult::OutOfSpace(slot)
            | PutRecordResult::OutOfRange(slot) => *slot,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, PutRecordResult::Ok(_))
    }

    pub fn is_out_of_space(&self) -> bool {
        matches!(self, PutRecordResult::OutOfSpace(_))
    }

    pub fn is_out_of_range(&self) -> bool {
        matches!(self, PutRecordResult::OutOfRange(_))
    }
}

/// Largest directory a page can hold; guards against garbage headers.
const MAX_DIRECTORY_SIZE: usize = (PAGE_SIZE - DIRECTORY_START_OFFSET) / DIRECTORY_ENTRY_SIZE;

/// SlottedPage interprets a PAGE_SIZE byte buffer as a slotted page.
/// Read operations need `AsRef<[u8]>`; mutations additionally need `AsMut<[u8]>`.
pub struct SlottedPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> SlottedPage<B> {
    /// Creates a new SlottedPage view over the given data buffer.
    /// The buffer must be exactly PAGE_SIZE bytes.
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    pub fn into_inner(self) -> B {
        self.data
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn read_i32(&self, offset: usize) -> i32 {
        (&self.bytes()[offset..offset + 4]).get_i32()
    }

    /// Returns the number of allocated slots, tombstones included.
    pub fn directory_size(&self) -> usize {
        (self.read_i32(0).max(0) as usize).min(MAX_DIRECTORY_SIZE)
    }

    fn entry(&self, slot: usize) -> i32 {
        self.read_i32(DIRECTORY_START_OFFSET + slot * DIRECTORY_ENTRY_SIZE)
    }

    fn entry_offset(&self, slot: usize) -> usize {
        (self.entry(slot).unsigned_abs() as usize).min(PAGE_SIZE)
    }

    /// Offset of the lowest record byte; PAGE_SIZE on an empty page.
    fn last_record_offset(&self) -> usize {
        match self.directory_size() {
            0 => PAGE_SIZE,
            n => self.entry_offset(n - 1),
        }
    }

    /// Bytes between the end of the directory and the last record.
    /// Appending a record also costs one directory entry out of this space.
    pub fn free_space(&self) -> usize {
        let directory_end = DIRECTORY_START_OFFSET + self.directory_size() * DIRECTORY_ENTRY_SIZE;
        self.last_record_offset().saturating_sub(directory_end)
    }

    /// Returns (start, end, deleted) for an allocated slot.
    fn record_bounds(&self, slot: usize) -> (usize, usize, bool) {
        let start = self.entry_offset(slot);
        let end = if slot == 0 {
            PAGE_SIZE
        } else {
            self.entry_offset(slot - 1)
        };
        (start, end.max(start), self.entry(slot) < 0)
    }

    /// Reads the record stored at `slot`.
    pub fn get_record(&self, slot: SlotId) -> GetRecordResult {
        let idx = slot.as_usize();
        if idx >= self.directory_size() {
            return GetRecordResult::OutOfRange;
        }
        let (start, end, deleted) = self.record_bounds(idx);
        let bytes = self.bytes()[start..end].to_vec();
        if deleted {
            GetRecordResult::Deleted(bytes)
        } else {
            GetRecordResult::Ok(bytes)
        }
    }

    /// Returns every allocated slot, tombstones included.
    pub fn all_records(&self) -> BTreeMap<SlotId, GetRecordResult> {
        (0..self.directory_size())
            .map(|idx| {
                let slot = SlotId::new(idx as u32);
                (slot, self.get_record(slot))
            })
            .collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> SlottedPage<B> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    fn write_i32(&mut self, offset: usize, value: i32) {
        (&mut self.bytes_mut()[offset..offset + 4]).put_i32(value);
    }

    fn set_directory_size(&mut self, size: usize) {
        self.write_i32(0, size as i32);
    }

    fn set_entry(&mut self, slot: usize, offset: i32) {
        self.write_i32(DIRECTORY_START_OFFSET + slot * DIRECTORY_ENTRY_SIZE, offset);
    }

    /// Appends a record in a new slot at the end of the directory.
    pub fn append_record(&mut self, data: &[u8]) -> PutRecordResult {
        let slot = SlotId::new(self.directory_size() as u32);
        self.put_record(data, slot)
    }

    /// Puts a record at `slot`. A slot equal to the directory size appends; an
    /// existing slot is rewritten in place, shifting the records stored after it.
    /// Rewriting a tombstone makes it live again.
    pub fn put_record(&mut self, data: &[u8], slot: SlotId) -> PutRecordResult {
        let directory_size = self.directory_size();
        let idx = slot.as_usize();

        if idx > directory_size {
            return PutRecordResult::OutOfRange(slot);
        }

        if idx == directory_size {
            if directory_size == MAX_DIRECTORY_SIZE
                || data.len() + DIRECTORY_ENTRY_SIZE > self.free_space()
            {
                return PutRecordResult::OutOfSpace(slot);
            }
            let new_last = self.last_record_offset() - data.len();
            self.bytes_mut()[new_last..new_last + data.len()].copy_from_slice(data);
            self.set_entry(idx, new_last as i32);
            self.set_directory_size(directory_size + 1);
            return PutRecordResult::Ok(slot);
        }

        let (start, end, _) = self.record_bounds(idx);
        let delta = data.len() as isize - (end - start) as isize;
        if delta > 0 && self.free_space() < delta as usize {
            return PutRecordResult::OutOfSpace(slot);
        }

        self.shift_records(idx, delta);
        let new_start = end - data.len();
        self.bytes_mut()[new_start..end].copy_from_slice(data);
        self.set_entry(idx, new_start as i32);
        PutRecordResult::Ok(slot)
    }

    /// Moves the records of slots `slot..` by `delta` bytes toward the start of
    /// the page (away from it when `delta` is negative). Tombstones keep their sign.
    fn shift_records(&mut self, slot: usize, delta: isize) {
        if delta == 0 {
            return;
        }
        let last = self.last_record_offset();
        let start = self.entry_offset(slot);
        let new_last = (last as isize - delta) as usize;

        self.bytes_mut().copy_within(last..start, new_last);
        if delta < 0 {
            // Zero the bytes uncovered by the shrink
            self.bytes_mut()[last..new_last].fill(0);
        }

        for idx in slot..self.directory_size() {
            let offset = self.entry(idx);
            let magnitude = offset.unsigned_abs() as isize - delta;
            self.set_entry(idx, offset.signum() * magnitude as i32);
        }
    }

    /// Marks a record as deleted. No-op on tombstones and out-of-range slots.
    pub fn delete_record(&mut self, slot: SlotId) {
        let idx = slot.as_usize();
        if idx >= self.directory_size() {
            return;
        }
        let offset = self.entry(idx);
        if offset > 0 {
            self.set_entry(idx, -offset);
        }
    }

    /// Drops every record and resets the directory.
    pub fn clear(&mut self) {
        self.bytes_mut().fill(0);
    }
}

/// An owned page: an id plus PAGE_SIZE bytes in the slotted layout.
#[derive(Clone, PartialEq, Eq)]
pub struct DiskPage {
    id: PageId,
    data: Box<[u8; PAGE_SIZE]>,
}

impl DiskPage {
    /// Creates an empty page with the given id.
    pub fn new(id: PageId) -> Self {
        Self {
            id,
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// Creates a page from raw bytes. Shorter input is zero-filled, longer input
    /// is truncated to PAGE_SIZE.
    pub fn from_bytes(id: PageId, bytes: &[u8]) -> Self {
        let mut page = Self::new(id);
        let len = bytes.len().min(PAGE_SIZE);
        page.data[..len].copy_from_slice(&bytes[..len]);
        page
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    /// Returns a copy of this page under another id.
    pub fn with_id(&self, id: PageId) -> Self {
        Self {
            id,
            data: self.data.clone(),
        }
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.data[..]
    }

    pub(crate) fn raw_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    /// Overwrites this page's bytes with another page's bytes, keeping the id.
    pub(crate) fn copy_bytes_from(&mut self, other: &DiskPage) {
        self.data.copy_from_slice(&other.data[..]);
    }

    pub fn view(&self) -> SlottedPage<&[u8]> {
        SlottedPage::new(&self.data[..])
    }

    pub fn view_mut(&mut self) -> SlottedPage<&mut [u8]> {
        SlottedPage::new(&mut self.data[..])
    }

    pub fn free_space(&self) -> usize {
        self.view().free_space()
    }

    pub fn record_count(&self) -> usize {
        self.view().directory_size()
    }

    pub fn get_record(&self, slot: SlotId) -> GetRecordResult {
        self.view().get_record(slot)
    }

    pub fn all_records(&self) -> BTreeMap<SlotId, GetRecordResult> {
        self.view().all_records()
    }

    pub fn put_record(&mut self, data: &[u8], slot: SlotId) -> PutRecordResult {
        self.view_mut().put_record(data, slot)
    }

    pub fn append_record(&mut self, data: &[u8]) -> PutRecordResult {
        self.view_mut().append_record(data)
    }

    pub fn delete_record(&mut self, slot: SlotId) {
        self.view_mut().delete_record(slot)
    }

    pub fn clear(&mut self) {
        self.view_mut().clear()
    }
}

impl fmt::Debug for DiskPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskPage")
            .field("id", &self.id)
            .field("records", &self.record_count())
            .field("free_space", &self.free_space())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_page() {
        let page = DiskPage::new(PageId::new(1));
        assert_eq!(page.record_count(), 0);
        assert_eq!(page.free_space(), PAGE_SIZE - DIRECTORY_START_OFFSET);
        assert!(page.all_records().is_empty());
    }

    #[test]
    fn test_append_updates_header() {
        let mut page = DiskPage::new(PageId::new(1));
        assert!(page.append_record(b"hello").is_ok());

        let raw = page.raw_bytes();
        assert_eq!(&raw[0..4], &1i32.to_be_bytes());
        let offset = (PAGE_SIZE - 5) as i32;
        assert_eq!(&raw[4..8], &offset.to_be_bytes());
        assert_eq!(&raw[PAGE_SIZE - 5..], b"hello");
        assert_eq!(page.free_space(), PAGE_SIZE - 5 - 8);
    }

    #[test]
    fn test_delete_flips_sign() {
        let mut page = DiskPage::new(PageId::new(1));
        page.append_record(b"abc");
        page.delete_record(SlotId::new(0));

        let offset = -((PAGE_SIZE - 3) as i32);
        assert_eq!(&page.raw_bytes()[4..8], &offset.to_be_bytes());
        assert_eq!(
            page.get_record(SlotId::new(0)),
            GetRecordResult::Deleted(b"abc".to_vec())
        );

        // Deleting twice keeps the tombstone
        page.delete_record(SlotId::new(0));
        assert!(page.get_record(SlotId::new(0)).is_deleted());
        // Out of range delete is ignored
        page.delete_record(SlotId::new(7));
        assert_eq!(page.record_count(), 1);
    }

    #[test]
    fn test_update_revives_tombstone() {
        let mut page = DiskPage::new(PageId::new(1));
        page.append_record(b"old");
        page.delete_record(SlotId::new(0));
        assert!(page.put_record(b"new!", SlotId::new(0)).is_ok());
        assert_eq!(page.get_record(SlotId::new(0)).bytes(), Some(&b"new!"[..]));
    }

    #[test]
    fn test_from_bytes_restores_directory() {
        let mut page = DiskPage::new(PageId::new(3));
        page.append_record(b"first");
        page.append_record(b"second");

        let restored = DiskPage::from_bytes(PageId::new(3), page.raw_bytes());
        assert_eq!(restored.record_count(), 2);
        assert_eq!(restored.free_space(), page.free_space());
        assert_eq!(
            restored.get_record(SlotId::new(1)).bytes(),
            Some(&b"second"[..])
        );
    }

    #[test]
    fn test_clear() {
        let mut page = DiskPage::new(PageId::new(1));
        page.append_record(b"abc");
        page.clear();
        assert_eq!(page.record_count(), 0);
        assert!(page.get_record(SlotId::new(0)).is_out_of_range());
    }

    #[test]
    fn test_view_over_borrowed_buffer() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        {
            let mut view = SlottedPage::new(&mut buffer[..]);
            view.append_record(b"xyz");
        }
        let view = SlottedPage::new(&buffer[..]);
        assert_eq!(view.directory_size(), 1);
        assert_eq!(view.get_record(SlotId::new(0)).bytes(), Some(&b"xyz"[..]));
    }
}
