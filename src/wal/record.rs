//! Binary framing of WAL records.
//!
//! ```text
//! +------+--------+-------------+--------+-----------------+
//! | kind | txn    | payload_len | crc32  | payload         |
//! | u8   | u64 BE | u32 BE      | u32 BE | payload_len B   |
//! +------+--------+-------------+--------+-----------------+
//! ```
//!
//! The checksum covers kind, txn, payload_len and the payload. A kind of zero
//! never starts a frame; it marks the end of the log.

use std::collections::BTreeSet;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::common::{PageId, Result, StrataError, TxnId, PAGE_SIZE};
use crate::storage::page::DiskPage;

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 1 + 8 + 4 + 4;

const PAGE_IMAGE_PAYLOAD: usize = 4 + PAGE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordKind {
    Started = 1,
    BeforeWrite = 2,
    AfterWrite = 3,
    Committed = 4,
    Aborted = 5,
}

impl RecordKind {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Started),
            2 => Ok(Self::BeforeWrite),
            3 => Ok(Self::AfterWrite),
            4 => Ok(Self::Committed),
            5 => Ok(Self::Aborted),
            _ => Err(StrataError::WalCorrupted(format!(
                "unknown record kind {}",
                value
            ))),
        }
    }
}

/// One entry of a transaction's log stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    Started { txn: TxnId },
    /// Page image captured before a write.
    BeforeWrite { txn: TxnId, image: DiskPage },
    /// Page image captured after a write.
    AfterWrite { txn: TxnId, image: DiskPage },
    Committed { txn: TxnId, pages: BTreeSet<PageId> },
    Aborted { txn: TxnId, pages: BTreeSet<PageId> },
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: u8,
    pub txn: TxnId,
    pub payload_len: u32,
    pub checksum: u32,
}

impl FrameHeader {
    /// Parses a header. Returns `None` for the end-of-log marker.
    pub fn decode(mut buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(StrataError::WalCorrupted(format!(
                "frame header needs {} bytes, got {}",
                FRAME_HEADER_SIZE,
                buf.len()
            )));
        }
        let kind = buf.get_u8();
        if kind == 0 {
            return Ok(None);
        }
        Ok(Some(Self {
            kind,
            txn: TxnId::new(buf.get_u64()),
            payload_len: buf.get_u32(),
            checksum: buf.get_u32(),
        }))
    }

    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload_len as usize
    }
}

fn checksum(kind: u8, txn: TxnId, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[kind]);
    hasher.update(&txn.as_u64().to_be_bytes());
    hasher.update(&(payload.len() as u32).to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

impl WalRecord {
    pub fn txn(&self) -> TxnId {
        match self {
            WalRecord::Started { txn }
            | WalRecord::BeforeWrite { txn, .. }
            | WalRecord::AfterWrite { txn, .. }
            | WalRecord::Committed { txn, .. }
            | WalRecord::Aborted { txn, .. } => *txn,
        }
    }

    /// Page a write record refers to.
    pub fn page_id(&self) -> Option<PageId> {
        match self {
            WalRecord::BeforeWrite { image, .. } | WalRecord::AfterWrite { image, .. } => {
                Some(image.id())
            }
            _ => None,
        }
    }

    fn kind(&self) -> RecordKind {
        match self {
            WalRecord::Started { .. } => RecordKind::Started,
            WalRecord::BeforeWrite { .. } => RecordKind::BeforeWrite,
            WalRecord::AfterWrite { .. } => RecordKind::AfterWrite,
            WalRecord::Committed { .. } => RecordKind::Committed,
            WalRecord::Aborted { .. } => RecordKind::Aborted,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            WalRecord::Started { .. } => 0,
            WalRecord::BeforeWrite { .. } | WalRecord::AfterWrite { .. } => PAGE_IMAGE_PAYLOAD,
            WalRecord::Committed { pages, .. } | WalRecord::Aborted { pages, .. } => {
                4 + 4 * pages.len()
            }
        }
    }

    /// Total size of the encoded frame.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload_len()
    }

    /// Encodes the record as a checksummed frame.
    pub fn encode(&self) -> Bytes {
        let mut payload = BytesMut::with_capacity(self.payload_len());
        match self {
            WalRecord::Started { .. } => {}
            WalRecord::BeforeWrite { image, .. } | WalRecord::AfterWrite { image, .. } => {
                payload.put_u32(image.id().as_u32());
                payload.put_slice(image.raw_bytes());
            }
            WalRecord::Committed { pages, .. } | WalRecord::Aborted { pages, .. } => {
                payload.put_u32(pages.len() as u32);
                for page_id in pages {
                    payload.put_u32(page_id.as_u32());
                }
            }
        }

        let kind = self.kind() as u8;
        let txn = self.txn();
        let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.put_u8(kind);
        frame.put_u64(txn.as_u64());
        frame.put_u32(payload.len() as u32);
        frame.put_u32(checksum(kind, txn, &payload));
        frame.put_slice(&payload);
        frame.freeze()
    }

    /// Rebuilds a record from a parsed header and its payload, verifying the
    /// checksum.
    pub fn from_frame(header: &FrameHeader, payload: &[u8]) -> Result<Self> {
        if payload.len() != header.payload_len as usize {
            return Err(StrataError::WalCorrupted(format!(
                "payload of {} bytes, header announces {}",
                payload.len(),
                header.payload_len
            )));
        }
        let actual = checksum(header.kind, header.txn, payload);
        if actual != header.checksum {
            return Err(StrataError::WalCorrupted(format!(
                "checksum mismatch for {}: stored {:#010x}, computed {:#010x}",
                header.txn, header.checksum, actual
            )));
        }

        let txn = header.txn;
        let mut buf = payload;
        let record = match RecordKind::from_u8(header.kind)? {
            RecordKind::Started => WalRecord::Started { txn },
            RecordKind::BeforeWrite => WalRecord::BeforeWrite {
                txn,
                image: decode_image(&mut buf)?,
            },
            RecordKind::AfterWrite => WalRecord::AfterWrite {
                txn,
                image: decode_image(&mut buf)?,
            },
            RecordKind::Committed => WalRecord::Committed {
                txn,
                pages: decode_pages(&mut buf)?,
            },
            RecordKind::Aborted => WalRecord::Aborted {
                txn,
                pages: decode_pages(&mut buf)?,
            },
        };
        if buf.has_remaining() {
            return Err(StrataError::WalCorrupted(format!(
                "{} trailing payload bytes",
                buf.remaining()
            )));
        }
        Ok(record)
    }

    /// Decodes the frame at the start of `bytes`. Returns the record and the
    /// number of bytes consumed, or `None` at the end-of-log marker.
    pub fn decode(bytes: &[u8]) -> Result<Option<(Self, usize)>> {
        let header = match FrameHeader::decode(bytes)? {
            Some(header) => header,
            None => return Ok(None),
        };
        let end = header.frame_len();
        if bytes.len() < end {
            return Err(StrataError::WalCorrupted(format!(
                "truncated frame: need {} bytes, got {}",
                end,
                bytes.len()
            )));
        }
        let record = Self::from_frame(&header, &bytes[FRAME_HEADER_SIZE..end])?;
        Ok(Some((record, end)))
    }
}

fn decode_image(buf: &mut &[u8]) -> Result<DiskPage> {
    if buf.remaining() < PAGE_IMAGE_PAYLOAD {
        return Err(StrataError::WalCorrupted("truncated page image".into()));
    }
    let page_id = PageId::new(buf.get_u32());
    let image = DiskPage::from_bytes(page_id, &(*buf)[..PAGE_SIZE]);
    buf.advance(PAGE_SIZE);
    Ok(image)
}

fn decode_pages(buf: &mut &[u8]) -> Result<BTreeSet<PageId>> {
    if buf.remaining() < 4 {
        return Err(StrataError::WalCorrupted("truncated page list".into()));
    }
    let count = buf.get_u32() as usize;
    if buf.remaining() < count * 4 {
        return Err(StrataError::WalCorrupted(format!(
            "page list of {} entries does not fit {} bytes",
            count,
            buf.remaining()
        )));
    }
    Ok((0..count).map(|_| PageId::new(buf.get_u32())).collect())
}

impl fmt::Display for WalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalRecord::Started { txn } => write!(f, "<START {}>", txn),
            WalRecord::BeforeWrite { txn, image } => {
                write!(f, "<BEFORE {}, {}>", txn, image.id().as_u32())
            }
            WalRecord::AfterWrite { txn, image } => {
                write!(f, "<AFTER {}, {}>", txn, image.id().as_u32())
            }
            WalRecord::Committed { txn, pages } => {
                write!(f, "<COMMIT {} (modified {} pages)>", txn, pages.len())
            }
            WalRecord::Aborted { txn, pages } => {
                write!(f, "<ABORT {} (modified {} pages)>", txn, pages.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with(id: u32, data: &[u8]) -> DiskPage {
        let mut page = DiskPage::new(PageId::new(id));
        page.append_record(data);
        page
    }

    #[test]
    fn test_page_image_frame() {
        let record = WalRecord::AfterWrite {
            txn: TxnId::new(7),
            image: page_with(10, b"hello"),
        };
        let bytes = record.encode();
        assert_eq!(bytes.len(), record.encoded_len());

        let (decoded, consumed) = WalRecord::decode(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, record);
        assert_eq!(decoded.page_id(), Some(PageId::new(10)));
    }

    #[test]
    fn test_commit_frame_keeps_page_set() {
        let pages: BTreeSet<PageId> = [3, 1, 2].into_iter().map(PageId::new).collect();
        let record = WalRecord::Committed {
            txn: TxnId::new(1),
            pages: pages.clone(),
        };
        let (decoded, _) = WalRecord::decode(&record.encode()).unwrap().unwrap();
        assert!(matches!(decoded, WalRecord::Committed { pages: p, .. } if p == pages));
    }

    #[test]
    fn test_zero_kind_is_end_of_log() {
        let zeroes = [0u8; FRAME_HEADER_SIZE];
        assert!(WalRecord::decode(&zeroes).unwrap().is_none());
    }

    #[test]
    fn test_flipped_byte_fails_checksum() {
        let record = WalRecord::BeforeWrite {
            txn: TxnId::new(2),
            image: page_with(4, b"payload"),
        };
        let mut bytes = record.encode().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            WalRecord::decode(&bytes),
            Err(StrataError::WalCorrupted(_))
        ));
    }

    #[test]
    fn test_truncated_frame() {
        let record = WalRecord::Started { txn: TxnId::new(1) };
        let bytes = record.encode();
        assert!(WalRecord::decode(&bytes[..FRAME_HEADER_SIZE - 1]).is_err());

        let image = WalRecord::AfterWrite {
            txn: TxnId::new(1),
            image: page_with(0, b"x"),
        }
        .encode();
        assert!(WalRecord::decode(&image[..100]).is_err());
    }

    #[test]
    fn test_display() {
        let pages: BTreeSet<PageId> = [PageId::new(10)].into_iter().collect();
        assert_eq!(
            WalRecord::Started { txn: TxnId::new(1) }.to_string(),
            "<START T1>"
        );
        assert_eq!(
            WalRecord::BeforeWrite {
                txn: TxnId::new(1),
                image: DiskPage::new(PageId::new(10))
            }
            .to_string(),
            "<BEFORE T1, 10>"
        );
        assert_eq!(
            WalRecord::Aborted {
                txn: TxnId::new(2),
                pages
            }
            .to_string(),
            "<ABORT T2 (modified 1 pages)>"
        );
    }
}
