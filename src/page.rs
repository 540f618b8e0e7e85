//!
//! Slotted 4 KiB page. Record data grows forward from byte 4, the slot
//! directory grows backward from the end, one 16-bit offset per record.
//!
//! Layout: bytes 0-1 record count N, bytes 2-3 directory start, bytes
//! 4..D record data, bytes D..4096 directory entries. Invariant:
//! `4 + sum(record sizes) + 2*N <= 4096`.

use crate::err::{Error, Result};
use crate::util;

/// Every page is exactly this many bytes.
pub const PAGE_SIZE: usize = 4096;

/// Count plus directory-start offset.
pub const PAGE_HEADER: usize = 4;

/// One data page, held deserialized. Insertion into a partially full
/// page re-packs the whole page; O(N) per insert is acceptable at 4 KiB.
#[derive(Debug, Clone)]
pub struct Page {
    /// Block id within the heap file ( block 0 is at byte offset 4096 ).
    pub block: u64,
    /// Fixed record size from the table schema.
    pub record_size: usize,
    /// Record payloads in slot order.
    pub records: Vec<Vec<u8>>,
}

impl Page {
    /// A fresh empty page.
    pub fn new(block: u64, record_size: usize) -> Page {
        Page {
            block,
            record_size,
            records: Vec::new(),
        }
    }

    /// Unused bytes: `4096 - 4 - N * (record_size + 2)`.
    pub fn free_space(&self) -> usize {
        PAGE_SIZE
            .saturating_sub(PAGE_HEADER)
            .saturating_sub(self.records.len() * (self.record_size + 2))
    }

    /// Does one more record ( data + directory entry ) fit?
    pub fn has_room(&self) -> bool {
        self.free_space() >= self.record_size + 2
    }

    /// Append a record to the page.
    pub fn insert(&mut self, record: Vec<u8>) -> Result<()> {
        if record.len() != self.record_size {
            return Err(Error::SchemaMismatch(format!(
                "record is {} bytes, page expects {}",
                record.len(),
                self.record_size
            )));
        }
        if !self.has_room() {
            return Err(Error::PageCorrupt(format!(
                "record of {} bytes exceeds {} free bytes in block {}",
                self.record_size + 2,
                self.free_space(),
                self.block
            )));
        }
        self.records.push(record);
        Ok(())
    }

    /// Serialize: count, records forward from byte 4, directory pointers
    /// backward from byte 4096, directory start into bytes 2-3.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; PAGE_SIZE];
        util::setu16(&mut data, 0, self.records.len() as u16);
        let mut fwd = PAGE_HEADER;
        let mut back = PAGE_SIZE;
        for rec in &self.records {
            data[fwd..fwd + rec.len()].copy_from_slice(rec);
            back -= 2;
            util::setu16(&mut data, back, fwd as u16);
            fwd += rec.len();
        }
        util::setu16(&mut data, 2, back as u16);
        data
    }

    /// Deserialize and validate a page image.
    pub fn from_bytes(block: u64, data: &[u8], record_size: usize) -> Result<Page> {
        if data.len() != PAGE_SIZE {
            return Err(Error::PageCorrupt(format!(
                "block {} is {} bytes",
                block,
                data.len()
            )));
        }
        let n = util::getu16(data, 0) as usize;
        let dir_start = util::getu16(data, 2) as usize;
        if PAGE_HEADER + n * (record_size + 2) > PAGE_SIZE {
            return Err(Error::PageCorrupt(format!(
                "block {} claims {} records of {} bytes",
                block, n, record_size
            )));
        }
        if dir_start != PAGE_SIZE - 2 * n {
            return Err(Error::PageCorrupt(format!(
                "block {} directory start {} does not match count {}",
                block, dir_start, n
            )));
        }
        let mut records = Vec::with_capacity(n);
        for i in 0..n {
            let off = util::getu16(data, PAGE_SIZE - 2 * (i + 1)) as usize;
            if off < PAGE_HEADER || off > PAGE_SIZE - record_size || off + record_size > dir_start {
                return Err(Error::PageCorrupt(format!(
                    "block {} slot {} points at {}",
                    block, i, off
                )));
            }
            records.push(data[off..off + record_size].to_vec());
        }
        Ok(Page {
            block,
            record_size,
            records,
        })
    }
}
