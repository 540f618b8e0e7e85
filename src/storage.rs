//!
//! Heap file storage: one file per table, a 4096-byte header page ( magic,
//! version, schema ) followed by slotted data pages. Block ids are
//! page-indexed from zero, so block 0 lives at byte offset 4096.
//!
//! Mutations are serialized per table by the file handle's mutex; reads
//! go through the same handle one block at a time, which keeps scans lazy.

use crate::err::{Error, Result};
use crate::index::HashIndex;
use crate::page::{Page, PAGE_SIZE};
use crate::query::Condition;
use crate::record::{decode_row, encode_row, Column, Row, Schema};
use crate::util;
use crate::value::{DataType, Value};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// File magic, bytes 0-3 of the header page.
pub const MAGIC: &[u8; 4] = b"mDBM";

/// File format version, bytes 4-7.
pub const VERSION: u32 = 1;

const NAME_FIELD: usize = 32;

/// Per-table statistics, computed on demand from the file length and a
/// sample of at most [`STATS_SAMPLE`] blocks.
#[derive(Debug, Clone)]
pub struct TableStats {
    pub table: String,
    pub tuple_count: u64,
    pub block_count: u64,
    pub tuple_size: usize,
    /// Records per page.
    pub blocking_factor: usize,
    /// Estimated distinct values per column.
    pub distinct: FxHashMap<String, u64>,
    pub indexed: FxHashSet<String>,
}

impl TableStats {
    /// Estimated distinct count for a column ( at least 1 ).
    pub fn distinct_for(&self, column: &str) -> u64 {
        let col = column.rsplit('.').next().unwrap_or(column);
        self.distinct.get(col).copied().unwrap_or(1).max(1)
    }

    pub fn is_indexed(&self, column: &str) -> bool {
        let col = column.rsplit('.').next().unwrap_or(column);
        self.indexed.contains(col)
    }
}

/// Blocks sampled for statistics.
pub const STATS_SAMPLE: u64 = 5;

/// Encode a schema into a 4096-byte header page.
pub fn encode_header(schema: &Schema) -> Vec<u8> {
    let mut data = vec![0u8; PAGE_SIZE];
    data[0..4].copy_from_slice(MAGIC);
    util::setu32(&mut data, 4, VERSION);
    util::set_padded(&mut data, 8, &schema.table, NAME_FIELD);
    util::setu32(&mut data, 40, schema.columns.len() as u32);
    let mut off = 44;
    for c in &schema.columns {
        util::set_padded(&mut data, off, &c.name, NAME_FIELD);
        data[off + NAME_FIELD] = c.typ.code();
        util::setu32(&mut data, off + NAME_FIELD + 1, c.typ.size() as u32);
        off += NAME_FIELD + 5;
    }
    data
}

/// Decode a header page back into a schema.
pub fn decode_header(data: &[u8]) -> Result<Schema> {
    if data.len() < PAGE_SIZE || &data[0..4] != MAGIC {
        return Err(Error::PageCorrupt("bad table file magic".to_string()));
    }
    let version = util::getu32(data, 4);
    if version != VERSION {
        return Err(Error::PageCorrupt(format!(
            "unsupported table file version {}",
            version
        )));
    }
    let table = util::get_padded(data, 8, NAME_FIELD);
    let ncols = util::getu32(data, 40) as usize;
    let mut off = 44;
    if 44 + ncols * (NAME_FIELD + 5) > PAGE_SIZE {
        return Err(Error::PageCorrupt(format!(
            "header claims {} columns",
            ncols
        )));
    }
    let mut columns = Vec::with_capacity(ncols);
    for _ in 0..ncols {
        let name = util::get_padded(data, off, NAME_FIELD);
        let code = data[off + NAME_FIELD];
        let len = util::getu32(data, off + NAME_FIELD + 1) as usize;
        columns.push(Column::new(&name, DataType::from_code(code, len)?));
        off += NAME_FIELD + 5;
    }
    Ok(Schema::new(&table, columns))
}

/// What to do with one row during a page rewrite.
enum Edit {
    Keep,
    Replace(Row),
    Remove(Row),
}

/// One open table: schema, file handle, row-id allocator, indexes.
/// `write_lock` serializes whole mutations ( insert placement, rewrite,
/// compaction ) per table; the file mutex alone only protects single
/// page transfers.
pub struct TableFile {
    pub schema: Schema,
    file: Mutex<File>,
    write_lock: Mutex<()>,
    next_rid: AtomicU64,
    indexes: RwLock<FxHashMap<String, HashIndex>>,
}

impl TableFile {
    fn open(path: &Path) -> Result<Arc<TableFile>> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut header = vec![0u8; PAGE_SIZE];
        file.read_exact(&mut header)?;
        let schema = decode_header(&header)?;
        let tf = TableFile {
            schema,
            file: Mutex::new(file),
            write_lock: Mutex::new(()),
            next_rid: AtomicU64::new(1),
            indexes: RwLock::new(FxHashMap::default()),
        };
        tf.seed_rid_counter()?;
        Ok(Arc::new(tf))
    }

    /// Scan existing rows so fresh row ids start above every suffix
    /// already on disk.
    fn seed_rid_counter(&self) -> Result<()> {
        let mut max = 0u64;
        for b in 0..self.block_count()? {
            let page = self.read_block(b)?;
            for rec in &page.records {
                let row = decode_row(&self.schema, rec)?;
                if let Some((_, n)) = row.rid.rsplit_once('-') {
                    if let Ok(n) = n.parse::<u64>() {
                        max = max.max(n);
                    }
                }
            }
        }
        self.next_rid.store(max + 1, Ordering::SeqCst);
        Ok(())
    }

    fn fresh_rid(&self) -> String {
        format!(
            "{}-{}",
            self.schema.table,
            self.next_rid.fetch_add(1, Ordering::SeqCst)
        )
    }

    /// Number of data blocks, from the file length.
    pub fn block_count(&self) -> Result<u64> {
        let len = self.file.lock().metadata()?.len();
        Ok((len / PAGE_SIZE as u64).saturating_sub(1))
    }

    /// Byte offset of a data block.
    pub fn block_offset(block: u64) -> u64 {
        (block + 1) * PAGE_SIZE as u64
    }

    /// Read one data block.
    pub fn read_block(&self, block: u64) -> Result<Page> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::block_offset(block)))?;
        let mut data = vec![0u8; PAGE_SIZE];
        file.read_exact(&mut data)?;
        Page::from_bytes(block, &data, self.schema.record_size())
    }

    /// Write one data block back in place ( write-through ).
    pub fn write_block(&self, page: &Page) -> Result<()> {
        let data = page.to_bytes();
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::block_offset(page.block)))?;
        file.write_all(&data)?;
        file.flush()?;
        Ok(())
    }

    /// Refresh every installed index for one page from its current rows.
    fn refresh_indexes(&self, page: &Page) -> Result<()> {
        let mut ixs = self.indexes.write();
        if ixs.is_empty() {
            return Ok(());
        }
        let rows: Vec<Row> = page
            .records
            .iter()
            .map(|r| decode_row(&self.schema, r))
            .collect::<Result<_>>()?;
        let off = Self::block_offset(page.block);
        for (col, ix) in ixs.iter_mut() {
            let vals: Vec<Value> = rows.iter().filter_map(|r| r.get(col).cloned()).collect();
            ix.refresh_page(off, &vals);
        }
        Ok(())
    }

    /// Rebuild every installed index with a full scan. Needed after
    /// compaction moves pages around.
    fn rebuild_indexes(&self) -> Result<()> {
        let cols: Vec<String> = self.indexes.read().keys().cloned().collect();
        if cols.is_empty() {
            return Ok(());
        }
        let mut fresh: FxHashMap<String, HashIndex> =
            cols.iter().map(|c| (c.clone(), HashIndex::new())).collect();
        for b in 0..self.block_count()? {
            let page = self.read_block(b)?;
            let off = Self::block_offset(b);
            for rec in &page.records {
                let row = decode_row(&self.schema, rec)?;
                for c in &cols {
                    if let Some(v) = row.get(c) {
                        fresh.get_mut(c).unwrap().add(v, off);
                    }
                }
            }
        }
        *self.indexes.write() = fresh;
        Ok(())
    }

    /// First-fit insert of an encoded record; appends a new page when no
    /// existing page has room for `record_size + 2` bytes.
    fn place_record(&self, rec: Vec<u8>) -> Result<u64> {
        let _guard = self.write_lock.lock();
        self.place_record_locked(rec)
    }

    fn place_record_locked(&self, rec: Vec<u8>) -> Result<u64> {
        let mut target = None;
        for b in 0..self.block_count()? {
            let page = self.read_block(b)?;
            if page.has_room() {
                target = Some(page);
                break;
            }
        }
        let mut page = match target {
            Some(page) => page,
            None => Page::new(self.block_count()?, self.schema.record_size()),
        };
        page.insert(rec)?;
        self.write_block(&page)?;
        self.refresh_indexes(&page)?;
        Ok(page.block)
    }

    /// Walk every block, apply `edit` to each row, write changed pages
    /// back. Returns ( replaced pairs, removed rows ). Rows whose
    /// replacement no longer fits its page are deleted and re-inserted
    /// through the first-fit path.
    fn rewrite<F>(&self, mut edit: F) -> Result<(Vec<(Row, Row)>, Vec<Row>)>
    where
        F: FnMut(&Row) -> Result<Edit>,
    {
        let _guard = self.write_lock.lock();
        let mut replaced = Vec::new();
        let mut removed = Vec::new();
        let mut overflow = Vec::new();
        let mut any_removed = false;
        for b in 0..self.block_count()? {
            let page = self.read_block(b)?;
            let mut out = Page::new(b, page.record_size);
            let mut changed = false;
            for rec in &page.records {
                let row = decode_row(&self.schema, rec)?;
                match edit(&row)? {
                    Edit::Keep => out.records.push(rec.clone()),
                    Edit::Replace(new_row) => {
                        let new_rec = encode_row(&self.schema, &new_row)?;
                        changed = true;
                        if out.free_space() >= new_rec.len() + 2 {
                            out.records.push(new_rec);
                        } else {
                            // Post-update overflow: take the row out of
                            // this page and re-insert it elsewhere.
                            warn!(
                                "row {} no longer fits block {}, re-inserting",
                                new_row.rid, b
                            );
                            overflow.push(new_rec);
                        }
                        replaced.push((row, new_row));
                    }
                    Edit::Remove(before) => {
                        changed = true;
                        any_removed = true;
                        removed.push(before);
                    }
                }
            }
            if changed {
                self.write_block(&out)?;
                self.refresh_indexes(&out)?;
            }
        }
        for rec in overflow {
            self.place_record_locked(rec)?;
        }
        if any_removed {
            self.compact()?;
        }
        Ok((replaced, removed))
    }

    /// Drop fully empty pages, shifting later blocks down. Indexes are
    /// rebuilt because page offsets change.
    fn compact(&self) -> Result<()> {
        let blocks = self.block_count()?;
        let mut keep = Vec::new();
        let mut dropped = 0u64;
        for b in 0..blocks {
            let page = self.read_block(b)?;
            if page.records.is_empty() {
                dropped += 1;
            } else {
                keep.push(page);
            }
        }
        if dropped == 0 {
            return Ok(());
        }
        debug!(
            "compacting {}: dropping {} empty of {} blocks",
            self.schema.table, dropped, blocks
        );
        for (b, page) in keep.iter_mut().enumerate() {
            page.block = b as u64;
            self.write_block(page)?;
        }
        let new_len = Self::block_offset(keep.len() as u64);
        self.file.lock().set_len(new_len)?;
        self.rebuild_indexes()
    }
}

/// The storage engine: catalog of open tables under one data directory.
pub struct StorageEngine {
    dir: PathBuf,
    tables: RwLock<FxHashMap<String, Arc<TableFile>>>,
}

impl StorageEngine {
    /// Open ( creating the directory if needed ).
    pub fn new(dir: &Path) -> Result<StorageEngine> {
        std::fs::create_dir_all(dir)?;
        Ok(StorageEngine {
            dir: dir.to_path_buf(),
            tables: RwLock::new(FxHashMap::default()),
        })
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.tbl", name))
    }

    /// Create a table file: header page only, schema written once.
    pub fn create_table(&self, schema: &Schema) -> Result<()> {
        let path = self.table_path(&schema.table);
        if path.exists() {
            return Err(Error::Invariant(format!(
                "table {} already exists",
                schema.table
            )));
        }
        let mut file = File::create(&path)?;
        file.write_all(&encode_header(schema))?;
        file.flush()?;
        Ok(())
    }

    /// Open ( or fetch the already-open handle for ) a table.
    pub fn table(&self, name: &str) -> Result<Arc<TableFile>> {
        if let Some(t) = self.tables.read().get(name) {
            return Ok(t.clone());
        }
        let path = self.table_path(name);
        if !path.exists() {
            return Err(Error::TableNotFound(name.to_string()));
        }
        let tf = TableFile::open(&path)?;
        self.tables
            .write()
            .entry(name.to_string())
            .or_insert(tf.clone());
        Ok(tf)
    }

    /// Schema of a table.
    pub fn schema(&self, name: &str) -> Result<Schema> {
        Ok(self.table(name)?.schema.clone())
    }

    /// Lazy scan of matching rows. A single equality conjunct on an
    /// indexed column restricts the scan to the index's pages; anything
    /// else walks every block.
    pub fn read(&self, table: &str, conds: &[Condition]) -> Result<ScanIter> {
        let tf = self.table(table)?;
        let blocks = self.index_restriction(&tf, conds);
        Ok(ScanIter {
            table: tf,
            conds: conds.to_vec(),
            blocks,
            cursor: 0,
            pending: VecDeque::new(),
        })
    }

    /// Block restriction when the predicate is one equality over an
    /// indexed column.
    fn index_restriction(&self, tf: &TableFile, conds: &[Condition]) -> Option<Vec<u64>> {
        if conds.len() != 1 {
            return None;
        }
        let (col, op, val) = conds[0].as_column_literal()?;
        if op != crate::query::CmpOp::Eq {
            return None;
        }
        let col = col.rsplit('.').next().unwrap_or(col);
        let ixs = tf.indexes.read();
        let ix = ixs.get(col)?;
        let (_, c) = tf.schema.col(col)?;
        let probe = val.coerce(c.typ).ok()?;
        Some(
            ix.pages_for(&probe)
                .iter()
                .map(|off| off / PAGE_SIZE as u64 - 1)
                .collect(),
        )
    }

    /// Build the canonical row an insert would store: fresh row id,
    /// values coerced to the declared column types, absent columns
    /// defaulted. Splitting this from [`StorageEngine::insert_row`] lets
    /// the insert operator log the after-image before any mutation.
    pub fn build_row(&self, table: &str, values: &[(String, Value)]) -> Result<Row> {
        let tf = self.table(table)?;
        for (n, _) in values {
            if tf.schema.col(n).is_none() {
                return Err(Error::SchemaMismatch(format!(
                    "no column {} in {}",
                    n, table
                )));
            }
        }
        let mut row = Row::new(&tf.fresh_rid());
        for c in &tf.schema.columns {
            let val = match values.iter().find(|(n, _)| n == &c.name) {
                Some((_, v)) => v.coerce(c.typ)?,
                None => Value::default(c.typ),
            };
            row.set(&c.name, val);
        }
        Ok(row)
    }

    /// Store a fully built row ( first-fit placement ).
    pub fn insert_row(&self, table: &str, row: &Row) -> Result<()> {
        let tf = self.table(table)?;
        let rec = encode_row(&tf.schema, row)?;
        tf.place_record(rec)?;
        Ok(())
    }

    /// Insert one row built from ( column, value ) pairs. Returns the
    /// stored row with its fresh row id.
    pub fn insert(&self, table: &str, values: &[(String, Value)]) -> Result<Row> {
        let row = self.build_row(table, values)?;
        self.insert_row(table, &row)?;
        Ok(row)
    }

    /// Fetch one row by id.
    pub fn get_row(&self, table: &str, rid: &str) -> Result<Row> {
        let tf = self.table(table)?;
        for b in 0..tf.block_count()? {
            let page = tf.read_block(b)?;
            for rec in &page.records {
                let row = decode_row(&tf.schema, rec)?;
                if row.rid == rid {
                    return Ok(row);
                }
            }
        }
        Err(Error::Invariant(format!("row {} not found in {}", rid, table)))
    }

    /// Update every row matching the predicate with constant new values.
    /// Returns ( before, after ) pairs.
    pub fn update(
        &self,
        table: &str,
        conds: &[Condition],
        values: &[(String, Value)],
    ) -> Result<Vec<(Row, Row)>> {
        let tf = self.table(table)?;
        for (n, _) in values {
            tf.schema.col_required(n)?;
        }
        let (replaced, _) = tf.rewrite(|row| {
            if conds.iter().all(|c| c.matches(row)) {
                Ok(Edit::Replace(apply_values(&tf.schema, row, values)?))
            } else {
                Ok(Edit::Keep)
            }
        })?;
        Ok(replaced)
    }

    /// Update one row by id. Used by the update operator and recovery.
    pub fn update_row(
        &self,
        table: &str,
        rid: &str,
        values: &[(String, Value)],
    ) -> Result<(Row, Row)> {
        let tf = self.table(table)?;
        let (replaced, _) = tf.rewrite(|row| {
            if row.rid == rid {
                Ok(Edit::Replace(apply_values(&tf.schema, row, values)?))
            } else {
                Ok(Edit::Keep)
            }
        })?;
        replaced
            .into_iter()
            .next()
            .ok_or_else(|| Error::Invariant(format!("row {} not found in {}", rid, table)))
    }

    /// Delete matching rows; fully empty pages are dropped. Returns the
    /// removed rows.
    pub fn delete(&self, table: &str, conds: &[Condition]) -> Result<Vec<Row>> {
        let tf = self.table(table)?;
        let (_, removed) = tf.rewrite(|row| {
            if conds.iter().all(|c| c.matches(row)) {
                Ok(Edit::Remove(row.clone()))
            } else {
                Ok(Edit::Keep)
            }
        })?;
        Ok(removed)
    }

    /// Delete one row by id.
    pub fn delete_row(&self, table: &str, rid: &str) -> Result<Row> {
        let tf = self.table(table)?;
        let (_, removed) = tf.rewrite(|row| {
            if row.rid == rid {
                Ok(Edit::Remove(row.clone()))
            } else {
                Ok(Edit::Keep)
            }
        })?;
        removed
            .into_iter()
            .next()
            .ok_or_else(|| Error::Invariant(format!("row {} not found in {}", rid, table)))
    }

    /// Recovery write: replace the row with this id, or insert it if it
    /// is gone. Idempotent under repeated application.
    pub fn upsert_row(&self, table: &str, row: &Row) -> Result<()> {
        let tf = self.table(table)?;
        let mut canonical = Row::new(&row.rid);
        for c in &tf.schema.columns {
            let val = match row.get(&c.name) {
                Some(v) => v.coerce(c.typ)?,
                None => Value::default(c.typ),
            };
            canonical.set(&c.name, val);
        }
        let (replaced, _) = tf.rewrite(|r| {
            if r.rid == row.rid {
                Ok(Edit::Replace(canonical.clone()))
            } else {
                Ok(Edit::Keep)
            }
        })?;
        if replaced.is_empty() {
            let rec = encode_row(&tf.schema, &canonical)?;
            tf.place_record(rec)?;
        }
        Ok(())
    }

    /// Recovery delete that tolerates an already-absent row.
    pub fn delete_row_if_present(&self, table: &str, rid: &str) -> Result<()> {
        match self.delete_row(table, rid) {
            Ok(_) => Ok(()),
            Err(Error::Invariant(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Install a hash index over a column: allocate, populate with a
    /// full scan, publish.
    pub fn set_index(&self, table: &str, column: &str) -> Result<()> {
        let tf = self.table(table)?;
        tf.schema.col_required(column)?;
        let mut ix = HashIndex::new();
        for b in 0..tf.block_count()? {
            let page = tf.read_block(b)?;
            let off = TableFile::block_offset(b);
            for rec in &page.records {
                let row = decode_row(&tf.schema, rec)?;
                if let Some(v) = row.get(column) {
                    ix.add(v, off);
                }
            }
        }
        debug!(
            "installed hash index on {}.{} ({} distinct values)",
            table,
            column,
            ix.distinct()
        );
        tf.indexes.write().insert(column.to_string(), ix);
        Ok(())
    }

    /// Columns with an installed index.
    pub fn indexed_columns(&self, table: &str) -> FxHashSet<String> {
        match self.table(table) {
            Ok(tf) => tf.indexes.read().keys().cloned().collect(),
            Err(_) => FxHashSet::default(),
        }
    }

    /// Statistics from the file length and at most [`STATS_SAMPLE`]
    /// sampled blocks.
    pub fn stats(&self, table: &str) -> Result<TableStats> {
        let tf = self.table(table)?;
        let blocks = tf.block_count()?;
        let tuple_size = tf.schema.record_size();
        let blocking_factor = (PAGE_SIZE - crate::page::PAGE_HEADER) / (tuple_size + 2);
        let sample_count = blocks.min(STATS_SAMPLE);
        let mut sampled_rows = 0u64;
        let mut seen: FxHashMap<String, FxHashSet<String>> = FxHashMap::default();
        if sample_count > 0 {
            let stride = blocks / sample_count;
            for i in 0..sample_count {
                let b = (i * stride).min(blocks - 1);
                let page = tf.read_block(b)?;
                sampled_rows += page.records.len() as u64;
                for rec in &page.records {
                    let row = decode_row(&tf.schema, rec)?;
                    for (k, v) in &row.cols {
                        seen.entry(k.clone()).or_default().insert(v.key());
                    }
                }
            }
        }
        let tuple_count = if sample_count == 0 {
            0
        } else {
            sampled_rows * blocks / sample_count
        };
        let ixs = tf.indexes.read();
        let mut distinct = FxHashMap::default();
        for c in &tf.schema.columns {
            let d = if let Some(ix) = ixs.get(&c.name) {
                ix.distinct() as u64
            } else {
                let in_sample = seen.get(&c.name).map(|s| s.len() as u64).unwrap_or(0);
                (in_sample * blocks.max(1) / sample_count.max(1)).min(tuple_count)
            };
            distinct.insert(c.name.clone(), d.max(1));
        }
        Ok(TableStats {
            table: table.to_string(),
            tuple_count,
            block_count: blocks,
            tuple_size,
            blocking_factor,
            distinct,
            indexed: ixs.keys().cloned().collect(),
        })
    }

    /// Structural check of a table: every page honors the slotted-page
    /// invariant and decodes cleanly, and every index entry points at a
    /// page that really holds the value. Returns the number of rows seen.
    pub fn verify(&self, table: &str) -> Result<u64> {
        let tf = self.table(table)?;
        let rec_size = tf.schema.record_size();
        let mut rows = 0u64;
        for b in 0..tf.block_count()? {
            let page = tf.read_block(b)?;
            let n = page.records.len();
            if crate::page::PAGE_HEADER + n * (rec_size + 2) > PAGE_SIZE {
                return Err(Error::Invariant(format!(
                    "block {} of {} holds {} records of {} bytes",
                    b, table, n, rec_size
                )));
            }
            for rec in &page.records {
                decode_row(&tf.schema, rec)?;
                rows += 1;
            }
        }
        let ixs = tf.indexes.read();
        for (col, ix) in ixs.iter() {
            for (key, offs) in ix.entries() {
                for off in offs {
                    let page = tf.read_block(off / PAGE_SIZE as u64 - 1)?;
                    let mut found = false;
                    for rec in &page.records {
                        let row = decode_row(&tf.schema, rec)?;
                        if row.get(col).map(|v| v.key()).as_deref() == Some(key.as_str()) {
                            found = true;
                            break;
                        }
                    }
                    if !found {
                        return Err(Error::Invariant(format!(
                            "index {}.{} lists offset {} without a matching record",
                            table, col, off
                        )));
                    }
                }
            }
        }
        Ok(rows)
    }

    /// Low-level page read, used by recovery and the dump tool.
    pub fn read_page(&self, table: &str, block: u64) -> Result<Page> {
        self.table(table)?.read_block(block)
    }

    /// Low-level page write.
    pub fn write_page(&self, table: &str, page: &Page) -> Result<()> {
        self.table(table)?.write_block(page)
    }
}

/// Copy a row, overwriting the given columns with values coerced to the
/// declared types.
fn apply_values(schema: &Schema, row: &Row, values: &[(String, Value)]) -> Result<Row> {
    let mut out = row.clone();
    for (name, val) in values {
        let c = schema.col_required(name)?;
        out.set(&c.name, val.coerce(c.typ)?);
    }
    Ok(out)
}

/// Lazy row stream over a table, one block at a time.
pub struct ScanIter {
    table: Arc<TableFile>,
    conds: Vec<Condition>,
    /// Restricted block list from an index probe, else sequential.
    blocks: Option<Vec<u64>>,
    cursor: u64,
    pending: VecDeque<Row>,
}

impl Iterator for ScanIter {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(Ok(row));
            }
            let block = match &self.blocks {
                Some(list) => {
                    let b = *list.get(self.cursor as usize)?;
                    self.cursor += 1;
                    b
                }
                None => {
                    let total = match self.table.block_count() {
                        Ok(n) => n,
                        Err(e) => return Some(Err(e)),
                    };
                    if self.cursor >= total {
                        return None;
                    }
                    let b = self.cursor;
                    self.cursor += 1;
                    b
                }
            };
            let page = match self.table.read_block(block) {
                Ok(p) => p,
                Err(e) => return Some(Err(e)),
            };
            for rec in &page.records {
                match decode_row(&self.table.schema, rec) {
                    Ok(row) => {
                        if self.conds.iter().all(|c| c.matches(&row)) {
                            self.pending.push_back(row);
                        }
                    }
                    Err(e) => return Some(Err(e)),
                }
            }
        }
    }
}
