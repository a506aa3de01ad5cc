//! Per-PTY disk-backed chunked scrollback ring (spec §4.C).

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cell::{pack_row, unpack_row, Row};
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub id: u64,
    pub filename: String,
    pub cols: u32,
    pub row_bytes: u32,
    pub line_count: u64,
    pub bytes: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArchiveMeta {
    version: u32,
    next_chunk_id: u64,
    chunks: Vec<ChunkMeta>,
}

impl Default for ArchiveMeta {
    fn default() -> Self {
        ArchiveMeta { version: 1, next_chunk_id: 0, chunks: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScrollbackConfig {
    pub chunk_max_lines: u64,
    pub max_bytes_per_pty: u64,
    pub cache_capacity: usize,
}

impl Default for ScrollbackConfig {
    fn default() -> Self {
        ScrollbackConfig { chunk_max_lines: 2000, max_bytes_per_pty: 8 * 1024 * 1024, cache_capacity: 4096 }
    }
}

/// LRU cache of absolute-offset -> row, invalidated wholesale on any chunk drop
/// (spec §4.C: "simplest correct policy").
struct LruCache {
    capacity: usize,
    order: Vec<u64>,
    rows: HashMap<u64, Row>,
}

impl LruCache {
    fn new(capacity: usize) -> Self {
        LruCache { capacity, order: Vec::new(), rows: HashMap::new() }
    }

    fn get(&mut self, offset: u64) -> Option<Row> {
        if let Some(row) = self.rows.get(&offset).cloned() {
            self.order.retain(|o| *o != offset);
            self.order.push(offset);
            Some(row)
        } else {
            None
        }
    }

    fn put(&mut self, offset: u64, row: Row) {
        if !self.rows.contains_key(&offset) && self.rows.len() >= self.capacity {
            if let Some(evict) = self.order.first().copied() {
                self.order.remove(0);
                self.rows.remove(&evict);
            }
        }
        self.order.retain(|o| *o != offset);
        self.order.push(offset);
        self.rows.insert(offset, row);
    }

    fn clear(&mut self) {
        self.order.clear();
        self.rows.clear();
    }
}

/// A single PTY's on-disk scrollback archive: `meta.json` plus numbered
/// `chunk-N.bin` files, each holding packed rows of uniform column count.
pub struct ScrollbackArchive {
    dir: PathBuf,
    meta: ArchiveMeta,
    config: ScrollbackConfig,
    cache: LruCache,
    /// Absolute offset of the oldest line still on disk. Bumped whenever a
    /// chunk is dropped so callers re-base their indices (spec §8).
    base_offset: u64,
}

impl ScrollbackArchive {
    pub fn open(dir: impl Into<PathBuf>, config: ScrollbackConfig) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let meta_path = dir.join("meta.json");
        let meta = if meta_path.exists() {
            fs::read_to_string(&meta_path)
                .ok()
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default()
        } else {
            ArchiveMeta::default()
        };
        Ok(ScrollbackArchive {
            dir,
            meta,
            cache: LruCache::new(config.cache_capacity),
            config,
            base_offset: 0,
        })
    }

    pub fn length(&self) -> u64 {
        self.meta.chunks.iter().map(|c| c.line_count).sum()
    }

    pub fn bytes(&self) -> u64 {
        self.meta.chunks.iter().map(|c| c.bytes).sum()
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    fn chunk_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    fn write_meta(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.meta)
            .map_err(|e| crate::error::OpenmuxError::internal(format!("serialize scrollback meta: {e}")))?;
        fs::write(self.dir.join("meta.json"), bytes)?;
        Ok(())
    }

    /// Partitions `rows` into runs of equal column count and appends each run
    /// to an open chunk (starting a new one on column-count change or when
    /// the current chunk is full), then flushes metadata and enforces the
    /// per-PTY byte cap.
    pub fn append(&mut self, rows: &[Row]) -> Result<()> {
        let mut idx = 0;
        while idx < rows.len() {
            let cols = rows[idx].len() as u32;
            let mut end = idx + 1;
            while end < rows.len() && rows[end].len() as u32 == cols {
                end += 1;
            }
            self.append_run(&rows[idx..end], cols)?;
            idx = end;
        }
        self.write_meta()?;
        self.enforce_local_limit()?;
        Ok(())
    }

    fn append_run(&mut self, run: &[Row], cols: u32) -> Result<()> {
        let mut remaining = run;
        loop {
            let reuse = self
                .meta
                .chunks
                .last()
                .filter(|c| c.cols == cols && c.line_count < self.config.chunk_max_lines)
                .map(|c| c.id);

            let (chunk_idx, capacity_left) = if let Some(id) = reuse {
                let idx = self.meta.chunks.iter().position(|c| c.id == id).unwrap();
                let left = self.config.chunk_max_lines - self.meta.chunks[idx].line_count;
                (idx, left)
            } else {
                let id = self.meta.next_chunk_id;
                self.meta.next_chunk_id += 1;
                let filename = format!("chunk-{id}.bin");
                self.meta.chunks.push(ChunkMeta {
                    id,
                    filename,
                    cols,
                    row_bytes: 4 + cols * crate::cell::CELL_BYTES as u32,
                    line_count: 0,
                    bytes: 0,
                    created_at: Utc::now(),
                });
                (self.meta.chunks.len() - 1, self.config.chunk_max_lines)
            };

            let take = (capacity_left as usize).min(remaining.len());
            if take == 0 {
                // current chunk is full but wasn't reused; force a fresh one next loop
                continue;
            }
            let filename = self.meta.chunks[chunk_idx].filename.clone();
            let path = self.chunk_path(&filename);
            let mut buf = Vec::new();
            for row in &remaining[..take] {
                buf.extend_from_slice(&pack_row(row));
            }
            let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(&buf)?;

            let chunk = &mut self.meta.chunks[chunk_idx];
            chunk.line_count += take as u64;
            chunk.bytes += buf.len() as u64;

            remaining = &remaining[take..];
            if remaining.is_empty() {
                break;
            }
        }
        Ok(())
    }

    /// Returns the cells at absolute scrollback position `offset` (0 = oldest
    /// line ever appended, independent of prior drops).
    pub fn get_line(&mut self, offset: u64) -> Option<Row> {
        if offset < self.base_offset {
            return None;
        }
        if let Some(row) = self.cache.get(offset) {
            return Some(row);
        }
        let mut remaining = offset - self.base_offset;
        for chunk in &self.meta.chunks {
            if remaining < chunk.line_count {
                let row = read_row_at(&self.chunk_path(&chunk.filename), chunk, remaining).ok().flatten();
                if let Some(row) = &row {
                    self.cache.put(offset, row.clone());
                }
                return row;
            }
            remaining -= chunk.line_count;
        }
        None
    }

    pub fn prefetch_lines(&mut self, start: u64, count: u64) {
        for offset in start..start + count {
            self.get_line(offset);
        }
    }

    /// Removes the single oldest chunk, atomically updating counters and
    /// metadata. Invalidates the whole cache.
    pub fn drop_oldest_chunk(&mut self) -> Result<()> {
        if self.meta.chunks.is_empty() {
            return Ok(());
        }
        let removed = self.meta.chunks.remove(0);
        let _ = fs::remove_file(self.chunk_path(&removed.filename));
        self.base_offset += removed.line_count;
        self.cache.clear();
        self.write_meta()
    }

    pub fn oldest_created_at(&self) -> Option<DateTime<Utc>> {
        self.meta.chunks.first().map(|c| c.created_at)
    }

    fn enforce_local_limit(&mut self) -> Result<()> {
        while self.bytes() > self.config.max_bytes_per_pty && self.meta.chunks.len() > 1 {
            self.drop_oldest_chunk()?;
        }
        Ok(())
    }

    pub fn dispose(&mut self) -> Result<()> {
        for chunk in &self.meta.chunks {
            let _ = fs::remove_file(self.chunk_path(&chunk.filename));
        }
        let _ = fs::remove_file(self.dir.join("meta.json"));
        let _ = fs::remove_dir(&self.dir);
        self.meta = ArchiveMeta::default();
        self.cache.clear();
        Ok(())
    }
}

fn read_row_at(path: &Path, chunk: &ChunkMeta, index: u64) -> std::io::Result<Option<Row>> {
    let mut file = fs::File::open(path)?;
    let mut buf = vec![0u8; chunk.row_bytes as usize];
    use std::io::Seek;
    file.seek(std::io::SeekFrom::Start(index * chunk.row_bytes as u64))?;
    match file.read_exact(&mut buf) {
        Ok(()) => Ok(unpack_row(&buf).ok()),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;

    fn sample_rows(n: usize, cols: usize) -> Vec<Row> {
        (0..n).map(|i| vec![Cell { codepoint: b'a' as u32 + (i % 26) as u32, ..Cell::blank() }; cols]).collect()
    }

    #[test]
    fn append_and_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive =
            ScrollbackArchive::open(dir.path(), ScrollbackConfig { chunk_max_lines: 10, ..Default::default() }).unwrap();
        let rows = sample_rows(25, 8);
        archive.append(&rows).unwrap();
        assert_eq!(archive.length(), 25);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(archive.get_line(i as u64).as_ref(), Some(row));
        }
    }

    #[test]
    fn drop_oldest_rebases_indices() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive =
            ScrollbackArchive::open(dir.path(), ScrollbackConfig { chunk_max_lines: 5, ..Default::default() }).unwrap();
        let rows = sample_rows(12, 4);
        archive.append(&rows).unwrap();
        let removed = archive.meta.chunks[0].line_count;
        archive.drop_oldest_chunk().unwrap();
        assert_eq!(archive.length(), 12 - removed);
        assert_eq!(archive.get_line(removed).as_ref(), Some(&rows[removed as usize]));
    }

    #[test]
    fn global_cap_scenario_from_spec() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ScrollbackConfig { chunk_max_lines: 10, max_bytes_per_pty: 1024, cache_capacity: 64 };
        let mut archive = ScrollbackArchive::open(dir.path(), cfg).unwrap();
        let rows = sample_rows(50, 16);
        archive.append(&rows).unwrap();
        assert!(archive.bytes() <= 1024);
    }
}
