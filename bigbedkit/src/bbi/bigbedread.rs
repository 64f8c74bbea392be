use std::fs::File;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::OnceLock;

use byteordered::{ByteOrdered, Endianness};
use memmap2::Mmap;
use tracing::{debug, warn};

use crate::bbi::bptree::BPlusTree;
use crate::bbi::cirtree::CirTree;
use crate::bbi::{BBIFile, BedEntry, ChromInfo, Summary};
use crate::bbiread::{
    for_each_block, read_c_string, read_info, read_total_summary, BBIFileInfo, BBIReadError,
    Block,
};
use crate::bed::autosql::parse_autosql;
use crate::utils::file::read_at::ReadAt;

const EXTRA_INDEX_ENTRY_SIZE: usize = 20;

/// An extra index over one column of a bigBed's records
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtraIndex {
    /// The indexed column (0-based; `3` is the first column after `chromEnd`)
    pub column: u16,
    /// The column name from the autosql, if it could be resolved
    pub name: Option<String>,
    pub(crate) offset: u64,
}

/// Does a record `[start, end)` match the query `[query_start, query_end)`?
///
/// Zero-length records also match when they sit exactly on a query boundary.
#[inline]
pub(crate) fn record_overlaps(start: u32, end: u32, query_start: u32, query_end: u32) -> bool {
    (start < query_end && end > query_start)
        || (start == end && (start == query_end || end == query_start))
}

/// Decodes the records of an uncompressed bigBed block, calling `each` until
/// it returns `ControlFlow::Break`.
pub(crate) fn decode_bed_block(
    data: &[u8],
    endianness: Endianness,
    mut each: impl FnMut(BedEntry) -> ControlFlow<()>,
) -> Result<ControlFlow<()>, BBIReadError> {
    let mut remaining = data;
    while !remaining.is_empty() {
        if remaining.len() < 12 {
            return Err(BBIReadError::InvalidFile(
                "Truncated bigBed record".to_owned(),
            ));
        }
        let mut fixed = ByteOrdered::runtime(&remaining[..12], endianness);
        let chrom = fixed.read_u32()?;
        let start = fixed.read_u32()?;
        let end = fixed.read_u32()?;
        let tail = &remaining[12..];
        let nul = tail.iter().position(|&b| b == 0).ok_or_else(|| {
            BBIReadError::InvalidFile("bigBed record is missing its NUL terminator".to_owned())
        })?;
        let rest = String::from_utf8_lossy(&tail[..nul]).into_owned();
        remaining = &tail[nul + 1..];
        if each(BedEntry {
            chrom,
            start,
            end,
            rest,
        })
        .is_break()
        {
            return Ok(ControlFlow::Break(()));
        }
    }
    Ok(ControlFlow::Continue(()))
}

/// Counts the records in an uncompressed bigBed block without decoding them.
pub(crate) fn count_bed_records(data: &[u8]) -> Result<u64, BBIReadError> {
    let mut remaining = data;
    let mut count = 0;
    while !remaining.is_empty() {
        let nul = remaining
            .get(12..)
            .and_then(|tail| tail.iter().position(|&b| b == 0))
            .ok_or_else(|| BBIReadError::InvalidFile("Truncated bigBed record".to_owned()))?;
        remaining = &remaining[12 + nul + 1..];
        count += 1;
    }
    Ok(count)
}

/// The struct used to read a bigBed file
///
/// All reads are positional, so every query only needs `&self`.
pub struct BigBedRead<R> {
    pub info: BBIFileInfo,
    read: R,
    total_summary: Option<Summary>,
    cir_tree: OnceLock<CirTree>,
}

impl BigBedRead<File> {
    /// Opens a new `BigBedRead` from a given path as a file.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self, BBIReadError> {
        let file = File::open(path)?;
        BigBedRead::open(file)
    }
}

impl BigBedRead<Mmap> {
    /// Opens a new `BigBedRead` over a memory map of the file at `path`.
    ///
    /// The file must not be modified while it is mapped.
    pub fn open_file_mmap(path: impl AsRef<Path>) -> Result<Self, BBIReadError> {
        let file = File::open(path)?;
        // SAFETY: the caller guarantees the file isn't modified while mapped
        let mmap = unsafe { Mmap::map(&file)? };
        BigBedRead::open(mmap)
    }
}

impl<R: ReadAt> BigBedRead<R> {
    /// Opens a new `BigBedRead` from any positional reader.
    pub fn open(read: R) -> Result<Self, BBIReadError> {
        let info = read_info(&read)?;
        if info.filetype != BBIFile::BigBed {
            return Err(BBIReadError::NotABigBed);
        }
        let total_summary = read_total_summary(&read, &info.header)?;
        debug!(
            items = info.data_count,
            chroms = info.chrom_tree.item_count,
            "Opened bigBed"
        );
        Ok(BigBedRead {
            info,
            read,
            total_summary,
            cir_tree: OnceLock::new(),
        })
    }

    pub fn info(&self) -> &BBIFileInfo {
        &self.info
    }

    pub(crate) fn reader(&self) -> &R {
        &self.read
    }

    /// Consumes this `BigBedRead`, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.read
    }

    /// The number of records, as stored at the start of the data section.
    pub fn item_count(&self) -> u64 {
        self.info.data_count
    }

    /// The summary of the whole file, if one was written.
    pub fn total_summary(&self) -> Option<Summary> {
        self.total_summary
    }

    /// The R-tree index, read on first use.
    pub(crate) fn cir_tree(&self) -> Result<&CirTree, BBIReadError> {
        if let Some(cir_tree) = self.cir_tree.get() {
            return Ok(cir_tree);
        }
        let cir_tree = CirTree::open(
            &self.read,
            self.info.header.full_index_offset,
            self.info.header.endianness,
        )?;
        Ok(self.cir_tree.get_or_init(|| cir_tree))
    }

    fn parse_chrom(&self, key: &[u8], value: &[u8]) -> Result<ChromInfo, BBIReadError> {
        let name_end = key.iter().position(|&b| b == 0).unwrap_or(key.len());
        let name = std::str::from_utf8(&key[..name_end])
            .map_err(|_| BBIReadError::InvalidFile("Chromosome name is not UTF-8".to_owned()))?;
        let mut value = ByteOrdered::runtime(value, self.info.header.endianness);
        let id = value.read_u32()?;
        let length = value.read_u32()?;
        Ok(ChromInfo::new(id, name, length))
    }

    /// Visits every chromosome, in name order.
    pub fn traverse_chroms(
        &self,
        mut visit: impl FnMut(ChromInfo),
    ) -> Result<(), BBIReadError> {
        self.info.chrom_tree.traverse(&self.read, |key, value| {
            visit(self.parse_chrom(key, value)?);
            Ok(())
        })
    }

    /// Gets all chromosomes, sorted by id.
    pub fn chroms(&self) -> Result<Vec<ChromInfo>, BBIReadError> {
        let mut chroms = Vec::with_capacity(self.info.chrom_tree.item_count as usize);
        self.traverse_chroms(|chrom| chroms.push(chrom))?;
        chroms.sort_by_key(|c| c.id);
        Ok(chroms)
    }

    /// Looks up a chromosome by name.
    pub fn chrom_info(&self, name: &str) -> Result<Option<ChromInfo>, BBIReadError> {
        match self.info.chrom_tree.find(&self.read, name.as_bytes())? {
            Some(value) => Ok(Some(self.parse_chrom(name.as_bytes(), &value)?)),
            None => Ok(None),
        }
    }

    /// The autosql schema text, if present.
    pub fn autosql(&self) -> Result<Option<String>, BBIReadError> {
        match self.info.header.auto_sql_offset {
            0 => Ok(None),
            offset => Ok(Some(read_c_string(&self.read, offset)?)),
        }
    }

    /// Gets the records overlapping `[start, end)` on `chrom`, in order.
    ///
    /// At most `max_items` records are returned; `0` means no limit.
    pub fn get_interval(
        &self,
        chrom: &str,
        start: u32,
        end: u32,
        max_items: usize,
    ) -> Result<Vec<BedEntry>, BBIReadError> {
        let chrom_info = self
            .chrom_info(chrom)?
            .ok_or_else(|| BBIReadError::InvalidChromosome(chrom.to_owned()))?;
        self.get_interval_by_id(chrom_info.id, start, end, max_items)
    }

    /// Like [`BigBedRead::get_interval`], with the chromosome given by id.
    pub fn get_interval_by_id(
        &self,
        chrom: u32,
        start: u32,
        end: u32,
        max_items: usize,
    ) -> Result<Vec<BedEntry>, BBIReadError> {
        // Pad by a base, so zero-length records on the boundaries are found
        let blocks = self.cir_tree()?.search(
            &self.read,
            chrom,
            start.saturating_sub(1),
            end.saturating_add(1),
        )?;
        let endianness = self.info.header.endianness;
        let mut entries = vec![];
        for_each_block(&self.read, &self.info.header, blocks, |_, data| {
            decode_bed_block(data, endianness, |entry| {
                if entry.chrom == chrom && record_overlaps(entry.start, entry.end, start, end) {
                    entries.push(entry);
                    if max_items > 0 && entries.len() >= max_items {
                        return ControlFlow::Break(());
                    }
                }
                ControlFlow::Continue(())
            })
        })?;
        Ok(entries)
    }

    /// Decodes every record of the given blocks.
    pub(crate) fn block_entries(
        &self,
        blocks: Vec<Block>,
        mut each: impl FnMut(BedEntry) -> ControlFlow<()>,
    ) -> Result<(), BBIReadError> {
        let endianness = self.info.header.endianness;
        for_each_block(&self.read, &self.info.header, blocks, |_, data| {
            decode_bed_block(data, endianness, &mut each)
        })
    }

    /// The extra indices in this file.
    pub fn extra_indices(&self) -> Result<Vec<ExtraIndex>, BBIReadError> {
        let extension = match self.info.extension {
            Some(extension) if extension.extra_index_count > 0 => extension,
            _ => return Ok(vec![]),
        };

        let columns = match self.autosql()? {
            Some(autosql) => match parse_autosql(&autosql) {
                Ok(autosql) => Some(autosql),
                Err(e) => {
                    warn!("Could not parse autosql, extra indices are unnamed: {}", e);
                    None
                }
            },
            None => None,
        };

        let count = usize::from(extension.extra_index_count);
        let data = self.read.read_vec_at(
            extension.extra_index_list_offset,
            count * EXTRA_INDEX_ENTRY_SIZE,
        )?;
        let mut data = ByteOrdered::runtime(&data[..], self.info.header.endianness);
        let mut indices = Vec::with_capacity(count);
        for _ in 0..count {
            let index_type = data.read_u16()?;
            let field_count = data.read_u16()?;
            let offset = data.read_u64()?;
            let _reserved = data.read_u32()?;
            let column = data.read_u16()?;
            let _reserved = data.read_u16()?;
            if index_type != 0 {
                return Err(BBIReadError::InvalidFile(format!(
                    "Unsupported extra index type {}",
                    index_type
                )));
            }
            if field_count != 1 {
                return Err(BBIReadError::InvalidFile(format!(
                    "Unsupported extra index over {} fields",
                    field_count
                )));
            }
            let name = columns
                .as_ref()
                .and_then(|c| c.column_name(usize::from(column)))
                .map(str::to_owned);
            indices.push(ExtraIndex {
                column,
                name,
                offset,
            });
        }
        Ok(indices)
    }

    /// Finds records whose column named `name` is exactly `value`.
    ///
    /// At most `max_items` records are returned; `0` means no limit.
    pub fn search_extra_index(
        &self,
        name: &str,
        value: &str,
        max_items: usize,
    ) -> Result<Vec<BedEntry>, BBIReadError> {
        let index = self
            .extra_indices()?
            .into_iter()
            .find(|i| i.name.as_deref() == Some(name))
            .ok_or_else(|| BBIReadError::NotIndexed(name.to_owned()))?;
        self.search_index(&index, value, max_items)
    }

    /// Finds records whose column `column` is exactly `value`.
    pub fn search_extra_index_by_column(
        &self,
        column: u16,
        value: &str,
        max_items: usize,
    ) -> Result<Vec<BedEntry>, BBIReadError> {
        let index = self
            .extra_indices()?
            .into_iter()
            .find(|i| i.column == column)
            .ok_or_else(|| BBIReadError::NotIndexed(format!("column {}", column)))?;
        self.search_index(&index, value, max_items)
    }

    fn search_index(
        &self,
        index: &ExtraIndex,
        value: &str,
        max_items: usize,
    ) -> Result<Vec<BedEntry>, BBIReadError> {
        let endianness = self.info.header.endianness;
        let tree = BPlusTree::open(&self.read, index.offset, endianness)?;
        if tree.val_size != 16 {
            return Err(BBIReadError::InvalidFile(format!(
                "Extra index values are {} bytes, expected 16",
                tree.val_size
            )));
        }
        let mut blocks = vec![];
        tree.find_all(&self.read, value.as_bytes(), |pointer| {
            let mut pointer = ByteOrdered::runtime(pointer, endianness);
            blocks.push(Block {
                offset: pointer.read_u64()?,
                size: pointer.read_u64()?,
            });
            Ok(())
        })?;
        debug!(value, blocks = blocks.len(), "Searching extra index");

        let mut entries = vec![];
        self.block_entries(blocks, |entry| {
            if entry.field(index.column) == Some(value) {
                entries.push(entry);
                if max_items > 0 && entries.len() >= max_items {
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        })?;
        Ok(entries)
    }
}
