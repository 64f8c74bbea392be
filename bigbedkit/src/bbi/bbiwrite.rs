use std::collections::HashSet;
use std::io::{self, Seek, SeekFrom, Write};
use std::ops::Range;

use byteorder::{ByteOrder, WriteBytesExt};
use byteordered::Endianness;
use itertools::Itertools;
use libdeflater::{CompressionLvl, Compressor};
use thiserror::Error;

use crate::bbi::bptree::build_bptree;
use crate::bbi::{ChromInfo, Summary, BBI_VERSION};

pub const DEFAULT_BLOCK_SIZE: u32 = 256;
pub const DEFAULT_ITEMS_PER_SLOT: u32 = 512;

pub(crate) const BBI_HEADER_SIZE: usize = 64;
pub(crate) const EXTENSION_HEADER_SIZE: usize = 64;

/// Options shared by bigWig and bigBed writing.
#[derive(Copy, Clone, Debug)]
pub struct BBIWriteOptions {
    /// Whether to zlib compress data blocks.
    pub compress: bool,
    /// The maximum number of items in a data block.
    pub items_per_slot: u32,
    /// The fanout of both the R-tree and the B+ trees.
    pub block_size: u32,
    /// The byte order to write the file in.
    pub endianness: Endianness,
}

impl Default for BBIWriteOptions {
    fn default() -> Self {
        BBIWriteOptions {
            compress: true,
            items_per_slot: DEFAULT_ITEMS_PER_SLOT,
            block_size: DEFAULT_BLOCK_SIZE,
            endianness: Endianness::native(),
        }
    }
}

impl BBIWriteOptions {
    pub(crate) fn validate(&self) -> Result<(), BBIWriteError> {
        if self.block_size < 2 || self.block_size > u32::from(u16::MAX) {
            return Err(BBIWriteError::InvalidInput(format!(
                "Block size must be between 2 and {}, got {}",
                u16::MAX,
                self.block_size
            )));
        }
        if self.items_per_slot == 0 {
            return Err(BBIWriteError::InvalidInput(
                "Items per slot must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Possible errors encountered when writing a bbi file
#[derive(Error, Debug)]
pub enum BBIWriteError {
    #[error("{}", .0)]
    InvalidInput(String),
    #[error("{}", .0)]
    IoError(#[from] io::Error),
}

/// Checks that chromosome ids are dense and in order.
pub(crate) fn validate_chroms(chroms: &[ChromInfo]) -> Result<(), BBIWriteError> {
    let mut names = HashSet::with_capacity(chroms.len());
    for (i, chrom) in chroms.iter().enumerate() {
        if chrom.id as usize != i {
            return Err(BBIWriteError::InvalidInput(format!(
                "Chromosome {} has id {}, expected {}",
                chrom.name, chrom.id, i
            )));
        }
        if chrom.name.is_empty() || chrom.name.as_bytes().contains(&0) {
            return Err(BBIWriteError::InvalidInput(format!(
                "Invalid chromosome name {:?}",
                chrom.name
            )));
        }
        if !names.insert(chrom.name.as_str()) {
            return Err(BBIWriteError::InvalidInput(format!(
                "Duplicate chromosome {}",
                chrom.name
            )));
        }
    }
    Ok(())
}

/// The values patched into the header once everything else is written.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct HeaderFields {
    pub(crate) magic: u32,
    pub(crate) field_count: u16,
    pub(crate) defined_field_count: u16,
    pub(crate) chromosome_tree_offset: u64,
    pub(crate) full_data_offset: u64,
    pub(crate) full_index_offset: u64,
    pub(crate) auto_sql_offset: u64,
    pub(crate) total_summary_offset: u64,
    pub(crate) uncompress_buf_size: u32,
    pub(crate) extension_offset: u64,
}

pub(crate) fn write_blank_header<W: Write>(out: &mut W) -> io::Result<()> {
    out.write_all(&[0; BBI_HEADER_SIZE])
}

/// Seeks back to the start of the file and writes the header.
pub(crate) fn write_header<E: ByteOrder, W: Write + Seek>(
    out: &mut W,
    fields: &HeaderFields,
) -> io::Result<()> {
    out.seek(SeekFrom::Start(0))?;
    out.write_u32::<E>(fields.magic)?;
    out.write_u16::<E>(BBI_VERSION)?;
    out.write_u16::<E>(0)?; // zoom levels
    out.write_u64::<E>(fields.chromosome_tree_offset)?;
    out.write_u64::<E>(fields.full_data_offset)?;
    out.write_u64::<E>(fields.full_index_offset)?;
    out.write_u16::<E>(fields.field_count)?;
    out.write_u16::<E>(fields.defined_field_count)?;
    out.write_u64::<E>(fields.auto_sql_offset)?;
    out.write_u64::<E>(fields.total_summary_offset)?;
    out.write_u32::<E>(fields.uncompress_buf_size)?;
    out.write_u64::<E>(fields.extension_offset)?;
    out.seek(SeekFrom::End(0))?;
    Ok(())
}

pub(crate) fn write_summary<E: ByteOrder, W: Write>(out: &mut W, summary: &Summary) -> io::Result<()> {
    out.write_u64::<E>(summary.bases_covered)?;
    out.write_f64::<E>(summary.min_val)?;
    out.write_f64::<E>(summary.max_val)?;
    out.write_f64::<E>(summary.sum)?;
    out.write_f64::<E>(summary.sum_squares)?;
    Ok(())
}

/// Writes the chromosome B+ tree at `offset`, keyed by name with `(id, length)` values.
pub(crate) fn write_chrom_tree<E: ByteOrder, W: Write>(
    out: &mut W,
    chroms: &[ChromInfo],
    block_size: u32,
    offset: u64,
) -> Result<(), BBIWriteError> {
    let mut items: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(chroms.len());
    for chrom in chroms {
        let mut value = Vec::with_capacity(8);
        value.write_u32::<E>(chrom.id)?;
        value.write_u32::<E>(chrom.length)?;
        items.push((chrom.name.as_bytes().to_vec(), value));
    }
    items.sort_by(|a, b| a.0.cmp(&b.0));

    let key_size = chroms
        .iter()
        .map(|c| c.name.len() as u32)
        .fold(1, u32::max);
    let block_size = block_size.min(chroms.len() as u32).max(1);
    let tree = build_bptree::<E>(&items, key_size, 8, block_size, offset)?;
    out.write_all(&tree)?;
    Ok(())
}

/// Compresses an encoded block if requested. Returns the bytes to write and
/// the uncompressed size (0 when not compressed).
pub(crate) fn encode_block(
    compressor: Option<&mut Compressor>,
    bytes: Vec<u8>,
) -> io::Result<(Vec<u8>, usize)> {
    match compressor {
        Some(compressor) => {
            let max_sz = compressor.zlib_compress_bound(bytes.len());
            let mut compressed_data = vec![0; max_sz];
            let actual_sz = compressor
                .zlib_compress(&bytes, &mut compressed_data)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("{:?}", e)))?;
            compressed_data.truncate(actual_sz);
            Ok((compressed_data, bytes.len()))
        }
        None => Ok((bytes, 0)),
    }
}

pub(crate) fn new_compressor(options: &BBIWriteOptions) -> Option<Compressor> {
    options
        .compress
        .then(|| Compressor::new(CompressionLvl::default()))
}

/// Splits sorted items into data blocks: a block ends when the chromosome
/// changes or it holds `items_per_slot` items.
pub(crate) fn group_blocks<T>(
    items: &[T],
    items_per_slot: u32,
    chrom: impl Fn(&T) -> u32,
) -> Vec<Range<usize>> {
    let items_per_slot = items_per_slot.max(1) as usize;
    let mut blocks = vec![];
    let mut start = 0;
    for (_, chrom_items) in &items.iter().chunk_by(|&item| chrom(item)) {
        let chrom_end = start + chrom_items.count();
        while start < chrom_end {
            let end = chrom_end.min(start + items_per_slot);
            blocks.push(start..end);
            start = end;
        }
    }
    blocks
}
