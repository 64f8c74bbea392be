use std::io;
use std::ops::ControlFlow;

use byteordered::{ByteOrdered, Endianness};
use flate2::{Decompress, FlushDecompress, Status};
use thiserror::Error;
use tracing::{debug, trace};

use crate::bbi::bptree::BPlusTree;
use crate::bbi::{BBIFile, Summary, BIGBED_MAGIC, BIGWIG_MAGIC};
use crate::utils::file::read_at::ReadAt;

const BBI_HEADER_SIZE: u64 = 64;
const SUMMARY_SIZE: u64 = 40;

/// A pointer to a (possibly compressed) data block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block {
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

impl Block {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Header info for a bbi file
///
/// Note that info on internal properties like file offsets are not public.
/// Reading data is available through higher-level functions.
#[derive(Copy, Clone, Debug)]
pub struct BBIHeader {
    pub endianness: Endianness,
    pub version: u16,
    pub zoom_levels: u16,
    pub field_count: u16,
    pub defined_field_count: u16,

    pub(crate) chromosome_tree_offset: u64,
    pub(crate) full_data_offset: u64,
    pub(crate) full_index_offset: u64,
    pub(crate) auto_sql_offset: u64,
    pub(crate) total_summary_offset: u64,
    pub(crate) uncompress_buf_size: u32,
    pub(crate) extension_offset: u64,
}

impl BBIHeader {
    /// Whether data blocks are zlib compressed.
    pub fn is_compressed(&self) -> bool {
        self.uncompress_buf_size > 0
    }
}

/// The fixed part of the extension block.
#[derive(Copy, Clone, Debug)]
pub(crate) struct ExtensionHeader {
    pub(crate) extra_index_count: u16,
    pub(crate) extra_index_list_offset: u64,
}

/// Info on a bbi file
#[derive(Clone, Debug)]
pub struct BBIFileInfo {
    /// The type of the bbi file - either a bigBed or a bigWig
    pub filetype: BBIFile,
    /// Header info
    pub header: BBIHeader,
    /// For bigBeds, the number of records. For bigWigs, the number of sections.
    pub data_count: u64,
    pub(crate) chrom_tree: BPlusTree,
    pub(crate) extension: Option<ExtensionHeader>,
}

/// Possible errors encountered when reading a bbi file
#[derive(Error, Debug)]
pub enum BBIReadError {
    #[error("Invalid magic (likely not a BigWig or BigBed file)")]
    UnknownMagic,
    #[error("The file is a bigWig, not a bigBed.")]
    NotABigBed,
    #[error("The file is a bigBed, not a bigWig.")]
    NotABigWig,
    #[error("The file was invalid: {}", .0)]
    InvalidFile(String),
    #[error("The passed chromosome ({}) was incorrect.", .0)]
    InvalidChromosome(String),
    #[error("Requested items {}..{}+{} but the file only has {} items.", .from, .from, .size, .count)]
    OutOfBounds { from: u64, size: u64, count: u64 },
    #[error("No extra index for {}.", .0)]
    NotIndexed(String),
    #[error("Error occurred: {}", .0)]
    IoError(#[from] io::Error),
}

pub(crate) fn read_info<R: ReadAt + ?Sized>(read: &R) -> Result<BBIFileInfo, BBIReadError> {
    let header_data = read.read_vec_at(0, BBI_HEADER_SIZE as usize)?;

    let magic = u32::from_le_bytes([
        header_data[0],
        header_data[1],
        header_data[2],
        header_data[3],
    ]);
    let (filetype, endianness) = match magic {
        BIGWIG_MAGIC => (BBIFile::BigWig, Endianness::Little),
        BIGBED_MAGIC => (BBIFile::BigBed, Endianness::Little),
        _ if magic.swap_bytes() == BIGWIG_MAGIC => (BBIFile::BigWig, Endianness::Big),
        _ if magic.swap_bytes() == BIGBED_MAGIC => (BBIFile::BigBed, Endianness::Big),
        _ => return Err(BBIReadError::UnknownMagic),
    };

    let mut data = ByteOrdered::runtime(&header_data[4..], endianness);
    let header = BBIHeader {
        endianness,
        version: data.read_u16()?,
        zoom_levels: data.read_u16()?,
        chromosome_tree_offset: data.read_u64()?,
        full_data_offset: data.read_u64()?,
        full_index_offset: data.read_u64()?,
        field_count: data.read_u16()?,
        defined_field_count: data.read_u16()?,
        auto_sql_offset: data.read_u64()?,
        total_summary_offset: data.read_u64()?,
        uncompress_buf_size: data.read_u32()?,
        extension_offset: data.read_u64()?,
    };
    debug!(?filetype, ?header, "Read bbi header");

    let chrom_tree = BPlusTree::open(read, header.chromosome_tree_offset, endianness)?;
    if chrom_tree.val_size != 8 {
        return Err(BBIReadError::InvalidFile(format!(
            "Chromosome tree values are {} bytes, expected 8",
            chrom_tree.val_size
        )));
    }

    let data_count = if header.full_data_offset == 0 {
        0
    } else {
        let count = read.read_vec_at(header.full_data_offset, 8)?;
        ByteOrdered::runtime(&count[..], endianness).read_u64()?
    };

    let extension = if header.extension_offset == 0 {
        None
    } else {
        let ext = read.read_vec_at(header.extension_offset, 12)?;
        let mut ext = ByteOrdered::runtime(&ext[..], endianness);
        let _extension_size = ext.read_u16()?;
        Some(ExtensionHeader {
            extra_index_count: ext.read_u16()?,
            extra_index_list_offset: ext.read_u64()?,
        })
    };

    Ok(BBIFileInfo {
        filetype,
        header,
        data_count,
        chrom_tree,
        extension,
    })
}

pub(crate) fn read_total_summary<R: ReadAt + ?Sized>(
    read: &R,
    header: &BBIHeader,
) -> Result<Option<Summary>, BBIReadError> {
    if header.total_summary_offset == 0 {
        return Ok(None);
    }
    let data = read.read_vec_at(header.total_summary_offset, SUMMARY_SIZE as usize)?;
    let mut data = ByteOrdered::runtime(&data[..], header.endianness);
    Ok(Some(Summary {
        bases_covered: data.read_u64()?,
        min_val: data.read_f64()?,
        max_val: data.read_f64()?,
        sum: data.read_f64()?,
        sum_squares: data.read_f64()?,
    }))
}

/// Reads a NUL-terminated string starting at `offset`.
pub(crate) fn read_c_string<R: ReadAt + ?Sized>(
    read: &R,
    offset: u64,
) -> Result<String, BBIReadError> {
    const CHUNK: usize = 256;
    let mut bytes = vec![];
    let mut chunk = [0u8; CHUNK];
    loop {
        let at = offset + bytes.len() as u64;
        // The string may end close to the end of the file, so fall back to single bytes
        let read_len = match read.read_at(at, &mut chunk) {
            Ok(()) => CHUNK,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                read.read_at(at, &mut chunk[..1])?;
                1
            }
            Err(e) => return Err(e.into()),
        };
        match chunk[..read_len].iter().position(|&b| b == 0) {
            Some(end) => {
                bytes.extend_from_slice(&chunk[..end]);
                break;
            }
            None => bytes.extend_from_slice(&chunk[..read_len]),
        }
    }
    String::from_utf8(bytes)
        .map_err(|_| BBIReadError::InvalidFile("String is not valid UTF-8".to_owned()))
}

/// Inflates blocks into a buffer sized from the header's `uncompress_buf_size`,
/// reused between blocks.
pub(crate) struct BlockDecompressor {
    buf_size: usize,
    inflate: Decompress,
    buf: Vec<u8>,
}

impl BlockDecompressor {
    pub(crate) fn new(header: &BBIHeader) -> Self {
        BlockDecompressor {
            buf_size: header.uncompress_buf_size as usize,
            inflate: Decompress::new(true),
            buf: vec![],
        }
    }

    /// Returns the uncompressed content of a block. Uncompressed files are passed through.
    pub(crate) fn decompress<'a>(&'a mut self, raw: &'a [u8]) -> Result<&'a [u8], BBIReadError> {
        if self.buf_size == 0 {
            return Ok(raw);
        }
        self.inflate.reset(true);
        self.buf.clear();
        self.buf.reserve_exact(self.buf_size);
        let status = self
            .inflate
            .decompress_vec(raw, &mut self.buf, FlushDecompress::Finish)
            .map_err(|e| BBIReadError::InvalidFile(format!("Corrupt data block: {}", e)))?;
        if !matches!(status, Status::StreamEnd) {
            return Err(BBIReadError::InvalidFile(format!(
                "Data block does not inflate into {} bytes",
                self.buf_size
            )));
        }
        if self.inflate.total_in() != raw.len() as u64 {
            return Err(BBIReadError::InvalidFile(format!(
                "{} trailing bytes after compressed data block",
                raw.len() as u64 - self.inflate.total_in()
            )));
        }
        Ok(&self.buf)
    }
}

/// Sorts and deduplicates blocks, then groups blocks whose byte ranges are
/// contiguous so each group can be fetched with a single read.
pub(crate) fn merge_contiguous_blocks(blocks: &mut Vec<Block>) -> Vec<Vec<Block>> {
    blocks.sort();
    blocks.dedup();
    let mut groups: Vec<Vec<Block>> = vec![];
    for block in blocks.iter() {
        match groups.last_mut() {
            Some(group)
                if group
                    .last()
                    .and_then(|last| last.offset.checked_add(last.size))
                    .map_or(false, |end| end == block.offset) =>
            {
                group.push(*block)
            }
            _ => groups.push(vec![*block]),
        }
    }
    groups
}

/// Reads the given blocks, merging contiguous reads, and calls `each` with the
/// uncompressed content of every block in file order. Stops early once `each`
/// returns `ControlFlow::Break`.
///
/// Every block must lie between the start of the data section and the R-tree.
pub(crate) fn for_each_block<R: ReadAt + ?Sized>(
    read: &R,
    header: &BBIHeader,
    mut blocks: Vec<Block>,
    mut each: impl FnMut(Block, &[u8]) -> Result<ControlFlow<()>, BBIReadError>,
) -> Result<(), BBIReadError> {
    for block in &blocks {
        match block.offset.checked_add(block.size) {
            Some(end)
                if block.offset >= header.full_data_offset && end <= header.full_index_offset => {}
            _ => {
                return Err(BBIReadError::InvalidFile(format!(
                    "Block of {} bytes at offset {} is outside the data section",
                    block.size, block.offset
                )))
            }
        }
    }

    let mut decompressor = BlockDecompressor::new(header);
    for group in merge_contiguous_blocks(&mut blocks) {
        let start = group[0].offset;
        let total = group
            .iter()
            .try_fold(0u64, |total, b| total.checked_add(b.size))
            .and_then(|total| usize::try_from(total).ok())
            .ok_or_else(|| {
                BBIReadError::InvalidFile(format!("Merged block at offset {} is too large", start))
            })?;
        trace!(offset = start, size = total, blocks = group.len(), "Reading blocks");
        let raw = read.read_vec_at(start, total)?;

        let mut at = 0usize;
        for block in group {
            let size = block.size as usize;
            let data = decompressor.decompress(&raw[at..at + size])?;
            at += size;
            if each(block, data)?.is_break() {
                return Ok(());
            }
        }
    }
    Ok(())
}
