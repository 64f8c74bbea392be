use std::fs::File;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::OnceLock;

use byteordered::{ByteOrdered, Endianness};
use tracing::debug;

use crate::bbi::cirtree::CirTree;
use crate::bbi::{BBIFile, ChromInfo, Summary, Value};
use crate::bbiread::{for_each_block, read_info, read_total_summary, BBIFileInfo, BBIReadError};
use crate::utils::file::read_at::ReadAt;

const SECTION_HEADER_SIZE: usize = 24;

/// The encoding of the items of a bigWig section
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SectionType {
    /// `start`, `end`, `value` per item
    BedGraph,
    /// `start`, `value` per item, with a fixed span
    VarStep,
    /// `value` per item, with a fixed step and span
    FixedStep,
}

impl SectionType {
    fn from_u8(section_type: u8) -> Result<Self, BBIReadError> {
        match section_type {
            1 => Ok(SectionType::BedGraph),
            2 => Ok(SectionType::VarStep),
            3 => Ok(SectionType::FixedStep),
            other => Err(BBIReadError::InvalidFile(format!(
                "Unknown bigWig section type {}",
                other
            ))),
        }
    }
}

/// Decodes one uncompressed bigWig section, calling `each` with every value
/// until it returns `ControlFlow::Break`.
pub(crate) fn decode_wig_section(
    data: &[u8],
    endianness: Endianness,
    mut each: impl FnMut(u32, Value) -> ControlFlow<()>,
) -> Result<ControlFlow<()>, BBIReadError> {
    if data.len() < SECTION_HEADER_SIZE {
        return Err(BBIReadError::InvalidFile(
            "Truncated bigWig section header".to_owned(),
        ));
    }
    let mut header = ByteOrdered::runtime(&data[..SECTION_HEADER_SIZE], endianness);
    let chrom = header.read_u32()?;
    let section_start = header.read_u32()?;
    let _section_end = header.read_u32()?;
    let item_step = header.read_u32()?;
    let item_span = header.read_u32()?;
    let section_type = SectionType::from_u8(header.read_u8()?)?;
    let _reserved = header.read_u8()?;
    let item_count = header.read_u16()?;

    let item_size = match section_type {
        SectionType::BedGraph => 12,
        SectionType::VarStep => 8,
        SectionType::FixedStep => 4,
    };
    let items = &data[SECTION_HEADER_SIZE..];
    if items.len() < usize::from(item_count) * item_size {
        return Err(BBIReadError::InvalidFile(format!(
            "bigWig section holds {} bytes, too few for {} items",
            items.len(),
            item_count
        )));
    }

    let mut items = ByteOrdered::runtime(items, endianness);
    let mut start = section_start.wrapping_sub(item_step);
    for _ in 0..item_count {
        let value = match section_type {
            SectionType::BedGraph => Value {
                start: items.read_u32()?,
                end: items.read_u32()?,
                value: items.read_f32()?,
            },
            SectionType::VarStep => {
                let start = items.read_u32()?;
                Value {
                    start,
                    end: start.saturating_add(item_span),
                    value: items.read_f32()?,
                }
            }
            SectionType::FixedStep => {
                start = start.wrapping_add(item_step);
                Value {
                    start,
                    end: start.saturating_add(item_span),
                    value: items.read_f32()?,
                }
            }
        };
        if each(chrom, value).is_break() {
            return Ok(ControlFlow::Break(()));
        }
    }
    Ok(ControlFlow::Continue(()))
}

/// The struct used to read a bigWig file
pub struct BigWigRead<R> {
    pub info: BBIFileInfo,
    read: R,
    total_summary: Option<Summary>,
    cir_tree: OnceLock<CirTree>,
}

impl BigWigRead<File> {
    /// Opens a new `BigWigRead` from a given path as a file.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self, BBIReadError> {
        let file = File::open(path)?;
        BigWigRead::open(file)
    }
}

impl<R: ReadAt> BigWigRead<R> {
    /// Opens a new `BigWigRead` from any positional reader.
    pub fn open(read: R) -> Result<Self, BBIReadError> {
        let info = read_info(&read)?;
        if info.filetype != BBIFile::BigWig {
            return Err(BBIReadError::NotABigWig);
        }
        let total_summary = read_total_summary(&read, &info.header)?;
        debug!(sections = info.data_count, "Opened bigWig");
        Ok(BigWigRead {
            info,
            read,
            total_summary,
            cir_tree: OnceLock::new(),
        })
    }

    pub fn info(&self) -> &BBIFileInfo {
        &self.info
    }

    /// The summary of the whole file, if one was written.
    pub fn total_summary(&self) -> Option<Summary> {
        self.total_summary
    }

    fn cir_tree(&self) -> Result<&CirTree, BBIReadError> {
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

    /// Gets all chromosomes, sorted by id.
    pub fn chroms(&self) -> Result<Vec<ChromInfo>, BBIReadError> {
        let endianness = self.info.header.endianness;
        let mut chroms = vec![];
        self.info.chrom_tree.traverse(&self.read, |key, value| {
            let name_end = key.iter().position(|&b| b == 0).unwrap_or(key.len());
            let mut value = ByteOrdered::runtime(value, endianness);
            chroms.push(ChromInfo::new(
                value.read_u32()?,
                String::from_utf8_lossy(&key[..name_end]),
                value.read_u32()?,
            ));
            Ok(())
        })?;
        chroms.sort_by_key(|c| c.id);
        Ok(chroms)
    }

    /// Gets the values overlapping `[start, end)` on `chrom`, in order.
    ///
    /// At most `max_items` values are returned; `0` means no limit.
    pub fn get_interval(
        &self,
        chrom: &str,
        start: u32,
        end: u32,
        max_items: usize,
    ) -> Result<Vec<Value>, BBIReadError> {
        let chrom_id = match self.info.chrom_tree.find(&self.read, chrom.as_bytes())? {
            Some(value) => ByteOrdered::runtime(&value[..], self.info.header.endianness).read_u32()?,
            None => return Err(BBIReadError::InvalidChromosome(chrom.to_owned())),
        };

        let blocks = self.cir_tree()?.search(&self.read, chrom_id, start, end)?;
        let endianness = self.info.header.endianness;
        let mut values = vec![];
        for_each_block(&self.read, &self.info.header, blocks, |_, data| {
            decode_wig_section(data, endianness, |section_chrom, value| {
                if section_chrom == chrom_id
                    && value.start < value.end
                    && value.start < end
                    && start < value.end
                {
                    values.push(value);
                    if max_items > 0 && values.len() >= max_items {
                        return ControlFlow::Break(());
                    }
                }
                ControlFlow::Continue(())
            })
        })?;
        Ok(values)
    }
}
