use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::PathBuf;

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use byteordered::Endianness;
use regex::Regex;
use tracing::debug;

use crate::bbi::bptree::build_bptree;
use crate::bbi::rtreebuild::{RTree, Section};
use crate::bbi::summary::coverage_summary;
use crate::bbi::{BedEntry, ChromInfo, BIGBED_MAGIC};
use crate::bbiwrite::{
    encode_block, group_blocks, new_compressor, validate_chroms, write_blank_header,
    write_chrom_tree, write_header, write_summary, BBIWriteError, BBIWriteOptions, HeaderFields,
    EXTENSION_HEADER_SIZE,
};
use crate::bed::autosql::{bed_autosql, parse_autosql};

const EXTRA_INDEX_ENTRY_SIZE: usize = 20;

/// The main entrypoint for writing bigBed files.
///
/// ```no_run
/// # use bigbedkit::{BedEntry, BigBedWrite, ChromInfo};
/// let chroms = vec![ChromInfo::new(0, "chr1", 1000)];
/// let entries = vec![BedEntry::new(0, 100, 200, "gene1\t0\t+")];
/// let mut out = BigBedWrite::create_file("genes.bb");
/// out.bed_n = 6;
/// out.extra_index_columns = vec![3];
/// out.write(entries, &chroms)?;
/// # Ok::<(), bigbedkit::BBIWriteError>(())
/// ```
pub struct BigBedWrite {
    pub path: PathBuf,
    pub options: BBIWriteOptions,
    /// The schema text. When `None`, a default bed schema is generated.
    pub autosql: Option<String>,
    /// The number of standard bed columns, `3..=15`.
    pub bed_n: u16,
    /// Columns (0-based, at least 3) to build extra indices for.
    pub extra_index_columns: Vec<u16>,
    /// The regex used to split record payloads into columns when counting
    /// fields and building extra indices. Records are read back split on tabs,
    /// so an indexed column must split the same way under both.
    pub field_delimiter: String,
}

/// The per-record values of one extra-index column.
struct ExtraIndexValues<'a> {
    column: u16,
    values: Vec<&'a str>,
}

impl BigBedWrite {
    pub fn create_file(path: impl Into<PathBuf>) -> Self {
        BigBedWrite {
            path: path.into(),
            options: BBIWriteOptions::default(),
            autosql: None,
            bed_n: 3,
            extra_index_columns: vec![],
            field_delimiter: "\t".to_owned(),
        }
    }

    /// Sorts `entries` by `(chrom, start)` and writes them as a bigBed to `path`.
    ///
    /// `chroms[i].id` must be `i`, and every entry's `chrom` must be one of the ids.
    pub fn write(self, entries: Vec<BedEntry>, chroms: &[ChromInfo]) -> Result<(), BBIWriteError> {
        let file = BufWriter::new(File::create(&self.path)?);
        let mut file = self.write_to(file, entries, chroms)?;
        file.flush()?;
        Ok(())
    }

    /// Like [`BigBedWrite::write`], but writes to any seekable output and returns it.
    pub fn write_to<W: Write + Seek>(
        &self,
        mut out: W,
        mut entries: Vec<BedEntry>,
        chroms: &[ChromInfo],
    ) -> Result<W, BBIWriteError> {
        entries.sort_by_key(|e| (e.chrom, e.start));
        let blocks = group_blocks(&entries, self.options.items_per_slot, |e| e.chrom);
        self.write_blocks(&mut out, &entries, &blocks, chroms)?;
        Ok(out)
    }

    fn validate(&self, entries: &[BedEntry], chroms: &[ChromInfo]) -> Result<(), BBIWriteError> {
        self.options.validate()?;
        validate_chroms(chroms)?;
        if !(3..=15).contains(&self.bed_n) {
            return Err(BBIWriteError::InvalidInput(format!(
                "Bed column count must be between 3 and 15, got {}",
                self.bed_n
            )));
        }
        for entry in entries {
            let chrom = chroms.get(entry.chrom as usize).ok_or_else(|| {
                BBIWriteError::InvalidInput(format!("Invalid chromosome id {}", entry.chrom))
            })?;
            if entry.start > entry.end || entry.end > chrom.length {
                return Err(BBIWriteError::InvalidInput(format!(
                    "Invalid interval {}:{}-{} (chromosome length {})",
                    chrom.name, entry.start, entry.end, chrom.length
                )));
            }
            if entry.rest.as_bytes().contains(&0) {
                return Err(BBIWriteError::InvalidInput(format!(
                    "Record at {}:{}-{} contains a NUL byte",
                    chrom.name, entry.start, entry.end
                )));
            }
        }
        Ok(())
    }

    /// Writes already sorted `entries`, with one data block per range in `blocks`.
    pub(crate) fn write_blocks<W: Write + Seek>(
        &self,
        out: &mut W,
        entries: &[BedEntry],
        blocks: &[Range<usize>],
        chroms: &[ChromInfo],
    ) -> Result<(), BBIWriteError> {
        self.validate(entries, chroms)?;

        let delimiter = Regex::new(&self.field_delimiter).map_err(|e| {
            BBIWriteError::InvalidInput(format!("Invalid field delimiter: {}", e))
        })?;
        let field_total = |rest: &str| -> usize {
            if rest.is_empty() {
                0
            } else {
                delimiter.split(rest).count()
            }
        };

        let autosql = match &self.autosql {
            Some(autosql) => autosql.clone(),
            None => {
                let total_fields = 3 + entries.first().map_or(0, |e| field_total(&e.rest));
                bed_autosql(self.bed_n, total_fields)
            }
        };
        let columns = parse_autosql(&autosql)
            .map_err(|e| BBIWriteError::InvalidInput(format!("Invalid autosql: {}", e)))?
            .columns;
        let field_count = u16::try_from(columns.len())
            .map_err(|_| BBIWriteError::InvalidInput("Too many autosql columns".to_owned()))?;

        let mut extra_indices = Vec::with_capacity(self.extra_index_columns.len());
        for &column in &self.extra_index_columns {
            if column < 3 || column >= field_count {
                return Err(BBIWriteError::InvalidInput(format!(
                    "Cannot index column {}: it must be between 3 and {}",
                    column,
                    field_count.saturating_sub(1)
                )));
            }
            let mut values = Vec::with_capacity(entries.len());
            for entry in entries {
                let value = if entry.rest.is_empty() {
                    None
                } else {
                    delimiter.split(&entry.rest).nth(usize::from(column) - 3)
                };
                let value = value.ok_or_else(|| {
                    BBIWriteError::InvalidInput(format!(
                        "Record at {}-{} on chromosome {} has no column {}",
                        entry.start, entry.end, entry.chrom, column
                    ))
                })?;
                if entry.field(column) != Some(value) {
                    return Err(BBIWriteError::InvalidInput(format!(
                        "Column {} of record at {}-{} on chromosome {} differs when split on tabs",
                        column, entry.start, entry.end, entry.chrom
                    )));
                }
                values.push(value);
            }
            extra_indices.push(ExtraIndexValues { column, values });
        }

        let layout = Layout {
            entries,
            blocks,
            chroms,
            autosql: &autosql,
            field_count,
            extra_indices: &extra_indices,
        };
        match self.options.endianness {
            Endianness::Big => self.write_inner::<BigEndian, W>(out, &layout),
            Endianness::Little => self.write_inner::<LittleEndian, W>(out, &layout),
        }
    }

    fn write_inner<E: ByteOrder, W: Write + Seek>(
        &self,
        out: &mut W,
        layout: &Layout<'_>,
    ) -> Result<(), BBIWriteError> {
        let entries = layout.entries;
        let options = &self.options;

        write_blank_header(out)?;

        let auto_sql_offset = out.stream_position()?;
        out.write_all(layout.autosql.as_bytes())?;
        out.write_u8(0)?;

        let total_summary_offset = out.stream_position()?;
        let summary = coverage_summary(entries.iter().map(|e| (e.chrom, e.start, e.end)));
        write_summary::<E, _>(out, &summary)?;

        let extension_offset = out.stream_position()?;
        let extra_index_count = layout.extra_indices.len();
        let extra_index_list_offset = if extra_index_count > 0 {
            extension_offset + EXTENSION_HEADER_SIZE as u64
        } else {
            0
        };
        out.write_u16::<E>(EXTENSION_HEADER_SIZE as u16)?;
        out.write_u16::<E>(extra_index_count as u16)?;
        out.write_u64::<E>(extra_index_list_offset)?;
        out.write_all(&[0; EXTENSION_HEADER_SIZE - 12])?;
        out.write_all(&vec![0; extra_index_count * EXTRA_INDEX_ENTRY_SIZE])?;

        let chromosome_tree_offset = out.stream_position()?;
        write_chrom_tree::<E, _>(out, layout.chroms, options.block_size, chromosome_tree_offset)?;

        let full_data_offset = out.stream_position()?;
        out.write_u64::<E>(entries.len() as u64)?;

        let mut compressor = new_compressor(options);
        let mut max_uncompressed = 0;
        let mut sections = Vec::with_capacity(layout.blocks.len());
        let mut index_items: Vec<Vec<(Vec<u8>, Vec<u8>)>> = vec![vec![]; extra_index_count];
        for block in layout.blocks {
            let records = &entries[block.clone()];
            let mut bytes = Vec::with_capacity(records.len() * 32);
            for entry in records {
                bytes.write_u32::<E>(entry.chrom)?;
                bytes.write_u32::<E>(entry.start)?;
                bytes.write_u32::<E>(entry.end)?;
                bytes.write_all(entry.rest.as_bytes())?;
                bytes.write_u8(0)?;
            }
            let (data, uncompressed) = encode_block(compressor.as_mut(), bytes)?;
            max_uncompressed = max_uncompressed.max(uncompressed);

            let section = Section {
                chrom: records[0].chrom,
                start: records[0].start,
                end: records.iter().map(|e| e.end).max().unwrap_or(records[0].end),
                offset: out.stream_position()?,
                size: data.len() as u64,
            };
            out.write_all(&data)?;

            for (index, items) in layout.extra_indices.iter().zip(index_items.iter_mut()) {
                let distinct: BTreeSet<&str> = index.values[block.clone()].iter().copied().collect();
                for value in distinct {
                    let mut pointer = Vec::with_capacity(16);
                    pointer.write_u64::<E>(section.offset)?;
                    pointer.write_u64::<E>(section.size)?;
                    items.push((value.as_bytes().to_vec(), pointer));
                }
            }
            sections.push(section);
        }
        debug!(
            records = entries.len(),
            blocks = sections.len(),
            max_uncompressed,
            "Wrote data blocks"
        );

        let full_index_offset = out.stream_position()?;
        let index = RTree::build(sections, options.block_size);
        index.write::<E, _>(out, full_index_offset, full_index_offset, options.items_per_slot)?;
        debug!(size = index.serialized_size(), "Wrote R-tree");

        let mut extra_index_offsets = Vec::with_capacity(extra_index_count);
        for mut items in index_items {
            items.sort_by(|a, b| a.0.cmp(&b.0));
            let key_size = items.iter().map(|(k, _)| k.len() as u32).fold(1, u32::max);
            let offset = out.stream_position()?;
            let tree = build_bptree::<E>(&items, key_size, 16, options.block_size, offset)?;
            out.write_all(&tree)?;
            extra_index_offsets.push(offset);
        }

        if extra_index_count > 0 {
            out.seek(SeekFrom::Start(extra_index_list_offset))?;
            for (index, offset) in layout.extra_indices.iter().zip(&extra_index_offsets) {
                write_extra_index_entry::<E, _>(out, index.column, *offset)?;
            }
            out.seek(SeekFrom::End(0))?;
        }

        let header = HeaderFields {
            magic: BIGBED_MAGIC,
            field_count: layout.field_count,
            defined_field_count: self.bed_n,
            chromosome_tree_offset,
            full_data_offset,
            full_index_offset,
            auto_sql_offset,
            total_summary_offset,
            uncompress_buf_size: if options.compress {
                max_uncompressed as u32
            } else {
                0
            },
            extension_offset,
        };
        write_header::<E, _>(out, &header)?;
        Ok(())
    }
}

struct Layout<'a> {
    entries: &'a [BedEntry],
    blocks: &'a [Range<usize>],
    chroms: &'a [ChromInfo],
    autosql: &'a str,
    field_count: u16,
    extra_indices: &'a [ExtraIndexValues<'a>],
}

fn write_extra_index_entry<E: ByteOrder, W: Write>(
    out: &mut W,
    column: u16,
    offset: u64,
) -> io::Result<()> {
    out.write_u16::<E>(0)?; // type
    out.write_u16::<E>(1)?; // field count
    out.write_u64::<E>(offset)?;
    out.write_u32::<E>(0)?;
    out.write_u16::<E>(column)?;
    out.write_u16::<E>(0)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn entry(chrom: u32, start: u32, end: u32) -> BedEntry {
        BedEntry::new(chrom, start, end, "")
    }

    #[test]
    fn test_write_validation() {
        let chroms = vec![ChromInfo::new(0, "chr1", 1000)];
        let write = |w: &BigBedWrite, entries: Vec<BedEntry>| {
            w.write_to(Cursor::new(vec![]), entries, &chroms).map(|_| ())
        };
        let bb = BigBedWrite::create_file("unused.bb");
        assert!(write(&bb, vec![entry(0, 10, 20)]).is_ok());
        assert!(write(&bb, vec![entry(1, 10, 20)]).is_err());
        assert!(write(&bb, vec![entry(0, 20, 10)]).is_err());
        assert!(write(&bb, vec![entry(0, 10, 1001)]).is_err());
        assert!(write(&bb, vec![BedEntry::new(0, 10, 20, "a\0b")]).is_err());

        let mut bad_bed_n = BigBedWrite::create_file("unused.bb");
        bad_bed_n.bed_n = 16;
        assert!(write(&bad_bed_n, vec![]).is_err());

        let mut bad_index = BigBedWrite::create_file("unused.bb");
        bad_index.extra_index_columns = vec![2];
        assert!(write(&bad_index, vec![BedEntry::new(0, 1, 2, "a")]).is_err());
        bad_index.extra_index_columns = vec![4];
        assert!(write(&bad_index, vec![BedEntry::new(0, 1, 2, "a")]).is_err());
        bad_index.extra_index_columns = vec![3];
        assert!(write(&bad_index, vec![BedEntry::new(0, 1, 2, "a")]).is_ok());

        let mut bad_delimiter = BigBedWrite::create_file("unused.bb");
        bad_delimiter.field_delimiter = "(".to_owned();
        assert!(write(&bad_delimiter, vec![]).is_err());
        // Indexed columns can't be found when read back split on tabs
        bad_delimiter.field_delimiter = ";".to_owned();
        bad_delimiter.extra_index_columns = vec![4];
        assert!(matches!(
            write(&bad_delimiter, vec![BedEntry::new(0, 1, 2, "a;X")]),
            Err(BBIWriteError::InvalidInput(_))
        ));
        bad_delimiter.field_delimiter = r"\s+".to_owned();
        assert!(write(&bad_delimiter, vec![BedEntry::new(0, 1, 2, "a b\tX")]).is_err());
        assert!(write(&bad_delimiter, vec![BedEntry::new(0, 1, 2, "a\tX")]).is_ok());

        let mut bad_autosql = BigBedWrite::create_file("unused.bb");
        bad_autosql.autosql = Some("table (".to_owned());
        assert!(write(&bad_autosql, vec![]).is_err());
    }

    #[test]
    fn test_write_layout() {
        let chroms = vec![ChromInfo::new(0, "chr1", 1000)];
        let mut bb = BigBedWrite::create_file("unused.bb");
        bb.options.endianness = Endianness::Little;
        let data = bb
            .write_to(Cursor::new(vec![]), vec![entry(0, 10, 20)], &chroms)
            .unwrap()
            .into_inner();
        assert_eq!(&data[0..4], &BIGBED_MAGIC.to_le_bytes());
        assert_eq!(&data[4..6], &4u16.to_le_bytes());
        // The default bed3 autosql directly follows the header
        assert!(data[64..].starts_with(b"table bed"));
    }
}
