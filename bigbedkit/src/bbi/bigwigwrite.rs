use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::ops::Range;
use std::path::PathBuf;

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use byteordered::Endianness;
use tracing::debug;

use crate::bbi::rtreebuild::{RTree, Section};
use crate::bbi::{ChromInfo, Summary, Value, BIGWIG_MAGIC};
use crate::bbiwrite::{
    encode_block, group_blocks, new_compressor, validate_chroms, write_blank_header,
    write_chrom_tree, write_header, write_summary, BBIWriteError, BBIWriteOptions, HeaderFields,
};

const BEDGRAPH_SECTION: u8 = 1;

/// The main entrypoint for writing bigWig files.
///
/// Values are written as bedGraph sections, with no zoom levels.
pub struct BigWigWrite {
    pub path: PathBuf,
    pub options: BBIWriteOptions,
}

impl BigWigWrite {
    pub fn create_file(path: impl Into<PathBuf>) -> Self {
        BigWigWrite {
            path: path.into(),
            options: BBIWriteOptions::default(),
        }
    }

    /// Sorts `values` by chromosome and start, and writes them to `path`.
    ///
    /// Each value is paired with the id of its chromosome.
    pub fn write(self, values: Vec<(u32, Value)>, chroms: &[ChromInfo]) -> Result<(), BBIWriteError> {
        let file = BufWriter::new(File::create(&self.path)?);
        let mut file = self.write_to(file, values, chroms)?;
        file.flush()?;
        Ok(())
    }

    /// Like [`BigWigWrite::write`], but writes to any seekable output and returns it.
    pub fn write_to<W: Write + Seek>(
        &self,
        mut out: W,
        mut values: Vec<(u32, Value)>,
        chroms: &[ChromInfo],
    ) -> Result<W, BBIWriteError> {
        self.options.validate()?;
        if self.options.items_per_slot > u32::from(u16::MAX) {
            return Err(BBIWriteError::InvalidInput(format!(
                "bigWig sections hold at most {} items, got {} items per slot",
                u16::MAX,
                self.options.items_per_slot
            )));
        }
        validate_chroms(chroms)?;
        for (chrom, value) in &values {
            let info = chroms.get(*chrom as usize).ok_or_else(|| {
                BBIWriteError::InvalidInput(format!("Invalid chromosome id {}", chrom))
            })?;
            if value.start >= value.end || value.end > info.length {
                return Err(BBIWriteError::InvalidInput(format!(
                    "Invalid interval {}:{}-{} (chromosome length {})",
                    info.name, value.start, value.end, info.length
                )));
            }
        }

        values.sort_by_key(|(chrom, value)| (*chrom, value.start));
        let sections = group_blocks(&values, self.options.items_per_slot, |(chrom, _)| *chrom);
        match self.options.endianness {
            Endianness::Big => self.write_inner::<BigEndian, W>(&mut out, &values, &sections, chroms)?,
            Endianness::Little => {
                self.write_inner::<LittleEndian, W>(&mut out, &values, &sections, chroms)?
            }
        }
        Ok(out)
    }

    fn write_inner<E: ByteOrder, W: Write + Seek>(
        &self,
        out: &mut W,
        values: &[(u32, Value)],
        sections: &[Range<usize>],
        chroms: &[ChromInfo],
    ) -> Result<(), BBIWriteError> {
        let options = &self.options;
        write_blank_header(out)?;

        let total_summary_offset = out.stream_position()?;
        write_summary::<E, _>(out, &value_summary(values))?;

        let chromosome_tree_offset = out.stream_position()?;
        write_chrom_tree::<E, _>(out, chroms, options.block_size, chromosome_tree_offset)?;

        let full_data_offset = out.stream_position()?;
        out.write_u64::<E>(sections.len() as u64)?;

        let mut compressor = new_compressor(options);
        let mut max_uncompressed = 0;
        let mut index = Vec::with_capacity(sections.len());
        for range in sections {
            let items = &values[range.clone()];
            let chrom = items[0].0;
            let start = items[0].1.start;
            let end = items.iter().map(|(_, v)| v.end).max().unwrap_or(start);

            let mut bytes = Vec::with_capacity(24 + items.len() * 12);
            bytes.write_u32::<E>(chrom)?;
            bytes.write_u32::<E>(start)?;
            bytes.write_u32::<E>(end)?;
            bytes.write_u32::<E>(0)?; // item step
            bytes.write_u32::<E>(0)?; // item span
            bytes.write_u8(BEDGRAPH_SECTION)?;
            bytes.write_u8(0)?;
            bytes.write_u16::<E>(items.len() as u16)?;
            for (_, value) in items {
                bytes.write_u32::<E>(value.start)?;
                bytes.write_u32::<E>(value.end)?;
                bytes.write_f32::<E>(value.value)?;
            }

            let (data, uncompressed) = encode_block(compressor.as_mut(), bytes)?;
            max_uncompressed = max_uncompressed.max(uncompressed);
            index.push(Section {
                chrom,
                start,
                end,
                offset: out.stream_position()?,
                size: data.len() as u64,
            });
            out.write_all(&data)?;
        }
        debug!(values = values.len(), sections = index.len(), "Wrote bigWig sections");

        let full_index_offset = out.stream_position()?;
        let tree = RTree::build(index, options.block_size);
        tree.write::<E, _>(out, full_index_offset, full_index_offset, options.items_per_slot)?;
        debug!(size = tree.serialized_size(), "Wrote R-tree");

        let header = HeaderFields {
            magic: BIGWIG_MAGIC,
            chromosome_tree_offset,
            full_data_offset,
            full_index_offset,
            total_summary_offset,
            uncompress_buf_size: if options.compress {
                max_uncompressed as u32
            } else {
                0
            },
            ..Default::default()
        };
        write_header::<E, _>(out, &header)?;
        Ok(())
    }
}

/// Summarizes values weighted by their length. No values gives all zeros.
fn value_summary(values: &[(u32, Value)]) -> Summary {
    let mut summary = Summary::default();
    let mut first = true;
    for (_, value) in values {
        let size = u64::from(value.end - value.start);
        let val = f64::from(value.value);
        if first {
            summary.min_val = val;
            summary.max_val = val;
            first = false;
        } else {
            summary.min_val = summary.min_val.min(val);
            summary.max_val = summary.max_val.max(val);
        }
        summary.bases_covered += size;
        summary.sum += val * size as f64;
        summary.sum_squares += val * val * size as f64;
    }
    summary
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn v(start: u32, end: u32, value: f32) -> Value {
        Value { start, end, value }
    }

    #[test]
    fn test_value_summary() {
        let summary = value_summary(&[(0, v(0, 10, 2.0)), (0, v(10, 15, -1.0))]);
        assert_eq!(summary.bases_covered, 15);
        assert_eq!(summary.min_val, -1.0);
        assert_eq!(summary.max_val, 2.0);
        assert_eq!(summary.sum, 15.0);
        assert_eq!(summary.sum_squares, 45.0);
        assert_eq!(value_summary(&[]), Summary::default());
    }

    #[test]
    fn test_write_validation() {
        let chroms = vec![ChromInfo::new(0, "chr1", 100)];
        let bw = BigWigWrite::create_file("unused.bw");
        let write = |bw: &BigWigWrite, values| bw.write_to(Cursor::new(vec![]), values, &chroms).map(|_| ());
        assert!(write(&bw, vec![(0, v(0, 100, 1.0))]).is_ok());
        assert!(write(&bw, vec![(0, v(10, 10, 1.0))]).is_err());
        assert!(write(&bw, vec![(0, v(10, 101, 1.0))]).is_err());
        assert!(write(&bw, vec![(1, v(0, 1, 1.0))]).is_err());

        let mut too_many = BigWigWrite::create_file("unused.bw");
        too_many.options.items_per_slot = 70_000;
        assert!(write(&too_many, vec![]).is_err());
    }
}
