/*!
Ordinal access to the records of a bigBed: "give me records `[from, from + size)`"
in `(chromosome, start)` order, without knowing their coordinates.

The index maps the ordinal of the first record of every data block to that
block. Building it exactly needs every block to be decompressed, so by default
interior blocks of a chromosome are assumed to be full and only blocks at
chromosome boundaries are counted, plus the first interior block, which must
hold exactly `items_per_slot` records. Interior blocks can then only be
overestimated, so the total matching the record count stored in the file
means every one of them is full. Otherwise every block is counted.
*/

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use tracing::{debug, warn};

use crate::bbi::bigbedread::{count_bed_records, decode_bed_block, BigBedRead};
use crate::bbi::cirtree::CirTreeLeaf;
use crate::bbi::BedEntry;
use crate::bbiread::{for_each_block, BBIReadError, Block};
use crate::utils::file::read_at::ReadAt;

pub struct BigBedRandomAccess<'a, R> {
    bigbed: &'a BigBedRead<R>,
    /// The ordinal of the first record in each block
    idx_to_block: BTreeMap<u64, Block>,
    item_count: u64,
}

impl<'a, R: ReadAt> BigBedRandomAccess<'a, R> {
    /// Builds the index, assuming interior blocks of a chromosome are full.
    pub fn new(bigbed: &'a BigBedRead<R>) -> Result<Self, BBIReadError> {
        let expected = bigbed.item_count();
        match build_estimated(bigbed)? {
            Some((idx_to_block, item_count)) if item_count == expected => {
                debug!(blocks = idx_to_block.len(), item_count, "Built ordinal index");
                Ok(BigBedRandomAccess {
                    bigbed,
                    idx_to_block,
                    item_count,
                })
            }
            Some((_, estimated)) => {
                warn!(estimated, expected, "Blocks are not uniformly full, counting every block");
                Self::new_exact(bigbed)
            }
            None => {
                warn!(expected, "Interior blocks are not full, counting every block");
                Self::new_exact(bigbed)
            }
        }
    }

    /// Builds the index by decompressing and counting every block.
    pub fn new_exact(bigbed: &'a BigBedRead<R>) -> Result<Self, BBIReadError> {
        let mut blocks = vec![];
        bigbed
            .cir_tree()?
            .traverse_leaves(bigbed.reader(), |leaf| {
                blocks.push(leaf.block);
                Ok(())
            })?;

        let mut idx_to_block = BTreeMap::new();
        let mut item_count = 0;
        for block in blocks {
            let count = count_block(bigbed, block)?;
            if count > 0 {
                idx_to_block.insert(item_count, block);
            }
            item_count += count;
        }
        if item_count != bigbed.item_count() {
            return Err(BBIReadError::InvalidFile(format!(
                "Blocks hold {} records, but the file declares {}",
                item_count,
                bigbed.item_count()
            )));
        }
        debug!(blocks = idx_to_block.len(), item_count, "Built exact ordinal index");
        Ok(BigBedRandomAccess {
            bigbed,
            idx_to_block,
            item_count,
        })
    }

    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    /// Gets `size` records, starting with the record at ordinal `from`.
    pub fn fetch(&self, from: u64, size: u64) -> Result<Vec<BedEntry>, BBIReadError> {
        let out_of_bounds = BBIReadError::OutOfBounds {
            from,
            size,
            count: self.item_count,
        };
        match from.checked_add(size) {
            Some(to) if to <= self.item_count => {}
            _ => return Err(out_of_bounds),
        }
        if size == 0 {
            return Ok(vec![]);
        }

        let (&first_idx, _) = self
            .idx_to_block
            .range(..=from)
            .next_back()
            .ok_or(out_of_bounds)?;
        let blocks: Vec<Block> = self
            .idx_to_block
            .range(first_idx..from + size)
            .map(|(_, block)| *block)
            .collect();

        let endianness = self.bigbed.info.header.endianness;
        let mut skip = from - first_idx;
        let mut entries = Vec::with_capacity(size as usize);
        for_each_block(
            self.bigbed.reader(),
            &self.bigbed.info.header,
            blocks,
            |_, data| {
                decode_bed_block(data, endianness, |entry| {
                    if skip > 0 {
                        skip -= 1;
                        return ControlFlow::Continue(());
                    }
                    entries.push(entry);
                    if entries.len() as u64 == size {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                })
            },
        )?;
        if entries.len() as u64 != size {
            return Err(BBIReadError::InvalidFile(format!(
                "Expected {} records from ordinal {}, found {}",
                size,
                from,
                entries.len()
            )));
        }
        Ok(entries)
    }
}

fn count_block<R: ReadAt>(bigbed: &BigBedRead<R>, block: Block) -> Result<u64, BBIReadError> {
    let mut count = 0;
    for_each_block(bigbed.reader(), &bigbed.info.header, vec![block], |_, data| {
        count = count_bed_records(data)?;
        Ok(ControlFlow::Break(()))
    })?;
    Ok(count)
}

/// One pass over the leaves. A block is counted exactly when it is the last
/// block of its chromosome (or of the file); the other blocks are assumed to
/// be full. Returns `None` if the first of those isn't.
fn build_estimated<R: ReadAt>(
    bigbed: &BigBedRead<R>,
) -> Result<Option<(BTreeMap<u64, Block>, u64)>, BBIReadError> {
    let cir_tree = bigbed.cir_tree()?;
    let items_per_slot = u64::from(cir_tree.header.items_per_slot);
    let mut idx_to_block = BTreeMap::new();
    let mut item_count = 0u64;
    let mut checked_full = false;
    let mut partial = false;
    let mut previous: Option<CirTreeLeaf> = None;
    cir_tree.traverse_leaves(bigbed.reader(), |leaf| {
        if partial {
            return Ok(());
        }
        if let Some(prev) = previous.replace(*leaf) {
            let same_chrom = prev.start_chrom_ix == prev.end_chrom_ix
                && prev.end_chrom_ix == leaf.start_chrom_ix;
            let count = if !same_chrom {
                count_block(bigbed, prev.block)?
            } else if checked_full {
                items_per_slot
            } else {
                let count = count_block(bigbed, prev.block)?;
                if count != items_per_slot {
                    partial = true;
                    return Ok(());
                }
                checked_full = true;
                count
            };
            item_count += count;
        }
        idx_to_block.insert(item_count, leaf.block);
        Ok(())
    })?;
    if partial {
        return Ok(None);
    }
    if let Some(last) = previous {
        item_count += count_block(bigbed, last.block)?;
    }
    Ok(Some((idx_to_block, item_count)))
}
