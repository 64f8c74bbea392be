//! Bulk building and writing of the R-tree index over data blocks.
//!
//! Nodes are stored per level in flat arrays; a node refers to its children
//! by an index range into the level below (or into the sections, for leaves).

use std::io::{self, Write};
use std::ops::Range;

use byteorder::{ByteOrder, WriteBytesExt};
use tracing::debug;

use crate::bbi::CIR_TREE_MAGIC;

const HEADER_SIZE: u64 = 48;
const NODE_HEADER_SIZE: u64 = 4;
const LEAF_ITEM_SIZE: u64 = 32;
const NON_LEAF_ITEM_SIZE: u64 = 24;

/// A written data block and the region it covers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Section {
    pub(crate) chrom: u32,
    pub(crate) start: u32,
    pub(crate) end: u32,
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct BoundingBox {
    pub(crate) start_chrom_ix: u32,
    pub(crate) start_base: u32,
    pub(crate) end_chrom_ix: u32,
    pub(crate) end_base: u32,
}

impl BoundingBox {
    fn of_section(section: &Section) -> Self {
        BoundingBox {
            start_chrom_ix: section.chrom,
            start_base: section.start,
            end_chrom_ix: section.chrom,
            end_base: section.end,
        }
    }

    /// The smallest box covering both, comparing each corner as a (chrom, base) pair.
    fn union(self, other: BoundingBox) -> BoundingBox {
        let (start_chrom_ix, start_base) = (self.start_chrom_ix, self.start_base)
            .min((other.start_chrom_ix, other.start_base));
        let (end_chrom_ix, end_base) =
            (self.end_chrom_ix, self.end_base).max((other.end_chrom_ix, other.end_base));
        BoundingBox {
            start_chrom_ix,
            start_base,
            end_chrom_ix,
            end_base,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RTreeNode {
    pub(crate) bbox: BoundingBox,
    pub(crate) children: Range<usize>,
}

#[derive(Debug)]
pub(crate) struct RTree {
    block_size: u32,
    sections: Vec<Section>,
    /// Root level first. Children of the last level are indices into `sections`.
    levels: Vec<Vec<RTreeNode>>,
}

fn group(boxes: &[BoundingBox], block_size: usize) -> Vec<RTreeNode> {
    boxes
        .chunks(block_size)
        .enumerate()
        .map(|(i, chunk)| {
            let first = i * block_size;
            let bbox = chunk[1..].iter().fold(chunk[0], |acc, b| acc.union(*b));
            RTreeNode {
                bbox,
                children: first..first + chunk.len(),
            }
        })
        .collect()
}

impl RTree {
    /// Builds the tree bottom-up, grouping at most `block_size` children per node.
    ///
    /// There is always at least one leaf node above the sections, even for a
    /// single section. No sections gives a tree without nodes.
    pub(crate) fn build(sections: Vec<Section>, block_size: u32) -> RTree {
        let bs = block_size.max(2) as usize;
        let mut levels = vec![];
        if !sections.is_empty() {
            let boxes: Vec<BoundingBox> = sections.iter().map(BoundingBox::of_section).collect();
            let mut level = group(&boxes, bs);
            while level.len() > 1 {
                let boxes: Vec<BoundingBox> = level.iter().map(|n| n.bbox).collect();
                let parents = group(&boxes, bs);
                levels.push(level);
                level = parents;
            }
            levels.push(level);
            levels.reverse();
        }
        debug!(
            sections = sections.len(),
            levels = levels.len(),
            "Built R-tree"
        );
        RTree {
            block_size: bs as u32,
            sections,
            levels,
        }
    }

    pub(crate) fn root(&self) -> Option<&RTreeNode> {
        self.levels.first().and_then(|l| l.first())
    }

    fn node_size(&self, level: usize) -> u64 {
        let item_size = if level + 1 == self.levels.len() {
            LEAF_ITEM_SIZE
        } else {
            NON_LEAF_ITEM_SIZE
        };
        NODE_HEADER_SIZE + u64::from(self.block_size) * item_size
    }

    /// Size in bytes of the serialized tree, including its header.
    pub(crate) fn serialized_size(&self) -> u64 {
        HEADER_SIZE
            + self
                .levels
                .iter()
                .enumerate()
                .map(|(i, level)| level.len() as u64 * self.node_size(i))
                .sum::<u64>()
    }

    /// Writes the tree, assuming its first byte lands at `index_offset`.
    ///
    /// Every level is written contiguously, root first, so the offset of any
    /// node is known from the per-level node counts before writing.
    pub(crate) fn write<E: ByteOrder, W: Write>(
        &self,
        out: &mut W,
        index_offset: u64,
        end_file_offset: u64,
        items_per_slot: u32,
    ) -> io::Result<()> {
        let root_box = self.root().map(|r| r.bbox).unwrap_or(BoundingBox {
            start_chrom_ix: 0,
            start_base: 0,
            end_chrom_ix: 0,
            end_base: 0,
        });
        out.write_u32::<E>(CIR_TREE_MAGIC)?;
        out.write_u32::<E>(self.block_size)?;
        out.write_u64::<E>(self.sections.len() as u64)?;
        out.write_u32::<E>(root_box.start_chrom_ix)?;
        out.write_u32::<E>(root_box.start_base)?;
        out.write_u32::<E>(root_box.end_chrom_ix)?;
        out.write_u32::<E>(root_box.end_base)?;
        out.write_u64::<E>(end_file_offset)?;
        out.write_u32::<E>(items_per_slot)?;
        out.write_u32::<E>(0)?;

        let mut level_offsets = Vec::with_capacity(self.levels.len());
        let mut offset = index_offset + HEADER_SIZE;
        for (i, level) in self.levels.iter().enumerate() {
            level_offsets.push(offset);
            offset += level.len() as u64 * self.node_size(i);
        }

        let leaf_level = self.levels.len().saturating_sub(1);
        for (i, level) in self.levels.iter().enumerate() {
            let is_leaf = i == leaf_level;
            for node in level {
                out.write_u8(is_leaf as u8)?;
                out.write_u8(0)?;
                out.write_u16::<E>(node.children.len() as u16)?;
                if is_leaf {
                    for section in &self.sections[node.children.clone()] {
                        out.write_u32::<E>(section.chrom)?;
                        out.write_u32::<E>(section.start)?;
                        out.write_u32::<E>(section.chrom)?;
                        out.write_u32::<E>(section.end)?;
                        out.write_u64::<E>(section.offset)?;
                        out.write_u64::<E>(section.size)?;
                    }
                } else {
                    for child in node.children.clone() {
                        let bbox = self.levels[i + 1][child].bbox;
                        out.write_u32::<E>(bbox.start_chrom_ix)?;
                        out.write_u32::<E>(bbox.start_base)?;
                        out.write_u32::<E>(bbox.end_chrom_ix)?;
                        out.write_u32::<E>(bbox.end_base)?;
                        let child_offset =
                            level_offsets[i + 1] + child as u64 * self.node_size(i + 1);
                        out.write_u64::<E>(child_offset)?;
                    }
                }
                let item_size = if is_leaf {
                    LEAF_ITEM_SIZE
                } else {
                    NON_LEAF_ITEM_SIZE
                };
                let padding = (self.block_size as usize - node.children.len()) * item_size as usize;
                out.write_all(&vec![0u8; padding])?;
            }
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "read"))]
mod tests {
    use byteorder::{BigEndian, LittleEndian};
    use byteordered::Endianness;

    use super::*;
    use crate::bbi::cirtree::CirTree;
    use crate::bbiread::Block;

    fn sections(count: usize) -> Vec<Section> {
        // Three chromosomes, 10 base blocks with a gap of 5
        (0..count)
            .map(|i| Section {
                chrom: (i / 10) as u32,
                start: (i % 10) as u32 * 15,
                end: (i % 10) as u32 * 15 + 10,
                offset: i as u64 * 100,
                size: 100,
            })
            .collect()
    }

    fn write_tree(tree: &RTree, base: usize, big_endian: bool) -> Vec<u8> {
        let mut data = vec![0u8; base];
        if big_endian {
            tree.write::<BigEndian, _>(&mut data, base as u64, 1234, 7).unwrap();
        } else {
            tree.write::<LittleEndian, _>(&mut data, base as u64, 1234, 7).unwrap();
        }
        assert_eq!((data.len() - base) as u64, tree.serialized_size());
        data
    }

    #[test]
    fn test_build_shape() {
        let tree = RTree::build(sections(1), 4);
        assert_eq!(tree.levels.len(), 1);
        assert_eq!(tree.levels[0][0].children, 0..1);

        let tree = RTree::build(sections(30), 4);
        // 30 sections -> 8 leaves -> 2 -> 1
        let sizes: Vec<usize> = tree.levels.iter().map(|l| l.len()).collect();
        assert_eq!(sizes, vec![1, 2, 8]);
        let root = tree.root().unwrap();
        assert_eq!(
            root.bbox,
            BoundingBox {
                start_chrom_ix: 0,
                start_base: 0,
                end_chrom_ix: 2,
                end_base: 145,
            }
        );
        // Every parent box covers its children
        for (i, level) in tree.levels.iter().enumerate().skip(1) {
            for (c, node) in level.iter().enumerate() {
                let parent = tree.levels[i - 1]
                    .iter()
                    .find(|p| p.children.contains(&c))
                    .unwrap();
                assert_eq!(parent.bbox.union(node.bbox), parent.bbox);
            }
        }

        let empty = RTree::build(vec![], 4);
        assert!(empty.root().is_none());
    }

    #[test]
    fn test_rtree_roundtrip() {
        let sections = sections(30);
        for block_size in [2, 3, 4, 256] {
            for big_endian in [false, true] {
                let tree = RTree::build(sections.clone(), block_size);
                let data = write_tree(&tree, 10, big_endian);
                let endianness = if big_endian {
                    Endianness::Big
                } else {
                    Endianness::Little
                };
                let cir_tree = CirTree::open(&data, 10, endianness).unwrap();
                assert_eq!(cir_tree.header.item_count, 30);
                assert_eq!(cir_tree.header.end_file_offset, 1234);
                assert_eq!(cir_tree.header.items_per_slot, 7);

                let mut leaves = vec![];
                cir_tree
                    .traverse_leaves(&data, |leaf| {
                        leaves.push(leaf.block);
                        Ok(())
                    })
                    .unwrap();
                let expected: Vec<Block> = sections
                    .iter()
                    .map(|s| Block {
                        offset: s.offset,
                        size: s.size,
                    })
                    .collect();
                assert_eq!(leaves, expected);

                // chrom 1, bases 20..40 overlaps sections 11 [15,25) and 12 [30,40)
                let blocks = cir_tree.search(&data, 1, 20, 40).unwrap();
                assert_eq!(blocks, vec![expected[11], expected[12]]);

                // Falls in the gap between two sections
                assert!(cir_tree.search(&data, 1, 10, 15).unwrap().is_empty());
                assert!(cir_tree.search(&data, 3, 0, 1000).unwrap().is_empty());
                assert_eq!(
                    cir_tree.search(&data, 2, 0, 1000).unwrap(),
                    expected[20..30].to_vec()
                );
            }
        }
    }

    #[test]
    fn test_empty_rtree() {
        let tree = RTree::build(vec![], 256);
        let data = write_tree(&tree, 0, false);
        assert_eq!(data.len(), 48);
        let cir_tree = CirTree::open(&data, 0, Endianness::Little).unwrap();
        assert_eq!(cir_tree.header.item_count, 0);
        assert!(cir_tree.search(&data, 0, 0, u32::MAX).unwrap().is_empty());
        cir_tree
            .traverse_leaves(&data, |_| panic!("empty tree has no leaves"))
            .unwrap();
    }
}
