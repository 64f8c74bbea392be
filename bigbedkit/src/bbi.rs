#[cfg(feature = "read")]
pub(crate) mod bbiread;
#[cfg(feature = "write")]
pub(crate) mod bbiwrite;
#[cfg(feature = "read")]
pub(crate) mod bigbedread;
#[cfg(feature = "write")]
pub(crate) mod bigbedwrite;
#[cfg(feature = "read")]
pub(crate) mod bigwigread;
#[cfg(feature = "write")]
pub(crate) mod bigwigwrite;
#[cfg(any(feature = "read", feature = "write"))]
pub(crate) mod bptree;
#[cfg(feature = "read")]
pub(crate) mod cirtree;
#[cfg(feature = "read")]
pub(crate) mod randomaccess;
#[cfg(feature = "write")]
pub(crate) mod rtreebuild;
#[cfg(feature = "write")]
pub mod summary;

pub(crate) const BIGWIG_MAGIC: u32 = 0x888F_FC26;
pub(crate) const BIGBED_MAGIC: u32 = 0x8789_F2EB;

pub(crate) const CIR_TREE_MAGIC: u32 = 0x2468_ACE0;
pub(crate) const CHROM_TREE_MAGIC: u32 = 0x78CA_8C91;

pub(crate) const BBI_VERSION: u16 = 4;

/// Information on a chromosome in a bbi file
///
/// The `id` is dense: in a file with `n` chromosomes the ids are `0..n`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChromInfo {
    pub id: u32,
    pub name: String,
    pub length: u32,
}

impl ChromInfo {
    pub fn new(id: u32, name: impl Into<String>, length: u32) -> Self {
        ChromInfo {
            id,
            name: name.into(),
            length,
        }
    }
}

/// A summary of a section of data (may be an entire file)
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Summary {
    pub bases_covered: u64,
    pub min_val: f64,
    pub max_val: f64,
    pub sum: f64,
    pub sum_squares: f64,
}

impl Default for Summary {
    fn default() -> Self {
        Summary {
            bases_covered: 0,
            min_val: 0.0,
            max_val: 0.0,
            sum: 0.0,
            sum_squares: 0.0,
        }
    }
}

/// Represents a single value in a bigWig file
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Value {
    pub start: u32,
    pub end: u32,
    pub value: f32,
}

/// Represents a single entry in a bigBed file
///
/// `rest` holds the tab-delimited columns after `chromEnd`, without the
/// terminating NUL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BedEntry {
    pub chrom: u32,
    pub start: u32,
    pub end: u32,
    pub rest: String,
}

impl BedEntry {
    pub fn new(chrom: u32, start: u32, end: u32, rest: impl Into<String>) -> Self {
        BedEntry {
            chrom,
            start,
            end,
            rest: rest.into(),
        }
    }

    /// The value of bed column `column` (0-based, so `3` is the first column of `rest`).
    pub fn field(&self, column: u16) -> Option<&str> {
        let index = usize::from(column).checked_sub(3)?;
        if self.rest.is_empty() {
            return None;
        }
        self.rest.split('\t').nth(index)
    }
}

/// The type of bbi file
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BBIFile {
    BigWig,
    BigBed,
}

#[cfg(feature = "read")]
pub use bbiread::*;
#[cfg(feature = "write")]
pub use bbiwrite::*;
#[cfg(feature = "read")]
pub use bigbedread::*;
#[cfg(feature = "write")]
pub use bigbedwrite::*;
#[cfg(feature = "read")]
pub use bigwigread::*;
#[cfg(feature = "write")]
pub use bigwigwrite::*;
#[cfg(feature = "read")]
pub use randomaccess::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bed_entry_field() {
        let entry = BedEntry::new(0, 10, 20, "name1\t500\t+");
        assert_eq!(entry.field(3), Some("name1"));
        assert_eq!(entry.field(5), Some("+"));
        assert_eq!(entry.field(6), None);
        assert_eq!(entry.field(2), None);

        let bed3 = BedEntry::new(0, 10, 20, "");
        assert_eq!(bed3.field(3), None);
    }
}
