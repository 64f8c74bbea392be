use clap::Args;

use crate::bbiwrite::{BBIWriteOptions, DEFAULT_BLOCK_SIZE, DEFAULT_ITEMS_PER_SLOT};
use byteordered::Endianness;

pub mod bedtobigbed;
pub mod bigbedfetch;
pub mod bigbedinfo;
pub mod bigbedsearch;
pub mod bigbedtobed;

#[derive(Clone, Debug, PartialEq, Args)]
pub struct BBIWriteArgs {
    /// Don't use compression.
    #[arg(short = 'u', long)]
    #[arg(default_value_t = false)]
    pub uncompressed: bool,

    /// Number of items to bundle in r-tree.
    #[arg(long)]
    #[arg(default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: u32,

    /// Number of data points bundled at lowest level.
    #[arg(long)]
    #[arg(default_value_t = DEFAULT_ITEMS_PER_SLOT)]
    pub items_per_slot: u32,

    /// Write the file in big endian byte order, rather than the native order.
    #[arg(long)]
    #[arg(default_value_t = false)]
    pub big_endian: bool,
}

impl BBIWriteArgs {
    pub fn options(&self) -> BBIWriteOptions {
        BBIWriteOptions {
            compress: !self.uncompressed,
            items_per_slot: self.items_per_slot,
            block_size: self.block_size,
            endianness: if self.big_endian {
                Endianness::Big
            } else {
                Endianness::native()
            },
        }
    }
}

/// Formats a number with thousands separators, like `12,345`.
pub(crate) fn num_with_commas(num: u64) -> String {
    let digits = num.to_string();
    let mut formatted = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            formatted.push(',');
        }
        formatted.push(c);
    }
    formatted
}

#[test]
fn test_num_with_commas() {
    assert_eq!("0", num_with_commas(0));
    assert_eq!("987", num_with_commas(987));
    assert_eq!("1,000", num_with_commas(1000));
    assert_eq!("12,987", num_with_commas(12987));
    assert_eq!("123,987", num_with_commas(123987));
    assert_eq!("4,023,987", num_with_commas(4023987));
    assert_eq!("9,456,000,987", num_with_commas(9456000987));
}
