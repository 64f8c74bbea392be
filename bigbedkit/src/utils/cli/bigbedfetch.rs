use std::error::Error;
use std::io::{self, BufWriter, Write};

use clap::Parser;

use super::bigbedtobed::write_entries;
use crate::{BigBedRandomAccess, BigBedRead};

#[derive(Clone, Debug, PartialEq, Parser)]
#[command(
    name = "fetch",
    about = "Prints bigBed records by their position in the file.",
    long_about = "Prints `size` bigBed records starting with the record at position `from` (0-based), \
    where records are ordered by chromosome and start."
)]
pub struct BigBedFetchArgs {
    /// The bigbed to read from.
    pub bigbed: String,

    /// The position of the first record to print.
    pub from: u64,

    /// The number of records to print.
    pub size: u64,

    /// Count the records of every block, rather than assuming blocks are full.
    #[arg(long)]
    #[arg(default_value_t = false)]
    pub exact: bool,
}

pub fn bigbedfetch(args: BigBedFetchArgs) -> Result<(), Box<dyn Error>> {
    let bigbed = BigBedRead::open_file(&args.bigbed)?;
    let access = if args.exact {
        BigBedRandomAccess::new_exact(&bigbed)?
    } else {
        BigBedRandomAccess::new(&bigbed)?
    };
    let entries = access.fetch(args.from, args.size)?;

    let names = bigbed.chroms()?;
    let mut out = BufWriter::new(io::stdout().lock());
    for entry in entries {
        let name = names
            .get(entry.chrom as usize)
            .map(|c| c.name.as_str())
            .ok_or_else(|| format!("Record has unknown chromosome id {}", entry.chrom))?;
        write_entries(&mut out, name, std::slice::from_ref(&entry))?;
    }
    out.flush()?;

    Ok(())
}
