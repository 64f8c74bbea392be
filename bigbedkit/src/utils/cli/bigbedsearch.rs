use std::error::Error;
use std::io::{self, BufWriter, Write};

use clap::{ArgGroup, Parser};

use super::bigbedtobed::write_entries;
use crate::BigBedRead;

#[derive(Clone, Debug, PartialEq, Parser)]
#[command(
    name = "search",
    about = "Finds bigBed records by the value of an indexed column.",
    long_about = None,
)]
#[command(group(ArgGroup::new("index").required(true).args(["name", "column"])))]
pub struct BigBedSearchArgs {
    /// The bigbed to search.
    pub bigbed: String,

    /// The exact value to search for.
    pub value: String,

    /// The name of the indexed column, from the autosql.
    #[arg(long)]
    pub name: Option<String>,

    /// The indexed column number (0-based, so the name column of a bed is 3).
    #[arg(long)]
    pub column: Option<u16>,

    /// The maximum number of records to output. 0 means no limit.
    #[arg(long)]
    #[arg(default_value_t = 0)]
    pub max_items: usize,
}

pub fn bigbedsearch(args: BigBedSearchArgs) -> Result<(), Box<dyn Error>> {
    let bigbed = BigBedRead::open_file(&args.bigbed)?;
    let entries = match (&args.name, args.column) {
        (Some(name), _) => bigbed.search_extra_index(name, &args.value, args.max_items)?,
        (None, Some(column)) => {
            bigbed.search_extra_index_by_column(column, &args.value, args.max_items)?
        }
        (None, None) => {
            eprintln!("One of --name or --column is required.");
            return Ok(());
        }
    };

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
