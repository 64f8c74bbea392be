use std::error::Error;
use std::fs::File;
use std::io::{self, BufWriter, Write};

use clap::Parser;

use crate::{BedEntry, BigBedRead, ChromInfo};

#[derive(Clone, Debug, PartialEq, Parser)]
#[command(
    name = "tobed",
    about = "Converts an input bigBed to a bed.",
    long_about = None,
)]
pub struct BigBedToBedArgs {
    /// the bigbed to get convert to bed
    pub big_bed: String,

    /// the path of the bed to output to (or - for stdout)
    pub bed: String,

    /// If set, restrict output to given chromosome
    #[arg(long)]
    pub chrom: Option<String>,

    /// If set, restrict output to regions greater than or equal to it
    #[arg(long)]
    pub start: Option<u32>,

    /// If set, restrict output to regions less than it
    #[arg(long)]
    pub end: Option<u32>,

    /// The maximum number of records to output per chromosome. 0 means no limit.
    #[arg(long)]
    #[arg(default_value_t = 0)]
    pub max_items: usize,
}

pub fn bigbedtobed(args: BigBedToBedArgs) -> Result<(), Box<dyn Error>> {
    if (args.start.is_some() || args.end.is_some()) && args.chrom.is_none() {
        eprintln!("Cannot specify --start or --end without specifying --chrom.");
        return Ok(());
    }

    let bigbed = BigBedRead::open_file(&args.big_bed)?;
    let chroms: Vec<ChromInfo> = match &args.chrom {
        Some(name) => match bigbed.chrom_info(name)? {
            Some(chrom) => vec![chrom],
            None => {
                eprintln!("{name} not found in file.");
                return Ok(());
            }
        },
        None => bigbed.chroms()?,
    };

    let mut out: Box<dyn Write> = if args.bed == "-" {
        Box::new(BufWriter::new(io::stdout().lock()))
    } else {
        Box::new(BufWriter::new(File::create(&args.bed)?))
    };
    for chrom in chroms {
        let start = args.start.unwrap_or(0);
        let end = args.end.unwrap_or(chrom.length);
        let entries = bigbed.get_interval_by_id(chrom.id, start, end, args.max_items)?;
        write_entries(&mut out, &chrom.name, &entries)?;
    }
    out.flush()?;

    Ok(())
}

pub(crate) fn write_entries<W: Write>(
    out: &mut W,
    chrom: &str,
    entries: &[BedEntry],
) -> io::Result<()> {
    for entry in entries {
        if entry.rest.is_empty() {
            writeln!(out, "{}\t{}\t{}", chrom, entry.start, entry.end)?;
        } else {
            writeln!(out, "{}\t{}\t{}\t{}", chrom, entry.start, entry.end, entry.rest)?;
        }
    }
    Ok(())
}
