use std::fs::File;
use std::io::BufReader;

use anyhow::Context;
use clap::Parser;

use crate::bed::bedparser::{read_bed, read_chrom_sizes};
use crate::BigBedWrite;

use super::BBIWriteArgs;

#[derive(Clone, Debug, PartialEq, Parser)]
#[command(
    name = "frombed",
    about = "Converts a bed to a bigBed.",
    long_about = None,
)]
pub struct BedToBigBedArgs {
    /// The bed to convert to a bigbed. Need not be sorted.
    pub bed: String,

    /// A chromosome sizes file. Each line should be have a chromosome and its size in bases, separated by whitespace.
    pub chromsizes: String,

    /// The output bigbed path
    pub output: String,

    /// Path to a file containing the custom autosql to add to the bigBed file. If not specified, the standard BED
    /// autosql will be added (based on the number of columns).
    #[arg(short = 'a', long)]
    pub autosql: Option<String>,

    /// The number of standard bed columns (3 to 15). Further columns are custom.
    #[arg(long)]
    #[arg(default_value_t = 3)]
    pub bed_n: u16,

    /// A column (0-based, at least 3) to build an extra index for. May be repeated.
    #[arg(long = "extra-index")]
    pub extra_index: Vec<u16>,

    /// The regex separating columns when extracting extra index values.
    #[arg(long)]
    #[arg(default_value = "\t")]
    pub delimiter: String,

    #[command(flatten)]
    pub write_args: BBIWriteArgs,
}

pub fn bedtobigbed(args: BedToBigBedArgs) -> anyhow::Result<()> {
    let chrom_sizes = File::open(&args.chromsizes)
        .with_context(|| format!("Failed to open chrom sizes file `{}`", &args.chromsizes))?;
    let chroms = read_chrom_sizes(BufReader::new(chrom_sizes))
        .with_context(|| format!("Failed to read chrom sizes file `{}`", &args.chromsizes))?;

    let bed = File::open(&args.bed)
        .with_context(|| format!("Failed to open bed file `{}`", &args.bed))?;
    let entries = read_bed(BufReader::new(bed), &chroms)
        .with_context(|| format!("Failed to read bed file `{}`", &args.bed))?;

    let mut outb = BigBedWrite::create_file(&args.output);
    outb.options = args.write_args.options();
    outb.bed_n = args.bed_n;
    outb.extra_index_columns = args.extra_index;
    outb.field_delimiter = args.delimiter;
    outb.autosql = match args.autosql {
        Some(file) => Some(
            std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read autosql file `{}`", file))?,
        ),
        None => None,
    };
    outb.write(entries, &chroms)
        .with_context(|| format!("Failed to write bigBed `{}`.", &args.output))?;

    Ok(())
}
