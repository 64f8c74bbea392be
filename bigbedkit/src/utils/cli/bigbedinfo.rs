use std::error::Error;

use byteordered::Endianness;
use clap::Parser;

use super::num_with_commas;
use crate::BigBedRead;

#[derive(Clone, Debug, Parser, PartialEq)]
#[command(
    name = "info",
    about = "Gets information about a bigBed.",
    long_about = None,
)]
pub struct BigBedInfoArgs {
    /// The bigbed to get info for.
    pub bigbed: String,

    /// If set, will print out the list of chromosomes in the bigBed and their sizes.
    #[arg(long)]
    #[arg(default_value_t = false)]
    pub chroms: bool,

    /// If set, will print out the autosql spec.
    #[arg(long)]
    #[arg(default_value_t = false)]
    pub autosql: bool,
}

pub fn bigbedinfo(args: BigBedInfoArgs) -> Result<(), Box<dyn Error>> {
    let bigbed = BigBedRead::open_file(&args.bigbed)?;
    let header = bigbed.info().header;

    println!("version: {}", header.version);
    println!("fieldCount: {}", header.field_count);
    println!("definedFieldCount: {}", header.defined_field_count);
    println!(
        "isCompressed: {}",
        if header.is_compressed() { "yes" } else { "no" }
    );
    println!(
        "isSwapped: {}",
        if header.endianness == Endianness::native() { "0" } else { "1" }
    );
    println!("itemCount: {}", num_with_commas(bigbed.item_count()));

    let chroms = bigbed.chroms()?;
    println!("chromCount: {}", chroms.len());
    if args.chroms {
        for chrom in &chroms {
            println!("\t{} {} {}", chrom.name, chrom.id, chrom.length);
        }
    }

    let extra_indices = bigbed.extra_indices()?;
    println!("extraIndexCount: {}", extra_indices.len());
    for index in &extra_indices {
        match &index.name {
            Some(name) => println!("\t{} (column {})", name, index.column),
            None => println!("\tcolumn {}", index.column),
        }
    }

    if args.autosql {
        match bigbed.autosql()? {
            Some(autosql) if !autosql.is_empty() => {
                println!("as:");
                println!("{}", autosql);
            }
            _ => println!("as:  n/a"),
        }
    }

    let summary = bigbed.total_summary().unwrap_or_default();
    println!("basesCovered: {}", num_with_commas(summary.bases_covered));
    let covered = summary.bases_covered as f64;
    let mean = if covered > 0.0 { summary.sum / covered } else { 0.0 };
    println!("meanDepth: {:.6}", mean);
    println!("minDepth: {:.6}", summary.min_val);
    println!("maxDepth: {:.6}", summary.max_val);
    let std = if covered > 1.0 {
        ((summary.sum_squares - summary.sum * summary.sum / covered) / (covered - 1.0)).sqrt()
    } else {
        0.0
    };
    println!("std of depth: {:.6}", std);

    Ok(())
}
