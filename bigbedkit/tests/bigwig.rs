use std::error::Error;
use std::io::Cursor;

use byteordered::Endianness;

use bigbedkit::{BBIReadError, BedEntry, BigBedWrite, BigWigRead, BigWigWrite, ChromInfo, Value};

fn v(start: u32, end: u32, value: f32) -> Value {
    Value { start, end, value }
}

#[test]
fn bigwig_roundtrip_test() -> Result<(), Box<dyn Error>> {
    let chroms = vec![ChromInfo::new(0, "chr1", 10_000), ChromInfo::new(1, "chr2", 5_000)];
    let mut values = vec![];
    for i in 0..500u32 {
        values.push((0, v(i * 20, i * 20 + 10, i as f32 * 0.5)));
    }
    values.push((1, v(100, 200, -3.5)));

    for (compress, endianness) in [(true, Endianness::Little), (false, Endianness::Big)] {
        let tempfile = tempfile::NamedTempFile::new()?;
        let mut outb = BigWigWrite::create_file(tempfile.path());
        outb.options.compress = compress;
        outb.options.endianness = endianness;
        outb.options.items_per_slot = 64;
        outb.write(values.clone(), &chroms)?;

        let bigwig = BigWigRead::open_file(tempfile.path())?;
        assert_eq!(bigwig.info().header.endianness, endianness);
        assert_eq!(bigwig.chroms()?, chroms);
        // 8 sections on chr1, 1 on chr2
        assert_eq!(bigwig.info().data_count, 9);

        let all = bigwig.get_interval("chr1", 0, 10_000, 0)?;
        assert_eq!(all.len(), 500);
        assert_eq!(all[3], v(60, 70, 1.5));

        let some = bigwig.get_interval("chr1", 95, 125, 0)?;
        assert_eq!(some, vec![v(100, 110, 2.5), v(120, 130, 3.0)]);
        // Values ending exactly at the query start don't overlap
        assert!(bigwig.get_interval("chr1", 10, 20, 0)?.is_empty());
        assert_eq!(bigwig.get_interval("chr1", 0, 10_000, 3)?.len(), 3);
        assert_eq!(bigwig.get_interval("chr2", 0, 5_000, 0)?, vec![v(100, 200, -3.5)]);

        let summary = bigwig.total_summary().unwrap();
        assert_eq!(summary.bases_covered, 5_100);
        assert_eq!(summary.min_val, -3.5);
        assert_eq!(summary.max_val, 249.5);
    }
    Ok(())
}

#[test]
fn bigwig_errors_test() -> Result<(), Box<dyn Error>> {
    let chroms = vec![ChromInfo::new(0, "chr1", 1000)];
    let bigwig = BigWigWrite::create_file("unused.bw")
        .write_to(Cursor::new(vec![]), vec![(0, v(0, 10, 1.0))], &chroms)?
        .into_inner();
    let bigwig = BigWigRead::open(bigwig)?;
    assert!(matches!(
        bigwig.get_interval("chr2", 0, 10, 0),
        Err(BBIReadError::InvalidChromosome(_))
    ));

    let bigbed = BigBedWrite::create_file("unused.bb")
        .write_to(Cursor::new(vec![]), vec![BedEntry::new(0, 0, 10, "")], &chroms)?
        .into_inner();
    assert!(matches!(BigWigRead::open(bigbed), Err(BBIReadError::NotABigWig)));
    Ok(())
}
