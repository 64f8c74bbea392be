use std::error::Error;
use std::io::Cursor;

use byteordered::Endianness;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use bigbedkit::{
    BBIReadError, BedEntry, BigBedRandomAccess, BigBedRead, BigBedWrite, BigWigWrite, ChromInfo,
    Summary, Value,
};

fn write_in_memory(outb: &BigBedWrite, entries: Vec<BedEntry>, chroms: &[ChromInfo]) -> Vec<u8> {
    outb.write_to(Cursor::new(vec![]), entries, chroms)
        .unwrap()
        .into_inner()
}

fn spans(entries: &[BedEntry]) -> Vec<(u32, u32)> {
    entries.iter().map(|e| (e.start, e.end)).collect()
}

#[test]
fn range_query_and_fetch_test() -> Result<(), Box<dyn Error>> {
    let chroms = vec![ChromInfo::new(0, "chr1", 10_000)];
    let entries = vec![
        BedEntry::new(0, 200, 300, ""),
        BedEntry::new(0, 100, 110, ""),
        BedEntry::new(0, 1, 10, ""),
        BedEntry::new(0, 105, 110, ""),
    ];
    for items_per_slot in [1, 2, 512] {
        let mut outb = BigBedWrite::create_file("unused.bb");
        outb.options.items_per_slot = items_per_slot;
        let bigbed = BigBedRead::open(write_in_memory(&outb, entries.clone(), &chroms))?;

        let found = bigbed.get_interval("chr1", 0, 115, 0)?;
        assert_eq!(spans(&found), vec![(1, 10), (100, 110), (105, 110)]);

        let capped = bigbed.get_interval("chr1", 0, 115, 2)?;
        assert_eq!(spans(&capped), vec![(1, 10), (100, 110)]);

        let access = BigBedRandomAccess::new(&bigbed)?;
        assert_eq!(access.item_count(), 4);
        assert_eq!(spans(&access.fetch(1, 2)?), vec![(100, 110), (105, 110)]);
    }
    Ok(())
}

#[test]
fn total_summary_test() -> Result<(), Box<dyn Error>> {
    let chroms = vec![ChromInfo::new(0, "chr1", 1000)];
    let mut entries = vec![
        BedEntry::new(0, 100, 200, ""),
        BedEntry::new(0, 110, 120, ""),
        BedEntry::new(0, 900, 950, ""),
    ];
    let expected = Summary {
        bases_covered: 150,
        min_val: 1.0,
        max_val: 2.0,
        sum: 160.0,
        sum_squares: 180.0,
    };

    let outb = BigBedWrite::create_file("unused.bb");
    let bigbed = BigBedRead::open(write_in_memory(&outb, entries.clone(), &chroms))?;
    assert_eq!(bigbed.total_summary(), Some(expected));

    entries.reverse();
    let bigbed = BigBedRead::open(write_in_memory(&outb, entries, &chroms))?;
    assert_eq!(bigbed.total_summary(), Some(expected));
    Ok(())
}

#[test]
fn overlap_correctness_test() -> Result<(), Box<dyn Error>> {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let chroms = vec![ChromInfo::new(0, "chr1", 5_000), ChromInfo::new(1, "chr2", 5_000)];

    let mut entries = vec![];
    for i in 0..2_000 {
        let chrom = rng.random_range(0..2u32);
        let start = rng.random_range(0..4_900u32);
        // Some zero-length records, including some at the very start
        let len = if i % 10 == 0 { 0 } else { rng.random_range(1..100u32) };
        let start = if i % 97 == 0 { 0 } else { start };
        entries.push(BedEntry::new(chrom, start, start + len, format!("r{}", i)));
    }
    let mut expected_order = entries.clone();
    expected_order.sort_by_key(|e| (e.chrom, e.start));

    for compress in [true, false] {
        let mut outb = BigBedWrite::create_file("unused.bb");
        outb.options.compress = compress;
        outb.options.items_per_slot = 7;
        outb.options.block_size = 4;
        let bigbed = BigBedRead::open(write_in_memory(&outb, entries.clone(), &chroms))?;

        for _ in 0..300 {
            let chrom = rng.random_range(0..2u32);
            let start = rng.random_range(0..5_000u32);
            let end = rng.random_range(start..=5_000u32);
            let found = bigbed.get_interval_by_id(chrom, start, end, 0)?;
            let expected: Vec<BedEntry> = expected_order
                .iter()
                .filter(|e| {
                    e.chrom == chrom
                        && ((e.start < end && e.end > start)
                            || (e.start == e.end && (e.start == start || e.start == end)))
                })
                .cloned()
                .collect();
            assert_eq!(found, expected, "query {}:{}-{}", chrom, start, end);
        }
    }
    Ok(())
}

#[test]
fn extra_index_test() -> Result<(), Box<dyn Error>> {
    let chroms = vec![ChromInfo::new(0, "chr1", 1000)];
    let entries = vec![
        BedEntry::new(0, 10, 20, "name1\tX"),
        BedEntry::new(0, 30, 40, "name2\tY"),
        BedEntry::new(0, 50, 60, "name3\tX"),
    ];
    let mut outb = BigBedWrite::create_file("unused.bb");
    outb.extra_index_columns = vec![3, 4];
    let bigbed = BigBedRead::open(write_in_memory(&outb, entries.clone(), &chroms))?;

    let indices = bigbed.extra_indices()?;
    assert_eq!(indices.len(), 2);
    assert_eq!(indices[0].column, 3);
    assert_eq!(indices[0].name.as_deref(), Some("field4"));
    assert_eq!(indices[1].column, 4);
    assert_eq!(indices[1].name.as_deref(), Some("field5"));

    assert_eq!(bigbed.search_extra_index_by_column(3, "name2", 0)?, vec![entries[1].clone()]);
    assert_eq!(
        bigbed.search_extra_index_by_column(4, "X", 0)?,
        vec![entries[0].clone(), entries[2].clone()]
    );
    assert_eq!(bigbed.search_extra_index("field5", "X", 1)?, vec![entries[0].clone()]);
    assert!(bigbed.search_extra_index_by_column(4, "Z", 0)?.is_empty());
    // Prefixes and values longer than the key size don't match
    assert!(bigbed.search_extra_index_by_column(3, "name", 0)?.is_empty());
    assert!(bigbed.search_extra_index_by_column(3, "name22", 0)?.is_empty());

    assert!(matches!(
        bigbed.search_extra_index_by_column(5, "X", 0),
        Err(BBIReadError::NotIndexed(_))
    ));
    assert!(matches!(
        bigbed.search_extra_index("gene", "X", 0),
        Err(BBIReadError::NotIndexed(_))
    ));
    Ok(())
}

#[test]
fn extra_index_many_blocks_test() -> Result<(), Box<dyn Error>> {
    let mut rng = StdRng::seed_from_u64(42);
    let chroms = vec![ChromInfo::new(0, "chr1", 100_000), ChromInfo::new(1, "chr2", 100_000)];
    let entries: Vec<BedEntry> = (0..500u32)
        .map(|i| {
            let start = rng.random_range(0..99_000u32);
            let group = rng.random_range(0..6u32);
            BedEntry::new(i % 2, start, start + 50, format!("id{}\tgroup{}\t{}", i, group, i % 7))
        })
        .collect();
    let mut sorted = entries.clone();
    sorted.sort_by_key(|e| (e.chrom, e.start));

    let mut outb = BigBedWrite::create_file("unused.bb");
    outb.options.items_per_slot = 5;
    outb.options.block_size = 3;
    outb.bed_n = 4;
    outb.extra_index_columns = vec![3, 4];
    let bigbed = BigBedRead::open(write_in_memory(&outb, entries, &chroms))?;

    assert_eq!(bigbed.extra_indices()?[0].name.as_deref(), Some("name"));
    for group in 0..6 {
        let value = format!("group{}", group);
        let expected: Vec<BedEntry> = sorted
            .iter()
            .filter(|e| e.field(4) == Some(value.as_str()))
            .cloned()
            .collect();
        assert_eq!(bigbed.search_extra_index_by_column(4, &value, 0)?, expected);
    }
    for i in [0, 1, 250, 499] {
        let found = bigbed.search_extra_index("name", &format!("id{}", i), 0)?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].field(3), Some(format!("id{}", i).as_str()));
    }
    Ok(())
}

#[test]
fn extra_index_delimiter_test() -> Result<(), Box<dyn Error>> {
    let chroms = vec![ChromInfo::new(0, "chr1", 1000)];
    let entries = vec![
        BedEntry::new(0, 10, 20, "a\tX"),
        BedEntry::new(0, 30, 40, "b\tY"),
    ];
    let mut outb = BigBedWrite::create_file("unused.bb");
    outb.field_delimiter = r"\s+".to_owned();
    outb.extra_index_columns = vec![4];
    let bigbed = BigBedRead::open(write_in_memory(&outb, entries.clone(), &chroms))?;
    assert_eq!(bigbed.search_extra_index_by_column(4, "Y", 0)?, vec![entries[1].clone()]);
    Ok(())
}

#[test]
fn corrupt_input_test() -> Result<(), Box<dyn Error>> {
    assert!(matches!(
        BigBedRead::open(vec![0u8; 256]),
        Err(BBIReadError::UnknownMagic)
    ));
    assert!(matches!(
        BigBedRead::open(b"short".to_vec()),
        Err(BBIReadError::IoError(_))
    ));

    let chroms = vec![ChromInfo::new(0, "chr1", 1000)];
    let bigwig = BigWigWrite::create_file("unused.bw")
        .write_to(
            Cursor::new(vec![]),
            vec![(0, Value { start: 0, end: 10, value: 1.0 })],
            &chroms,
        )?
        .into_inner();
    assert!(matches!(BigBedRead::open(bigwig), Err(BBIReadError::NotABigBed)));

    let entries: Vec<BedEntry> = (0..100)
        .map(|i| BedEntry::new(0, i, i + 5, format!("name{}", i)))
        .collect();
    let outb = BigBedWrite::create_file("unused.bb");
    let mut data = write_in_memory(&outb, entries, &chroms);

    // Overwrite the one data block, which sits between the record count and the R-tree
    let data_offset = u64::from_le_bytes(data[16..24].try_into()?) as usize;
    let index_offset = u64::from_le_bytes(data[24..32].try_into()?) as usize;
    if data[0..4] == 0x8789_F2EBu32.to_le_bytes() {
        data[data_offset + 8..index_offset].fill(0xff);
        let bigbed = BigBedRead::open(data)?;
        assert!(matches!(
            bigbed.get_interval("chr1", 0, 1000, 0),
            Err(BBIReadError::InvalidFile(_))
        ));
    }
    Ok(())
}

#[test]
fn corrupt_block_size_test() -> Result<(), Box<dyn Error>> {
    let chroms = vec![ChromInfo::new(0, "chr1", 1000)];
    let entries: Vec<BedEntry> = (0..4)
        .map(|i| BedEntry::new(0, i * 10, i * 10 + 5, format!("name{}", i)))
        .collect();
    let mut outb = BigBedWrite::create_file("unused.bb");
    outb.options.items_per_slot = 2;
    outb.options.endianness = Endianness::Little;
    let data = write_in_memory(&outb, entries, &chroms);

    // The size of the first leaf item: after the R-tree header (48 bytes),
    // the node header (4 bytes) and the item's bounds and offset (24 bytes)
    let index_offset = u64::from_le_bytes(data[24..32].try_into()?) as usize;
    let size_at = index_offset + 48 + 4 + 24;
    for size in [u64::MAX, 1 << 50, 4096] {
        let mut corrupt = data.clone();
        corrupt[size_at..size_at + 8].copy_from_slice(&size.to_le_bytes());
        let bigbed = BigBedRead::open(corrupt)?;
        assert!(matches!(
            bigbed.get_interval("chr1", 0, 1000, 0),
            Err(BBIReadError::InvalidFile(_))
        ));
        assert!(matches!(
            BigBedRandomAccess::new_exact(&bigbed),
            Err(BBIReadError::InvalidFile(_))
        ));
    }
    Ok(())
}

#[test]
fn shared_reader_test() -> Result<(), Box<dyn Error>> {
    let chroms = vec![ChromInfo::new(0, "chr1", 100_000)];
    let entries: Vec<BedEntry> = (0..1000)
        .map(|i| BedEntry::new(0, i * 50, i * 50 + 10, ""))
        .collect();
    let mut outb = BigBedWrite::create_file("unused.bb");
    outb.options.items_per_slot = 16;
    let bigbed = BigBedRead::open(write_in_memory(&outb, entries, &chroms))?;

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let bigbed = &bigbed;
                s.spawn(move || {
                    let start = t * 10_000;
                    bigbed.get_interval("chr1", start, start + 10_000, 0).map(|e| e.len())
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), 200);
        }
    });
    Ok(())
}
