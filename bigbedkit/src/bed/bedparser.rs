//! Parsing of bed text and chromosome size files into bigBed write input.

use std::collections::HashMap;
use std::io::{self, BufRead};

use thiserror::Error;

use crate::bbi::{BedEntry, ChromInfo};

#[derive(Error, Debug)]
pub enum BedValueError {
    #[error("{}", .0)]
    InvalidInput(String),
    #[error("Error occurred: {}", .0)]
    IoError(#[from] io::Error),
}

/// Splits a bed line into the chromosome name, start, end and the remaining columns.
///
/// Returns `None` for an empty line.
pub fn parse_bed(s: &str) -> Option<Result<(&str, u32, u32, &str), BedValueError>> {
    let mut split = s.splitn(4, '\t');
    let chrom = match split.next() {
        Some(chrom) if !chrom.is_empty() => chrom,
        _ => return None,
    };
    let res = (|| {
        let s = split
            .next()
            .ok_or_else(|| BedValueError::InvalidInput(format!("Missing start: {:}", s)))?;
        let start = s
            .parse::<u32>()
            .map_err(|_| BedValueError::InvalidInput(format!("Invalid start: {:}", s)))?;
        let s = split
            .next()
            .ok_or_else(|| BedValueError::InvalidInput(format!("Missing end: {:}", s)))?;
        let end = s
            .parse::<u32>()
            .map_err(|_| BedValueError::InvalidInput(format!("Invalid end: {:}", s)))?;
        let rest = split.next().unwrap_or("");
        Ok((start, end, rest))
    })();
    Some(res.map(|(start, end, rest)| (chrom, start, end, rest)))
}

/// Reads a `chrom.sizes` file (`name<TAB>length` per line), assigning ids in file order.
pub fn read_chrom_sizes<R: BufRead>(read: R) -> Result<Vec<ChromInfo>, BedValueError> {
    let mut chroms = vec![];
    for line in read.lines() {
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let mut split = line.split_whitespace();
        let (name, length) = match (split.next(), split.next()) {
            (Some(name), Some(length)) => (name, length),
            _ => {
                return Err(BedValueError::InvalidInput(format!(
                    "Invalid chrom.sizes line: {}",
                    line
                )))
            }
        };
        let length = length
            .parse::<u32>()
            .map_err(|_| BedValueError::InvalidInput(format!("Invalid length: {}", line)))?;
        chroms.push(ChromInfo::new(chroms.len() as u32, name, length));
    }
    Ok(chroms)
}

/// Reads every record of a bed file. Header, track and comment lines are skipped.
pub fn read_bed<R: BufRead>(read: R, chroms: &[ChromInfo]) -> Result<Vec<BedEntry>, BedValueError> {
    let ids: HashMap<&str, u32> = chroms.iter().map(|c| (c.name.as_str(), c.id)).collect();
    let mut entries = vec![];
    for line in read.lines() {
        let line = line?;
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        if line.starts_with('#') || line.starts_with("track") || line.starts_with("browser") {
            continue;
        }
        let (chrom, start, end, rest) = match parse_bed(line) {
            None => continue,
            Some(parsed) => parsed?,
        };
        let chrom = *ids.get(chrom).ok_or_else(|| {
            BedValueError::InvalidInput(format!("Chromosome {} is not in the chrom sizes", chrom))
        })?;
        entries.push(BedEntry::new(chrom, start, end, rest));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bed() {
        let (chrom, start, end, rest) = parse_bed("chr1\t10\t20\tname\t0\t+").unwrap().unwrap();
        assert_eq!((chrom, start, end, rest), ("chr1", 10, 20, "name\t0\t+"));
        let (_, _, _, rest) = parse_bed("chr1\t10\t20").unwrap().unwrap();
        assert_eq!(rest, "");
        assert!(parse_bed("").is_none());
        assert!(parse_bed("chr1\t10").unwrap().is_err());
        assert!(parse_bed("chr1\tx\t20").unwrap().is_err());
    }

    #[test]
    fn test_read_bed() {
        let chroms = read_chrom_sizes(&b"chr1\t1000\nchr2 500\n\n"[..]).unwrap();
        assert_eq!(chroms, vec![ChromInfo::new(0, "chr1", 1000), ChromInfo::new(1, "chr2", 500)]);

        let bed = b"track name=x\n#comment\nchr2\t5\t10\ta\nchr1\t1\t2\n\n";
        let entries = read_bed(&bed[..], &chroms).unwrap();
        assert_eq!(
            entries,
            vec![BedEntry::new(1, 5, 10, "a"), BedEntry::new(0, 1, 2, "")]
        );

        assert!(read_bed(&b"chr3\t1\t2\n"[..], &chroms).is_err());
        assert!(read_chrom_sizes(&b"chr1\n"[..]).is_err());
    }
}
