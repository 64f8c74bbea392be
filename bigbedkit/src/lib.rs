/*!
Bigbedkit provides a synchronous API for reading and writing indexed bigBed and bigWig files.

The file format is defined in this paper: <https://doi.org/10.1093/bioinformatics/btq351>

## Reading

The entrypoints to reading are [`BigBedRead::open`] and [`BigWigRead::open`]. These
take any type that implements [`ReadAt`][crate::utils::file::read_at::ReadAt]: a
[`File`][std::fs::File], a memory map, or an in-memory buffer. [`BigBedRead::open_file`]
and [`BigWigRead::open_file`] take a path and open a `File`.

No read method needs `&mut self`. Every read is positional, so a single reader can
serve queries from several threads when its source is `Sync`.

The most common method to call is [`BigBedRead::get_interval`] (or
[`BigWigRead::get_interval`]), which returns the [`BedEntry`]s (or [`Value`]s)
overlapping a region. Extra indices are searched with [`BigBedRead::search_extra_index`],
and records can be fetched by their ordinal position through [`BigBedRandomAccess`].

## Writing

A [`BigBedWrite`] or [`BigWigWrite`] is created with `create_file` and configured
through its public fields (including [`BBIWriteOptions`]). Calling `write` with the
records and the chromosome list sorts the records, writes the data blocks, both
indices and the total summary.
*/

mod bbi;
pub mod bed;
pub mod utils;

pub use bbi::*;
