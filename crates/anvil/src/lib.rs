//! Anvil: reader/writer for Minecraft region files.
//!
//! - A region file holds up to 32x32 chunks and is named `r.<rx>.<rz>.mca`.
//! - Chunk payloads are NBT, compressed with gzip, zlib, or stored raw.
//! - Corruption surfaces as `io::ErrorKind::InvalidData` / `UnexpectedEof`.
//!
//! File layout (big-endian):
//!   0000 : [u32; 1024] locations
//!                      bits 8..32 => sector offset (in 4 KiB sectors)
//!                      bits 0..8  => sector count
//!   1000 : [u32; 1024] timestamps (seconds since epoch, last save)
//!   2000 : sectors
//!
//! Chunk record (at `offset * 4096`):
//!   u32 length (bytes that follow, compression byte included)
//!   u8  compression (1 = gzip, 2 = zlib, 3 = none; bit 7 => external .mcc)
//!   [length - 1 bytes] payload

pub mod nbt;

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use std::fs::File;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Size of one sector in bytes.
pub const SECTOR_SIZE: usize = 4096;

/// Location table + timestamp table.
pub const HEADER_SIZE: usize = SECTOR_SIZE * 2;

/// Chunks per region edge.
pub const REGION_SIZE: i32 = 32;

/// Chunks per region file.
pub const CHUNKS_PER_REGION: usize = (REGION_SIZE * REGION_SIZE) as usize;

/// Region coordinate containing the given chunk coordinate.
#[inline]
pub fn chunk_to_region(chunk: i32) -> i32 {
    chunk.div_euclid(REGION_SIZE)
}

/// Chunk coordinate local to its region (0..32).
#[inline]
pub fn chunk_to_local(chunk: i32) -> i32 {
    chunk.rem_euclid(REGION_SIZE)
}

#[inline]
fn local_to_index(local_x: i32, local_z: i32) -> usize {
    (local_z * REGION_SIZE + local_x) as usize
}

/// Region file coordinates, parsed from names like `r.0.-1.mca`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Region containing the absolute chunk `(cx, cz)`.
    pub fn containing(cx: i32, cz: i32) -> Self {
        Self::new(chunk_to_region(cx), chunk_to_region(cz))
    }

    pub fn from_filename(name: &str) -> Option<Self> {
        let mut parts = name.split('.');
        if parts.next()? != "r" {
            return None;
        }
        let x = parts.next()?.parse().ok()?;
        let z = parts.next()?.parse().ok()?;
        if parts.next()? != "mca" || parts.next().is_some() {
            return None;
        }
        Some(Self { x, z })
    }

    pub fn filename(&self) -> String {
        format!("r.{}.{}.mca", self.x, self.z)
    }

    /// Absolute chunk coordinates of a local slot in this region.
    pub fn chunk_at(&self, local_x: i32, local_z: i32) -> (i32, i32) {
        (self.x * REGION_SIZE + local_x, self.z * REGION_SIZE + local_z)
    }
}

/// One slot of the location table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkLocation {
    pub sector_offset: u32,
    pub sector_count: u8,
}

impl ChunkLocation {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sector_offset == 0 && self.sector_count == 0
    }
}

/// Present chunk as listed by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEntry {
    pub local_x: i32,
    pub local_z: i32,
    pub timestamp: u32,
}

#[derive(Debug, Clone)]
pub struct RegionHeader {
    pub locations: Vec<ChunkLocation>,
    pub timestamps: Vec<u32>,
}

impl RegionHeader {
    /// Parse the 8 KiB header. Shorter input is an `UnexpectedEof`.
    pub fn parse(mut p: &[u8]) -> io::Result<Self> {
        need(p, HEADER_SIZE)?;

        let mut locations = Vec::with_capacity(CHUNKS_PER_REGION);
        for _ in 0..CHUNKS_PER_REGION {
            let raw = be_u32(&mut p)?;
            locations.push(ChunkLocation {
                sector_offset: raw >> 8,
                sector_count: (raw & 0xFF) as u8,
            });
        }

        let mut timestamps = Vec::with_capacity(CHUNKS_PER_REGION);
        for _ in 0..CHUNKS_PER_REGION {
            timestamps.push(be_u32(&mut p)?);
        }

        Ok(Self {
            locations,
            timestamps,
        })
    }

    /// Chunks with a non-empty location slot, in index order.
    pub fn chunks(&self) -> impl Iterator<Item = ChunkEntry> + '_ {
        self.locations
            .iter()
            .enumerate()
            .filter(|(_, loc)| !loc.is_empty())
            .map(move |(index, _)| ChunkEntry {
                local_x: (index % REGION_SIZE as usize) as i32,
                local_z: (index / REGION_SIZE as usize) as i32,
                timestamp: self.timestamps[index],
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    Gzip = 1,
    Zlib = 2,
    None = 3,
}

impl Compression {
    fn from_u8(v: u8) -> io::Result<Self> {
        match v {
            1 => Ok(Self::Gzip),
            2 => Ok(Self::Zlib),
            3 => Ok(Self::None),
            x if x & 0x80 != 0 => Err(bad("external (.mcc) chunk storage is not supported")),
            x => Err(bad(&format!("unknown chunk compression {}", x))),
        }
    }
}

/// An open region file. Only the header is held in memory; chunk payloads
/// are read on demand.
pub struct RegionFile {
    file: File,
    header: RegionHeader,
}

impl RegionFile {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut raw = vec![0u8; HEADER_SIZE];
        file.read_exact(&mut raw)?;
        let header = RegionHeader::parse(&raw)?;
        Ok(Self { file, header })
    }

    pub fn header(&self) -> &RegionHeader {
        &self.header
    }

    pub fn chunks(&self) -> impl Iterator<Item = ChunkEntry> + '_ {
        self.header.chunks()
    }

    /// Decompressed NBT bytes for a local slot, or `None` if the slot is empty.
    pub fn read_chunk(&mut self, local_x: i32, local_z: i32) -> io::Result<Option<Vec<u8>>> {
        if !(0..REGION_SIZE).contains(&local_x) || !(0..REGION_SIZE).contains(&local_z) {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "local chunk coordinates out of range",
            ));
        }

        let loc = self.header.locations[local_to_index(local_x, local_z)];
        if loc.is_empty() {
            return Ok(None);
        }
        if loc.sector_offset < 2 {
            return Err(bad("chunk sector overlaps region header"));
        }

        self.file
            .seek(SeekFrom::Start(loc.sector_offset as u64 * SECTOR_SIZE as u64))?;

        let mut prefix = [0u8; 5];
        self.file.read_exact(&mut prefix)?;
        let length = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if length == 0 {
            return Err(bad("zero-length chunk"));
        }
        if length + 4 > loc.sector_count as usize * SECTOR_SIZE {
            return Err(bad("chunk length exceeds allocated sectors"));
        }
        let compression = Compression::from_u8(prefix[4])?;

        let mut payload = vec![0u8; length - 1];
        self.file.read_exact(&mut payload)?;

        decompress(compression, &payload).map(Some)
    }
}

/// Inflate a chunk payload.
pub fn decompress(compression: Compression, payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len() * 4);
    match compression {
        Compression::Gzip => {
            GzDecoder::new(payload).read_to_end(&mut out).map_err(corrupt)?;
        }
        Compression::Zlib => {
            ZlibDecoder::new(payload).read_to_end(&mut out).map_err(corrupt)?;
        }
        Compression::None => out.extend_from_slice(payload),
    }
    Ok(out)
}

/// Write a region file containing the given chunks, zlib-compressed and
/// packed into consecutive sectors after the header.
///
/// Each chunk is `(local_x, local_z, timestamp, nbt_bytes)`.
pub fn write_region<P: AsRef<Path>>(path: P, chunks: &[(i32, i32, u32, Vec<u8>)]) -> io::Result<()> {
    let mut locations = vec![0u32; CHUNKS_PER_REGION];
    let mut timestamps = vec![0u32; CHUNKS_PER_REGION];
    let mut body = Vec::<u8>::new();
    let mut next_sector = (HEADER_SIZE / SECTOR_SIZE) as u32;

    for (local_x, local_z, timestamp, nbt) in chunks {
        if !(0..REGION_SIZE).contains(local_x) || !(0..REGION_SIZE).contains(local_z) {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "local chunk coordinates out of range",
            ));
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(nbt)?;
        let compressed = encoder.finish()?;

        let mut record = Vec::with_capacity(compressed.len() + 5);
        record.extend_from_slice(&(compressed.len() as u32 + 1).to_be_bytes());
        record.push(Compression::Zlib as u8);
        record.extend_from_slice(&compressed);

        let sectors = record.len().div_ceil(SECTOR_SIZE);
        if sectors > u8::MAX as usize {
            return Err(io::Error::new(ErrorKind::InvalidInput, "chunk too large"));
        }
        record.resize(sectors * SECTOR_SIZE, 0);

        let index = local_to_index(*local_x, *local_z);
        locations[index] = (next_sector << 8) | sectors as u32;
        timestamps[index] = *timestamp;

        body.extend_from_slice(&record);
        next_sector += sectors as u32;
    }

    let mut file = File::create(path)?;
    for loc in &locations {
        write_u32(&mut file, *loc)?;
    }
    for ts in &timestamps {
        write_u32(&mut file, *ts)?;
    }
    file.write_all(&body)?;
    file.flush()?;

    Ok(())
}

/// True for errors that mean "the bytes are bad" rather than "the disk is".
pub fn is_corruption(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::InvalidData | ErrorKind::UnexpectedEof)
}

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated region header"))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn be_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline]
fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_be_bytes())
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

#[cold]
fn corrupt(err: io::Error) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_pos_parses_filenames() {
        assert_eq!(RegionPos::from_filename("r.0.-1.mca"), Some(RegionPos::new(0, -1)));
        assert_eq!(RegionPos::from_filename("r.12.3.mca"), Some(RegionPos::new(12, 3)));
        assert_eq!(RegionPos::from_filename("r.a.3.mca"), None);
        assert_eq!(RegionPos::from_filename("r.1.3.mcr"), None);
        assert_eq!(RegionPos::from_filename("r.1.3.mca.bak"), None);
        assert_eq!(RegionPos::new(-2, 5).filename(), "r.-2.5.mca");
    }

    #[test]
    fn region_math_handles_negative_chunks() {
        assert_eq!(chunk_to_region(-1), -1);
        assert_eq!(chunk_to_local(-1), 31);
        assert_eq!(chunk_to_region(32), 1);
        assert_eq!(RegionPos::containing(-33, 40), RegionPos::new(-2, 1));
        assert_eq!(RegionPos::new(-1, 2).chunk_at(31, 0), (-1, 64));
    }

    #[test]
    fn header_rejects_truncated_input() {
        let err = RegionHeader::parse(&[0u8; 100]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn write_then_read_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.0.0.mca");
        let big = vec![7u8; 3 * SECTOR_SIZE];

        write_region(
            &path,
            &[
                (0, 0, 100, b"first".to_vec()),
                (5, 31, 200, big.clone()),
            ],
        )
        .unwrap();

        let mut region = RegionFile::open(&path).unwrap();
        let entries: Vec<_> = region.chunks().collect();
        assert_eq!(
            entries,
            vec![
                ChunkEntry { local_x: 0, local_z: 0, timestamp: 100 },
                ChunkEntry { local_x: 5, local_z: 31, timestamp: 200 },
            ]
        );

        assert_eq!(region.read_chunk(0, 0).unwrap().unwrap(), b"first");
        assert_eq!(region.read_chunk(5, 31).unwrap().unwrap(), big);
        assert!(region.read_chunk(1, 1).unwrap().is_none());
    }

    #[test]
    fn garbage_payload_is_reported_as_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.0.0.mca");

        let mut bytes = vec![0u8; HEADER_SIZE + SECTOR_SIZE];
        // slot 0 -> sector 2, one sector long
        bytes[0..4].copy_from_slice(&((2u32 << 8) | 1).to_be_bytes());
        let rec = HEADER_SIZE;
        bytes[rec..rec + 4].copy_from_slice(&9u32.to_be_bytes());
        bytes[rec + 4] = Compression::Zlib as u8;
        bytes[rec + 5..rec + 13].copy_from_slice(b"notzlib!");
        std::fs::write(&path, &bytes).unwrap();

        let mut region = RegionFile::open(&path).unwrap();
        let err = region.read_chunk(0, 0).unwrap_err();
        assert!(is_corruption(&err), "unexpected error kind: {err:?}");
    }

    #[test]
    fn oversized_length_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.0.0.mca");

        let mut bytes = vec![0u8; HEADER_SIZE + SECTOR_SIZE];
        bytes[0..4].copy_from_slice(&((2u32 << 8) | 1).to_be_bytes());
        bytes[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(&100_000u32.to_be_bytes());
        bytes[HEADER_SIZE + 4] = Compression::None as u8;
        std::fs::write(&path, &bytes).unwrap();

        let mut region = RegionFile::open(&path).unwrap();
        assert!(is_corruption(&region.read_chunk(0, 0).unwrap_err()));
    }
}
