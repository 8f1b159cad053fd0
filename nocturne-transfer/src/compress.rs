//! zlib compression of transfer payloads.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Compresses `data` at `level` (0-9, clamped).
pub fn compress(data: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(data.len() / 2 + 16),
        Compression::new(level.min(9)),
    );
    encoder.write_all(data)?;
    encoder.finish()
}

/// Initial output reservation per input byte. The buffer grows past it as
/// real output arrives.
const INFLATE_RESERVE_RATIO: usize = 4;

/// Decompresses `data`, reading at most one byte past `expected_size`.
///
/// The caller compares the result length against `expected_size`, so an
/// oversized stream is detected without inflating it completely.
pub fn decompress(data: &[u8], expected_size: usize) -> io::Result<Vec<u8>> {
    let reserve = expected_size.min(data.len().saturating_mul(INFLATE_RESERVE_RATIO));
    let mut out = Vec::with_capacity(reserve);
    ZlibDecoder::new(data)
        .take(expected_size as u64 + 1)
        .read_to_end(&mut out)?;
    Ok(out)
}
