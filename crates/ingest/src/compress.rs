//! Frame decompression.
//!
//! Broker frames are gzip-compressed, but the upstream has been seen
//! switching between gzip and bare zlib framing; the magic bytes decide.

use std::io::{self, Read};

use flate2::read::{GzDecoder, ZlibDecoder};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn decompress(body: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    if body.starts_with(&GZIP_MAGIC) {
        GzDecoder::new(body).read_to_end(&mut out)?;
    } else {
        ZlibDecoder::new(body).read_to_end(&mut out)?;
    }
    Ok(out)
}

pub fn decompress_to_string(body: &[u8]) -> io::Result<String> {
    String::from_utf8(decompress(body)?)
        .map_err(|why| io::Error::new(io::ErrorKind::InvalidData, why))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn detects_gzip_payloads() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<Pport/>").unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(decompress_to_string(&compressed).unwrap(), "<Pport/>");
    }

    #[test]
    fn detects_zlib_payloads() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<Pport/>").unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(decompress_to_string(&compressed).unwrap(), "<Pport/>");
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(decompress(b"definitely not compressed").is_err());
    }
}
