//! IDX file format reader
//!
//! Big-endian header: two zero bytes, a type code (0x08 = u8), the number of
//! dimensions, then one u32 per dimension followed by the raw payload.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{Result, TunerError};

/// Magic number of an image file (u8, 3 dimensions)
pub const IMAGE_MAGIC: u32 = 0x0000_0803;
/// Magic number of a label file (u8, 1 dimension)
pub const LABEL_MAGIC: u32 = 0x0000_0801;

/// Decoded IDX array of unsigned bytes
#[derive(Debug, Clone)]
pub struct IdxArray {
    pub dims: Vec<usize>,
    pub data: Vec<u8>,
}

/// Read an IDX file, transparently decompressing `.gz`
pub fn read_idx_file(path: &Path) -> Result<IdxArray> {
    let file = File::open(path).map_err(|e| {
        TunerError::DataError(format!("cannot open {}: {}", path.display(), e))
    })?;
    let reader = BufReader::new(file);

    let is_gz = path.extension().and_then(|e| e.to_str()) == Some("gz");
    let mut bytes = Vec::new();
    if is_gz {
        GzDecoder::new(reader).read_to_end(&mut bytes)?;
    } else {
        let mut reader = reader;
        reader.read_to_end(&mut bytes)?;
    }

    parse_idx(&bytes).map_err(|e| match e {
        TunerError::DataError(msg) => TunerError::DataError(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Parse an in-memory IDX buffer
pub fn parse_idx(bytes: &[u8]) -> Result<IdxArray> {
    if bytes.len() < 4 {
        return Err(TunerError::DataError("truncated IDX header".to_string()));
    }

    let magic = read_u32(bytes, 0)?;
    if magic >> 16 != 0 {
        return Err(TunerError::DataError(format!("bad IDX magic 0x{:08x}", magic)));
    }
    let type_code = (magic >> 8) & 0xff;
    if type_code != 0x08 {
        return Err(TunerError::DataError(format!(
            "unsupported IDX element type 0x{:02x}, expected unsigned byte",
            type_code
        )));
    }

    let n_dims = (magic & 0xff) as usize;
    if n_dims == 0 {
        return Err(TunerError::DataError("IDX file declares zero dimensions".to_string()));
    }

    let header_len = 4 + 4 * n_dims;
    let dims = (0..n_dims)
        .map(|i| read_u32(bytes, 4 + 4 * i).map(|d| d as usize))
        .collect::<Result<Vec<_>>>()?;

    let expected = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| TunerError::DataError(format!("IDX dimensions {:?} overflow", dims)))?;
    let payload = &bytes[header_len..];
    if payload.len() != expected {
        return Err(TunerError::ShapeError {
            expected: format!("{} payload bytes for dims {:?}", expected, dims),
            actual: format!("{} bytes", payload.len()),
        });
    }

    Ok(IdxArray {
        dims,
        data: payload.to_vec(),
    })
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| TunerError::DataError("truncated IDX header".to_string()))
}

#[cfg(test)]
pub(crate) fn encode_idx(magic: u32, dims: &[u32], data: &[u8]) -> Vec<u8> {
    let mut out = magic.to_be_bytes().to_vec();
    for d in dims {
        out.extend_from_slice(&d.to_be_bytes());
    }
    out.extend_from_slice(data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_parse_labels() {
        let bytes = encode_idx(LABEL_MAGIC, &[3], &[7, 0, 9]);
        let arr = parse_idx(&bytes).unwrap();
        assert_eq!(arr.dims, vec![3]);
        assert_eq!(arr.data, vec![7, 0, 9]);
    }

    #[test]
    fn test_parse_images() {
        let pixels: Vec<u8> = (0..2 * 2 * 3).map(|v| v as u8).collect();
        let bytes = encode_idx(IMAGE_MAGIC, &[2, 2, 3], &pixels);
        let arr = parse_idx(&bytes).unwrap();
        assert_eq!(arr.dims, vec![2, 2, 3]);
        assert_eq!(arr.data.len(), 12);
    }

    #[test]
    fn test_payload_length_mismatch() {
        let bytes = encode_idx(LABEL_MAGIC, &[5], &[1, 2, 3]);
        assert!(matches!(parse_idx(&bytes), Err(TunerError::ShapeError { .. })));
    }

    #[test]
    fn test_rejects_non_byte_type() {
        // 0x0D = float
        let bytes = encode_idx(0x0000_0D01, &[1], &[0, 0, 0, 0]);
        assert!(parse_idx(&bytes).is_err());
    }

    #[test]
    fn test_huge_dimensions_are_rejected() {
        let bytes = encode_idx(0x0808, &[u32::MAX; 8], &[]);
        assert!(matches!(parse_idx(&bytes), Err(TunerError::DataError(_))));
    }

    #[test]
    fn test_truncated_header() {
        assert!(parse_idx(&[0, 0, 8]).is_err());
        assert!(parse_idx(&[0, 0, 8, 3, 0, 0]).is_err());
    }

    #[test]
    fn test_read_gzip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels-idx1-ubyte.gz");
        let raw = encode_idx(LABEL_MAGIC, &[4], &[1, 2, 3, 4]);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let arr = read_idx_file(&path).unwrap();
        assert_eq!(arr.data, vec![1, 2, 3, 4]);
    }
}
