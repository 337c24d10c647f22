//! Minimal NPY reader/writer for per-utterance feature files.
//!
//! Supports the subset of the NumPy array format the corpus actually uses:
//!   - NPY format version 1.0 and 2.0
//!   - `float32` (`<f4`, `=f4`) and `float64` (`<f8`, `=f8`) dtypes — pitch
//!     contours are persisted as float64 by the upstream extractor and are
//!     converted to f32 on load
//!   - C-contiguous (row-major) layout
//!   - 1-D contours (pitch, energy) and 2-D matrices (mel `[channels, T]`)
//!
//! The writer emits version 1.0 `<f4` files, enough for tests and tooling to
//! produce companion files the assembler reads back.

use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::{Array1, Array2};

// ─────────────────────────────────────────────────────────────────────────────
// NPY header parser
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a raw `.npy` byte buffer and return the shape together with the
/// data as a flat `Vec<f32>` (float64 input is narrowed element-wise).
pub fn parse_npy(data: &[u8]) -> Result<(Vec<usize>, Vec<f32>)> {
    // Magic: 6 bytes "\x93NUMPY"
    if data.len() < 10 || &data[..6] != b"\x93NUMPY" {
        bail!("Not a valid NPY file (bad magic)");
    }

    let major = data[6];
    let minor = data[7];

    // Header length: 2 bytes (v1) or 4 bytes (v2), little-endian.
    let (header_len, header_start) = match (major, minor) {
        (1, _) => {
            let len = u16::from_le_bytes([data[8], data[9]]) as usize;
            (len, 10)
        }
        (2, _) => {
            if data.len() < 12 {
                bail!("NPY v2 file too short");
            }
            let len = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
            (len, 12)
        }
        _ => bail!("Unsupported NPY version {}.{}", major, minor),
    };

    let header_end = header_start + header_len;
    if data.len() < header_end {
        bail!("NPY file truncated in header");
    }
    let header = std::str::from_utf8(&data[header_start..header_end])
        .context("NPY header is not valid UTF-8")?;

    // Parse dtype
    let dtype = extract_header_field(header, "descr").context("NPY header missing 'descr'")?;
    let dtype = dtype.trim().trim_matches('\'').trim_matches('"');
    let (wide, big_endian) = match dtype {
        "<f4" | "=f4" | "|f4" => (false, false),
        ">f4" => (false, true),
        "<f8" | "=f8" | "|f8" => (true, false),
        ">f8" => (true, true),
        other => bail!("Unsupported dtype '{}' — only float32/float64 are supported", other),
    };

    // Parse fortran_order
    let fortran = extract_header_field(header, "fortran_order")
        .unwrap_or("False")
        .trim()
        .to_ascii_lowercase();
    if fortran == "true" {
        bail!("Fortran-order arrays are not supported");
    }

    // Parse shape — e.g. "(256, 512)" or "(100,)"
    let shape_str = extract_header_field(header, "shape").context("NPY header missing 'shape'")?;
    let shape = parse_shape(shape_str.trim())?;

    let n_elements: usize = shape.iter().product();
    let elem_size = if wide { 8 } else { 4 };

    // Raw bytes start right after the header.
    let data_bytes = &data[header_end..];
    if data_bytes.len() < n_elements * elem_size {
        bail!(
            "NPY data section too short: expected {} bytes, got {}",
            n_elements * elem_size,
            data_bytes.len()
        );
    }

    let values: Vec<f32> = if wide {
        data_bytes[..n_elements * 8]
            .chunks_exact(8)
            .map(|b| {
                let arr = [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]];
                let v = if big_endian {
                    f64::from_be_bytes(arr)
                } else {
                    f64::from_le_bytes(arr)
                };
                v as f32
            })
            .collect()
    } else {
        data_bytes[..n_elements * 4]
            .chunks_exact(4)
            .map(|b| {
                let arr = [b[0], b[1], b[2], b[3]];
                if big_endian {
                    f32::from_be_bytes(arr)
                } else {
                    f32::from_le_bytes(arr)
                }
            })
            .collect()
    };

    Ok((shape, values))
}

/// Extract the value of a field from a Python-literal dict header string.
///
/// e.g. `extract_header_field("{'descr': '<f4', 'shape': (3,)}", "descr")`
/// returns `Some("<f4")`.
fn extract_header_field<'a>(header: &'a str, field: &str) -> Option<&'a str> {
    // Look for `'field':` or `"field":`.
    let key_sq = format!("'{}':", field);
    let key_dq = format!("\"{}\":", field);

    let start = header
        .find(key_sq.as_str())
        .map(|p| p + key_sq.len())
        .or_else(|| header.find(key_dq.as_str()).map(|p| p + key_dq.len()))?;

    let rest = header[start..].trim_start();

    // Value is either a Python string (quoted), tuple (parentheses), or a bare word.
    if rest.starts_with('(') {
        // Tuple — find the matching closing paren
        let end = rest.find(')')?;
        Some(&rest[..end + 1])
    } else if rest.starts_with('\'') || rest.starts_with('"') {
        let quote = rest.chars().next()?;
        let inner = &rest[1..];
        let end = inner.find(quote)?;
        Some(&inner[..end])
    } else {
        // Bare value (True, False, or a number) — read until comma or }
        let end = rest.find([',', '}']).unwrap_or(rest.len());
        Some(rest[..end].trim())
    }
}

/// Parse a Python-style shape tuple like `(256, 512)` or `(100,)` or `()`.
fn parse_shape(s: &str) -> Result<Vec<usize>> {
    let inner = s.trim_start_matches('(').trim_end_matches(')');
    if inner.trim().is_empty() {
        return Ok(vec![]);
    }
    inner
        .split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<usize>().with_context(|| format!("Bad shape dim: '{}'", t)))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// File loaders
// ─────────────────────────────────────────────────────────────────────────────

/// Load a 1-D array (pitch or energy contour).
pub fn load_npy_1d(path: &Path) -> Result<Array1<f32>> {
    let (shape, data) = read_parsed(path)?;
    if shape.len() != 1 {
        bail!(
            "Expected a 1-D array, got {}-D in {}",
            shape.len(),
            path.display()
        );
    }
    Ok(Array1::from_vec(data))
}

/// Load a 2-D array (mel spectrogram, `[channels, frames]` row-major).
pub fn load_npy_2d(path: &Path) -> Result<Array2<f32>> {
    let (shape, data) = read_parsed(path)?;
    if shape.len() != 2 {
        bail!(
            "Expected a 2-D array, got {}-D in {}",
            shape.len(),
            path.display()
        );
    }
    Array2::from_shape_vec((shape[0], shape[1]), data)
        .with_context(|| format!("NPY shape does not match data length: {}", path.display()))
}

fn read_parsed(path: &Path) -> Result<(Vec<usize>, Vec<f32>)> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Cannot open NPY file: {}", path.display()))?;
    parse_npy(&bytes).with_context(|| format!("Cannot parse NPY file: {}", path.display()))
}

// ─────────────────────────────────────────────────────────────────────────────
// File writers — version 1.0, little-endian f32, C order
// ─────────────────────────────────────────────────────────────────────────────

/// Serialize shape + flat values into a v1.0 `.npy` byte buffer.
fn encode_npy(shape: &[usize], values: impl Iterator<Item = f32>) -> Vec<u8> {
    let shape_str = match shape {
        [n] => format!("({},)", n),
        dims => format!(
            "({})",
            dims.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': {}, }}",
        shape_str
    );
    // Total header block (magic + version + length field + text) is padded
    // with spaces to a multiple of 64 and terminated with a newline.
    let unpadded = 10 + header.len() + 1;
    let pad = (64 - unpadded % 64) % 64;
    header.extend(std::iter::repeat(' ').take(pad));
    header.push('\n');

    let mut buf = Vec::with_capacity(10 + header.len() + shape.iter().product::<usize>() * 4);
    buf.extend_from_slice(b"\x93NUMPY");
    buf.push(1);
    buf.push(0);
    buf.extend_from_slice(&(header.len() as u16).to_le_bytes());
    buf.extend_from_slice(header.as_bytes());
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

/// Write a 1-D contour.
pub fn write_npy_1d(path: &Path, array: &Array1<f32>) -> Result<()> {
    let buf = encode_npy(&[array.len()], array.iter().copied());
    std::fs::write(path, buf).with_context(|| format!("Cannot write NPY file: {}", path.display()))
}

/// Write a 2-D matrix in row-major order.
pub fn write_npy_2d(path: &Path, array: &Array2<f32>) -> Result<()> {
    let buf = encode_npy(&[array.nrows(), array.ncols()], array.iter().copied());
    std::fs::write(path, buf).with_context(|| format!("Cannot write NPY file: {}", path.display()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
