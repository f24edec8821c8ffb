//! Plain-text and raw-binary inputs, and persisted outputs.
//!
//! Spectrum files hold one bin per line: `ell value [uncertainty]`,
//! separated by whitespace and/or commas. `#` starts a comment; a first
//! non-numeric line is taken as a header. Covariances are either text
//! (one row per line), NumPy `.npy` arrays, or raw little-endian `f64` in
//! row-major order.
//!
//! Readers return the SHA-256 of the file bytes alongside the parsed value
//! so the provenance record names exactly what was read.

use crate::error::{FingerprintError, Result};
use crate::matrix::CovMatrix;
use crate::provenance::sha256_hex;
use crate::spectrum::Spectrum;
use crate::verdict::{render_report, FingerprintResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A parsed input with the digest of its source bytes.
#[derive(Debug, Clone)]
pub struct Hashed<T> {
    pub value: T,
    pub sha256: String,
}

fn split_fields(line: &str) -> Vec<&str> {
    line.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .collect()
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

fn parse_f64(field: &str, line: usize) -> Result<f64> {
    field.parse::<f64>().map_err(|_| FingerprintError::Parse {
        line,
        message: format!("'{}' is not a number", field),
    })
}

fn parse_ell(field: &str, line: usize) -> Result<u32> {
    if let Ok(v) = field.parse::<u32>() {
        return Ok(v);
    }
    // Some tables write multipoles as floats ("2.0").
    let x = parse_f64(field, line)?;
    if x >= 0.0 && x.fract() == 0.0 && x <= u32::MAX as f64 {
        Ok(x as u32)
    } else {
        Err(FingerprintError::Parse {
            line,
            message: format!("multipole '{}' is not a non-negative integer", field),
        })
    }
}

/// Parse spectrum text. All data lines must agree on 2 or 3 columns.
pub fn parse_spectrum(name: &str, text: &str) -> Result<Spectrum> {
    let mut ell = Vec::new();
    let mut value = Vec::new();
    let mut sigma = Vec::new();
    let mut ncols: Option<usize> = None;
    let mut seen_data = false;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let fields = split_fields(strip_comment(raw));
        if fields.is_empty() {
            continue;
        }
        if !seen_data && fields[0].parse::<f64>().is_err() {
            // header line
            seen_data = true;
            continue;
        }
        seen_data = true;

        if fields.len() < 2 || fields.len() > 3 {
            return Err(FingerprintError::Parse {
                line: line_no,
                message: format!("expected 2 or 3 columns, found {}", fields.len()),
            });
        }
        match ncols {
            None => ncols = Some(fields.len()),
            Some(n) if n != fields.len() => {
                return Err(FingerprintError::Parse {
                    line: line_no,
                    message: format!("expected {} columns like previous lines, found {}", n, fields.len()),
                })
            }
            _ => {}
        }
        ell.push(parse_ell(fields[0], line_no)?);
        value.push(parse_f64(fields[1], line_no)?);
        if fields.len() == 3 {
            sigma.push(parse_f64(fields[2], line_no)?);
        }
    }

    let uncertainty = (ncols == Some(3)).then_some(sigma);
    Spectrum::new(name, ell, value, uncertainty)
}

/// Read and parse a spectrum file; the spectrum is named after the file.
pub fn read_spectrum(path: impl AsRef<Path>) -> Result<Hashed<Spectrum>> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let name = path.display().to_string();
    let spectrum = parse_spectrum(&name, &text)?;
    debug!(path = %path.display(), bins = spectrum.len(), "spectrum loaded");
    Ok(Hashed {
        value: spectrum,
        sha256: sha256_hex(&bytes),
    })
}

/// Parse a text covariance: one row per line, equal-length rows.
pub fn parse_covariance(text: &str) -> Result<CovMatrix> {
    let mut data = Vec::new();
    let mut nrows = 0;
    let mut ncols: Option<usize> = None;
    for (idx, raw) in text.lines().enumerate() {
        let fields = split_fields(strip_comment(raw));
        if fields.is_empty() {
            continue;
        }
        match ncols {
            None => ncols = Some(fields.len()),
            Some(n) if n != fields.len() => {
                return Err(FingerprintError::Parse {
                    line: idx + 1,
                    message: format!("row has {} entries, expected {}", fields.len(), n),
                })
            }
            _ => {}
        }
        for f in fields {
            data.push(parse_f64(f, idx + 1)?);
        }
        nrows += 1;
    }
    let ncols = ncols.unwrap_or(0);
    CovMatrix::from_row_major(data, nrows, ncols).ok_or(FingerprintError::Parse {
        line: 0,
        message: "ragged covariance".into(),
    })
}

pub fn read_covariance_text(path: impl AsRef<Path>) -> Result<Hashed<CovMatrix>> {
    let bytes = fs::read(path.as_ref())?;
    let cov = parse_covariance(&String::from_utf8_lossy(&bytes))?;
    Ok(Hashed {
        value: cov,
        sha256: sha256_hex(&bytes),
    })
}

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

fn npy_error(message: impl Into<String>) -> FingerprintError {
    FingerprintError::Parse {
        line: 0,
        message: format!("npy: {}", message.into()),
    }
}

/// Text following `'key':` in an `.npy` header dictionary.
fn npy_header_value<'a>(header: &'a str, key: &str) -> Result<&'a str> {
    let single = format!("'{}'", key);
    let double = format!("\"{}\"", key);
    let at = header
        .find(&single)
        .map(|i| i + single.len())
        .or_else(|| header.find(&double).map(|i| i + double.len()))
        .ok_or_else(|| npy_error(format!("header has no '{}'", key)))?;
    let rest = header[at..].trim_start();
    rest.strip_prefix(':')
        .map(str::trim_start)
        .ok_or_else(|| npy_error(format!("malformed '{}' entry", key)))
}

/// Decode a NumPy `.npy` file (format 1.0 to 3.0) holding a 2-d `f8` array.
pub fn decode_covariance_npy(bytes: &[u8]) -> Result<CovMatrix> {
    if !bytes.starts_with(NPY_MAGIC) || bytes.len() < 10 {
        return Err(npy_error("missing magic string"));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 if bytes.len() >= 12 => (
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            12,
        ),
        _ => return Err(npy_error(format!("unsupported format version {}", major))),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or_else(|| npy_error("truncated header"))?;
    let header = std::str::from_utf8(header).map_err(|_| npy_error("header is not text"))?;

    let descr = npy_header_value(header, "descr")?;
    let quote = descr.chars().next().filter(|c| *c == '\'' || *c == '"');
    let descr = quote
        .and_then(|q| descr[1..].split(q).next())
        .ok_or_else(|| npy_error("malformed 'descr'"))?;
    let big_endian = match descr {
        "<f8" | "=f8" | "f8" | "<d" => false,
        ">f8" | ">d" => true,
        other => return Err(npy_error(format!("dtype '{}' is not float64", other))),
    };

    let fortran = npy_header_value(header, "fortran_order")?;
    let fortran_order = if fortran.starts_with("True") {
        true
    } else if fortran.starts_with("False") {
        false
    } else {
        return Err(npy_error("malformed 'fortran_order'"));
    };

    let shape = npy_header_value(header, "shape")?;
    let shape = shape
        .strip_prefix('(')
        .and_then(|s| s.split(')').next())
        .ok_or_else(|| npy_error("malformed 'shape'"))?;
    let dims = shape
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|_| npy_error(format!("bad dimension '{}'", s))))
        .collect::<Result<Vec<usize>>>()?;
    let &[nrows, ncols] = dims.as_slice() else {
        return Err(npy_error(format!("expected a 2-d array, found shape {:?}", dims)));
    };

    let payload = &bytes[data_start..];
    if payload.len() != nrows * ncols * 8 {
        return Err(npy_error(format!(
            "shape ({}, {}) needs {} data bytes, found {}",
            nrows,
            ncols,
            nrows * ncols * 8,
            payload.len()
        )));
    }
    let data: Vec<f64> = payload
        .chunks_exact(8)
        .map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            if big_endian {
                f64::from_be_bytes(b)
            } else {
                f64::from_le_bytes(b)
            }
        })
        .collect();
    let cov = if fortran_order {
        CovMatrix::from_column_major(data, nrows, ncols)
    } else {
        CovMatrix::from_row_major(data, nrows, ncols)
    };
    cov.ok_or_else(|| npy_error("inconsistent shape"))
}

/// Decode raw little-endian `f64` (row-major) into an `n x n` matrix.
pub fn decode_covariance_raw(bytes: &[u8], n: usize) -> Result<CovMatrix> {
    let expected = n * n * 8;
    if bytes.len() != expected {
        return Err(FingerprintError::Parse {
            line: 0,
            message: format!(
                "raw covariance has {} bytes, expected {} for {}x{} f64",
                bytes.len(),
                expected,
                n,
                n
            ),
        });
    }
    let data: Vec<f64> = bytes
        .chunks_exact(8)
        .map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            f64::from_le_bytes(b)
        })
        .collect();
    CovMatrix::from_row_major(data, n, n).ok_or_else(|| FingerprintError::Parse {
        line: 0,
        message: format!("cannot shape {} values as {}x{}", expected / 8, n, n),
    })
}

/// Decode a binary covariance: `.npy` when the NumPy magic is present,
/// otherwise raw little-endian `f64` sized `n x n`.
///
/// Shape checks against the multipole grid happen in validation, so an
/// `.npy` of the wrong size is reported with its own dimensions.
pub fn decode_covariance_binary(bytes: &[u8], n: usize) -> Result<CovMatrix> {
    if bytes.starts_with(NPY_MAGIC) {
        decode_covariance_npy(bytes)
    } else {
        decode_covariance_raw(bytes, n)
    }
}

pub fn read_covariance_binary(path: impl AsRef<Path>, n: usize) -> Result<Hashed<CovMatrix>> {
    let bytes = fs::read(path.as_ref())?;
    Ok(Hashed {
        value: decode_covariance_binary(&bytes, n)?,
        sha256: sha256_hex(&bytes),
    })
}

/// Write `result.json` and `report.txt` into `dir` (created if needed).
pub fn write_outputs(dir: impl AsRef<Path>, result: &FingerprintResult) -> Result<(PathBuf, PathBuf)> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let json_path = dir.join("result.json");
    let report_path = dir.join("report.txt");
    fs::write(&json_path, result.to_json_pretty()?)?;
    fs::write(&report_path, render_report(result))?;
    debug!(dir = %dir.display(), "outputs written");
    Ok((json_path, report_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spectrum_with_header_comments_and_commas() {
        let text = "ell, Cl, err\n# comment\n2, 10.0, 1.0\n3 11.5 1.5  # trailing\n\n4,\t12.0,2.0\n";
        let s = parse_spectrum("obs", text).unwrap();
        assert_eq!(s.ell(), &[2, 3, 4]);
        assert_eq!(s.values(), &[10.0, 11.5, 12.0]);
        assert_eq!(s.uncertainty().unwrap(), &[1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_parse_spectrum_two_columns_and_float_ell() {
        let s = parse_spectrum("model", "2.0 1e3\n3.0 1.1e3\n").unwrap();
        assert_eq!(s.ell(), &[2, 3]);
        assert!(s.uncertainty().is_none());
    }

    #[test]
    fn test_parse_spectrum_errors_name_the_line() {
        let err = parse_spectrum("obs", "2 1.0 1.0\n3 abc 1.0\n").unwrap_err();
        match err {
            FingerprintError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_spectrum("obs", "2 1.0 1.0\n3 1.0\n").is_err());
        assert!(parse_spectrum("obs", "2.5 1.0\n").is_err());
    }

    #[test]
    fn test_parse_covariance_text() {
        let cov = parse_covariance("1.0 0.1\n0.1, 2.0\n").unwrap();
        assert_eq!(cov.shape(), (2, 2));
        assert_eq!(cov[(1, 1)], 2.0);
        assert!(parse_covariance("1 2\n3\n").is_err());
    }

    #[test]
    fn test_decode_covariance_binary() {
        let vals = [4.0f64, 1.0, 1.0, 3.0];
        let bytes: Vec<u8> = vals.iter().flat_map(|v| v.to_le_bytes()).collect();
        let cov = decode_covariance_binary(&bytes, 2).unwrap();
        assert_eq!(cov[(0, 1)], 1.0);
        assert_eq!(cov[(1, 1)], 3.0);

        // a byte count that does not fit is never reinterpreted as another size
        assert!(matches!(
            decode_covariance_binary(&bytes, 3),
            Err(FingerprintError::Parse { .. })
        ));
        assert!(matches!(
            decode_covariance_binary(&bytes[..12], 2),
            Err(FingerprintError::Parse { .. })
        ));
    }

    /// Serialize like `numpy.save` (format 1.0, header padded to 64 bytes).
    fn npy_bytes(descr: &str, fortran: bool, shape: (usize, usize), data: &[f64]) -> Vec<u8> {
        let mut header = format!(
            "{{'descr': '{}', 'fortran_order': {}, 'shape': ({}, {}), }}",
            descr,
            if fortran { "True" } else { "False" },
            shape.0,
            shape.1
        );
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');
        let mut out = NPY_MAGIC.to_vec();
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&(header.len() as u16).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        for v in data {
            if descr.starts_with('>') {
                out.extend_from_slice(&v.to_be_bytes());
            } else {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    #[test]
    fn test_decode_npy_identity() {
        let eye = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let bytes = npy_bytes("<f8", false, (3, 3), &eye);
        assert_eq!(bytes.len(), 128 + 72);
        let cov = decode_covariance_binary(&bytes, 3).unwrap();
        assert_eq!(cov.shape(), (3, 3));
        assert_eq!(cov.diagonal(), vec![1.0, 1.0, 1.0]);
        assert_eq!(cov[(0, 1)], 0.0);
    }

    #[test]
    fn test_decode_npy_layouts_and_byte_order() {
        // row-major [[1, 2], [3, 4]]
        let c = decode_covariance_npy(&npy_bytes("<f8", false, (2, 2), &[1.0, 2.0, 3.0, 4.0])).unwrap();
        assert_eq!(c[(0, 1)], 2.0);
        assert_eq!(c[(1, 0)], 3.0);

        let f = decode_covariance_npy(&npy_bytes("<f8", true, (2, 2), &[1.0, 3.0, 2.0, 4.0])).unwrap();
        assert_eq!(f[(0, 1)], 2.0);
        assert_eq!(f[(1, 0)], 3.0);

        let b = decode_covariance_npy(&npy_bytes(">f8", false, (2, 2), &[1.0, 2.0, 3.0, 4.0])).unwrap();
        assert_eq!(b[(1, 1)], 4.0);
    }

    #[test]
    fn test_decode_npy_rejects_bad_arrays() {
        let bytes = npy_bytes("<f4", false, (2, 2), &[1.0, 2.0]);
        assert!(matches!(decode_covariance_npy(&bytes), Err(FingerprintError::Parse { .. })));

        let mut short = npy_bytes("<f8", false, (2, 2), &[1.0, 0.0, 0.0, 1.0]);
        short.truncate(short.len() - 8);
        assert!(decode_covariance_npy(&short).is_err());

        // an npy of the wrong size keeps its own dimensions for validation
        let eye = npy_bytes("<f8", false, (2, 2), &[1.0, 0.0, 0.0, 1.0]);
        let cov = decode_covariance_binary(&eye, 5).unwrap();
        assert!(matches!(
            crate::whitening::validate_covariance(&cov, 5),
            Err(FingerprintError::CovarianceDimension { expected: 5, actual: 2 })
        ));
    }

    #[test]
    fn test_read_spectrum_hashes_file_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs.txt");
        let text = "2 1.0 0.1\n3 2.0 0.1\n";
        fs::write(&path, text).unwrap();
        let loaded = read_spectrum(&path).unwrap();
        assert_eq!(loaded.sha256, sha256_hex(text.as_bytes()));
        assert_eq!(loaded.value.len(), 2);
    }
}
