//! Just enough of the NumPy `.npy` format for calibration arrays.
//!
//! Writes little-endian C-order `<f8` / `<i8` arrays with a version 1.0
//! header. Reads versions 1 to 3 and the `<f8`, `<f4`, `<i8`, `<i4` dtypes.

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const ALIGN: usize = 64;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NpyError {
    #[error("missing .npy magic")]
    BadMagic,
    #[error("unsupported .npy version {0}.{1}")]
    UnsupportedVersion(u8, u8),
    #[error("malformed .npy header: {0}")]
    Header(String),
    #[error("unsupported dtype {0}")]
    UnsupportedDtype(String),
    #[error("fortran-ordered arrays are not supported")]
    FortranOrder,
    #[error("array data holds {got} bytes, expected {expected}")]
    Truncated { expected: usize, got: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub enum NpyData {
    F64(Vec<f64>),
    I64(Vec<i64>),
}

/// A decoded array in C order.
#[derive(Clone, Debug, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: NpyData,
}

impl NpyArray {
    pub fn len(&self) -> usize {
        match &self.data {
            NpyData::F64(v) => v.len(),
            NpyData::I64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Floating-point contents; `None` for integer arrays.
    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.data {
            NpyData::F64(v) => Some(v),
            NpyData::I64(_) => None,
        }
    }

    /// Integer contents; `None` for floating-point arrays.
    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            NpyData::I64(v) => Some(v),
            NpyData::F64(_) => None,
        }
    }
}

pub fn encode_f64(shape: &[usize], values: &[f64]) -> Vec<u8> {
    let mut out = header("<f8", shape);
    out.reserve(values.len() * 8);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn encode_i64(shape: &[usize], values: &[i64]) -> Vec<u8> {
    let mut out = header("<i8", shape);
    out.reserve(values.len() * 8);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn header(descr: &str, shape: &[usize]) -> Vec<u8> {
    let shape = match shape {
        [] => "()".to_string(),
        [n] => format!("({n},)"),
        dims => {
            let parts: Vec<String> = dims.iter().map(usize::to_string).collect();
            format!("({})", parts.join(", "))
        }
    };
    let mut dict = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {shape}, }}");
    // magic + version + u16 length, then the dict terminated by '\n'.
    let prefix = MAGIC.len() + 2 + 2;
    let unpadded = prefix + dict.len() + 1;
    let padding = (ALIGN - unpadded % ALIGN) % ALIGN;
    dict.extend(std::iter::repeat_n(' ', padding));
    dict.push('\n');

    let mut out = Vec::with_capacity(prefix + dict.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out
}

pub fn decode(bytes: &[u8]) -> Result<NpyArray, NpyError> {
    if bytes.len() < MAGIC.len() + 2 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(NpyError::BadMagic);
    }
    let (major, minor) = (bytes[6], bytes[7]);
    let (header_len, header_start): (usize, usize) = match major {
        1 => (read_u16(bytes, 8)? as usize, 10),
        2 | 3 => (read_u32(bytes, 8)? as usize, 12),
        _ => return Err(NpyError::UnsupportedVersion(major, minor)),
    };
    let header_end = header_start
        .checked_add(header_len)
        .ok_or_else(|| NpyError::Header("header length overflows".into()))?;
    let header = bytes
        .get(header_start..header_end)
        .ok_or_else(|| NpyError::Header("header runs past end of data".into()))?;
    let header = std::str::from_utf8(header)
        .map_err(|_| NpyError::Header("header is not valid text".into()))?;

    let descr = dict_value(header, "descr")?;
    let descr = descr.trim_matches(|c| c == '\'' || c == '"');
    let shape = parse_shape(dict_value(header, "shape")?)?;
    if shape.len() > 1 && dict_value(header, "fortran_order")? == "True" {
        return Err(NpyError::FortranOrder);
    }
    let count = shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| NpyError::Header(format!("shape {shape:?} overflows")))?;
    let body = &bytes[header_end..];

    let data = match descr {
        "<f8" => NpyData::F64(read_values(body, count, |b: [u8; 8]| f64::from_le_bytes(b))?),
        "<f4" => NpyData::F64(read_values(body, count, |b: [u8; 4]| {
            f64::from(f32::from_le_bytes(b))
        })?),
        "<i8" => NpyData::I64(read_values(body, count, |b: [u8; 8]| i64::from_le_bytes(b))?),
        "<i4" => NpyData::I64(read_values(body, count, |b: [u8; 4]| {
            i64::from(i32::from_le_bytes(b))
        })?),
        other => return Err(NpyError::UnsupportedDtype(other.to_string())),
    };
    Ok(NpyArray { shape, data })
}

fn read_u16(bytes: &[u8], at: usize) -> Result<u16, NpyError> {
    bytes
        .get(at..at + 2)
        .and_then(|b| b.try_into().ok())
        .map(u16::from_le_bytes)
        .ok_or_else(|| NpyError::Header("truncated header length".into()))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, NpyError> {
    bytes
        .get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| NpyError::Header("truncated header length".into()))
}

fn read_values<const N: usize, T>(
    body: &[u8],
    count: usize,
    convert: impl Fn([u8; N]) -> T,
) -> Result<Vec<T>, NpyError> {
    let expected = count.checked_mul(N).ok_or_else(|| {
        NpyError::Header(format!("{count} elements of {N} bytes overflow"))
    })?;
    if body.len() < expected {
        return Err(NpyError::Truncated {
            expected,
            got: body.len(),
        });
    }
    Ok(body[..expected]
        .chunks_exact(N)
        .map(|chunk| {
            let mut raw = [0u8; N];
            raw.copy_from_slice(chunk);
            convert(raw)
        })
        .collect())
}

/// Raw text of `key`'s value in the header's Python dict literal.
fn dict_value<'h>(header: &'h str, key: &str) -> Result<&'h str, NpyError> {
    let missing = || NpyError::Header(format!("missing key '{key}'"));
    let start = ["'", "\""]
        .iter()
        .find_map(|q| header.find(&format!("{q}{key}{q}")).map(|at| at + key.len() + 2))
        .ok_or_else(missing)?;
    let rest = header[start..].trim_start();
    let rest = rest
        .strip_prefix(':')
        .ok_or_else(|| NpyError::Header(format!("expected ':' after '{key}'")))?
        .trim_start();

    let end = match rest.chars().next() {
        Some(q @ ('\'' | '"')) => rest[1..].find(q).map(|i| i + 2),
        Some('(') => rest.find(')').map(|i| i + 1),
        Some(_) => rest.find([',', '}']),
        None => None,
    }
    .ok_or_else(|| NpyError::Header(format!("unterminated value for '{key}'")))?;
    Ok(rest[..end].trim())
}

fn parse_shape(text: &str) -> Result<Vec<usize>, NpyError> {
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| NpyError::Header(format!("shape {text} is not a tuple")))?;
    inner
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| NpyError::Header(format!("bad dimension {part}")))
        })
        .collect()
}
