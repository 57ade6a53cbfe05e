//! NumPy `.npy` (format 1.0) codec.
//!
//! Layout: `\x93NUMPY` + version `1.0` + little-endian `u16` header length +
//! an ASCII dict header padded with spaces and terminated by `\n` so the data
//! starts on a 64-byte boundary, followed by C-order little-endian data.

use std::path::Path;

use ndarray::{Array, Array2, Array3, ArrayBase, ArrayD, Axis, Data, Dimension, IxDyn};

use crate::config::ensure_parent;
use crate::{FeatureError, FeatureResult};

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";
const NPY_ALIGN: usize = 64;
// magic + version + header length
const PREAMBLE_LEN: usize = 10;

/// Element types that can be stored in an `.npy` file.
pub trait NpyElement: bytemuck::Pod + Default {
    /// NumPy dtype descriptor.
    const DESCR: &'static str;

    /// Decodes one element from its little-endian bytes.
    fn from_le_slice(bytes: &[u8]) -> Self;

    /// Appends the little-endian bytes of `self`.
    fn write_le(&self, out: &mut Vec<u8>);
}

impl NpyElement for f32 {
    const DESCR: &'static str = "<f4";

    fn from_le_slice(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl NpyElement for u8 {
    const DESCR: &'static str = "|u1";

    fn from_le_slice(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn write_le(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }
}

/// Serializes an array into `.npy` bytes.
pub fn encode<T, S, D>(array: &ArrayBase<S, D>) -> Vec<u8>
where
    T: NpyElement,
    S: Data<Elem = T>,
    D: Dimension,
{
    let header = build_header(T::DESCR, array.shape());
    let elem_size = std::mem::size_of::<T>();
    let mut out = Vec::with_capacity(PREAMBLE_LEN + header.len() + array.len() * elem_size);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());

    match array.as_slice() {
        Some(slice) if cfg!(target_endian = "little") => {
            out.extend_from_slice(bytemuck::cast_slice(slice));
        }
        _ => {
            // Logical iteration order is C order for any memory layout.
            for value in array.iter() {
                value.write_le(&mut out);
            }
        }
    }
    out
}

/// Parses `.npy` bytes into a dynamic-rank array.
pub fn decode<T: NpyElement>(bytes: &[u8]) -> FeatureResult<ArrayD<T>> {
    if bytes.len() < PREAMBLE_LEN || &bytes[..6] != NPY_MAGIC {
        return Err(FeatureError::Format("missing .npy magic bytes".to_string()));
    }
    let (major, minor) = (bytes[6], bytes[7]);
    if major != 1 {
        return Err(FeatureError::Format(format!(
            "unsupported .npy version {major}.{minor}"
        )));
    }
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let data_start = PREAMBLE_LEN + header_len;
    if bytes.len() < data_start {
        return Err(FeatureError::Format("truncated .npy header".to_string()));
    }
    let header = std::str::from_utf8(&bytes[PREAMBLE_LEN..data_start])
        .map_err(|e| FeatureError::Format(format!("header is not ASCII: {e}")))?;
    let parsed = parse_header(header)?;

    if parsed.descr != T::DESCR {
        return Err(FeatureError::Format(format!(
            "dtype '{}' does not match expected '{}'",
            parsed.descr,
            T::DESCR
        )));
    }
    if parsed.fortran_order {
        return Err(FeatureError::Format(
            "Fortran-ordered arrays are not supported".to_string(),
        ));
    }

    let count: usize = parsed.shape.iter().product();
    let elem_size = std::mem::size_of::<T>();
    let data = &bytes[data_start..];
    if data.len() != count * elem_size {
        return Err(FeatureError::Format(format!(
            "expected {} data bytes for shape {:?}, found {}",
            count * elem_size,
            parsed.shape,
            data.len()
        )));
    }

    let values: Vec<T> = data.chunks_exact(elem_size).map(T::from_le_slice).collect();
    ArrayD::from_shape_vec(IxDyn(&parsed.shape), values)
        .map_err(|e| FeatureError::Format(format!("invalid shape {:?}: {e}", parsed.shape)))
}

/// Writes an array to `path`, creating parent directories.
pub fn write_array<T, S, D, P>(path: P, array: &ArrayBase<S, D>) -> FeatureResult<()>
where
    T: NpyElement,
    S: Data<Elem = T>,
    D: Dimension,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    ensure_parent(path)?;
    std::fs::write(path, encode(array)).map_err(|e| FeatureError::io(path, e))
}

/// Reads an array of a fixed rank from `path`.
pub fn read_array<T, D, P>(path: P) -> FeatureResult<Array<T, D>>
where
    T: NpyElement,
    D: Dimension,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| FeatureError::io(path, e))?;
    let array = decode::<T>(&bytes)?;
    let ndim = array.ndim();
    array.into_dimensionality::<D>().map_err(|_| {
        FeatureError::Format(format!(
            "{}: expected rank {:?}, found rank {ndim}",
            path.display(),
            D::NDIM
        ))
    })
}

/// Stacks equally shaped blocks into one `samples × rows × cols` file.
pub fn save_stack<P: AsRef<Path>>(path: P, blocks: &[Array2<f32>]) -> FeatureResult<()> {
    let stacked = stack_blocks(blocks)?;
    write_array(path, &stacked)
}

/// Reads a `samples × rows × cols` file back into individual blocks.
pub fn load_stack<P: AsRef<Path>>(path: P) -> FeatureResult<Vec<Array2<f32>>> {
    let stacked: Array3<f32> = read_array(path)?;
    Ok(stacked
        .axis_iter(Axis(0))
        .map(|block| block.to_owned())
        .collect())
}

/// Stacks equally shaped blocks along a new leading axis.
pub fn stack_blocks(blocks: &[Array2<f32>]) -> FeatureResult<Array3<f32>> {
    let Some(first) = blocks.first() else {
        return Err(FeatureError::InvalidParameter(
            "cannot stack an empty list of blocks".to_string(),
        ));
    };
    let shape = first.dim();
    if let Some(bad) = blocks.iter().find(|b| b.dim() != shape) {
        return Err(FeatureError::shape_mismatch("stack", shape, bad.dim()));
    }
    let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
    ndarray::stack(Axis(0), &views).map_err(|e| FeatureError::InvalidParameter(e.to_string()))
}

struct NpyHeader {
    descr: String,
    fortran_order: bool,
    shape: Vec<usize>,
}

fn build_header(descr: &str, shape: &[usize]) -> String {
    let shape_str = match shape {
        [single] => format!("({single},)"),
        dims => format!(
            "({})",
            dims.iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut header =
        format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {shape_str}, }}");
    let unpadded = PREAMBLE_LEN + header.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    header.extend(std::iter::repeat_n(' ', padding));
    header.push('\n');
    header
}

fn parse_header(header: &str) -> FeatureResult<NpyHeader> {
    let descr = dict_value(header, "descr")?
        .trim_matches(|c| c == '\'' || c == '"')
        .to_string();
    let fortran_order = match dict_value(header, "fortran_order")?.trim() {
        "False" => false,
        "True" => true,
        other => {
            return Err(FeatureError::Format(format!(
                "invalid fortran_order value '{other}'"
            )));
        }
    };

    let shape_start = header
        .find("'shape'")
        .and_then(|i| header[i..].find('(').map(|j| i + j + 1))
        .ok_or_else(|| FeatureError::Format("header has no shape tuple".to_string()))?;
    let shape_end = header[shape_start..]
        .find(')')
        .map(|j| shape_start + j)
        .ok_or_else(|| FeatureError::Format("unterminated shape tuple".to_string()))?;
    let shape = header[shape_start..shape_end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|e| FeatureError::Format(format!("invalid dimension '{s}': {e}")))
        })
        .collect::<FeatureResult<Vec<_>>>()?;

    Ok(NpyHeader {
        descr,
        fortran_order,
        shape,
    })
}

/// Raw text of a scalar dict entry, up to the next comma.
fn dict_value<'a>(header: &'a str, key: &str) -> FeatureResult<&'a str> {
    let pattern = format!("'{key}':");
    let start = header
        .find(&pattern)
        .map(|i| i + pattern.len())
        .ok_or_else(|| FeatureError::Format(format!("header has no '{key}' entry")))?;
    let rest = &header[start..];
    let end = rest.find(',').unwrap_or(rest.len());
    Ok(rest[..end].trim())
}
