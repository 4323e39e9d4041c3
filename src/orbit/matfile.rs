//! Level 5 MAT-file codec for reference orbit snapshots.
//!
//! Only the subset needed for orbit snapshots is supported: uncompressed,
//! little-endian files holding real numeric matrices and char matrices. Cell
//! arrays, structs and other classes are skipped when reading; compressed or
//! big-endian files are rejected.
//!
//! Snapshot layout (one row vector per quantity, one entry per BPM):
//!
//! | variable      | class  | contents                         |
//! |---------------|--------|----------------------------------|
//! | `orbit_name`  | char   | orbit name                       |
//! | `bpm_names`   | char   | N×L matrix, rows padded by space |
//! | `z`           | double | BPM z positions (m)              |
//! | `x`, `y`      | double | positions (mm)                   |
//! | `tmit`        | double | charge (particles)               |
//! | `x_sevr`, ... | double | severities per axis              |
//! | `energy_bpm`  | double | 1 for energy BPMs, else 0        |

use std::path::Path;

use tracing::{debug, info};

use crate::error::MatFileError;

use super::{Axis, Bpm, Orbit, OrbitModel};

const HEADER_LEN: usize = 128;
const HEADER_TEXT_LEN: usize = 116;

const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT16: u32 = 3;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_DOUBLE: u32 = 9;
const MI_INT64: u32 = 12;
const MI_UINT64: u32 = 13;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;
const MI_UTF8: u32 = 16;
const MI_UTF16: u32 = 17;

const MX_CHAR_CLASS: u8 = 4;
const MX_DOUBLE_CLASS: u8 = 6;
const MX_UINT64_CLASS: u8 = 15;

const FLAG_COMPLEX: u32 = 0x0800;

/// A variable held in a MAT-file. Data is column-major, as MATLAB stores it.
#[derive(Debug, Clone, PartialEq)]
pub enum MatVar {
    Numeric { dims: Vec<usize>, data: Vec<f64> },
    Char { dims: Vec<usize>, chars: Vec<char> },
}

impl MatVar {
    pub fn dims(&self) -> &[usize] {
        match self {
            MatVar::Numeric { dims, .. } | MatVar::Char { dims, .. } => dims,
        }
    }

    /// Rows of a 2-D char matrix with trailing padding removed.
    pub fn char_rows(&self) -> Option<Vec<String>> {
        let MatVar::Char { dims, chars } = self else {
            return None;
        };
        let rows = dims.first().copied().unwrap_or(0);
        let cols = dims.get(1).copied().unwrap_or(0);
        if rows.checked_mul(cols) != Some(chars.len()) {
            return None;
        }
        Some(
            (0..rows)
                .map(|r| {
                    let row: String = (0..cols).map(|c| chars[c * rows + r]).collect();
                    row.trim_end_matches([' ', '\0']).to_string()
                })
                .collect(),
        )
    }
}

/// An in-memory MAT-file: named variables in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatFile {
    vars: Vec<(String, MatVar)>,
}

impl MatFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|(n, _)| n.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&MatVar> {
        self.vars.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Insert or replace a variable.
    pub fn insert<S: Into<String>>(&mut self, name: S, var: MatVar) {
        let name = name.into();
        match self.vars.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = var,
            None => self.vars.push((name, var)),
        }
    }

    pub fn insert_row<S: Into<String>>(&mut self, name: S, data: Vec<f64>) {
        let dims = vec![1, data.len()];
        self.insert(name, MatVar::Numeric { dims, data });
    }

    pub fn insert_text<S: Into<String>>(&mut self, name: S, text: &str) {
        let chars: Vec<char> = text.chars().collect();
        let dims = vec![1, chars.len()];
        self.insert(name, MatVar::Char { dims, chars });
    }

    /// Char matrix with one row per string, padded with spaces to equal length.
    pub fn insert_text_rows<S: Into<String>>(&mut self, name: S, rows: &[String]) {
        let width = rows.iter().map(|r| r.chars().count()).max().unwrap_or(0);
        let padded: Vec<Vec<char>> = rows
            .iter()
            .map(|r| {
                let mut v: Vec<char> = r.chars().collect();
                v.resize(width, ' ');
                v
            })
            .collect();
        let mut chars = Vec::with_capacity(rows.len() * width);
        for c in 0..width {
            for row in &padded {
                chars.push(row[c]);
            }
        }
        self.insert(
            name,
            MatVar::Char {
                dims: vec![rows.len(), width],
                chars,
            },
        );
    }

    /// Numeric data of `name`, flattened.
    pub fn numeric(&self, name: &str) -> Result<&[f64], MatFileError> {
        match self.get(name) {
            Some(MatVar::Numeric { data, .. }) => Ok(data),
            Some(MatVar::Char { .. }) => Err(MatFileError::BadVariable {
                name: name.to_string(),
                reason: "expected numeric, found char".to_string(),
            }),
            None => Err(MatFileError::MissingVariable(name.to_string())),
        }
    }

    /// Like [`MatFile::numeric`], but an absent variable is `None`.
    pub fn optional_numeric(&self, name: &str) -> Result<Option<&[f64]>, MatFileError> {
        match self.numeric(name) {
            Ok(data) => Ok(Some(data)),
            Err(MatFileError::MissingVariable(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Text of a char variable; a matrix is read row by row.
    pub fn text_rows(&self, name: &str) -> Result<Vec<String>, MatFileError> {
        let var = self
            .get(name)
            .ok_or_else(|| MatFileError::MissingVariable(name.to_string()))?;
        var.char_rows().ok_or_else(|| MatFileError::BadVariable {
            name: name.to_string(),
            reason: "expected a 2-D char matrix".to_string(),
        })
    }

    // ---------- encoding ----------

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let created = chrono::Local::now().format("%a %b %e %H:%M:%S %Y");
        let mut text = format!("MATLAB 5.0 MAT-file, Platform: rust, Created on: {created}").into_bytes();
        text.resize(HEADER_TEXT_LEN, b' ');
        out.extend_from_slice(&text);
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&0x0100u16.to_le_bytes());
        out.extend_from_slice(b"IM");
        for (name, var) in &self.vars {
            let body = encode_matrix(name, var);
            put_element(&mut out, MI_MATRIX, &body);
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<(), MatFileError> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    // ---------- decoding ----------

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MatFileError> {
        if bytes.len() < HEADER_LEN {
            return Err(MatFileError::BadHeader("file shorter than header".to_string()));
        }
        if !bytes.starts_with(b"MATLAB 5.0 MAT-file") {
            return Err(MatFileError::BadHeader("missing MAT-file signature".to_string()));
        }
        match &bytes[126..128] {
            b"IM" => {}
            b"MI" => return Err(MatFileError::Unsupported("big-endian file".to_string())),
            other => {
                return Err(MatFileError::BadHeader(format!(
                    "bad endian indicator {:?}",
                    String::from_utf8_lossy(other)
                )))
            }
        }
        let version = u16::from_le_bytes([bytes[124], bytes[125]]);
        if version != 0x0100 {
            return Err(MatFileError::Unsupported(format!("version {version:#06x}")));
        }

        let mut file = MatFile::new();
        let mut cur = Cursor::new(&bytes[HEADER_LEN..]);
        while !cur.at_end() {
            let (ty, data) = cur.element()?;
            match ty {
                MI_MATRIX => {
                    if let Some((name, var)) = decode_matrix(data)? {
                        file.insert(name, var);
                    }
                }
                MI_COMPRESSED => {
                    return Err(MatFileError::Unsupported("compressed variables".to_string()))
                }
                other => debug!(element_type = other, "skipping top-level MAT element"),
            }
        }
        Ok(file)
    }

    pub fn read(path: &Path) -> Result<Self, MatFileError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

fn put_element(out: &mut Vec<u8>, ty: u32, data: &[u8]) {
    out.extend_from_slice(&ty.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    let pad = (8 - data.len() % 8) % 8;
    out.extend(std::iter::repeat(0u8).take(pad));
}

fn encode_matrix(name: &str, var: &MatVar) -> Vec<u8> {
    let mut body = Vec::new();
    let class = match var {
        MatVar::Numeric { .. } => MX_DOUBLE_CLASS,
        MatVar::Char { .. } => MX_CHAR_CLASS,
    };
    let mut flags = Vec::with_capacity(8);
    flags.extend_from_slice(&u32::from(class).to_le_bytes());
    flags.extend_from_slice(&0u32.to_le_bytes());
    put_element(&mut body, MI_UINT32, &flags);

    let dims: Vec<u8> = var
        .dims()
        .iter()
        .flat_map(|&d| (d as i32).to_le_bytes())
        .collect();
    put_element(&mut body, MI_INT32, &dims);
    put_element(&mut body, MI_INT8, name.as_bytes());

    match var {
        MatVar::Numeric { data, .. } => {
            let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
            put_element(&mut body, MI_DOUBLE, &bytes);
        }
        MatVar::Char { chars, .. } => {
            let bytes: Vec<u8> = chars
                .iter()
                .flat_map(|&c| {
                    let unit = u16::try_from(u32::from(c)).unwrap_or(u16::from(b'?'));
                    unit.to_le_bytes()
                })
                .collect();
            put_element(&mut body, MI_UINT16, &bytes);
        }
    }
    body
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MatFileError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or_else(|| MatFileError::Corrupt(format!("need {n} bytes at offset {}", self.pos)))?;
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn u32(&mut self) -> Result<u32, MatFileError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read one data element (either tag format) and skip its padding.
    fn element(&mut self) -> Result<(u32, &'a [u8]), MatFileError> {
        let first = self.u32()?;
        if first >> 16 != 0 {
            let ty = first & 0xffff;
            let n = (first >> 16) as usize;
            if n > 4 {
                return Err(MatFileError::Corrupt(format!("small element of {n} bytes")));
            }
            let data = self.take(4)?;
            return Ok((ty, &data[..n]));
        }
        let n = self.u32()? as usize;
        let data = self.take(n)?;
        if first != MI_COMPRESSED {
            let pad = (8 - n % 8) % 8;
            let pad = pad.min(self.buf.len() - self.pos);
            self.pos += pad;
        }
        Ok((first, data))
    }
}

fn decode_matrix(data: &[u8]) -> Result<Option<(String, MatVar)>, MatFileError> {
    if data.is_empty() {
        return Ok(None);
    }
    let mut cur = Cursor::new(data);

    let (ty, flags) = cur.element()?;
    if ty != MI_UINT32 || flags.len() < 8 {
        return Err(MatFileError::Corrupt("bad array flags".to_string()));
    }
    let flag_word = u32::from_le_bytes([flags[0], flags[1], flags[2], flags[3]]);
    let class = (flag_word & 0xff) as u8;

    let (ty, dims_raw) = cur.element()?;
    if ty != MI_INT32 {
        return Err(MatFileError::Corrupt("bad dimensions".to_string()));
    }
    let dims: Vec<usize> = dims_raw
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]).max(0) as usize)
        .collect();

    let count = element_count(&dims)?;

    let (_, name_raw) = cur.element()?;
    let name = String::from_utf8_lossy(name_raw).to_string();

    if class == MX_CHAR_CLASS {
        let (ty, raw) = cur.element()?;
        let chars = decode_chars(ty, raw)?;
        return Ok(Some((name, MatVar::Char { dims, chars })));
    }
    if (MX_DOUBLE_CLASS..=MX_UINT64_CLASS).contains(&class) {
        let (ty, raw) = cur.element()?;
        let data = decode_numeric(ty, raw)?;
        if flag_word & FLAG_COMPLEX != 0 {
            debug!(variable = %name, "ignoring imaginary part");
        }
        if data.len() != count {
            return Err(MatFileError::BadVariable {
                name,
                reason: format!("{} values for dims {:?}", data.len(), dims),
            });
        }
        return Ok(Some((name, MatVar::Numeric { dims, data })));
    }
    debug!(variable = %name, class, "skipping unsupported MAT class");
    Ok(None)
}

/// Number of elements described by a dimensions array.
fn element_count(dims: &[usize]) -> Result<usize, MatFileError> {
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| MatFileError::Corrupt(format!("dimensions {dims:?} overflow")))
}

fn arr8(c: &[u8]) -> [u8; 8] {
    let mut a = [0u8; 8];
    a.copy_from_slice(c);
    a
}

fn decode_numeric(ty: u32, raw: &[u8]) -> Result<Vec<f64>, MatFileError> {
    let v = match ty {
        MI_INT8 => raw.iter().map(|&b| f64::from(b as i8)).collect(),
        MI_UINT8 => raw.iter().map(|&b| f64::from(b)).collect(),
        MI_INT16 => raw
            .chunks_exact(2)
            .map(|c| f64::from(i16::from_le_bytes([c[0], c[1]])))
            .collect(),
        MI_UINT16 => raw
            .chunks_exact(2)
            .map(|c| f64::from(u16::from_le_bytes([c[0], c[1]])))
            .collect(),
        MI_INT32 => raw
            .chunks_exact(4)
            .map(|c| f64::from(i32::from_le_bytes([c[0], c[1], c[2], c[3]])))
            .collect(),
        MI_UINT32 => raw
            .chunks_exact(4)
            .map(|c| f64::from(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
            .collect(),
        MI_SINGLE => raw
            .chunks_exact(4)
            .map(|c| f64::from(f32::from_le_bytes([c[0], c[1], c[2], c[3]])))
            .collect(),
        MI_DOUBLE => raw.chunks_exact(8).map(|c| f64::from_le_bytes(arr8(c))).collect(),
        MI_INT64 => raw
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes(arr8(c)) as f64)
            .collect(),
        MI_UINT64 => raw
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(arr8(c)) as f64)
            .collect(),
        other => {
            return Err(MatFileError::Unsupported(format!(
                "numeric storage type {other}"
            )))
        }
    };
    Ok(v)
}

fn decode_chars(ty: u32, raw: &[u8]) -> Result<Vec<char>, MatFileError> {
    match ty {
        MI_UINT16 | MI_UTF16 => Ok(raw
            .chunks_exact(2)
            .map(|c| {
                let unit = u16::from_le_bytes([c[0], c[1]]);
                char::from_u32(u32::from(unit)).unwrap_or('?')
            })
            .collect()),
        MI_UTF8 | MI_INT8 | MI_UINT8 => Ok(String::from_utf8_lossy(raw).chars().collect()),
        other => Err(MatFileError::Unsupported(format!("char storage type {other}"))),
    }
}

fn sevr_var(axis: Axis) -> String {
    format!("{}_sevr", axis.as_str())
}

impl Orbit {
    /// Encode the current readings in the snapshot layout.
    pub fn to_matfile(&self) -> MatFile {
        let mut mat = MatFile::new();
        mat.insert_text("orbit_name", self.name());
        mat.insert_text_rows("bpm_names", &self.names());
        mat.insert_row("z", self.z_vals());
        for axis in Axis::ALL {
            mat.insert_row(axis.as_str(), self.iter().map(|b| b.value(axis)).collect());
        }
        for axis in Axis::ALL {
            mat.insert_row(
                sevr_var(axis),
                self.iter().map(|b| f64::from(b.severity(axis))).collect(),
            );
        }
        mat.insert_row(
            "energy_bpm",
            self.iter().map(|b| if b.is_energy_bpm { 1.0 } else { 0.0 }).collect(),
        );
        mat
    }

    /// Rebuild a reference orbit from a snapshot file's variables.
    pub fn from_matfile(mat: &MatFile) -> Result<Orbit, MatFileError> {
        let names = mat.text_rows("bpm_names")?;
        let n = names.len();
        let z = mat.numeric("z")?;
        let check = |var: &str, len: usize| {
            if len == n {
                Ok(())
            } else {
                Err(MatFileError::BadVariable {
                    name: var.to_string(),
                    reason: format!("{len} entries for {n} BPMs"),
                })
            }
        };
        check("z", z.len())?;
        let mut values = Vec::with_capacity(3);
        for axis in Axis::ALL {
            let v = mat.numeric(axis.as_str())?;
            check(axis.as_str(), v.len())?;
            values.push(v);
        }
        // Severities and energy flags are optional: older snapshots only carry readings.
        let mut sevr: Vec<Option<&[f64]>> = Vec::with_capacity(3);
        for axis in Axis::ALL {
            let s = mat.optional_numeric(&sevr_var(axis))?;
            if let Some(s) = s {
                check(&sevr_var(axis), s.len())?;
            }
            sevr.push(s);
        }
        let energy = mat.optional_numeric("energy_bpm")?;
        if let Some(e) = energy {
            check("energy_bpm", e.len())?;
        }

        let orbit_name = mat
            .text_rows("orbit_name")
            .ok()
            .and_then(|r| r.into_iter().next())
            .unwrap_or_else(|| "reference".to_string());
        let mut orbit = Orbit::new(orbit_name);
        for (i, name) in names.into_iter().enumerate() {
            let mut bpm = Bpm::new(name, z[i])
                .with_energy_flag(energy.is_some_and(|e| e.get(i).is_some_and(|&f| f != 0.0)));
            for (k, axis) in Axis::ALL.into_iter().enumerate() {
                let sev = sevr[k].and_then(|s| s.get(i)).map_or(0, |&s| s.max(0.0) as u16);
                bpm.update(axis, values[k][i], sev);
            }
            orbit.append(bpm)?;
        }
        Ok(orbit)
    }

    /// Load a reference orbit from a snapshot file.
    pub fn from_matlab_file(path: &Path) -> Result<Orbit, MatFileError> {
        let mat = MatFile::read(path)?;
        let orbit = Self::from_matfile(&mat)?;
        info!(path = %path.display(), bpms = orbit.len(), "loaded reference orbit");
        Ok(orbit)
    }

    /// Write the current readings as a snapshot file.
    pub fn write_matlab_file(&self, path: &Path) -> Result<(), MatFileError> {
        self.to_matfile().write(path)?;
        info!(path = %path.display(), bpms = self.len(), "wrote orbit snapshot");
        Ok(())
    }
}
