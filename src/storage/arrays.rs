//! Hierarchically named numeric arrays, as found in snippet dataset files.
//!
//! Arrays are addressed by slash-separated names (e.g. `unit_waveforms/3/waveforms`) and
//! stored as a shape plus row-major `f64` data. Two on-disk formats are supported:
//! JSON (always available) and HDF5 (with the `hdf5` feature), where the slash-separated
//! names map onto groups and datasets.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ndarray::{Array3, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::EphysError;

/// The first bytes of every HDF5 file.
const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];

/// A numeric array with its shape. Data is stored in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayRecord {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl ArrayRecord {
    /// Create an array, checking that the data length matches the shape.
    pub fn build(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, EphysError> {
        let array = ArrayRecord { shape, data };
        array.validate("array")?;
        Ok(array)
    }

    fn validate(&self, name: &str) -> Result<(), EphysError> {
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(EphysError::MalformedArray(format!(
                "{}: shape {:?} requires {} values, got {}",
                name,
                self.shape,
                expected,
                self.data.len()
            )));
        }
        Ok(())
    }

    /// A one-dimensional array.
    pub fn vector(data: Vec<f64>) -> Self {
        ArrayRecord {
            shape: vec![data.len()],
            data,
        }
    }

    /// A one-dimensional array of ids.
    pub fn ids(ids: &[u32]) -> Self {
        Self::vector(ids.iter().map(|&id| id as f64).collect())
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Interpret the array as a three-dimensional array.
    pub fn to_array3(&self, name: &str) -> Result<Array3<f64>, EphysError> {
        if self.shape.len() != 3 {
            return Err(EphysError::MalformedArray(format!(
                "{}: expected 3 dimensions, got shape {:?}",
                name, self.shape
            )));
        }
        let array = ArrayD::from_shape_vec(IxDyn(&self.shape), self.data.clone())
            .map_err(|e| EphysError::MalformedArray(format!("{}: {}", name, e)))?;
        array
            .into_dimensionality()
            .map_err(|e| EphysError::MalformedArray(format!("{}: {}", name, e)))
    }

    /// Interpret the array as a sequence of non-negative integer ids.
    pub fn to_ids(&self, name: &str) -> Result<Vec<u32>, EphysError> {
        self.data
            .iter()
            .map(|&v| {
                if v.fract() == 0.0 && v >= 0.0 && v <= u32::MAX as f64 {
                    Ok(v as u32)
                } else {
                    Err(EphysError::MalformedArray(format!(
                        "{}: {} is not a valid id",
                        name, v
                    )))
                }
            })
            .collect()
    }

    /// Interpret the array as a sequence of non-negative integer frames.
    pub fn to_frames(&self, name: &str) -> Result<Vec<u64>, EphysError> {
        self.data
            .iter()
            .map(|&v| {
                if v.fract() == 0.0 && v >= 0.0 {
                    Ok(v as u64)
                } else {
                    Err(EphysError::MalformedArray(format!(
                        "{}: {} is not a valid frame",
                        name, v
                    )))
                }
            })
            .collect()
    }

    /// The first value of the array (scalars may be stored as one-element vectors).
    pub fn first(&self, name: &str) -> Result<f64, EphysError> {
        self.data
            .first()
            .copied()
            .ok_or_else(|| EphysError::MalformedArray(format!("{}: empty array", name)))
    }
}

impl From<&Array3<f64>> for ArrayRecord {
    fn from(array: &Array3<f64>) -> Self {
        let shape = array.shape().to_vec();
        let data = array.as_standard_layout().iter().copied().collect();
        ArrayRecord { shape, data }
    }
}

/// The on-disk format of a collection of named arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayFormat {
    #[default]
    Json,
    Hdf5,
}

impl ArrayFormat {
    /// The file extension used for the format.
    pub fn extension(&self) -> &'static str {
        match self {
            ArrayFormat::Json => "json",
            ArrayFormat::Hdf5 => "h5",
        }
    }

    /// The format implied by the file extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, EphysError> {
        let extension = path
            .as_ref()
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());
        match extension.as_deref() {
            Some("json") => Ok(ArrayFormat::Json),
            Some("h5") | Some("hdf5") => Ok(ArrayFormat::Hdf5),
            _ => Err(EphysError::InvalidParameter(format!(
                "cannot infer the array format of {}",
                path.as_ref().display()
            ))),
        }
    }

    /// The format of an existing file, detected from its content.
    pub fn detect<P: AsRef<Path>>(path: P) -> Result<Self, EphysError> {
        let mut head = Vec::with_capacity(HDF5_SIGNATURE.len());
        File::open(path)?
            .take(HDF5_SIGNATURE.len() as u64)
            .read_to_end(&mut head)?;
        if head == HDF5_SIGNATURE {
            Ok(ArrayFormat::Hdf5)
        } else {
            Ok(ArrayFormat::Json)
        }
    }
}

/// A collection of arrays addressed by slash-separated names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedArrays {
    arrays: BTreeMap<String, ArrayRecord>,
}

impl NamedArrays {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) an array.
    pub fn insert(&mut self, name: impl Into<String>, array: ArrayRecord) {
        self.arrays.insert(name.into(), array);
    }

    /// Returns the array with the given name.
    pub fn get(&self, name: &str) -> Result<&ArrayRecord, EphysError> {
        self.arrays
            .get(name)
            .ok_or_else(|| EphysError::MissingArray(name.to_string()))
    }

    /// An iterator over the array names, in lexicographic order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.arrays.keys().map(|name| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Write the arrays to a file, in the format implied by its extension.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), EphysError> {
        match ArrayFormat::from_path(&path)? {
            ArrayFormat::Json => {
                let mut writer = BufWriter::new(File::create(path)?);
                serde_json::to_writer(&mut writer, self)?;
                writer.flush()?;
                Ok(())
            }
            ArrayFormat::Hdf5 => h5::write(self, path.as_ref()),
        }
    }

    /// Read the arrays from a file, whatever its format.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, EphysError> {
        match ArrayFormat::detect(&path)? {
            ArrayFormat::Json => {
                let reader = BufReader::new(File::open(path)?);
                let arrays: NamedArrays = serde_json::from_reader(reader)?;
                // the shape/data invariant is not enforced by deserialization
                for (name, array) in arrays.arrays.iter() {
                    array.validate(name)?;
                }
                Ok(arrays)
            }
            ArrayFormat::Hdf5 => h5::read(path.as_ref()),
        }
    }
}

#[cfg(feature = "hdf5")]
mod h5 {
    use std::path::Path;

    use super::{ArrayRecord, NamedArrays};
    use crate::error::EphysError;

    fn ensure_group(file: &hdf5::File, path: &[&str]) -> Result<hdf5::Group, EphysError> {
        let mut group = file.group("/")?;
        for name in path {
            group = match group.group(name) {
                Ok(child) => child,
                Err(_) => group.create_group(name)?,
            };
        }
        Ok(group)
    }

    pub fn write(arrays: &NamedArrays, path: &Path) -> Result<(), EphysError> {
        let file = hdf5::File::create(path)?;
        for (name, array) in arrays.arrays.iter() {
            let parts: Vec<&str> = name.split('/').filter(|p| !p.is_empty()).collect();
            let Some((leaf, groups)) = parts.split_last() else {
                return Err(EphysError::InvalidParameter(format!(
                    "invalid array name {:?}",
                    name
                )));
            };
            let group = ensure_group(&file, groups)?;
            group
                .new_dataset::<f64>()
                .shape(array.shape.clone())
                .create(*leaf)?
                .write_raw(array.data.as_slice())?;
        }
        Ok(())
    }

    fn visit(group: &hdf5::Group, prefix: &str, arrays: &mut NamedArrays) -> Result<(), EphysError> {
        for member in group.member_names()? {
            let name = if prefix.is_empty() {
                member.clone()
            } else {
                format!("{}/{}", prefix, member)
            };
            match group.dataset(&member) {
                Ok(dataset) => {
                    let data = dataset.read_raw::<f64>()?;
                    arrays.insert(name, ArrayRecord::build(dataset.shape(), data)?);
                }
                Err(_) => visit(&group.group(&member)?, &name, arrays)?,
            }
        }
        Ok(())
    }

    pub fn read(path: &Path) -> Result<NamedArrays, EphysError> {
        let file = hdf5::File::open(path)?;
        let mut arrays = NamedArrays::new();
        visit(&file.group("/")?, "", &mut arrays)?;
        Ok(arrays)
    }
}

#[cfg(not(feature = "hdf5"))]
mod h5 {
    use std::path::Path;

    use super::NamedArrays;
    use crate::error::EphysError;

    fn unsupported(path: &Path) -> EphysError {
        EphysError::InvalidParameter(format!(
            "{}: HDF5 support requires the `hdf5` feature",
            path.display()
        ))
    }

    pub fn write(_arrays: &NamedArrays, path: &Path) -> Result<(), EphysError> {
        Err(unsupported(path))
    }

    pub fn read(path: &Path) -> Result<NamedArrays, EphysError> {
        Err(unsupported(path))
    }
}
