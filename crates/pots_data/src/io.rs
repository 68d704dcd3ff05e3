//! I/O utilities for reading dataset sources from NumPy archives.

use std::path::Path;

use ndarray::ArrayD;

use crate::error::{DataError, Result};
use crate::source::{keys, NamedArrays};

/// Read a single array from a `.npy` file as `f32`.
///
/// `f64`, integer and boolean files are converted. Byte order and memory
/// order are handled by `ndarray-npy`.
///
/// # Errors
///
/// Returns [`DataError::FormatError`] if the file is not an npy array of a
/// supported element type.
pub fn read_npy<P: AsRef<Path>>(path: P) -> Result<ArrayD<f32>> {
    use ndarray_npy::ReadNpyExt;

    let path = path.as_ref();
    let open = || -> Result<_> { Ok(std::io::BufReader::new(std::fs::File::open(path)?)) };

    let err = match ArrayD::<f32>::read_npy(open()?) {
        Ok(arr) => return Ok(arr),
        Err(e) => e,
    };
    if let Ok(arr) = ArrayD::<f64>::read_npy(open()?) {
        return Ok(arr.mapv(|x| x as f32));
    }
    if let Ok(arr) = ArrayD::<i64>::read_npy(open()?) {
        return Ok(arr.mapv(|x| x as f32));
    }
    if let Ok(arr) = ArrayD::<i32>::read_npy(open()?) {
        return Ok(arr.mapv(|x| x as f32));
    }
    if let Ok(arr) = ArrayD::<bool>::read_npy(open()?) {
        return Ok(arr.mapv(|x| f32::from(u8::from(x))));
    }
    Err(DataError::FormatError(format!(
        "Failed to read npy file {}: {err}",
        path.display()
    )))
}

/// Read a dataset source from a NumPy `.npz` archive.
///
/// Looks up the keys `X`, `y`, `X_intact` and `indicating_mask`, with or
/// without the `.npy` suffix numpy adds to archive members. Only `X` is
/// required.
///
/// # Errors
///
/// Returns [`DataError::Schema`] if the archive has no `X` member.
pub fn read_npz<P: AsRef<Path>>(path: P) -> Result<NamedArrays> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    let mut npz = ndarray_npy::NpzReader::new(file)
        .map_err(|e| DataError::FormatError(format!("Failed to read npz file: {e}")))?;

    let mut arrays = NamedArrays::new();
    for key in [keys::X, keys::Y, keys::X_INTACT, keys::INDICATING_MASK] {
        if let Some(array) = read_member(&mut npz, key) {
            arrays.insert(key, array);
        }
    }

    if !arrays.contains(keys::X) {
        return Err(DataError::schema(keys::X, path.display().to_string()));
    }
    Ok(arrays)
}

fn read_member(npz: &mut ndarray_npy::NpzReader<std::fs::File>, key: &str) -> Option<ArrayD<f32>> {
    let suffixed = format!("{key}.npy");
    for name in [key, suffixed.as_str()] {
        if let Ok(a) = npz.by_name::<ndarray::OwnedRepr<f32>, ndarray::IxDyn>(name) {
            return Some(a);
        }
        if let Ok(a) = npz.by_name::<ndarray::OwnedRepr<f64>, ndarray::IxDyn>(name) {
            return Some(a.mapv(|x| x as f32));
        }
        if let Ok(a) = npz.by_name::<ndarray::OwnedRepr<i64>, ndarray::IxDyn>(name) {
            return Some(a.mapv(|x| x as f32));
        }
    }
    None
}
