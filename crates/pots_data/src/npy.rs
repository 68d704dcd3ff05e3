//! A directory of `.npy` files read one sample at a time.
//!
//! Each array lives in `<dir>/<key>.npy`. A handle maps every file it
//! touches and views it in place through `ndarray-npy`, so a read copies
//! only the row of the requested sample. Files that cannot be viewed in
//! place (non-native byte order, misaligned data) are read whole on first
//! use instead.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use ndarray::{Array2, ArrayD, ArrayViewD, Axis, Ix2};
use ndarray_npy::{ViewElement, ViewNpyExt};

use crate::error::{DataError, Result};
use crate::io::read_npy;
use crate::source::{keys, NamedArrays};
use crate::store::{ArrayStore, StoreHandle, StoreLayout};

/// Element types a mapped file may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    F32,
    F64,
    I64,
    I32,
    U8,
    Bool,
}

impl Element {
    const ALL: [Element; 6] = [
        Element::F32,
        Element::F64,
        Element::I64,
        Element::I32,
        Element::U8,
        Element::Bool,
    ];

    /// Find the element type that views `bytes`, with the array's dimensions.
    fn detect(bytes: &[u8]) -> Option<(Self, Vec<usize>)> {
        Self::ALL.into_iter().find_map(|element| {
            let dims = match element {
                Element::F32 => dims_of::<f32>(bytes),
                Element::F64 => dims_of::<f64>(bytes),
                Element::I64 => dims_of::<i64>(bytes),
                Element::I32 => dims_of::<i32>(bytes),
                Element::U8 => dims_of::<u8>(bytes),
                Element::Bool => dims_of::<bool>(bytes),
            }?;
            Some((element, dims))
        })
    }
}

fn dims_of<A: ViewElement>(bytes: &[u8]) -> Option<Vec<usize>> {
    ArrayViewD::<A>::view_npy(bytes)
        .ok()
        .map(|view| view.shape().to_vec())
}

fn mapped_row<A: ViewElement + Copy>(
    bytes: &[u8],
    index: usize,
    cast: fn(A) -> f32,
) -> Result<ArrayD<f32>> {
    let view = ArrayViewD::<A>::view_npy(bytes)
        .map_err(|e| DataError::FormatError(format!("cannot view npy data: {e}")))?;
    row(view, index, cast)
}

fn row<A: Copy>(array: ArrayViewD<'_, A>, index: usize, cast: fn(A) -> f32) -> Result<ArrayD<f32>> {
    let length = array.shape().first().copied().unwrap_or(0);
    if array.ndim() == 0 || index >= length {
        return Err(DataError::IndexOutOfBounds { index, length });
    }
    Ok(array.index_axis(Axis(0), index).mapv(cast))
}

#[allow(unsafe_code)]
fn map_file(file: &File) -> Result<Mmap> {
    // SAFETY: the map is read-only and store files are not modified while
    // a handle is open on them.
    let map = unsafe { Mmap::map(file)? };
    Ok(map)
}

/// One array file, viewed in place when possible.
enum NpyArray {
    Mapped {
        map: Mmap,
        element: Element,
        dims: Vec<usize>,
    },
    Resident(ArrayD<f32>),
}

impl NpyArray {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let map = map_file(&file)?;
        if let Some((element, dims)) = Element::detect(&map[..]) {
            return Ok(NpyArray::Mapped { map, element, dims });
        }
        tracing::debug!(path = %path.display(), "npy file cannot be viewed in place, reading it whole");
        Ok(NpyArray::Resident(read_npy(path)?))
    }

    fn dims(&self) -> &[usize] {
        match self {
            NpyArray::Mapped { dims, .. } => dims,
            NpyArray::Resident(array) => array.shape(),
        }
    }

    /// Copy out the row at `index` as `f32`.
    fn row(&self, index: usize) -> Result<ArrayD<f32>> {
        match self {
            NpyArray::Resident(array) => row(array.view(), index, |x| x),
            NpyArray::Mapped { map, element, .. } => {
                let bytes = &map[..];
                match element {
                    Element::F32 => mapped_row::<f32>(bytes, index, |x| x),
                    Element::F64 => mapped_row::<f64>(bytes, index, |x| x as f32),
                    Element::I64 => mapped_row::<i64>(bytes, index, |x| x as f32),
                    Element::I32 => mapped_row::<i32>(bytes, index, |x| x as f32),
                    Element::U8 => mapped_row::<u8>(bytes, index, |x| f32::from(x)),
                    Element::Bool => mapped_row::<bool>(bytes, index, |x| f32::from(u8::from(x))),
                }
            }
        }
    }
}

/// A dataset stored as one `.npy` file per array in a directory.
///
/// Files are memory-mapped by each handle, so they must not be modified
/// while a dataset reads them.
///
/// # Example
///
/// ```rust,ignore
/// use pots_data::{NpyDirStore, PotsDataset};
///
/// let store = NpyDirStore::new("data/physionet_train");
/// let dataset = PotsDataset::lazy(store, Default::default())?;
/// ```
#[derive(Debug, Clone)]
pub struct NpyDirStore {
    dir: PathBuf,
}

impl NpyDirStore {
    /// Point at a directory containing `<key>.npy` files.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory backing this store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.npy"))
    }

    fn present_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        [keys::X, keys::Y, keys::X_INTACT, keys::INDICATING_MASK]
            .into_iter()
            .filter(|k| self.path_of(k).is_file())
    }

    /// Read every array of the store into memory.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::Schema`] when `X.npy` is absent.
    pub fn load(&self) -> Result<NamedArrays> {
        let mut arrays = NamedArrays::new();
        for key in self.present_keys() {
            arrays.insert(key, read_npy(self.path_of(key))?);
        }
        if !arrays.contains(keys::X) {
            return Err(DataError::schema(keys::X, self.describe()));
        }
        Ok(arrays)
    }
}

impl ArrayStore for NpyDirStore {
    fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    fn inspect(&self) -> Result<StoreLayout> {
        let mut dims = BTreeMap::new();
        for key in self.present_keys() {
            let array = NpyArray::open(&self.path_of(key))?;
            dims.insert(key.to_string(), array.dims().to_vec());
        }
        StoreLayout::from_dims(dims, &self.describe())
    }

    fn open(&self) -> Result<Box<dyn StoreHandle>> {
        tracing::debug!(store = %self.describe(), "opening npy store handle");
        Ok(Box::new(NpyDirHandle {
            store: self.clone(),
            files: HashMap::new(),
        }))
    }
}

/// Read session owning one map per array it has touched.
struct NpyDirHandle {
    store: NpyDirStore,
    files: HashMap<String, NpyArray>,
}

impl NpyDirHandle {
    fn file(&mut self, key: &str) -> Result<Option<&NpyArray>> {
        if !self.files.contains_key(key) {
            let path = self.store.path_of(key);
            if !path.is_file() {
                return Ok(None);
            }
            self.files.insert(key.to_string(), NpyArray::open(&path)?);
        }
        Ok(self.files.get(key))
    }
}

impl StoreHandle for NpyDirHandle {
    fn read_series(&mut self, key: &str, index: usize) -> Result<Array2<f32>> {
        let describe = self.store.describe();
        let file = self
            .file(key)?
            .ok_or_else(|| DataError::schema(key, describe))?;
        if file.dims().len() != 3 {
            return Err(DataError::Shape(format!(
                "{key} must be 3-dimensional, got {} dimensions",
                file.dims().len()
            )));
        }
        file.row(index)?
            .into_dimensionality::<Ix2>()
            .map_err(|e| DataError::Shape(format!("{key}: {e}")))
    }

    fn read_label(&mut self, index: usize) -> Result<Option<f32>> {
        match self.file(keys::Y)? {
            Some(file) => Ok(file.row(index)?.iter().next().copied()),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array3, ShapeBuilder};
    use ndarray_npy::write_npy;
    use pots_core::SeriesShape;

    fn write_store(dir: &Path) -> Array3<f32> {
        let x = Array3::from_shape_fn((5, 4, 3), |(n, t, f)| {
            if (n + t + f) % 4 == 0 {
                f32::NAN
            } else {
                (n * 100 + t * 10 + f) as f32
            }
        });
        write_npy(dir.join("X.npy"), &x).unwrap();
        write_npy(dir.join("y.npy"), &Array1::from(vec![0i64, 1, 0, 1, 1])).unwrap();
        x
    }

    #[test]
    fn test_reads_single_rows() {
        let dir = tempfile::tempdir().unwrap();
        let x = write_store(dir.path());
        let store = NpyDirStore::new(dir.path());

        let layout = store.inspect().unwrap();
        assert_eq!(layout.shape, SeriesShape::new(5, 4, 3));
        assert_eq!(layout.arrays[keys::Y], vec![5]);
        assert!(!layout.contains(keys::X_INTACT));

        let mut handle = store.open().unwrap();
        let row = handle.read_series(keys::X, 3).unwrap();
        for ((t, f), &v) in row.indexed_iter() {
            let expected = x[[3, t, f]];
            assert!(v == expected || (v.is_nan() && expected.is_nan()));
        }
        assert_eq!(handle.read_label(4).unwrap(), Some(1.0));
        assert!(matches!(
            handle.read_series(keys::X, 5),
            Err(DataError::IndexOutOfBounds { index: 5, length: 5 })
        ));
    }

    #[test]
    fn test_reads_fortran_ordered_and_boolean_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let mut x = Array3::<f64>::zeros((3, 4, 2).f());
        x[[2, 1, 1]] = 7.0;
        let mask = Array3::from_shape_fn((3, 4, 2), |(n, t, _)| n == t);
        write_npy(dir.path().join("X.npy"), &x).unwrap();
        write_npy(dir.path().join("X_intact.npy"), &x).unwrap();
        write_npy(dir.path().join("indicating_mask.npy"), &mask).unwrap();

        let store = NpyDirStore::new(dir.path());
        assert_eq!(store.inspect().unwrap().shape, SeriesShape::new(3, 4, 2));

        let mut handle = store.open().unwrap();
        let row = handle.read_series(keys::X, 2).unwrap();
        assert_eq!(row[[1, 1]], 7.0);
        assert_eq!(row.sum(), 7.0);
        let mask_row = handle.read_series(keys::INDICATING_MASK, 1).unwrap();
        assert_eq!(mask_row[[1, 0]], 1.0);
        assert_eq!(mask_row[[0, 0]], 0.0);
    }

    #[test]
    fn test_missing_x_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = NpyDirStore::new(dir.path());
        assert!(matches!(store.inspect(), Err(DataError::Schema { key, .. }) if key == "X"));
        assert!(matches!(store.load(), Err(DataError::Schema { key, .. }) if key == "X"));
    }

    #[test]
    fn test_load_reads_everything() {
        let dir = tempfile::tempdir().unwrap();
        write_store(dir.path());
        let arrays = NpyDirStore::new(dir.path()).load().unwrap();
        assert_eq!(arrays.get(keys::X).unwrap().shape(), &[5, 4, 3]);
        assert_eq!(arrays.get(keys::Y).unwrap().len(), 5);
    }

    #[test]
    fn test_rejects_non_npy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("X.npy"), b"not numpy at all").unwrap();
        assert!(matches!(
            NpyDirStore::new(dir.path()).inspect(),
            Err(DataError::FormatError(_))
        ));
    }
}
