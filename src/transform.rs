//! The rigid-body transform applied to the ball positions reported by the
//! tracking, and the live store it is shared through.
//!
//! A transform exists in two copies: the durable one in the driver
//! configuration file (see [`crate::driver_config`]), and a live one that a
//! running publisher re-reads at every iteration and that the transform
//! dialog edits. The live copy is a working draft; the two are allowed to
//! differ until the operator saves.

use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

/// Translation (meters) and extrinsic xyz Euler angles (radians).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub translation: [f64; 3],
    pub rotation: [f64; 3],
}

impl Transform {
    pub fn new(translation: [f64; 3], rotation: [f64; 3]) -> Self {
        Transform {
            translation,
            rotation,
        }
    }

    /// Rotates `point` into the frame obtained by turning the axes about x,
    /// then y, then z, and translates it. Each elementary matrix is the
    /// transpose of the active rotation, as in the calibration files in use.
    pub fn apply(&self, point: [f64; 3]) -> [f64; 3] {
        let [rx, ry, rz] = self.rotation;
        let (sx, cx) = rx.sin_cos();
        let (sy, cy) = ry.sin_cos();
        let (sz, cz) = rz.sin_cos();

        // Rz * Ry * Rx, with Rx = [[1, 0, 0], [0, cx, sx], [0, -sx, cx]]
        let matrix = [
            [cz * cy, cz * sy * sx + sz * cx, sz * sx - cz * sy * cx],
            [-sz * cy, cz * cx - sz * sy * sx, sz * sy * cx + cz * sx],
            [sy, -cy * sx, cy * cx],
        ];

        let mut transformed = self.translation;
        for (row, value) in matrix.iter().zip(transformed.iter_mut()) {
            *value += row[0] * point[0] + row[1] * point[1] + row[2] * point[2];
        }
        transformed
    }

    /// Returns the translation or rotation vector.
    pub fn part(&self, part: TransformPart) -> [f64; 3] {
        match part {
            TransformPart::Translation => self.translation,
            TransformPart::Rotation => self.rotation,
        }
    }

    fn part_mut(&mut self, part: TransformPart) -> &mut [f64; 3] {
        match part {
            TransformPart::Translation => &mut self.translation,
            TransformPart::Rotation => &mut self.rotation,
        }
    }

    /// Sets component `axis` (0, 1 or 2) of `part`.
    pub fn set_component(
        &mut self,
        part: TransformPart,
        axis: usize,
        value: f64,
    ) -> Result<(), StoreError> {
        let component = self
            .part_mut(part)
            .get_mut(axis)
            .ok_or(StoreError::Axis(axis))?;
        *component = value;
        Ok(())
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.translation;
        let [rx, ry, rz] = self.rotation;
        writeln!(f, "translation: {x} {y} {z}")?;
        write!(f, "rotation: {rx} {ry} {rz}")
    }
}

/// One of the two vectors of a [`Transform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformPart {
    Translation,
    Rotation,
}

impl fmt::Display for TransformPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformPart::Translation => write!(f, "translation"),
            TransformPart::Rotation => write!(f, "rotation"),
        }
    }
}

/// Errors of the live transform store.
#[derive(Debug)]
pub enum StoreError {
    /// Returned when io fails when reading or writing the store.
    Io(io::Error),

    /// Returned when the store could not be serialized.
    Ron(ron::Error),

    /// Returned when the store content could not be deserialized.
    RonSpanned(ron::error::SpannedError),

    /// The store has not been initialised for this segment.
    Missing(PathBuf),

    /// Returned when writing a component that is not x, y or z.
    Axis(usize),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(error) => write!(f, "io error: {error}"),
            StoreError::Ron(error) => write!(f, "ron error: {error}"),
            StoreError::RonSpanned(error) => write!(f, "ron error: {error}"),
            StoreError::Missing(path) => write!(
                f,
                "no live transform at {} (is the publisher running with an active transform?)",
                path.display()
            ),
            StoreError::Axis(axis) => write!(f, "no axis {axis}, expected 0, 1 or 2"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ron::Error> for StoreError {
    fn from(value: ron::Error) -> Self {
        Self::Ron(value)
    }
}

impl From<ron::error::SpannedError> for StoreError {
    fn from(value: ron::error::SpannedError) -> Self {
        Self::RonSpanned(value)
    }
}

/// Live copy of a transform, shared between a publisher and whoever edits it.
pub trait TransformStore {
    fn read(&self) -> Result<Transform, StoreError>;

    /// Writes a single component. Writes are per axis: a reader may observe a
    /// transform where only some of the axes of an edit have been applied.
    fn write_component(&self, part: TransformPart, axis: usize, value: f64)
        -> Result<(), StoreError>;
}

/// A store living in this process only.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransformStore {
    transform: Arc<RwLock<Transform>>,
}

impl MemoryTransformStore {
    pub fn new(transform: Transform) -> Self {
        MemoryTransformStore {
            transform: Arc::new(RwLock::new(transform)),
        }
    }
}

impl TransformStore for MemoryTransformStore {
    fn read(&self) -> Result<Transform, StoreError> {
        Ok(*self.transform.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write_component(
        &self,
        part: TransformPart,
        axis: usize,
        value: f64,
    ) -> Result<(), StoreError> {
        let mut transform = self.transform.write().unwrap_or_else(PoisonError::into_inner);
        transform.set_component(part, axis, value)
    }
}

/// Default directory of the live stores, a memory backed file system.
pub const DEFAULT_SHM_DIR: &str = "/dev/shm";

/// A store backed by the file `<directory>/<segment_id>.transform.ron`,
/// readable and writable by any process.
#[derive(Debug, Clone)]
pub struct LiveTransformFile {
    path: PathBuf,
}

impl LiveTransformFile {
    pub fn new(directory: impl AsRef<Path>, segment_id: &str) -> Self {
        LiveTransformFile {
            path: directory
                .as_ref()
                .join(format!("{segment_id}.transform.ron")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Creates or overwrites the store with `transform`.
    pub fn init(&self, transform: &Transform) -> Result<(), StoreError> {
        debug!("initialising live transform {}", self.path.display());
        self.write(transform)
    }

    /// Deletes the store. Deleting a missing store is not an error.
    pub fn remove(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, transform: &Transform) -> Result<(), StoreError> {
        let content = ron::ser::to_string_pretty(transform, ron::ser::PrettyConfig::default())?;
        // Readers never see a half written file.
        let staging = self.path.with_extension("ron.tmp");
        fs::write(&staging, content)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

impl TransformStore for LiveTransformFile {
    fn read(&self) -> Result<Transform, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::Missing(self.path.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(ron::from_str(&content)?)
    }

    fn write_component(
        &self,
        part: TransformPart,
        axis: usize,
        value: f64,
    ) -> Result<(), StoreError> {
        let mut transform = self.read()?;
        transform.set_component(part, axis, value)?;
        self.write(&transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn assert_close(a: [f64; 3], b: [f64; 3]) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-9, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn identity() {
        let point = [0.3, -1.2, 4.0];
        assert_close(Transform::default().apply(point), point);
    }

    #[test]
    fn translation_only() {
        let transform = Transform::new([1.0, 2.0, 3.0], [0.0; 3]);
        assert_close(transform.apply([1.0, 1.0, 1.0]), [2.0, 3.0, 4.0]);
    }

    #[test]
    fn rotations() {
        let about_x = Transform::new([0.0; 3], [FRAC_PI_2, 0.0, 0.0]);
        assert_close(about_x.apply([0.0, 1.0, 1.0]), [0.0, 1.0, -1.0]);
        let about_y = Transform::new([0.0; 3], [0.0, FRAC_PI_2, 0.0]);
        assert_close(about_y.apply([1.0, 0.0, 1.0]), [-1.0, 0.0, 1.0]);
        let about_z = Transform::new([0.0; 3], [0.0, 0.0, FRAC_PI_2]);
        assert_close(about_z.apply([1.0, 1.0, 0.0]), [1.0, -1.0, 0.0]);
    }

    #[test]
    fn rotation_then_translation() {
        let transform = Transform::new([1.0, 0.0, 0.0], [0.0, 0.0, FRAC_PI_2]);
        assert_close(transform.apply([1.0, 0.0, 0.0]), [1.0, -1.0, 0.0]);
    }

    #[test]
    fn rotations_compose_z_y_x() {
        // Rx takes (0, 1, 0) to (0, 0, -1), which Rz leaves alone
        let xz = Transform::new([0.0; 3], [FRAC_PI_2, 0.0, FRAC_PI_2]);
        assert_close(xz.apply([0.0, 1.0, 0.0]), [0.0, 0.0, -1.0]);
        // Rx leaves (1, 0, 0) alone, Rz takes it to (0, -1, 0)
        assert_close(xz.apply([1.0, 0.0, 0.0]), [0.0, -1.0, 0.0]);
    }

    #[test]
    fn translation_keeps_every_axis() {
        let transform = Transform::new([1.0, 2.0, 3.0], [0.0; 3]);
        assert_close(transform.apply([0.0; 3]), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn memory_store_writes_one_axis() {
        let store = MemoryTransformStore::new(Transform::new([1.0, 2.0, 3.0], [0.1, 0.2, 0.3]));
        store
            .write_component(TransformPart::Rotation, 2, 5.0)
            .unwrap();
        assert_eq!(
            store.read().unwrap(),
            Transform::new([1.0, 2.0, 3.0], [0.1, 0.2, 5.0])
        );
    }

    #[test]
    fn out_of_range_axis_is_an_error() {
        let t0 = Transform::new([1.0, 2.0, 3.0], [0.1, 0.2, 0.3]);
        let store = MemoryTransformStore::new(t0);
        assert!(matches!(
            store.write_component(TransformPart::Translation, 3, 1.0),
            Err(StoreError::Axis(3))
        ));
        assert_eq!(store.read().unwrap(), t0);

        let dir = tempfile::tempdir().unwrap();
        let live = LiveTransformFile::new(dir.path(), "axis");
        live.init(&t0).unwrap();
        assert!(matches!(
            live.write_component(TransformPart::Rotation, 7, 1.0),
            Err(StoreError::Axis(7))
        ));
        assert_eq!(live.read().unwrap(), t0);
    }

    #[test]
    fn live_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LiveTransformFile::new(dir.path(), "tennicam_client");
        assert_eq!(
            store.path(),
            dir.path().join("tennicam_client.transform.ron")
        );
        assert!(matches!(store.read(), Err(StoreError::Missing(_))));

        let t0 = Transform::new([0.0, 1.0, 2.0], [0.0, 0.1, 0.2]);
        store.init(&t0).unwrap();
        assert_eq!(store.read().unwrap(), t0);

        store
            .write_component(TransformPart::Translation, 1, -4.5)
            .unwrap();
        let read = store.read().unwrap();
        assert_eq!(read.translation, [0.0, -4.5, 2.0]);
        assert_eq!(read.rotation, t0.rotation);

        // another handle on the same segment sees the edit
        let other = LiveTransformFile::new(dir.path(), "tennicam_client");
        assert_eq!(other.read().unwrap(), read);

        store.remove().unwrap();
        assert!(!store.exists());
        store.remove().unwrap();
    }

    #[test]
    fn corrupted_live_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LiveTransformFile::new(dir.path(), "broken");
        fs::write(store.path(), "not ron at all").unwrap();
        assert!(matches!(store.read(), Err(StoreError::RonSpanned(_))));
    }

    #[test]
    fn display() {
        let transform = Transform::new([0.0, 1.0, 2.0], [0.0, 0.5, 0.25]);
        assert_eq!(
            transform.to_string(),
            "translation: 0 1 2\nrotation: 0 0.5 0.25"
        );
    }
}
