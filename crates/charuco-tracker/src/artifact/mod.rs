//! Persisted calibration artifact.
//!
//! The artifact is an uncompressed `.npz` archive: one `.npy` member per
//! array plus a `format.json` version marker.
//!
//! | member                  | dtype | shape  |
//! |-------------------------|-------|--------|
//! | `cameraMatrix.npy`      | `<f8` | (3, 3) |
//! | `distCoeffs.npy`        | `<f8` | (1, N) |
//! | `reprojectionError.npy` | `<f8` | ()     |
//! | `imageSize.npy`         | `<i8` | (2,)   |
//! | `rvecs.npy` (optional)  | `<f8` | (V, 3) |
//! | `tvecs.npy` (optional)  | `<f8` | (V, 3) |
//!
//! Saving writes a temporary file next to the target and renames it over
//! the target, so readers never observe a half-written artifact.

pub mod npy;

use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use charuco_tracker_core::{CalibrationResult, ImageSize};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use self::npy::NpyArray;

pub const FORMAT_NAME: &str = "charuco-tracker.calibration";
pub const FORMAT_VERSION: u32 = 1;

const FORMAT_MEMBER: &str = "format.json";
const CAMERA_MATRIX: &str = "cameraMatrix.npy";
const DIST_COEFFS: &str = "distCoeffs.npy";
const REPROJECTION_ERROR: &str = "reprojectionError.npy";
const IMAGE_SIZE: &str = "imageSize.npy";
const RVECS: &str = "rvecs.npy";
const TVECS: &str = "tvecs.npy";

#[derive(thiserror::Error, Debug)]
pub enum ArtifactError {
    #[error("no calibration artifact at {}", .0.display())]
    NotFound(PathBuf),
    #[error("calibration artifact {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct FormatMarker {
    format: String,
    version: u32,
}

/// Reads and writes the calibration artifact at one path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactStore {
    path: PathBuf,
}

impl ArtifactStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Atomically replace the artifact with `result`, creating parent
    /// directories as needed.
    pub fn save(&self, result: &CalibrationResult) -> Result<(), ArtifactError> {
        let io_err = |source: io::Error| ArtifactError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(io_err)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".calib")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(io_err)?;
        write_archive(tmp.as_file_mut(), result).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|err| io_err(err.error))?;

        log::info!("saved calibration to {}", self.path.display());
        Ok(())
    }

    pub fn load(&self) -> Result<CalibrationResult, ArtifactError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound(self.path.clone()))
            }
            Err(err) => {
                return Err(ArtifactError::Corrupt {
                    path: self.path.clone(),
                    reason: err.to_string(),
                })
            }
        };
        let result = read_archive(file).map_err(|reason| ArtifactError::Corrupt {
            path: self.path.clone(),
            reason,
        })?;
        log::debug!(
            "loaded calibration from {} (rms {:.4} px)",
            self.path.display(),
            result.reprojection_error
        );
        Ok(result)
    }
}

fn write_archive<W: Write + Seek>(writer: W, result: &CalibrationResult) -> io::Result<()> {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    let marker = FormatMarker {
        format: FORMAT_NAME.to_string(),
        version: FORMAT_VERSION,
    };
    let marker = serde_json::to_vec_pretty(&marker).map_err(io::Error::other)?;
    let mut member = |name: &str, bytes: &[u8]| -> io::Result<()> {
        zip.start_file(name, options).map_err(io::Error::other)?;
        zip.write_all(bytes)
    };
    member(FORMAT_MEMBER, &marker)?;

    let k = &result.camera_matrix;
    let row_major: Vec<f64> = (0..3).flat_map(|r| (0..3).map(move |c| k[(r, c)])).collect();
    member(CAMERA_MATRIX, &npy::encode_f64(&[3, 3], &row_major))?;

    let dist = &result.distortion_coefficients;
    member(DIST_COEFFS, &npy::encode_f64(&[1, dist.len()], dist))?;
    member(
        REPROJECTION_ERROR,
        &npy::encode_f64(&[], &[result.reprojection_error]),
    )?;
    let size = [
        result.image_size.width as i64,
        result.image_size.height as i64,
    ];
    member(IMAGE_SIZE, &npy::encode_i64(&[2], &size))?;

    if let (Some(rvecs), Some(tvecs)) = (&result.per_view_rotations, &result.per_view_translations)
    {
        member(RVECS, &encode_vectors(rvecs))?;
        member(TVECS, &encode_vectors(tvecs))?;
    }

    zip.finish().map_err(io::Error::other)?;
    Ok(())
}

fn encode_vectors(vectors: &[Vector3<f64>]) -> Vec<u8> {
    let flat: Vec<f64> = vectors.iter().flat_map(|v| [v.x, v.y, v.z]).collect();
    npy::encode_f64(&[vectors.len(), 3], &flat)
}

fn read_archive<R: Read + Seek>(reader: R) -> Result<CalibrationResult, String> {
    let mut zip = ZipArchive::new(reader).map_err(|err| format!("not an npz archive: {err}"))?;

    let marker = read_member(&mut zip, FORMAT_MEMBER)?
        .ok_or_else(|| {
            format!(
                "missing {FORMAT_MEMBER}; unversioned archives (bare cameraMatrix/distCoeffs) \
                 are not supported, recalibrate to regenerate"
            )
        })?;
    let marker: FormatMarker =
        serde_json::from_slice(&marker).map_err(|err| format!("{FORMAT_MEMBER}: {err}"))?;
    if marker.format != FORMAT_NAME {
        return Err(format!("unexpected format {:?}", marker.format));
    }
    if marker.version == 0 || marker.version > FORMAT_VERSION {
        return Err(format!(
            "format version {} is not supported (expected {FORMAT_VERSION})",
            marker.version
        ));
    }

    let k = required_f64(&mut zip, CAMERA_MATRIX)?;
    if k.shape != [3, 3] {
        return Err(format!("{CAMERA_MATRIX} has shape {:?}", k.shape));
    }
    let camera_matrix = Matrix3::from_row_slice(floats(&k, CAMERA_MATRIX)?);

    let dist = required_f64(&mut zip, DIST_COEFFS)?;
    if dist.shape.iter().filter(|&&d| d != 1).count() > 1 {
        return Err(format!("{DIST_COEFFS} has shape {:?}", dist.shape));
    }
    let distortion_coefficients = floats(&dist, DIST_COEFFS)?.to_vec();

    let rms = required_f64(&mut zip, REPROJECTION_ERROR)?;
    let reprojection_error = match floats(&rms, REPROJECTION_ERROR)? {
        [value] => *value,
        other => return Err(format!("{REPROJECTION_ERROR} holds {} values", other.len())),
    };

    let size = read_member(&mut zip, IMAGE_SIZE)?
        .ok_or_else(|| format!("missing {IMAGE_SIZE}"))
        .and_then(|bytes| decode(&bytes, IMAGE_SIZE))?;
    let image_size = match size.as_i64() {
        Some(&[w, h]) if w > 0 && h > 0 => ImageSize {
            width: w as usize,
            height: h as usize,
        },
        _ => return Err(format!("{IMAGE_SIZE} is not a positive (width, height) pair")),
    };

    let rvecs = optional_vectors(&mut zip, RVECS)?;
    let tvecs = optional_vectors(&mut zip, TVECS)?;
    let (per_view_rotations, per_view_translations) = match (rvecs, tvecs) {
        (Some(r), Some(t)) if r.len() == t.len() => (Some(r), Some(t)),
        (None, None) => (None, None),
        _ => return Err(format!("{RVECS} and {TVECS} do not pair up")),
    };

    Ok(CalibrationResult {
        camera_matrix,
        distortion_coefficients,
        reprojection_error,
        per_view_rotations,
        per_view_translations,
        image_size,
    })
}

fn read_member<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, String> {
    let mut file = match zip.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(format!("{name}: {err}")),
    };
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|err| format!("{name}: {err}"))?;
    Ok(Some(bytes))
}

fn decode(bytes: &[u8], name: &str) -> Result<NpyArray, String> {
    npy::decode(bytes).map_err(|err| format!("{name}: {err}"))
}

fn required_f64<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<NpyArray, String> {
    let bytes = read_member(zip, name)?.ok_or_else(|| format!("missing {name}"))?;
    decode(&bytes, name)
}

fn floats<'a>(array: &'a NpyArray, name: &str) -> Result<&'a [f64], String> {
    array
        .as_f64()
        .ok_or_else(|| format!("{name} is not a floating-point array"))
}

/// Per-view vectors stored as (V, 3) or (V, 3, 1).
fn optional_vectors<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<Vector3<f64>>>, String> {
    let Some(bytes) = read_member(zip, name)? else {
        return Ok(None);
    };
    let array = decode(&bytes, name)?;
    let trailing = array
        .shape
        .iter()
        .skip(1)
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim));
    if array.shape.is_empty() || trailing != Some(3) {
        return Err(format!("{name} has shape {:?}", array.shape));
    }
    let values = floats(&array, name)?;
    Ok(Some(
        values
            .chunks_exact(3)
            .map(|v| Vector3::new(v[0], v[1], v[2]))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CalibrationResult {
        CalibrationResult {
            camera_matrix: Matrix3::new(
                812.345678901,
                0.0,
                319.87654321,
                0.0,
                815.1,
                241.000000003,
                0.0,
                0.0,
                1.0,
            ),
            distortion_coefficients: vec![0.1234, -0.98765, 1.0e-4, -2.5e-5, 0.333],
            reprojection_error: 0.271828,
            per_view_rotations: Some(vec![
                Vector3::new(0.1, -0.2, 0.3),
                Vector3::new(-0.01, 0.02, 3.1),
            ]),
            per_view_translations: Some(vec![
                Vector3::new(0.05, 0.02, 0.6),
                Vector3::new(-0.1, 0.0, 0.45),
            ]),
            image_size: ImageSize {
                width: 1280,
                height: 720,
            },
        }
    }

    fn rewrite_members(path: &Path, edit: impl Fn(&str, Vec<u8>) -> Option<Vec<u8>>) {
        let mut source = ZipArchive::new(File::open(path).expect("open")).expect("archive");
        let mut members = Vec::new();
        for i in 0..source.len() {
            let mut file = source.by_index(i).expect("member");
            let name = file.name().to_string();
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes).expect("read");
            if let Some(bytes) = edit(&name, bytes) {
                members.push((name, bytes));
            }
        }
        let mut zip = ZipWriter::new(File::create(path).expect("create"));
        for (name, bytes) in members {
            zip.start_file(name, SimpleFileOptions::default())
                .expect("start");
            zip.write_all(&bytes).expect("write");
        }
        zip.finish().expect("finish");
    }

    #[test]
    fn round_trip_is_bit_exact_and_load_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path().join("calib.npz"));
        let original = sample();
        store.save(&original).expect("save");

        let first = store.load().expect("load");
        let second = store.load().expect("load again");
        assert_eq!(first, second);
        for (a, b) in original.camera_matrix.iter().zip(first.camera_matrix.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        for (a, b) in original
            .distortion_coefficients
            .iter()
            .zip(&first.distortion_coefficients)
        {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(first, original);
    }

    #[test]
    fn camera_matrix_is_stored_row_major() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path().join("calib.npz"));
        store.save(&sample()).expect("save");

        let mut zip = ZipArchive::new(File::open(store.path()).expect("open")).expect("archive");
        let k = required_f64(&mut zip, CAMERA_MATRIX).expect("matrix");
        let values = k.as_f64().expect("floats");
        assert_eq!(values[2], 319.87654321);
        assert_eq!(values[5], 241.000000003);
        assert_eq!(values[8], 1.0);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path().join("nope.npz"));
        assert!(!store.exists());
        assert!(matches!(store.load(), Err(ArtifactError::NotFound(_))));
    }

    #[test]
    fn garbage_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("calib.npz");
        fs::write(&path, b"definitely not a zip archive").expect("write");
        assert!(matches!(
            ArtifactStore::new(&path).load(),
            Err(ArtifactError::Corrupt { .. })
        ));
    }

    #[test]
    fn newer_format_version_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path().join("calib.npz"));
        store.save(&sample()).expect("save");
        rewrite_members(store.path(), |name, bytes| {
            Some(if name == FORMAT_MEMBER {
                br#"{"format": "charuco-tracker.calibration", "version": 2}"#.to_vec()
            } else {
                bytes
            })
        });
        let err = store.load().expect_err("newer version");
        assert!(err.to_string().contains("version 2"), "{err}");
    }

    #[test]
    fn missing_required_member_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path().join("calib.npz"));
        store.save(&sample()).expect("save");
        rewrite_members(store.path(), |name, bytes| {
            (name != DIST_COEFFS).then_some(bytes)
        });
        assert!(matches!(store.load(), Err(ArtifactError::Corrupt { .. })));
    }

    #[test]
    fn oversized_per_view_shape_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path().join("calib.npz"));
        store.save(&sample()).expect("save");
        rewrite_members(store.path(), |name, bytes| {
            Some(if name == RVECS {
                npy::encode_f64(&[0, usize::MAX / 2, 3], &[])
            } else {
                bytes
            })
        });
        let err = store.load().expect_err("oversized shape");
        assert!(matches!(err, ArtifactError::Corrupt { .. }));
        assert!(err.to_string().contains(RVECS), "{err}");
    }

    #[test]
    fn unversioned_archive_is_rejected_with_a_hint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path().join("calib_data.npz"));
        store.save(&sample()).expect("save");
        rewrite_members(store.path(), |name, bytes| {
            [CAMERA_MATRIX, DIST_COEFFS].contains(&name).then_some(bytes)
        });
        let err = store.load().expect_err("unversioned");
        assert!(matches!(err, ArtifactError::Corrupt { .. }));
        assert!(err.to_string().contains("recalibrate"), "{err}");
    }

    #[test]
    fn unknown_members_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path().join("calib.npz"));
        store.save(&sample()).expect("save");
        let mut zip = ZipWriter::new_append(
            fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(store.path())
                .expect("open"),
        )
        .expect("append");
        zip.start_file("notes.txt", SimpleFileOptions::default())
            .expect("start");
        zip.write_all(b"taken on the lab bench").expect("write");
        zip.finish().expect("finish");

        assert_eq!(store.load().expect("load"), sample());
    }

    #[test]
    fn save_creates_parents_and_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path().join("a/b/calib.npz"));
        let mut result = sample();
        store.save(&result).expect("first save");
        result.reprojection_error = 0.5;
        result.per_view_rotations = None;
        result.per_view_translations = None;
        store.save(&result).expect("second save");

        assert_eq!(store.load().expect("load"), result);
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("a/b"))
            .expect("list")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
