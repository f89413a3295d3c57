use std::path::PathBuf;

use mvcam_io::error::StorageError;
use mvcam_io::storage::JsonStore;
use mvcam_pnp::{CameraModel, PnPError, PnPResult};
use serde::{Deserialize, Deserializer, Serialize};

/// Default directory of the calibration files.
pub const DEFAULT_CALIBRATION_DIR: &str = "camera_parameters";

/// Default directory of the reference pose files.
pub const DEFAULT_POSE_DIR: &str = "WorldReference";

/// Intrinsic matrix and distortion coefficients of one camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Row-major `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`
    #[serde(rename = "CameraMatrix")]
    pub camera_matrix: [[f64; 3]; 3],
    /// Coefficients in `k1, k2, p1, p2, k3` order
    #[serde(rename = "DistortionCoefficients", deserialize_with = "flat_coefficients")]
    pub distortion_coefficients: Vec<f64>,
}

impl CalibrationResult {
    /// Record of a camera model; a model without distortion stores zeros.
    pub fn from_camera(camera: &CameraModel) -> Self {
        let coefficients = camera.distortion.unwrap_or_default().coefficients();
        Self {
            camera_matrix: camera.intrinsics_matrix(),
            distortion_coefficients: coefficients.to_vec(),
        }
    }

    /// The camera model this record describes.
    pub fn camera_model(&self) -> Result<CameraModel, PnPError> {
        CameraModel::from_parts(&self.camera_matrix, &self.distortion_coefficients)
    }
}

/// Extrinsic pose of a camera relative to the reference target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseResult {
    /// Rodrigues rotation vector, world to camera
    #[serde(rename = "RotationVector", deserialize_with = "vector3")]
    pub rotation_vector: [f64; 3],
    /// Translation, world to camera
    #[serde(rename = "TranslationVector", deserialize_with = "vector3")]
    pub translation_vector: [f64; 3],
    /// `K [R | t]`, row-major 3x4
    #[serde(rename = "ProjectionMatrix")]
    pub projection_matrix: [[f64; 4]; 3],
}

impl PoseResult {
    /// Compose the record of `pose` seen through intrinsics `k`.
    pub fn from_pose(pose: &PnPResult, k: &[[f64; 3]; 3]) -> Self {
        Self {
            rotation_vector: pose.rvec,
            translation_vector: pose.translation,
            projection_matrix: pose.projection_matrix(k),
        }
    }

    /// The world-to-camera transform.
    pub fn pose(&self) -> PnPResult {
        PnPResult::from_rvec(self.rotation_vector, self.translation_vector)
    }

    /// Camera centre in world coordinates, `C = -R^T t`.
    pub fn camera_position(&self) -> [f64; 3] {
        self.pose().camera_center()
    }
}

/// Accepts a flat list or the `[[k1, k2, p1, p2, k3]]` row written by OpenCV tools.
fn flat_coefficients<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Layout {
        Flat(Vec<f64>),
        Nested(Vec<Vec<f64>>),
    }

    Ok(match Layout::deserialize(deserializer)? {
        Layout::Flat(values) => values,
        Layout::Nested(rows) => rows.into_iter().flatten().collect(),
    })
}

/// Accepts `[x, y, z]` or the column `[[x], [y], [z]]`.
fn vector3<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[f64; 3], D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Layout {
        Flat([f64; 3]),
        Column([[f64; 1]; 3]),
    }

    Ok(match Layout::deserialize(deserializer)? {
        Layout::Flat(v) => v,
        Layout::Column([[x], [y], [z]]) => [x, y, z],
    })
}

/// Calibration files, one `<serial>.json` per camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationStore {
    store: JsonStore,
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::new(DEFAULT_CALIBRATION_DIR)
    }
}

impl CalibrationStore {
    /// Calibrations stored under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(dir),
        }
    }

    /// Path of the calibration file of `serial`.
    pub fn path(&self, serial: &str) -> PathBuf {
        self.store.path(serial)
    }

    /// Whether a calibration exists for `serial`.
    pub fn exists(&self, serial: &str) -> bool {
        self.store.exists(serial)
    }

    /// Write the calibration of `serial`, replacing any previous one.
    pub fn save(&self, serial: &str, result: &CalibrationResult) -> Result<PathBuf, StorageError> {
        let path = self.store.save(serial, result)?;
        log::info!("calibration saved to {}", path.display());
        Ok(path)
    }

    /// Read the calibration of `serial`.
    pub fn load(&self, serial: &str) -> Result<CalibrationResult, StorageError> {
        self.store.load(serial)
    }
}

/// Reference pose files, one `<serial>.json` per camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoseStore {
    store: JsonStore,
}

impl Default for PoseStore {
    fn default() -> Self {
        Self::new(DEFAULT_POSE_DIR)
    }
}

impl PoseStore {
    /// Poses stored under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(dir),
        }
    }

    /// Path of the pose file of `serial`.
    pub fn path(&self, serial: &str) -> PathBuf {
        self.store.path(serial)
    }

    /// Whether a pose exists for `serial`.
    pub fn exists(&self, serial: &str) -> bool {
        self.store.exists(serial)
    }

    /// Write the pose of `serial`, replacing any previous one.
    pub fn save(&self, serial: &str, pose: &PoseResult) -> Result<PathBuf, StorageError> {
        let path = self.store.save(serial, pose)?;
        log::info!("reference pose saved to {}", path.display());
        Ok(path)
    }

    /// Read the pose of `serial`.
    pub fn load(&self, serial: &str) -> Result<PoseResult, StorageError> {
        self.store.load(serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mvcam_pnp::{CameraIntrinsics, PolynomialDistortion};

    #[test]
    fn test_calibration_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = CalibrationStore::new(dir.path());
        let camera = CameraModel::with_distortion(
            CameraIntrinsics::new(1000.0, 990.0, 640.0, 512.0),
            PolynomialDistortion::radial(-0.1, 0.02),
        );

        store.save("S1", &CalibrationResult::from_camera(&camera))?;
        let loaded = store.load("S1")?;
        assert_eq!(loaded.distortion_coefficients, vec![-0.1, 0.02, 0.0, 0.0, 0.0]);
        assert_eq!(loaded.camera_model()?, camera);

        let json: serde_json::Value = serde_json::from_slice(&std::fs::read(store.path("S1"))?)?;
        assert_eq!(json["CameraMatrix"][1][1], serde_json::json!(990.0));
        Ok(())
    }

    #[test]
    fn test_reads_nested_layouts() -> Result<(), serde_json::Error> {
        let calibration: CalibrationResult = serde_json::from_str(
            r#"{ "CameraMatrix": [[800.0, 0.0, 320.0], [0.0, 800.0, 240.0], [0.0, 0.0, 1.0]],
                 "DistortionCoefficients": [[0.1, -0.2, 0.0, 0.0, 0.05]] }"#,
        )?;
        assert_eq!(calibration.distortion_coefficients, vec![0.1, -0.2, 0.0, 0.0, 0.05]);

        let pose: PoseResult = serde_json::from_str(
            r#"{ "RotationVector": [[0.0], [0.0], [0.0]],
                 "TranslationVector": [0.5, -1.0, 2.0],
                 "ProjectionMatrix": [[1, 0, 0, 0], [0, 1, 0, 0], [0, 0, 1, 0]] }"#,
        )?;
        assert_eq!(pose.rotation_vector, [0.0; 3]);
        let c = pose.camera_position();
        assert_relative_eq!(c[0], -0.5);
        assert_relative_eq!(c[1], 1.0);
        assert_relative_eq!(c[2], -2.0);
        Ok(())
    }

    #[test]
    fn test_pose_record_keys() -> Result<(), serde_json::Error> {
        let pose = PnPResult::from_rvec([0.1, 0.2, 0.3], [1.0, 2.0, 3.0]);
        let k = [[800.0, 0.0, 320.0], [0.0, 800.0, 240.0], [0.0, 0.0, 1.0]];
        let json = serde_json::to_value(PoseResult::from_pose(&pose, &k))?;
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 3);
        for key in ["RotationVector", "TranslationVector", "ProjectionMatrix"] {
            assert!(object.contains_key(key), "missing {key}");
        }
        Ok(())
    }
}
