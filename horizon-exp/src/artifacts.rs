//! Per-run result artifacts.
//!
//! Arrays are saved as JSON with an explicit shape so a reader does not have
//! to know the run's geometry. Directory creation is check-then-create; two
//! runs racing on the same directory is benign for this single-tenant layout.

use horizon_core::HorizonError;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Flat array payload with its `(count, horizon, channels)` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayArtifact {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl ArrayArtifact {
    pub fn from_array3(array: &Array3<f64>) -> Self {
        Self {
            shape: array.shape().to_vec(),
            data: array.iter().copied().collect(),
        }
    }

    pub fn into_array3(self) -> Result<Array3<f64>, HorizonError> {
        if self.shape.len() != 3 {
            return Err(HorizonError::shape(format!(
                "artifact shape {:?} is not three-dimensional",
                self.shape
            )));
        }
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(HorizonError::shape(format!(
                "artifact shape {:?} does not match {} values",
                self.shape,
                self.data.len()
            )));
        }
        Array3::from_shape_vec((self.shape[0], self.shape[1], self.shape[2]), self.data)
            .map_err(|e| HorizonError::shape(e.to_string()))
    }
}

/// `<base>/<run_id>/`
pub fn run_dir(base: &Path, run_id: &str) -> PathBuf {
    base.join(run_id)
}

/// Write one named array artifact for a run.
pub fn save_array(
    base: &Path,
    run_id: &str,
    name: &str,
    array: &Array3<f64>,
) -> Result<PathBuf, HorizonError> {
    let dir = run_dir(base, run_id);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(name);
    let content = serde_json::to_string(&ArrayArtifact::from_array3(array))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &content)?;
    std::fs::rename(&tmp, &path)?;
    Ok(path)
}

/// Read one named array artifact back.
pub fn load_array(base: &Path, run_id: &str, name: &str) -> Result<Array3<f64>, HorizonError> {
    let path = run_dir(base, run_id).join(name);
    let content = std::fs::read_to_string(&path)?;
    let artifact: ArrayArtifact = serde_json::from_str(&content)?;
    artifact.into_array3()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_array_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let array = Array3::from_shape_fn((3, 4, 2), |(a, b, c)| (a * 8 + b * 2 + c) as f64);
        save_array(dir.path(), "run", "pred.json", &array).unwrap();
        let back = load_array(dir.path(), "run", "pred.json").unwrap();
        assert_eq!(array, back);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let artifact = ArrayArtifact {
            shape: vec![2, 2, 2],
            data: vec![0.0; 7],
        };
        assert!(artifact.into_array3().is_err());
    }
}
