//! Checkpoint persistence: one serialized parameter set per run.

use crate::model::ModelState;
use horizon_core::HorizonError;
use std::path::{Path, PathBuf};

/// `<base>/<run_id>/checkpoint.json`
pub fn checkpoint_path(base: &Path, run_id: &str) -> PathBuf {
    base.join(run_id).join("checkpoint.json")
}

/// Write the model state for a run. The directory is created if missing;
/// the file is written to a temp path and renamed into place.
pub fn save_checkpoint(
    base: &Path,
    run_id: &str,
    state: &ModelState,
) -> Result<PathBuf, HorizonError> {
    let path = checkpoint_path(base, run_id);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let content = serde_json::to_string(state)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &content)?;
    std::fs::rename(&tmp, &path)?;
    Ok(path)
}

/// Read a run's model state back. A missing file is a
/// [`HorizonError::CheckpointNotFound`], not a bare IO error.
pub fn load_checkpoint(base: &Path, run_id: &str) -> Result<ModelState, HorizonError> {
    let path = checkpoint_path(base, run_id);
    if !path.exists() {
        return Err(HorizonError::CheckpointNotFound(path));
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlinear::DLinear;
    use crate::model::ForecastModel;
    use horizon_core::config::{ExperimentConfig, ModelVariant};

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = ExperimentConfig::new(ModelVariant::DLinear);
        cfg.seq_len = 8;
        cfg.pred_len = 2;
        cfg.enc_in = 1;
        let mut model = DLinear::new(&cfg);
        let delta: Vec<f64> = (0..model.param_count()).map(|i| i as f64 * 1e-3).collect();
        model.apply_update(&delta);

        save_checkpoint(dir.path(), "run_a", &model.state()).unwrap();
        let state = load_checkpoint(dir.path(), "run_a").unwrap();
        let mut restored = DLinear::new(&cfg);
        restored.load_state(&state).unwrap();
        assert_eq!(model.parameters(), restored.parameters());
    }

    #[test]
    fn test_missing_checkpoint_is_typed() {
        let dir = tempfile::tempdir().unwrap();
        match load_checkpoint(dir.path(), "absent") {
            Err(HorizonError::CheckpointNotFound(path)) => {
                assert!(path.ends_with("absent/checkpoint.json"));
            }
            other => panic!("expected CheckpointNotFound, got {other:?}"),
        }
    }
}
