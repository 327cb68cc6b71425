use std::{
    fs,
    path::{Path, PathBuf},
};

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::router::SaveArtifact;

/// Display strings are shown inline to the user as-is.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("Error parsing JSON file. Please ensure the file is valid JSON.")]
    Malformed(#[source] serde_json::Error),
    #[error("Error reading file.")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid save filename '{0}'")]
    InvalidFilename(String),
    #[error("failed to encode saved state: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Writes the payload pretty-printed under `dir`, keeping only the final
/// path component of the requested filename.
pub fn save_artifact(dir: &Path, artifact: &SaveArtifact) -> Result<PathBuf, FileError> {
    let file_name = Path::new(&artifact.filename)
        .file_name()
        .ok_or_else(|| FileError::InvalidFilename(artifact.filename.clone()))?;
    let path = dir.join(file_name);

    let body = serde_json::to_string_pretty(&artifact.payload).map_err(FileError::Encode)?;
    fs::create_dir_all(dir).map_err(|source| FileError::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    fs::write(&path, body).map_err(|source| FileError::Write {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), "downloads: saved simulation state");
    Ok(path)
}

/// Reads a previously saved state for submission through the load channel.
pub fn read_state_file(path: &Path) -> Result<Value, FileError> {
    let raw = fs::read_to_string(path).map_err(|source| FileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(FileError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn artifact(filename: &str) -> SaveArtifact {
        SaveArtifact {
            filename: filename.to_string(),
            payload: json!({"cycle": 5, "buildings": [{"name": "M1", "mine": "iron"}]}),
        }
    }

    #[test]
    fn saved_file_is_pretty_json_that_reads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = save_artifact(dir.path(), &artifact("run1.json")).expect("save");

        assert_eq!(path, dir.path().join("run1.json"));
        let text = fs::read_to_string(&path).expect("read");
        assert!(text.contains("\n  \"cycle\": 5"));
        assert_eq!(
            read_state_file(&path).expect("load"),
            artifact("run1.json").payload
        );
    }

    #[test]
    fn directory_components_are_stripped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("downloads");
        let path = save_artifact(&nested, &artifact("../../etc/run2.json")).expect("save");
        assert_eq!(path, nested.join("run2.json"));
        assert!(path.exists());

        assert!(matches!(
            save_artifact(&nested, &artifact("..")),
            Err(FileError::InvalidFilename(_))
        ));
    }

    #[test]
    fn malformed_and_missing_files_have_user_messages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ not json").expect("write");

        let err = read_state_file(&broken).expect_err("malformed");
        assert_eq!(
            err.to_string(),
            "Error parsing JSON file. Please ensure the file is valid JSON."
        );
        let err = read_state_file(&dir.path().join("absent.json")).expect_err("missing");
        assert_eq!(err.to_string(), "Error reading file.");
    }
}
