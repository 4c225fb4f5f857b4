//! Whole-file JSON documents used by the local backend.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::traits::{GatewayError, GatewayResult};

/// Loads a document, returning `T::default()` when the file does not exist yet.
pub(crate) async fn load<T>(path: &Path) -> GatewayResult<T>
where
    T: DeserializeOwned + Default,
{
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(err) => {
            return Err(GatewayError::configuration(format!(
                "failed to read {}: {err}",
                path.display()
            )));
        }
    };
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&data).map_err(|err| {
        GatewayError::configuration(format!("failed to parse {}: {err}", path.display()))
    })
}

/// Replaces the document atomically: write a sibling temp file, then rename.
pub(crate) async fn store<T>(path: &Path, value: &T) -> GatewayResult<()>
where
    T: Serialize + ?Sized,
{
    let io_err = |err: std::io::Error| {
        GatewayError::transport(format!("failed to write {}: {err}", path.display()))
    };

    let json = serde_json::to_vec_pretty(value)
        .map_err(|err| GatewayError::transport(format!("failed to encode document: {err}")))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let mut temp = path.as_os_str().to_owned();
    temp.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    let temp = std::path::PathBuf::from(temp);

    let mut file = fs::File::create(&temp).await.map_err(io_err)?;
    file.write_all(&json).await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    drop(file);

    if let Err(err) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(io_err(err));
    }
    Ok(())
}
