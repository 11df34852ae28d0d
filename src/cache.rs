//! Resumable on-disk JSON cache.
//!
//! A cached document's existence is its sole completion marker: there is no
//! manifest, and a file once written is never rewritten. Writes therefore go
//! to a temp sibling and are renamed into place, so a process killed
//! mid-write can never leave a file that passes the existence check with
//! partial contents.

use std::fs::{self, File};
use std::future::Future;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let f = File::create(&tmp)?;
        let mut writer = BufWriter::new(f);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let f = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(f))?)
}

/// Ensure a document is cached at `path`. If the file already exists no
/// fetch happens; otherwise `fetch` runs and the result is written
/// atomically. Returns whether a fetch was performed.
pub async fn fetch_cached<T, F, Fut>(path: &Path, fetch: F) -> Result<bool>
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if path.exists() {
        return Ok(false);
    }
    let value = fetch().await?;
    write_json_atomic(path, &value)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join("42.json");
        write_json_atomic(&path, &json!({"id": 42})).unwrap();
        assert!(path.exists());
        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("42.json")]);
    }

    #[tokio::test]
    async fn fetch_cached_writes_once() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("7.json");

        let fetched = fetch_cached(&path, || async { Ok(json!({"id": 7})) })
            .await
            .unwrap();
        assert!(fetched);

        // Second run must not touch the network: a fetch closure that
        // always fails proves it is never invoked.
        let fetched = fetch_cached(&path, || async {
            Err::<serde_json::Value, _>(Error::Config("must not be called".to_string()))
        })
        .await
        .unwrap();
        assert!(!fetched);

        let doc: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(doc["id"], 7);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_nothing_behind() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("13.json");
        let result = fetch_cached(&path, || async {
            Err::<serde_json::Value, _>(Error::Config("boom".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
