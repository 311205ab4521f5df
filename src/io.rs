//! JSON persistence of multivectors, run histories and configurations.
use eyre::WrapErr;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Writes `value` as pretty-printed JSON to `path`, replacing any existing file.
pub fn save_json<T: Serialize + ?Sized>(value: &T, path: impl AsRef<Path>) -> eyre::Result<()> {
    let path = path.as_ref();
    let file = File::create(path).wrap_err_with(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .wrap_err_with(|| format!("Failed to serialize to {}", path.display()))?;
    writer
        .flush()
        .wrap_err_with(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> eyre::Result<T> {
    let path = path.as_ref();
    let file = File::open(path).wrap_err_with(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file)).wrap_err_with(|| format!("Failed to deserialize {}", path.display()))
}
