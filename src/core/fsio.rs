#![forbid(unsafe_code)]

use std::path::Path;

use crate::error::McError;

/// Replaces `path` with `data` through a sibling temp file and a rename.
/// This protects against torn writes, not against concurrent writers: two
/// read-modify-write cycles racing each other still lose one update.
pub fn write_replace(path: &Path, data: &[u8]) -> Result<(), McError> {
    let mut tmp_name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, data).map_err(|e| McError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| McError::io(path, e))?;
    Ok(())
}

pub fn write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), McError> {
    let mut data = serde_json::to_vec_pretty(value).map_err(|e| McError::parse(path, e))?;
    data.push(b'\n');
    write_replace(path, &data)
}
