use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::utils::config::PackagePaths;

/// Get the temporary path the output artifact is written to before the rename.
pub fn temp_path_for(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_else(|| PackagePaths::get().output_filename());
    output
        .parent()
        .unwrap_or(Path::new("."))
        .join(format!("{name}.tmp"))
}

/// Write `bytes` to `<output>.tmp`, sync, then rename over `output`. A failed write never leaves a
/// partial artifact under the final name; the temp file is removed.
pub fn write_output_atomically(output: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp_path = temp_path_for(output);
    let written = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();
    if let Err(e) = written.and_then(|_| fs::rename(&temp_path, output)) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}
