//! Random test files for the stress harness.

use anyhow::{Context, Result};
use rand::RngCore;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const CHUNK_SIZE: usize = 1024 * 1024;

/// Fixture file name for a size, e.g. `random_50mb.bin`
pub fn fixture_name(prefix: &str, megabytes: u64) -> String {
    format!("{}_{}mb.bin", prefix, megabytes)
}

/// Write one file of `megabytes` MiB of random bytes per requested size
///
/// Existing files with the same name are overwritten. Returns the paths in
/// the order of `sizes_mb`.
pub fn generate_fixtures(dir: &Path, prefix: &str, sizes_mb: &[u64]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create directory {:?}", dir))?;

    let mut rng = rand::thread_rng();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut paths = Vec::with_capacity(sizes_mb.len());

    for &megabytes in sizes_mb {
        let path = dir.join(fixture_name(prefix, megabytes));
        let file = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
        let mut writer = BufWriter::new(file);

        for _ in 0..megabytes {
            rng.fill_bytes(&mut chunk);
            writer.write_all(&chunk)?;
        }
        writer.flush()?;

        info!("Generated {:?} ({} MB)", path, megabytes);
        paths.push(path);
    }
    Ok(paths)
}
