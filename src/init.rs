use crate::config::Config;
use crate::logi;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

fn working_dirs(cfg: &Config) -> [&PathBuf; 4] {
    [&cfg.data_dir, &cfg.logs_dir, &cfg.output_dir, &cfg.temp_dir]
}

pub async fn ensure_directories(cfg: &Config) -> Result<()> {
    for dir in working_dirs(cfg) {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create dir {}", dir.display()))?;
            logi(format!("Created directory: {}", dir.display()));
        }
    }
    Ok(())
}

pub async fn check_ffmpeg() -> bool {
    for tool in ["ffmpeg", "ffprobe"] {
        let ok = tokio::process::Command::new(tool)
            .arg("-version")
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false);
        if !ok {
            return false;
        }
    }
    true
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Deletes everything inside `dir` except the paths in `keep`, but keeps the
/// directory. Returns the number of top-level entries removed; a missing
/// directory counts as empty.
pub async fn clear_directory_contents(dir: &Path, keep: &[PathBuf]) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let entries: Vec<(PathBuf, bool)> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| (e.path().to_path_buf(), e.file_type().is_dir()))
        .filter(|(path, _)| !keep.iter().any(|k| same_file(path, k)))
        .collect();

    for (path, is_dir) in &entries {
        let res = if *is_dir {
            fs::remove_dir_all(path).await
        } else {
            fs::remove_file(path).await
        };
        res.with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(entries.len())
}

/// Empties the scratch directories (`temp`, `output`). Files in `keep`, such
/// as videos a pending upload still points at, survive.
pub async fn clean_workspace(cfg: &Config, keep: &[PathBuf]) -> Result<usize> {
    let mut removed = 0;
    for dir in [&cfg.temp_dir, &cfg.output_dir] {
        let n = clear_directory_contents(dir, keep).await?;
        if n > 0 {
            logi(format!("Removed {} entries from {}", n, dir.display()));
        }
        removed += n;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(root: &Path) -> Config {
        Config {
            data_dir: root.join("data"),
            logs_dir: root.join("logs"),
            output_dir: root.join("output"),
            temp_dir: root.join("temp"),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn creates_all_working_dirs() {
        let tmp = TempDir::new().unwrap();
        let cfg = config_in(tmp.path());

        ensure_directories(&cfg).await.unwrap();
        ensure_directories(&cfg).await.unwrap();

        for dir in working_dirs(&cfg) {
            assert!(dir.is_dir());
        }
    }

    #[tokio::test]
    async fn clears_contents_but_keeps_dir() {
        let tmp = TempDir::new().unwrap();
        let cfg = config_in(tmp.path());
        ensure_directories(&cfg).await.unwrap();
        std::fs::write(cfg.temp_dir.join("voice.mp3"), b"x").unwrap();
        std::fs::create_dir_all(cfg.temp_dir.join("stock/nested")).unwrap();
        std::fs::write(cfg.output_dir.join("short.mp4"), b"x").unwrap();
        std::fs::write(cfg.data_dir.join("script_inventory.json"), b"{}").unwrap();

        let removed = clean_workspace(&cfg, &[]).await.unwrap();

        assert_eq!(removed, 3);
        assert!(cfg.temp_dir.is_dir());
        assert_eq!(std::fs::read_dir(&cfg.temp_dir).unwrap().count(), 0);
        assert!(cfg.data_dir.join("script_inventory.json").exists());
    }

    #[tokio::test]
    async fn missing_dir_counts_as_empty() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(clear_directory_contents(&tmp.path().join("nope"), &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn queued_videos_survive_a_clean() {
        let tmp = TempDir::new().unwrap();
        let cfg = config_in(tmp.path());
        ensure_directories(&cfg).await.unwrap();
        let queued = cfg.output_dir.join("short_7_20250301.mp4");
        std::fs::write(&queued, b"mp4").unwrap();
        std::fs::write(cfg.output_dir.join("short_8_20250301.mp4"), b"mp4").unwrap();

        // A differently spelled path to the same file still matches.
        let keep = vec![tmp.path().join("output/./short_7_20250301.mp4")];
        let removed = clean_workspace(&cfg, &keep).await.unwrap();

        assert_eq!(removed, 1);
        assert!(queued.exists());
        assert_eq!(std::fs::read_dir(&cfg.output_dir).unwrap().count(), 1);
    }
}
