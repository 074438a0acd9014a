//! Seeding a swarm from files on disk.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{info, warn};
use undertow_core::{FileDescriptor, FolderId};

use crate::blocks::split_into_blocks;
use crate::swarm::SimulatedSwarm;

/// Publishes every regular file below `root` into `folder` of the swarm.
///
/// Paths are recorded relative to `root` with `/` separators. Unreadable
/// entries are skipped with a warning. Returns the descriptors in path order.
///
/// # Errors
///
/// - `std::io::Error` - If `root` itself cannot be listed
pub async fn seed_directory(
    swarm: &SimulatedSwarm,
    folder: &FolderId,
    root: &Path,
    block_size: u32,
) -> std::io::Result<Vec<FileDescriptor>> {
    let mut seeded = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];
    let mut root_listed = false;

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if root_listed => {
                warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                continue;
            }
            Err(e) => return Err(e),
        };
        root_listed = true;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let Some(relative) = relative_path(root, &path) else {
                continue;
            };
            match tokio::fs::read(&path).await {
                Ok(content) => {
                    let file =
                        split_into_blocks(folder.clone(), relative, Bytes::from(content), block_size);
                    seeded.push(swarm.add_file(file));
                }
                Err(e) => warn!("Skipping unreadable file {}: {}", path.display(), e),
            }
        }
    }

    seeded.sort_by(|a, b| a.path.cmp(&b.path));
    info!(
        "Seeded {} files from {} into folder {}",
        seeded.len(),
        root.display(),
        folder
    );
    Ok(seeded)
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeds_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("shows")).unwrap();
        std::fs::write(dir.path().join("intro.mp4"), vec![1u8; 300]).unwrap();
        std::fs::write(dir.path().join("shows").join("ep1.mkv"), vec![2u8; 50]).unwrap();

        let swarm = SimulatedSwarm::new(1);
        let folder = FolderId::new("library");
        let files = seed_directory(&swarm, &folder, dir.path(), 128).await.unwrap();

        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["intro.mp4", "shows/ep1.mkv"]);
        assert_eq!(files[0].block_count(), 3);
        assert_eq!(swarm.content(&folder, "shows/ep1.mkv").unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let swarm = SimulatedSwarm::new(1);
        let result = seed_directory(
            &swarm,
            &FolderId::new("library"),
            &dir.path().join("absent"),
            128,
        )
        .await;
        assert!(result.is_err());
    }
}
