//! Packages the project directory into the single archive uploaded to providers.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive write failed: {0}")]
    Zip(#[from] zip::result::ZipError),
}

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes every file under `project_dir` into `archive_path`, keyed by its
/// path relative to `project_dir` with `/` separators. Returns the number of
/// files packaged.
///
/// The archive itself is skipped if it happens to live inside the tree.
pub fn build_archive(project_dir: &Path, archive_path: &Path) -> Result<usize, ArtifactError> {
    let mut files = Vec::new();
    collect_files(project_dir, &mut files)?;
    files.sort();

    let out = File::create(archive_path).map_err(io_at(archive_path))?;
    let mut zip = ZipWriter::new(out);
    let options = SimpleFileOptions::default();
    let mut count = 0;

    for path in &files {
        if path == archive_path {
            continue;
        }
        let Ok(relative) = path.strip_prefix(project_dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let data = fs::read(path).map_err(io_at(path))?;
        zip.start_file(name, options)?;
        zip.write_all(&data).map_err(io_at(archive_path))?;
        count += 1;
    }

    zip.finish()?;
    tracing::info!(files = count, archive = %archive_path.display(), "Project packaged");
    Ok(count)
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), ArtifactError> {
    for entry in fs::read_dir(dir).map_err(io_at(dir))? {
        let entry = entry.map_err(io_at(dir))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(io_at(&path))?;
        if file_type.is_dir() {
            collect_files(&path, files)?;
        } else if file_type.is_symlink() {
            // Linked directories are not descended into; linked files are packaged.
            match fs::metadata(&path) {
                Ok(target) if target.is_file() => files.push(path),
                Ok(_) => tracing::warn!(path = %path.display(), "Skipping linked directory"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping broken link"),
            }
        } else {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn packages_nested_tree_with_relative_paths() {
        let project = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::write(project.path().join("scene.blend"), b"BLENDER").unwrap();
        fs::create_dir_all(project.path().join("textures/wood")).unwrap();
        fs::write(project.path().join("textures/wood/oak.png"), b"png").unwrap();

        let archive = out.path().join("archive.zip");
        let count = build_archive(project.path(), &archive).unwrap();
        assert_eq!(count, 2);

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 2);
        let mut contents = String::new();
        zip.by_name("textures/wood/oak.png")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "png");
        assert!(zip.by_name("scene.blend").is_ok());
    }

    #[test]
    fn empty_project_yields_empty_archive() {
        let project = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let archive = out.path().join("archive.zip");
        assert_eq!(build_archive(project.path(), &archive).unwrap(), 0);
        assert!(archive.exists());
    }

    #[test]
    fn missing_project_is_an_io_error() {
        let out = TempDir::new().unwrap();
        let err = build_archive(
            &out.path().join("does-not-exist"),
            &out.path().join("archive.zip"),
        )
        .unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn linked_directories_are_skipped_and_linked_files_kept() {
        use std::os::unix::fs::symlink;

        let project = TempDir::new().unwrap();
        let assets = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::write(assets.path().join("tex.png"), b"png").unwrap();
        fs::write(project.path().join("scene.blend"), b"BLENDER").unwrap();
        symlink(assets.path(), project.path().join("assets")).unwrap();
        symlink(assets.path().join("tex.png"), project.path().join("tex.png")).unwrap();
        symlink(project.path().join("gone"), project.path().join("dangling")).unwrap();

        let archive = out.path().join("archive.zip");
        assert_eq!(build_archive(project.path(), &archive).unwrap(), 2);

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert!(zip.by_name("tex.png").is_ok());
        assert!(zip.by_name("scene.blend").is_ok());
        assert!(zip.by_name("assets/tex.png").is_err());
    }

    #[test]
    fn skips_archive_inside_tree() {
        let project = TempDir::new().unwrap();
        fs::write(project.path().join("scene.blend"), b"x").unwrap();
        let archive = project.path().join("archive.zip");
        assert_eq!(build_archive(project.path(), &archive).unwrap(), 1);
    }
}
