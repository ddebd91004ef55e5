//! Archive extraction (zip, tar.gz).
//!
//! Entry names are untrusted. Every destination is normalized and checked to
//! stay inside the extraction root; a single escaping entry aborts the whole
//! extraction.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::{BootstrapError, ExtractError};

type Result<T> = std::result::Result<T, ExtractError>;

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::TarGz => "tar.gz",
        }
    }
}

/// How entry names map onto the destination directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Drop the first path segment of every entry (snapshot archives wrap
    /// their content in a single versioned folder).
    pub strip_leading_component: bool,
    /// Ignore all directory structure and write files by base name only.
    pub flatten: bool,
    /// Files with this name (ignoring a trailing `.exe`) get the executable
    /// bit when unpacked from a tar archive.
    pub executable_name: Option<String>,
    /// When set, file entries whose base name is not listed are skipped.
    pub only_file_names: Option<Vec<String>>,
}

impl ExtractOptions {
    pub fn strip_leading() -> Self {
        Self {
            strip_leading_component: true,
            ..Default::default()
        }
    }

    pub fn flatten() -> Self {
        Self {
            flatten: true,
            ..Default::default()
        }
    }

    pub fn with_executable(mut self, name: impl Into<String>) -> Self {
        self.executable_name = Some(name.into());
        self
    }

    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only_file_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    fn keeps(&self, relative: &Path) -> bool {
        match &self.only_file_names {
            None => true,
            Some(names) => relative
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| names.iter().any(|keep| keep == n))
                .unwrap_or(false),
        }
    }
}

/// Archive extractor
pub struct ArchiveExtractor;

impl ArchiveExtractor {
    /// Extract an archive file on disk.
    pub fn extract_file(
        archive_path: &Path,
        kind: ArchiveKind,
        dest_dir: &Path,
        options: &ExtractOptions,
    ) -> Result<Vec<PathBuf>> {
        let file = File::open(archive_path).map_err(|e| ExtractError::io(archive_path, e))?;
        Self::extract(BufReader::new(file), kind, dest_dir, options)
    }

    /// [`ArchiveExtractor::extract_file`] on the blocking thread pool.
    pub async fn extract_file_async(
        archive_path: PathBuf,
        kind: ArchiveKind,
        dest_dir: PathBuf,
        options: ExtractOptions,
    ) -> crate::Result<Vec<PathBuf>> {
        let path = archive_path.clone();
        tokio::task::spawn_blocking(move || {
            Self::extract_file(&archive_path, kind, &dest_dir, &options)
        })
        .await
        .map_err(|e| BootstrapError::io(path, std::io::Error::other(e)))?
        .map_err(BootstrapError::from)
    }

    /// Extract `reader` into `dest_dir`.
    ///
    /// Returns the written files relative to `dest_dir`, in archive order.
    pub fn extract<R: Read + Seek>(
        reader: R,
        kind: ArchiveKind,
        dest_dir: &Path,
        options: &ExtractOptions,
    ) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dest_dir).map_err(|e| ExtractError::io(dest_dir, e))?;

        // Canonicalize dest_dir for path traversal check
        let root = dest_dir
            .canonicalize()
            .map_err(|e| ExtractError::io(dest_dir, e))?;

        match kind {
            ArchiveKind::Zip => Self::extract_zip(reader, &root, options),
            ArchiveKind::TarGz => Self::extract_tar_gz(reader, &root, options),
        }
    }

    fn extract_zip<R: Read + Seek>(
        reader: R,
        root: &Path,
        options: &ExtractOptions,
    ) -> Result<Vec<PathBuf>> {
        let mut archive = zip::ZipArchive::new(reader)
            .map_err(|e| ExtractError::Corrupt(format!("Failed to open zip: {}", e)))?;

        let mut written = Vec::new();
        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| ExtractError::Corrupt(format!("Failed to read zip entry: {}", e)))?;

            let name = file.name().to_string();
            let is_dir = file.is_dir();
            let unix_mode = file.unix_mode();

            let Some(relative) = unpack_entry(root, options, &name, is_dir, &mut file)? else {
                continue;
            };

            // Owner read/write is always kept.
            #[cfg(unix)]
            if let Some(mode) = unix_mode {
                use std::os::unix::fs::PermissionsExt;
                let outpath = root.join(&relative);
                fs::set_permissions(&outpath, fs::Permissions::from_mode((mode & 0o777) | 0o600))
                    .map_err(|e| ExtractError::io(&outpath, e))?;
            }
            #[cfg(not(unix))]
            let _ = unix_mode;

            written.push(relative);
        }

        Ok(written)
    }

    fn extract_tar_gz<R: Read>(
        reader: R,
        root: &Path,
        options: &ExtractOptions,
    ) -> Result<Vec<PathBuf>> {
        let mut archive = tar::Archive::new(GzDecoder::new(reader));
        let entries = archive
            .entries()
            .map_err(|e| ExtractError::Corrupt(format!("Failed to read tar: {}", e)))?;

        let mut written = Vec::new();
        for entry in entries {
            let mut entry = entry
                .map_err(|e| ExtractError::Corrupt(format!("Failed to read tar entry: {}", e)))?;

            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let entry_type = entry.header().entry_type();

            if !entry_type.is_file() && !entry_type.is_dir() {
                log::debug!("Skipping tar entry {} ({:?})", name, entry_type);
                continue;
            }

            let Some(relative) =
                unpack_entry(root, options, &name, entry_type.is_dir(), &mut entry)?
            else {
                continue;
            };

            if let Some(executable) = &options.executable_name {
                if is_named_binary(&relative, executable) {
                    let outpath = root.join(&relative);
                    mark_executable(&outpath).map_err(|e| ExtractError::io(&outpath, e))?;
                }
            }

            written.push(relative);
        }

        Ok(written)
    }
}

/// Write one entry below `root`. Returns the relative path of the written
/// file, or `None` for directories and skipped entries.
fn unpack_entry(
    root: &Path,
    options: &ExtractOptions,
    name: &str,
    is_dir: bool,
    content: &mut dyn Read,
) -> Result<Option<PathBuf>> {
    let Some(relative) = entry_destination(name, options)? else {
        return Ok(None);
    };

    if is_dir {
        if !options.flatten {
            let outpath = root.join(&relative);
            ensure_existing_ancestor_within(root, &outpath, name)?;
            fs::create_dir_all(&outpath).map_err(|e| ExtractError::io(&outpath, e))?;
            ensure_within(root, &outpath, name)?;
        }
        return Ok(None);
    }

    if !options.keeps(&relative) {
        log::debug!("Skipping archive entry {}", name);
        return Ok(None);
    }

    let outpath = root.join(&relative);
    if let Some(parent) = outpath.parent() {
        ensure_existing_ancestor_within(root, parent, name)?;
        fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
        ensure_within(root, parent, name)?;
    }

    // Never write through a link left behind in the destination.
    if fs::symlink_metadata(&outpath)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
    {
        fs::remove_file(&outpath).map_err(|e| ExtractError::io(&outpath, e))?;
    }

    let mut outfile = File::create(&outpath).map_err(|e| ExtractError::io(&outpath, e))?;
    std::io::copy(content, &mut outfile).map_err(|e| ExtractError::io(&outpath, e))?;

    Ok(Some(relative))
}

/// Map a raw entry name to a normalized path relative to the extraction root.
///
/// `Ok(None)` means the entry maps onto the root itself and is skipped.
fn entry_destination(name: &str, options: &ExtractOptions) -> Result<Option<PathBuf>> {
    if is_absolute_name(name) {
        return Err(ExtractError::Unsafe { entry: name.to_string() });
    }

    let mut segments: Vec<&str> = name
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    if options.flatten {
        return match segments.pop() {
            None => Ok(None),
            Some("..") => Err(ExtractError::Unsafe { entry: name.to_string() }),
            Some(base) => Ok(Some(PathBuf::from(base))),
        };
    }

    if options.strip_leading_component && !segments.is_empty() {
        segments.remove(0);
    }

    let mut normalized: Vec<&str> = Vec::with_capacity(segments.len());
    for segment in segments {
        if segment == ".." {
            if normalized.pop().is_none() {
                return Err(ExtractError::Unsafe { entry: name.to_string() });
            }
        } else {
            normalized.push(segment);
        }
    }

    if normalized.is_empty() {
        return Ok(None);
    }

    Ok(Some(normalized.iter().collect()))
}

fn is_absolute_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let rooted = matches!(bytes.first(), Some(b'/') | Some(b'\\'));
    let drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    rooted || drive
}

/// Verify a created path still resolves inside `root` (catches symlinks that
/// already existed in the destination).
fn ensure_within(root: &Path, path: &Path, entry: &str) -> Result<()> {
    let canonical = path.canonicalize().map_err(|e| ExtractError::io(path, e))?;
    if !canonical.starts_with(root) {
        return Err(ExtractError::Unsafe { entry: entry.to_string() });
    }
    Ok(())
}

/// Check the deepest part of `path` that already exists, so nothing is
/// created through a link that leads out of `root`.
fn ensure_existing_ancestor_within(root: &Path, path: &Path, entry: &str) -> Result<()> {
    let existing = path
        .ancestors()
        .find(|p| p.symlink_metadata().is_ok())
        .unwrap_or(root);
    ensure_within(root, existing, entry)
}

fn is_named_binary(path: &Path, binary: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.strip_suffix(".exe").unwrap_or(n) == binary)
        .unwrap_or(false)
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
