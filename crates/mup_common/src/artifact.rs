//! Artifact inspection and extraction
//!
//! Two formats arrive from upstream:
//! - the editor ships a Debian package (an `ar` container whose
//!   `data.tar.{xz,zst,gz}` member holds the `usr/share/cursor` tree)
//! - the service ships a gzip tarball with `AdGuardHome/AdGuardHome`

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use crate::version::{version_from_manifest, VersionError};

/// Application tree inside the editor package
pub const EDITOR_TREE: &str = "usr/share/cursor";

/// Version metadata inside the editor package
pub const EDITOR_MANIFEST: &str = "usr/share/cursor/resources/app/package.json";

/// Manifest location relative to an installed editor directory
pub const EDITOR_MANIFEST_RELATIVE: &str = "resources/app/package.json";

/// Binary inside the service tarball
pub const SERVICE_BINARY: &str = "AdGuardHome/AdGuardHome";

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} is not a valid {format}: {reason}")]
    Corrupt {
        path: PathBuf,
        format: &'static str,
        reason: String,
    },

    #[error("{path} does not contain {expected}")]
    MissingEntry { path: PathBuf, expected: String },

    #[error("{path}: {source}")]
    Version {
        path: PathBuf,
        #[source]
        source: VersionError,
    },
}

fn io_error(path: &Path) -> impl Fn(io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Hex SHA-256 of a file
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Archive path without `./` components
fn normalized(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn is_contained(relative: &Path) -> bool {
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

#[derive(Debug, Clone, Copy)]
enum DataCodec {
    Xz,
    Zstd,
    Gzip,
    Plain,
}

impl DataCodec {
    fn from_member(name: &str) -> Option<Self> {
        match name.trim_end_matches('/') {
            "data.tar.xz" => Some(DataCodec::Xz),
            "data.tar.zst" => Some(DataCodec::Zstd),
            "data.tar.gz" => Some(DataCodec::Gzip),
            "data.tar" => Some(DataCodec::Plain),
            _ => None,
        }
    }

    fn decoder<'r, R: Read + 'r>(self, inner: R) -> io::Result<Box<dyn Read + 'r>> {
        Ok(match self {
            DataCodec::Xz => Box::new(xz2::read::XzDecoder::new(inner)),
            DataCodec::Zstd => Box::new(zstd::stream::read::Decoder::new(inner)?),
            DataCodec::Gzip => Box::new(GzDecoder::new(inner)),
            DataCodec::Plain => Box::new(inner),
        })
    }
}

/// Run `visit` over the data tarball of a Debian package
fn with_data_tar<T, F>(deb: &Path, visit: F) -> Result<T, ArtifactError>
where
    F: FnOnce(&mut tar::Archive<&mut dyn Read>) -> Result<T, ArtifactError>,
{
    let file = File::open(deb).map_err(io_error(deb))?;
    let mut archive = ar::Archive::new(file);
    let corrupt = |reason: String| ArtifactError::Corrupt {
        path: deb.to_path_buf(),
        format: "Debian package",
        reason,
    };

    while let Some(entry) = archive.next_entry() {
        let entry = entry.map_err(|e| corrupt(e.to_string()))?;
        let name = String::from_utf8_lossy(entry.header().identifier()).into_owned();
        let Some(codec) = DataCodec::from_member(&name) else {
            continue;
        };
        let mut reader = codec.decoder(entry).map_err(|e| corrupt(e.to_string()))?;
        let mut tarball = tar::Archive::new(&mut *reader as &mut dyn Read);
        return visit(&mut tarball);
    }

    Err(ArtifactError::MissingEntry {
        path: deb.to_path_buf(),
        expected: "data.tar.*".to_string(),
    })
}

fn tar_corrupt<'a>(path: &'a Path, format: &'static str) -> impl Fn(io::Error) -> ArtifactError + 'a {
    move |e| ArtifactError::Corrupt {
        path: path.to_path_buf(),
        format,
        reason: e.to_string(),
    }
}

/// Read the editor version recorded inside the package
pub fn deb_manifest_version(deb: &Path) -> Result<String, ArtifactError> {
    with_data_tar(deb, |tarball| {
        let corrupt = tar_corrupt(deb, "Debian package");
        for entry in tarball.entries().map_err(&corrupt)? {
            let mut entry = entry.map_err(&corrupt)?;
            let path = normalized(&entry.path().map_err(&corrupt)?);
            if path == Path::new(EDITOR_MANIFEST) {
                let mut json = String::new();
                entry.read_to_string(&mut json).map_err(&corrupt)?;
                return version_from_manifest(&json).map_err(|source| ArtifactError::Version {
                    path: deb.to_path_buf(),
                    source,
                });
            }
        }
        Err(ArtifactError::MissingEntry {
            path: deb.to_path_buf(),
            expected: EDITOR_MANIFEST.to_string(),
        })
    })
}

/// Extract everything below `prefix` into `dest`, returning the number of
/// entries written
pub fn unpack_deb_tree(deb: &Path, prefix: &str, dest: &Path) -> Result<usize, ArtifactError> {
    fs::create_dir_all(dest).map_err(io_error(dest))?;
    with_data_tar(deb, |tarball| {
        let corrupt = tar_corrupt(deb, "Debian package");
        let mut written = 0;
        for entry in tarball.entries().map_err(&corrupt)? {
            let mut entry = entry.map_err(&corrupt)?;
            let path = normalized(&entry.path().map_err(&corrupt)?);
            let Ok(relative) = path.strip_prefix(prefix) else {
                continue;
            };
            if relative.as_os_str().is_empty() || !is_contained(relative) {
                continue;
            }
            let target = dest.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(io_error(parent))?;
            }
            entry.unpack(&target).map_err(io_error(&target))?;
            written += 1;
        }
        if written == 0 {
            return Err(ArtifactError::MissingEntry {
                path: deb.to_path_buf(),
                expected: prefix.to_string(),
            });
        }
        Ok(written)
    })
}

fn open_tarball(path: &Path) -> Result<tar::Archive<GzDecoder<File>>, ArtifactError> {
    let file = File::open(path).map_err(io_error(path))?;
    Ok(tar::Archive::new(GzDecoder::new(file)))
}

/// The tarball opens and contains `entry_path`
pub fn verify_tarball(tarball: &Path, entry_path: &str) -> Result<(), ArtifactError> {
    let mut archive = open_tarball(tarball)?;
    let corrupt = tar_corrupt(tarball, "gzip tarball");
    for entry in archive.entries().map_err(&corrupt)? {
        let entry = entry.map_err(&corrupt)?;
        if normalized(&entry.path().map_err(&corrupt)?) == Path::new(entry_path) {
            return Ok(());
        }
    }
    Err(ArtifactError::MissingEntry {
        path: tarball.to_path_buf(),
        expected: entry_path.to_string(),
    })
}

/// Extract a single file from the tarball to `dest`
pub fn unpack_tarball_entry(
    tarball: &Path,
    entry_path: &str,
    dest: &Path,
) -> Result<(), ArtifactError> {
    let mut archive = open_tarball(tarball)?;
    let corrupt = tar_corrupt(tarball, "gzip tarball");
    for entry in archive.entries().map_err(&corrupt)? {
        let mut entry = entry.map_err(&corrupt)?;
        if normalized(&entry.path().map_err(&corrupt)?) == Path::new(entry_path) {
            let mut out = File::create(dest).map_err(io_error(dest))?;
            io::copy(&mut entry, &mut out).map_err(io_error(dest))?;
            out.sync_all().map_err(io_error(dest))?;
            return Ok(());
        }
    }
    Err(ArtifactError::MissingEntry {
        path: tarball.to_path_buf(),
        expected: entry_path.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{editor_deb, service_tarball};
    use tempfile::TempDir;

    #[test]
    fn test_deb_manifest_version() {
        let temp = TempDir::new().unwrap();
        let deb = temp.path().join("cursor.deb");
        fs::write(&deb, editor_deb("2.0.69").unwrap()).unwrap();
        assert_eq!(deb_manifest_version(&deb).unwrap(), "2.0.69");
    }

    #[test]
    fn test_unpack_deb_tree() {
        let temp = TempDir::new().unwrap();
        let deb = temp.path().join("cursor.deb");
        fs::write(&deb, editor_deb("2.0.69").unwrap()).unwrap();
        let dest = temp.path().join("out");

        let written = unpack_deb_tree(&deb, EDITOR_TREE, &dest).unwrap();
        assert!(written >= 2);
        let manifest = fs::read_to_string(dest.join(EDITOR_MANIFEST_RELATIVE)).unwrap();
        assert!(manifest.contains("2.0.69"));
        assert!(dest.join("cursor").is_file());
    }

    #[test]
    fn test_garbage_is_not_a_deb() {
        let temp = TempDir::new().unwrap();
        let deb = temp.path().join("cursor.deb");
        fs::write(&deb, b"<html>503 Service Unavailable</html>").unwrap();
        assert!(deb_manifest_version(&deb).is_err());
    }

    #[test]
    fn test_tarball_verify_and_unpack() {
        let temp = TempDir::new().unwrap();
        let tgz = temp.path().join("agh.tar.gz");
        fs::write(&tgz, service_tarball(b"new-binary").unwrap()).unwrap();

        verify_tarball(&tgz, SERVICE_BINARY).unwrap();
        assert!(matches!(
            verify_tarball(&tgz, "AdGuardHome/missing"),
            Err(ArtifactError::MissingEntry { .. })
        ));

        let out = temp.path().join("AdGuardHome.new");
        unpack_tarball_entry(&tgz, SERVICE_BINARY, &out).unwrap();
        assert_eq!(fs::read(&out).unwrap(), b"new-binary");
    }

    #[test]
    fn test_sha256_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
