//! In-memory host seams
//!
//! `FakeSystem` answers commands from a table and `FakeHttp` serves canned
//! responses, so whole runs can be driven without a network or pacman.
//! Both record what was asked of them.
//!
//! The fixture builders produce small but structurally valid artifacts:
//! a Debian package carrying the editor tree and a release tarball
//! carrying the service binary.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::http::{HttpClient, HttpError};
use crate::system::{CommandOutput, Invocation, SystemRunner};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Fake System
// ============================================================================

/// Table-driven subprocess runner.
///
/// Unanswered commands exit with status 1 and no output, which is what
/// pacman query commands do for a package that is not installed.
#[derive(Default)]
pub struct FakeSystem {
    programs: Mutex<HashSet<String>>,
    sticky: Mutex<HashMap<String, CommandOutput>>,
    queued: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    calls: Mutex<Vec<Invocation>>,
}

impl FakeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `locate(program)` succeed
    pub fn install_program(&self, program: &str) {
        lock(&self.programs).insert(program.to_string());
    }

    /// Answer every invocation of `command_line`
    pub fn respond(&self, command_line: &str, output: CommandOutput) {
        lock(&self.sticky).insert(command_line.to_string(), output);
    }

    /// Answer the next invocation of `command_line` only; takes precedence
    /// over [`FakeSystem::respond`]
    pub fn respond_once(&self, command_line: &str, output: CommandOutput) {
        lock(&self.queued)
            .entry(command_line.to_string())
            .or_default()
            .push_back(output);
    }

    pub fn calls(&self) -> Vec<Invocation> {
        lock(&self.calls).clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        lock(&self.calls).iter().map(Invocation::command_line).collect()
    }

    pub fn count(&self, command_line: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|c| c.as_str() == command_line)
            .count()
    }

    pub fn ran(&self, command_line: &str) -> bool {
        self.count(command_line) > 0
    }

    /// Position of the first call matching `command_line`
    pub fn position(&self, command_line: &str) -> Option<usize> {
        self.command_lines()
            .iter()
            .position(|c| c.as_str() == command_line)
    }
}

impl SystemRunner for FakeSystem {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        lock(&self.calls).push(invocation.clone());
        let key = invocation.command_line();

        if let Some(queue) = lock(&self.queued).get_mut(&key) {
            if let Some(output) = queue.pop_front() {
                return Ok(output);
            }
        }
        Ok(lock(&self.sticky)
            .get(&key)
            .cloned()
            .unwrap_or_else(|| CommandOutput::failed(1, "")))
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        lock(&self.programs)
            .contains(program)
            .then(|| PathBuf::from("/usr/bin").join(program))
    }
}

// ============================================================================
// Fake HTTP
// ============================================================================

#[derive(Clone)]
struct ServedFile {
    bytes: Vec<u8>,
    /// Final file length; the tail past `bytes` is a sparse hole
    len: u64,
}

#[derive(Default)]
pub struct FakeHttp {
    redirects: Mutex<HashMap<String, String>>,
    texts: Mutex<HashMap<String, String>>,
    files: Mutex<HashMap<String, ServedFile>>,
    failures_left: Mutex<HashMap<String, u32>>,
    downloads: Mutex<Vec<String>>,
    probes: Mutex<Vec<String>>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redirect(&self, url: &str, target: &str) {
        lock(&self.redirects).insert(url.to_string(), target.to_string());
    }

    pub fn text(&self, url: &str, body: &str) {
        lock(&self.texts).insert(url.to_string(), body.to_string());
    }

    pub fn serve(&self, url: &str, bytes: Vec<u8>) {
        let len = bytes.len() as u64;
        lock(&self.files).insert(url.to_string(), ServedFile { bytes, len });
    }

    /// Serve `bytes` followed by zero padding up to `len` bytes
    pub fn serve_padded(&self, url: &str, bytes: Vec<u8>, len: u64) {
        let len = len.max(bytes.len() as u64);
        lock(&self.files).insert(url.to_string(), ServedFile { bytes, len });
    }

    /// Fail the next `times` downloads of `url`
    pub fn fail_downloads(&self, url: &str, times: u32) {
        lock(&self.failures_left).insert(url.to_string(), times);
    }

    /// Every download attempt, in order
    pub fn downloads(&self) -> Vec<String> {
        lock(&self.downloads).clone()
    }

    pub fn download_count(&self) -> usize {
        lock(&self.downloads).len()
    }

    pub fn probe_count(&self) -> usize {
        lock(&self.probes).len()
    }
}

impl HttpClient for FakeHttp {
    fn resolve_redirect(&self, url: &str) -> Result<String, HttpError> {
        lock(&self.probes).push(url.to_string());
        lock(&self.redirects)
            .get(url)
            .cloned()
            .ok_or_else(|| HttpError::NoRedirect {
                url: url.to_string(),
            })
    }

    fn get_text(&self, url: &str) -> Result<String, HttpError> {
        lock(&self.texts)
            .get(url)
            .cloned()
            .ok_or_else(|| HttpError::Status {
                url: url.to_string(),
                status: 404,
            })
    }

    fn download(&self, url: &str, destination: &Path) -> Result<u64, HttpError> {
        lock(&self.downloads).push(url.to_string());

        if let Some(left) = lock(&self.failures_left).get_mut(url) {
            if *left > 0 {
                *left -= 1;
                // Leave a partial file behind like an interrupted transfer
                let _ = std::fs::write(destination, b"partial");
                return Err(HttpError::Transport {
                    url: url.to_string(),
                    reason: "connection reset".to_string(),
                });
            }
        }

        let served = lock(&self.files)
            .get(url)
            .cloned()
            .ok_or_else(|| HttpError::Status {
                url: url.to_string(),
                status: 404,
            })?;

        let io_err = |source| HttpError::Io {
            path: destination.to_path_buf(),
            source,
        };
        let mut file = File::create(destination).map_err(io_err)?;
        file.write_all(&served.bytes).map_err(io_err)?;
        file.set_len(served.len).map_err(io_err)?;
        Ok(served.len)
    }
}

// ============================================================================
// Artifact fixtures
// ============================================================================

fn tar_gz(entries: &[(&str, &[u8], u32)]) -> io::Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    for (path, data, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append_data(&mut header, path, *data)?;
    }
    builder.into_inner()?.finish()
}

/// Debian package whose data member holds `usr/share/cursor` with a
/// `package.json` reporting `version`
pub fn editor_deb(version: &str) -> io::Result<Vec<u8>> {
    let manifest = format!("{{\"name\":\"cursor\",\"version\":\"{}\"}}", version);
    let launcher = format!("#!/bin/sh\necho cursor {}\n", version);
    let control = format!("Package: cursor\nVersion: {}\nArchitecture: amd64\n", version);

    let control_tar = tar_gz(&[("./control", control.as_bytes(), 0o644)])?;
    let data_tar = tar_gz(&[
        (
            "./usr/share/cursor/resources/app/package.json",
            manifest.as_bytes(),
            0o644,
        ),
        ("./usr/share/cursor/cursor", launcher.as_bytes(), 0o755),
    ])?;

    let mut out = Vec::new();
    {
        let mut builder = ar::Builder::new(&mut out);
        for (name, data) in [
            ("debian-binary", b"2.0\n".to_vec()),
            ("control.tar.gz", control_tar),
            ("data.tar.gz", data_tar),
        ] {
            let header = ar::Header::new(name.as_bytes().to_vec(), data.len() as u64);
            builder.append(&header, data.as_slice())?;
        }
    }
    Ok(out)
}

/// Release tarball carrying `AdGuardHome/AdGuardHome` with `binary` as
/// its contents
pub fn service_tarball(binary: &[u8]) -> io::Result<Vec<u8>> {
    tar_gz(&[
        ("AdGuardHome/AdGuardHome", binary, 0o755),
        ("AdGuardHome/README.md", b"AdGuard Home\n", 0o644),
    ])
}
