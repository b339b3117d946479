//! Blocking HTTP download with caller hooks, and a file-target downloader
//! that lays down the symbol-cache directory hierarchy.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::pdbinfo::PdbIdentity;

const CHUNK_SIZE: usize = 32768;

/// What `on_receive` tells the transfer loop to do next.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum DownloadAction {
    Proceed,
    Cancel,
}

/// A download sink. `download` drives a blocking GET and reports progress
/// through the hooks; `on_receive` is the cancellation point.
pub trait Downloader {
    /// The sink is ready to receive (e.g. its target file opened).
    fn valid(&self) -> bool {
        true
    }

    /// Headers have arrived; the body follows.
    fn on_start(&mut self, _url: &str, _content_length: Option<u64>) {}

    /// One body chunk. Returning [`DownloadAction::Cancel`] stops the
    /// transfer, runs `on_cancel` and makes `download` return `false`.
    fn on_receive(&mut self, chunk: &[u8]) -> DownloadAction;

    /// The body ended cleanly.
    fn on_finish(&mut self) {}

    /// The server answered with a status of 400 or above, or the transport
    /// failed (reported as code 0).
    fn on_error(&mut self, _http_code: u16) {}

    /// A receive hook requested cancellation.
    fn on_cancel(&mut self) {}

    /// Drive the transfer. One boolean out; the details arrive via hooks.
    fn download(&mut self, url: &str) -> bool {
        download_with(url, self)
    }
}

/// Run `downloader` against `url` if it is ready.
pub fn download(url: &str, downloader: &mut dyn Downloader) -> bool {
    download_with(url, downloader)
}

fn download_with<D: Downloader + ?Sized>(url: &str, downloader: &mut D) -> bool {
    if !downloader.valid() {
        return false;
    }

    debug!("GET {}", url);

    let response = match reqwest::blocking::get(url) {
        Ok(r) => r,
        Err(e) => {
            warn!("transport failure for {}: {}", url, e);
            downloader.on_error(0);
            return false;
        }
    };

    let status = response.status().as_u16();
    if status >= 400 {
        debug!("{} answered {}", url, status);
        downloader.on_error(status);
        return false;
    }

    let content_length = response.content_length();
    downloader.on_start(url, content_length);

    stream_body(response, downloader)
}

/// The body loop, factored over any reader so the hook protocol does not
/// need a network to be exercised.
pub(crate) fn stream_body<R: Read, D: Downloader + ?Sized>(
    mut body: R,
    downloader: &mut D,
) -> bool {
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        match body.read(&mut buf) {
            Ok(0) => {
                downloader.on_finish();
                return true;
            }
            Ok(read) => match downloader.on_receive(&buf[..read]) {
                DownloadAction::Proceed => {}
                DownloadAction::Cancel => {
                    downloader.on_cancel();
                    return false;
                }
            },
            Err(e) => {
                warn!("body read failed: {}", e);
                downloader.on_error(0);
                return false;
            }
        }
    }
}

fn is_separator(byte: u8) -> bool {
    byte == b'\\' || byte == b'/'
}

/// Create every directory along `path` (past any `X:\`, `\\.\root` or
/// `\??\root` prefix), recording what this call created so a failure can
/// remove it again, newest first.
fn create_file_with_hierarchy(path: &Path, created: &mut Vec<PathBuf>) -> Option<File> {
    let raw = path.to_string_lossy().into_owned();
    if raw.is_empty() {
        return None;
    }

    let bytes = raw.as_bytes();

    let mut last_skipped = 0usize;
    if bytes.len() >= 3 && bytes[1] == b':' && is_separator(bytes[2]) {
        // "X:\..."
        last_skipped = 2;
    } else if bytes.len() >= 4 && (&bytes[..4] == br"\\.\" || &bytes[..4] == br"\??\") {
        // "\\.\Root\..." and "\??\Root\..."
        for (index, &byte) in bytes.iter().enumerate().skip(4) {
            if is_separator(byte) {
                last_skipped = index;
                break;
            }
        }
    }

    for (index, &byte) in bytes.iter().enumerate() {
        if index <= last_skipped || !is_separator(byte) {
            continue;
        }

        let dir = &raw[..index];
        if dir.is_empty() {
            continue;
        }

        match fs::create_dir(dir) {
            Ok(()) => created.push(PathBuf::from(dir)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => {
                warn!("creating {} failed: {}", dir, e);
                return None;
            }
        }
    }

    File::create(path).ok()
}

fn remove_created(created: &mut Vec<PathBuf>) {
    for dir in created.drain(..).rev() {
        let _ = fs::remove_dir(dir);
    }
}

/// A downloader that writes the body into a file, creating the directory
/// hierarchy up front and removing it again if the target cannot be opened.
pub struct FileDownloader {
    path: PathBuf,
    file: Option<File>,
}

impl FileDownloader {
    pub fn create<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut created_dirs = Vec::new();

        let file = create_file_with_hierarchy(&path, &mut created_dirs);
        if file.is_none() {
            remove_created(&mut created_dirs);
        }

        Self { path, file }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn close(&mut self) {
        self.file.take();
    }
}

impl Downloader for FileDownloader {
    fn valid(&self) -> bool {
        self.file.is_some()
    }

    fn on_receive(&mut self, chunk: &[u8]) -> DownloadAction {
        let file = match self.file.as_mut() {
            Some(f) => f,
            None => return DownloadAction::Cancel,
        };

        match file.write_all(chunk) {
            Ok(()) => DownloadAction::Proceed,
            Err(_) => DownloadAction::Cancel,
        }
    }

    fn on_finish(&mut self) {
        self.close();
    }

    fn on_error(&mut self, _http_code: u16) {
        self.close();
    }

    fn on_cancel(&mut self) {
        self.close();
    }
}

impl Drop for FileDownloader {
    fn drop(&mut self) {
        self.close();
    }
}

/// Fetch a PDB from `server` into the cache layout under `cache_root`,
/// returning the local path on success.
pub fn fetch_pdb(server: &str, cache_root: &Path, identity: &PdbIdentity) -> Option<PathBuf> {
    let target = identity.cache_path(cache_root);
    let url = identity.server_url(server);

    let mut downloader = FileDownloader::create(&target);
    if downloader.download(&url) {
        Some(target)
    } else {
        None
    }
}
