use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use log::debug;
use zip::ZipArchive;

use crate::asset_id::AssetKey;
use crate::error::AssetError;

pub type AssetStream = Box<dyn Read + Send>;

/// Supplies the bytes behind a key. `open` runs on the requesting thread;
/// the returned stream is consumed later, possibly on a worker.
pub trait AssetSource: Send + Sync + 'static {
    fn open(&self, key: &AssetKey) -> Result<AssetStream, AssetError>;

    fn exists(&self, key: &AssetKey) -> bool;
}

pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, key: &AssetKey) -> Result<PathBuf, AssetError> {
        safe_join(&self.root, key.path())
            .ok_or_else(|| AssetError::not_found(key, "path escapes the content root"))
    }
}

impl AssetSource for DirSource {
    fn open(&self, key: &AssetKey) -> Result<AssetStream, AssetError> {
        let path = self.resolve(key)?;
        if !path.is_file() {
            return Err(AssetError::not_found(
                key,
                format!("no file at {}", path.display()),
            ));
        }
        let file = File::open(&path).map_err(|err| {
            AssetError::not_found(key, format!("open {} failed: {}", path.display(), err))
        })?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn exists(&self, key: &AssetKey) -> bool {
        self.resolve(key).is_ok_and(|path| path.is_file())
    }
}

/// In-memory blobs keyed by normalized path.
#[derive(Default)]
pub struct MemorySource {
    entries: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, bytes: impl Into<Arc<[u8]>>) {
        let mut entries = self.entries.write().expect("memory source lock poisoned");
        entries.insert(path.replace('\\', "/"), bytes.into());
    }

    pub fn remove(&self, path: &str) -> bool {
        let mut entries = self.entries.write().expect("memory source lock poisoned");
        entries.remove(&path.replace('\\', "/")).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("memory source lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AssetSource for MemorySource {
    fn open(&self, key: &AssetKey) -> Result<AssetStream, AssetError> {
        let entries = self.entries.read().expect("memory source lock poisoned");
        let bytes = entries
            .get(key.path())
            .cloned()
            .ok_or_else(|| AssetError::not_found(key, "no in-memory entry"))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn exists(&self, key: &AssetKey) -> bool {
        self.entries
            .read()
            .expect("memory source lock poisoned")
            .contains_key(key.path())
    }
}

/// Files inside a zip archive. Entry names are indexed once; each open
/// re-reads the archive and inflates the entry into memory.
pub struct ZipSource {
    archive: PathBuf,
    names: HashMap<String, String>,
}

impl ZipSource {
    pub fn open_archive(archive: impl Into<PathBuf>) -> io::Result<Self> {
        let archive = archive.into();
        let file = File::open(&archive)?;
        let mut zip = ZipArchive::new(BufReader::new(file)).map_err(zip_to_io)?;
        let mut names = HashMap::new();
        for index in 0..zip.len() {
            let entry = zip.by_index(index).map_err(zip_to_io)?;
            if entry.is_dir() {
                continue;
            }
            let raw = entry.name().to_string();
            names.insert(raw.replace('\\', "/"), raw);
        }
        debug!("indexed {} entries in {}", names.len(), archive.display());
        Ok(Self { archive, names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl AssetSource for ZipSource {
    fn open(&self, key: &AssetKey) -> Result<AssetStream, AssetError> {
        let name = self
            .names
            .get(key.path())
            .ok_or_else(|| AssetError::not_found(key, "no such archive entry"))?;
        let read_entry = || -> io::Result<Vec<u8>> {
            let file = File::open(&self.archive)?;
            let mut zip = ZipArchive::new(BufReader::new(file)).map_err(zip_to_io)?;
            let mut entry = zip.by_name(name).map_err(zip_to_io)?;
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            Ok(bytes)
        };
        let bytes = read_entry().map_err(|err| {
            AssetError::not_found(
                key,
                format!("read from {} failed: {}", self.archive.display(), err),
            )
        })?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn exists(&self, key: &AssetKey) -> bool {
        self.names.contains_key(key.path())
    }
}

fn zip_to_io(err: zip::result::ZipError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err.to_string())
}

fn safe_join(base: &Path, relative: &str) -> Option<PathBuf> {
    let mut out = base.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}
