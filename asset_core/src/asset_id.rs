use std::fmt;

use crate::error::AssetError;
use crate::intern::{Interned, Interner};

pub const MAX_ASSET_PATH_LEN: usize = 512;

#[derive(Debug)]
pub struct KeyData {
    kind: AssetType,
}

#[derive(Debug)]
pub struct TypeData;

/// Interned asset path. Two keys are equal exactly when they are the same
/// live handle, which is guaranteed for equal normalized paths.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AssetKey(Interned<KeyData>);

/// Interned, upper-cased file extension naming a class of assets.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AssetType(Interned<TypeData>);

impl AssetKey {
    pub fn path(&self) -> &str {
        self.0.name()
    }

    pub fn kind(&self) -> &AssetType {
        &self.0.kind
    }

    pub fn id(&self) -> u64 {
        self.0.id()
    }
}

impl AssetType {
    pub fn extension(&self) -> &str {
        self.0.name()
    }

    pub fn id(&self) -> u64 {
        self.0.id()
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

impl fmt::Debug for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetKey({})", self.path())
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl fmt::Debug for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetType({})", self.extension())
    }
}

/// Interning tables for keys and types. Keys keep their type alive.
#[derive(Default)]
pub struct AssetIds {
    keys: Interner<KeyData>,
    types: Interner<TypeData>,
}

impl AssetIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `path` after normalizing separators to '/'. The type is
    /// derived from the final extension.
    pub fn key(&self, path: &str) -> Result<AssetKey, AssetError> {
        let normalized = normalize_path(path)?;
        if let Some(existing) = self.keys.get(&normalized) {
            return Ok(AssetKey(existing));
        }
        let extension = extension_of(&normalized)
            .ok_or_else(|| AssetError::malformed(path, "missing file extension"))?;
        let kind = self.kind(extension)?;
        Ok(AssetKey(
            self.keys.intern_with(&normalized, move |_| KeyData { kind }),
        ))
    }

    /// Interns an extension, with or without a leading '.', in any case.
    pub fn kind(&self, extension: &str) -> Result<AssetType, AssetError> {
        let trimmed = extension.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Err(AssetError::malformed(extension, "empty extension"));
        }
        if trimmed.contains(['/', '\\', '.']) {
            return Err(AssetError::malformed(extension, "invalid extension"));
        }
        let upper = trimmed.to_ascii_uppercase();
        Ok(AssetType(self.types.intern_with(&upper, |_| TypeData)))
    }

    pub fn live_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn live_types(&self) -> usize {
        self.types.len()
    }
}

fn normalize_path(input: &str) -> Result<String, AssetError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AssetError::malformed(input, "path is empty"));
    }
    if trimmed.len() > MAX_ASSET_PATH_LEN {
        return Err(AssetError::malformed(
            input,
            format!("path length {} exceeds max {}", trimmed.len(), MAX_ASSET_PATH_LEN),
        ));
    }
    let normalized = trimmed.replace('\\', "/");
    if normalized.starts_with('/') || normalized.contains(':') {
        return Err(AssetError::malformed(input, "path must be relative"));
    }
    for segment in normalized.split('/') {
        if segment.is_empty() {
            return Err(AssetError::malformed(input, "empty path segment"));
        }
        if segment == "." || segment == ".." {
            return Err(AssetError::malformed(input, "dot segments are not allowed"));
        }
    }
    Ok(normalized)
}

fn extension_of(path: &str) -> Option<&str> {
    let file_name = path.rsplit('/').next()?;
    let (_, extension) = file_name.rsplit_once('.')?;
    (!extension.is_empty()).then_some(extension)
}
