use std::any::Any;
use std::fmt;
use std::sync::Arc;

use codec_png::PixelFormat;

use crate::asset_id::AssetKey;

pub trait AsAnyArc {
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAnyArc for T {
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A decoded, immutable resource shared by every caller that resolves its key.
pub trait Asset: AsAnyArc + Send + Sync + 'static {
    fn key(&self) -> &AssetKey;

    /// Approximate resident size, used to weigh the soft cache.
    fn decoded_size(&self) -> usize;
}

/// Downcasts a shared asset to its concrete type.
pub fn downcast<T: Asset>(asset: Arc<dyn Asset>) -> Option<Arc<T>> {
    asset.into_any_arc().downcast::<T>().ok()
}

pub struct Texture {
    pub key: AssetKey,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Arc<Vec<u8>>,
}

impl Asset for Texture {
    fn key(&self) -> &AssetKey {
        &self.key
    }

    fn decoded_size(&self) -> usize {
        self.pixels.len()
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("key", &self.key)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Raw bytes of a file, for types that need no decoding.
#[derive(Debug)]
pub struct Blob {
    pub key: AssetKey,
    pub bytes: Vec<u8>,
}

impl Asset for Blob {
    fn key(&self) -> &AssetKey {
        &self.key
    }

    fn decoded_size(&self) -> usize {
        self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_id::AssetIds;

    #[test]
    fn downcast_to_concrete_type() {
        let ids = AssetIds::new();
        let key = ids.key("data/raw.bin").unwrap();
        let asset: Arc<dyn Asset> = Arc::new(Blob {
            key: key.clone(),
            bytes: vec![1, 2, 3],
        });
        assert_eq!(asset.decoded_size(), 3);
        assert!(downcast::<Texture>(Arc::clone(&asset)).is_none());
        let blob = downcast::<Blob>(asset).unwrap();
        assert_eq!(blob.key, key);
        assert_eq!(blob.bytes, vec![1, 2, 3]);
    }
}
