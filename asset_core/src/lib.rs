#![forbid(unsafe_code)]

pub mod asset;
pub mod asset_id;
pub mod asset_manager;
pub mod cache;
pub mod config;
pub mod error;
pub mod intern;
pub mod jobs;
pub mod loader;
pub mod loaders;
pub mod logging;
pub mod observability;
pub mod source;

pub use asset::{Asset, Blob, Texture};
pub use asset_id::{AssetIds, AssetKey, AssetType};
pub use asset_manager::{AssetManager, LoadStats};
pub use error::{AssetError, AssetErrorKind};
pub use loader::{Loader, LoaderRegistry, Task};
