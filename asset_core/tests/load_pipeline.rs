use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use asset_core::config::AssetConfig;
use asset_core::jobs::{Jobs, JobsConfig};
use asset_core::source::ZipSource;
use asset_core::{Asset, AssetErrorKind, AssetManager, Blob, Texture};
use codec_png::PixelFormat;
use flate2::write::ZlibEncoder;
use flate2::Compression;

fn chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind);
    hasher.update(data);
    out.extend_from_slice(&hasher.finalize().to_be_bytes());
    out
}

/// RGBA8 image, every scanline stored with filter type 0.
fn rgba_png(width: u32, rows: &[Vec<u8>]) -> Vec<u8> {
    let mut header = Vec::new();
    header.extend_from_slice(&width.to_be_bytes());
    header.extend_from_slice(&(rows.len() as u32).to_be_bytes());
    header.extend_from_slice(&[8, 6, 0, 0, 0]);
    let mut raw = Vec::new();
    for row in rows {
        raw.push(0);
        raw.extend_from_slice(row);
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).unwrap();
    let mut out = codec_png::chunk::SIGNATURE.to_vec();
    out.extend(chunk(b"IHDR", &header));
    out.extend(chunk(b"tEXt", b"Comment\0fixture"));
    out.extend(chunk(b"IDAT", &encoder.finish().unwrap()));
    out.extend(chunk(b"IEND", &[]));
    out
}

fn write(root: &Path, path: &str, bytes: &[u8]) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, bytes).unwrap();
}

fn wait_idle(manager: &AssetManager) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while manager.is_loading() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    assert!(!manager.is_loading(), "loads still pending: {:?}", manager.stats());
}

#[test]
fn directory_content_loads_in_background() {
    let dir = tempfile::tempdir().unwrap();
    let red = vec![255, 0, 0, 255, 255, 0, 0, 255];
    let blue = vec![0, 0, 255, 255, 0, 0, 255, 128];
    write(dir.path(), "tex/red.png", &rgba_png(2, &[red.clone()]));
    write(dir.path(), "tex/stack.png", &rgba_png(2, &[red.clone(), blue.clone()]));
    write(dir.path(), "cfg/game.toml", b"gravity = 9.8\n");
    let mut corrupt = rgba_png(2, &[red.clone()]);
    let last = corrupt.len() - 13;
    corrupt[last] ^= 0xFF;
    write(dir.path(), "tex/corrupt.png", &corrupt);

    let config = AssetConfig {
        root: dir.path().to_path_buf(),
        workers: Some(2),
        worker_keep_alive_ms: 50,
        ..AssetConfig::default()
    };
    assert!(config.validate().is_ok());
    let manager = AssetManager::from_config(&config);
    manager.register_bytes(&["toml"]).unwrap();

    let paths = ["tex/red.png", "tex/stack.png", "cfg/game.toml", "tex/corrupt.png"];
    let keys: Vec<_> = paths
        .iter()
        .map(|path| manager.request_path(path, true).unwrap())
        .collect();
    let missing = manager.request_path("tex/missing.png", true).unwrap_err();
    assert_eq!(missing.kind(), AssetErrorKind::NotFound);
    wait_idle(&manager);

    let stats = manager.stats();
    assert_eq!(stats.requested, 5);
    assert_eq!(stats.loaded, 3);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.settled, 5);
    assert_eq!(manager.progress(), 1.0);

    let stack = manager.resolve_as::<Texture>(&keys[1]).unwrap();
    assert_eq!((stack.width, stack.height), (2, 2));
    assert_eq!(stack.format, PixelFormat::Rgba8);
    assert_eq!(&stack.pixels[..8], &red[..]);
    assert_eq!(&stack.pixels[8..], &blue[..]);

    let config_blob = manager.resolve_as::<Blob>(&keys[2]).unwrap();
    assert_eq!(config_blob.bytes, b"gravity = 9.8\n");

    let err = manager.resolve(&keys[3]).err().unwrap();
    assert_eq!(err.kind(), AssetErrorKind::Initialization);
    assert_eq!(err.path(), "tex/corrupt.png");

    let png = manager.asset_type("png").unwrap();
    assert_eq!(manager.cache_size_of(&png), 2);
    assert_eq!(manager.cache_size(), 3);
}

#[test]
fn fallback_texture_covers_broken_content() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "tex/broken.png", b"\x89PNG but not really");
    let config = AssetConfig {
        root: dir.path().to_path_buf(),
        inline_jobs: true,
        flip_vertically: true,
        ..AssetConfig::default()
    };
    let manager = AssetManager::from_config(&config);
    let checker: Arc<dyn Asset> = Arc::new(Texture {
        key: manager.key("builtin/checker.png").unwrap(),
        width: 1,
        height: 1,
        format: PixelFormat::Rgba8,
        pixels: Arc::new(vec![255, 0, 255, 255]),
    });
    manager.set_fallback(Arc::clone(&checker), &["png"]).unwrap();

    let broken = manager.resolve_path("tex/broken.png").unwrap();
    let absent = manager.resolve_path("tex/absent.png").unwrap();
    assert!(Arc::ptr_eq(&broken, &checker));
    assert!(Arc::ptr_eq(&absent, &checker));
    assert_eq!(manager.requested_count(), 2);
    assert_eq!(manager.loaded_count(), 2);
    assert_eq!(manager.failed_count(), 2);

    manager.restart();
    assert_eq!(manager.cache_size(), 0);
    assert_eq!(manager.requested_count(), 0);
}

#[test]
fn flipped_textures_from_zip_archive() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("content.zip");
    let top = vec![1, 2, 3, 4];
    let bottom = vec![5, 6, 7, 8];
    {
        let file = fs::File::create(&archive).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        writer.start_file("ui/icon.png", options).unwrap();
        writer
            .write_all(&rgba_png(1, &[top.clone(), bottom.clone()]))
            .unwrap();
        writer.finish().unwrap();
    }

    let manager = AssetManager::new(
        Arc::new(ZipSource::open_archive(&archive).unwrap()),
        Jobs::new(JobsConfig::inline()),
    );
    manager
        .register_loader(Arc::new(asset_core::loaders::PngLoader::flipped()), &["png"])
        .unwrap();
    let icon = manager.request_path("ui/icon.png", true).unwrap();
    let texture = manager.resolve_as::<Texture>(&icon).unwrap();
    assert_eq!(&texture.pixels[..4], &bottom[..]);
    assert_eq!(&texture.pixels[4..], &top[..]);
    assert_eq!(texture.decoded_size(), 8);
}
