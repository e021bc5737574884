//! # pk-storage-local
//! pikyak/crates/pk-plugins/pk-storage-local/src/lib.rs
//! Local filesystem implementation of `MediaStore`.
//! Features: random collision-resistant names, directory sharding, format sniffing.

use anyhow::{bail, Context};
use async_trait::async_trait;
use image::ImageFormat;
use log::debug;
use pk_core::traits::MediaStore;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const MAX_EXTENSION_LEN: usize = 8;

pub struct LocalMediaStore {
    /// Root directory for all uploads (e.g., "./images")
    root_path: PathBuf,
    /// Public URL prefix (e.g., "/images")
    url_prefix: String,
}

impl LocalMediaStore {
    pub fn new(root: PathBuf, url_prefix: String) -> Self {
        Self {
            root_path: root,
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Generates a sharded path: "ab/cd/abcd...ef.png"
    fn get_sharded_path(&self, media_id: &str) -> PathBuf {
        let mut path = self.root_path.clone();
        path.push(&media_id[0..2]);
        path.push(&media_id[2..4]);
        path.push(media_id);
        path
    }
}

fn valid_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.len() <= MAX_EXTENSION_LEN && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Canonical extension of the formats accepted for upload.
fn supported_extension(format: ImageFormat) -> Option<String> {
    match format {
        ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::WebP | ImageFormat::Bmp => {
            format.extensions_str().first().map(|ext| ext.to_string())
        }
        _ => None,
    }
}

/// Media ids are `<32 lowercase hex>.<ext>`; anything else never touches the disk.
fn is_valid_media_id(media_id: &str) -> bool {
    match media_id.split_once('.') {
        Some((stem, ext)) => {
            stem.len() == 32
                && stem.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
                && valid_extension(ext)
        }
        None => false,
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    fn detect_format(&self, data: &[u8]) -> Option<String> {
        supported_extension(image::guess_format(data).ok()?)
    }

    fn format_of_extension(&self, extension: &str) -> Option<String> {
        supported_extension(ImageFormat::from_extension(extension)?)
    }

    /// Saves an upload under a random UUID name, keeping the given extension.
    async fn save_upload(&self, data: Vec<u8>, extension: &str) -> anyhow::Result<String> {
        let extension = extension.to_ascii_lowercase();
        if !valid_extension(&extension) {
            bail!("refusing to store file with extension {extension:?}");
        }
        let media_id = format!("{}.{}", Uuid::new_v4().simple(), extension);
        let target_path = self.get_sharded_path(&media_id);

        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target_path)
            .await
            .with_context(|| format!("creating {}", target_path.display()))?;
        file.write_all(&data).await?;
        file.sync_all().await?;

        debug!("Stored {} bytes at {}", data.len(), target_path.display());
        Ok(media_id)
    }

    async fn load(&self, media_id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        if !is_valid_media_id(media_id) {
            return Ok(None);
        }
        match fs::read(self.get_sharded_path(media_id)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading image {media_id}")),
        }
    }

    async fn delete(&self, media_id: &str) -> anyhow::Result<()> {
        if !is_valid_media_id(media_id) {
            return Ok(());
        }
        match fs::remove_file(self.get_sharded_path(media_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing image {media_id}")),
        }
    }

    fn get_url(&self, media_id: &str) -> String {
        format!("{}/{}", self.url_prefix, media_id)
    }
}
