//! On-disk archive of rendered pages for preview and label crops.

use std::io::Cursor;
use std::path::PathBuf;

use image::{GenericImageView, ImageFormat};

use crate::error::{Error, Result};
use crate::page_source::PageImage;
use crate::record::Region;

/// Padding around a cropped label, as a percentage of the page size.
const CROP_PADDING_PERCENT: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct PageArchive {
    dir: PathBuf,
}

impl PageArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn page_path(&self, page_number: u32) -> PathBuf {
        self.dir.join(format!("page_{}.png", page_number))
    }

    pub async fn save(&self, page: &PageImage) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.page_path(page.page_number);
        tokio::fs::write(&path, &page.png).await?;
        Ok(path)
    }

    /// PNG bytes of an archived page, `None` if it was never saved.
    pub async fn load(&self, page_number: u32) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.page_path(page_number)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Crop `region` (plus padding) out of an archived page as PNG.
    pub async fn crop(&self, page_number: u32, region: Region) -> Result<Option<Vec<u8>>> {
        let Some(bytes) = self.load(page_number).await? else {
            return Ok(None);
        };

        tokio::task::spawn_blocking(move || crop_png(&bytes, region).map(Some))
            .await
            .map_err(|e| Error::render(format!("crop task failed: {}", e)))?
    }
}

pub(crate) fn crop_png(png: &[u8], region: Region) -> Result<Vec<u8>> {
    let page = image::load_from_memory(png)?;
    let (width, height) = page.dimensions();

    let pad_x = (width as f64 * CROP_PADDING_PERCENT / 100.0) as u32;
    let pad_y = (height as f64 * CROP_PADDING_PERCENT / 100.0) as u32;
    let x1 = region.x.saturating_sub(pad_x).min(width);
    let y1 = region.y.saturating_sub(pad_y).min(height);
    let x2 = (region.x + region.width + pad_x).min(width);
    let y2 = (region.y + region.height + pad_y).min(height);

    if x2 <= x1 || y2 <= y1 {
        return Err(Error::render("label region lies outside the page"));
    }

    let cropped = page.crop_imm(x1, y1, x2 - x1, y2 - y1);
    let mut out = Vec::new();
    cropped.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}
