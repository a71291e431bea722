//! Page sources: lazy, forward-only sequences of page images.
//!
//! A [`Rasterizer`] opens a submitted document into a [`PageSource`]. Opening
//! may block (it counts pages up front); pages are then rendered one at a time
//! as the controller pulls them.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// An uploaded document.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub filename: String,
    pub data: Vec<u8>,
}

/// One rendered page, PNG encoded.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-based page number.
    pub page_number: u32,
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

#[async_trait]
pub trait PageSource: Send {
    /// Best-effort page count, known as soon as the source is open.
    fn total_pages(&self) -> Option<u32>;

    /// Render the next page, or `None` once the document is exhausted.
    ///
    /// An `Err` affects only that page; the source moves past it.
    async fn next_page(&mut self) -> Option<Result<PageImage>>;
}

#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Open `input`. `job_dir` is scratch space owned by the job.
    ///
    /// Fails with [`Error::InputUnreadable`] when the input is malformed.
    async fn open(&self, input: &DocumentInput, job_dir: &Path) -> Result<Box<dyn PageSource>>;
}

/// Rasterizes PDFs with poppler's `pdftoppm` and accepts plain raster images
/// as single-page documents.
#[derive(Debug, Clone)]
pub struct DocumentRasterizer {
    dpi: u32,
    max_image_size: u32,
}

impl DocumentRasterizer {
    pub fn new(dpi: u32, max_image_size: u32) -> Self {
        Self { dpi, max_image_size }
    }
}

#[async_trait]
impl Rasterizer for DocumentRasterizer {
    async fn open(&self, input: &DocumentInput, job_dir: &Path) -> Result<Box<dyn PageSource>> {
        if input.data.starts_with(b"%PDF-") {
            let source = PdfPages::open(input, job_dir, self.dpi, self.max_image_size).await?;
            return Ok(Box::new(source));
        }

        if image::guess_format(&input.data).is_ok() {
            let source = ImagePage::open(input, self.max_image_size).await?;
            return Ok(Box::new(source));
        }

        Err(Error::input_unreadable(format!(
            "{}: not a PDF or a supported image",
            input.filename
        )))
    }
}

/// A PDF rendered page by page.
struct PdfPages {
    pdf_path: PathBuf,
    render_dir: PathBuf,
    total: u32,
    next: u32,
    dpi: u32,
    max_image_size: u32,
}

impl PdfPages {
    async fn open(input: &DocumentInput, job_dir: &Path, dpi: u32, max_image_size: u32) -> Result<Self> {
        let data = input.data.clone();
        let filename = input.filename.clone();
        let total = tokio::task::spawn_blocking(move || count_pdf_pages(&data))
            .await
            .map_err(|e| Error::input_unreadable(format!("{}: page count task failed: {}", filename, e)))?
            .map_err(|e| Error::input_unreadable(format!("{}: {}", filename, e)))?;

        if total == 0 {
            return Err(Error::input_unreadable(format!("{}: PDF has no pages", input.filename)));
        }

        let render_dir = job_dir.join("render");
        tokio::fs::create_dir_all(&render_dir).await?;
        let pdf_path = job_dir.join("input.pdf");
        tokio::fs::write(&pdf_path, &input.data).await?;

        info!("Opened PDF {} ({} pages)", input.filename, total);

        Ok(Self {
            pdf_path,
            render_dir,
            total,
            next: 1,
            dpi,
            max_image_size,
        })
    }

    async fn render(&self, page: u32) -> Result<PageImage> {
        let prefix = self.render_dir.join(format!("page_{}", page));
        let output = Command::new("pdftoppm")
            .arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg("-singlefile")
            .arg(&self.pdf_path)
            .arg(&prefix)
            .output()
            .await
            .map_err(|e| Error::render(format!("failed to run pdftoppm: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::render(format!(
                "pdftoppm failed on page {} ({}): {}",
                page,
                output.status,
                stderr.trim()
            )));
        }

        let png_path = prefix.with_extension("png");
        let bytes = tokio::fs::read(&png_path).await?;
        remove_rendered(&png_path).await;
        debug!("Rendered page {} ({} bytes)", page, bytes.len());

        let max = self.max_image_size;
        tokio::task::spawn_blocking(move || -> Result<PageImage> {
            let img = image::load_from_memory(&bytes)?;
            encode_page(page, img, max)
        })
        .await
        .map_err(|e| Error::render(format!("page {} encode task failed: {}", page, e)))?
    }
}

#[async_trait]
impl PageSource for PdfPages {
    fn total_pages(&self) -> Option<u32> {
        Some(self.total)
    }

    async fn next_page(&mut self) -> Option<Result<PageImage>> {
        if self.next > self.total {
            return None;
        }
        let page = self.next;
        self.next += 1;
        Some(self.render(page).await)
    }
}

/// A single raster image treated as a one-page document.
struct ImagePage {
    image: Option<DynamicImage>,
    max_image_size: u32,
}

impl ImagePage {
    async fn open(input: &DocumentInput, max_image_size: u32) -> Result<Self> {
        let data = input.data.clone();
        let image = tokio::task::spawn_blocking(move || image::load_from_memory(&data))
            .await
            .map_err(|e| Error::input_unreadable(format!("{}: decode task failed: {}", input.filename, e)))?
            .map_err(|e| Error::input_unreadable(format!("{}: {}", input.filename, e)))?;

        Ok(Self {
            image: Some(image),
            max_image_size,
        })
    }
}

#[async_trait]
impl PageSource for ImagePage {
    fn total_pages(&self) -> Option<u32> {
        Some(1)
    }

    async fn next_page(&mut self) -> Option<Result<PageImage>> {
        let image = self.image.take()?;
        let max = self.max_image_size;
        let result = tokio::task::spawn_blocking(move || encode_page(1, image, max))
            .await
            .map_err(|e| Error::render(format!("page encode task failed: {}", e)))
            .and_then(|r| r);
        Some(result)
    }
}

/// Count pages with lopdf without rendering anything.
fn count_pdf_pages(data: &[u8]) -> std::result::Result<u32, lopdf::Error> {
    let doc = lopdf::Document::load_mem(data)?;
    Ok(doc.get_pages().len() as u32)
}

/// Downscale to `max_size` on the longest side and encode as PNG.
pub(crate) fn encode_page(page_number: u32, image: DynamicImage, max_size: u32) -> Result<PageImage> {
    let image = fit_within(image, max_size);
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(PageImage {
        page_number,
        width: image.width(),
        height: image.height(),
        png,
    })
}

/// Best-effort cleanup of a rendered page file. Returns whether it was removed.
async fn remove_rendered(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) => {
            debug!("Could not remove rendered file {:?}: {}", path, e);
            false
        }
    }
}

fn fit_within(image: DynamicImage, max_size: u32) -> DynamicImage {
    let longest = image.width().max(image.height());
    if max_size == 0 || longest <= max_size {
        return image;
    }
    let scale = max_size as f64 / longest as f64;
    let width = ((image.width() as f64 * scale) as u32).max(1);
    let height = ((image.height() as f64 * scale) as u32).max(1);
    debug!(
        "Resizing page from {}x{} to {}x{}",
        image.width(),
        image.height(),
        width,
        height
    );
    image.resize_exact(width, height, FilterType::Lanczos3)
}

#[cfg(test)]
pub(crate) fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255])));
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png).unwrap();
    png
}
