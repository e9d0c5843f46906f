//! Exporting the arranged document as one image file per page.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use quire_doc_model::PageUid;
use quire_pdf_engine::RgbaImage;
use tracing::debug;

use crate::error::SessionError;
use crate::session::Session;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Image container for page exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
    Jpeg { quality: u8 },
}

impl ExportFormat {
    pub fn jpeg() -> Self {
        Self::Jpeg { quality: DEFAULT_JPEG_QUALITY }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg { .. } => "jpg",
        }
    }
}

impl Session {
    /// Renders the referenced pages in display order and writes one image
    /// per page into `directory`, creating it if needed. Returns the
    /// written paths. Files are numbered sequentially from 1; unknown uids
    /// are rejected before anything is written.
    pub fn export_images(
        &self,
        uids: &[PageUid],
        directory: impl AsRef<Path>,
        format: ExportFormat,
        dpi: u32,
    ) -> Result<Vec<PathBuf>, SessionError> {
        let pages = self.model().in_display_order(uids)?;
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)?;

        let mut written = Vec::with_capacity(pages.len());
        for (position, page) in pages.iter().enumerate() {
            let image = self.render_now(*page, dpi)?;
            let path = directory
                .join(format!("page-{:03}.{}", position + 1, format.extension()));
            write_image(&image, &path, format)?;
            written.push(path);
        }

        debug!(pages = written.len(), ?directory, "exported page images");
        Ok(written)
    }
}

fn write_image(image: &RgbaImage, path: &Path, format: ExportFormat) -> Result<(), SessionError> {
    match format {
        ExportFormat::Png => image.save(path)?,
        ExportFormat::Jpeg { quality } => {
            // JPEG has no alpha channel; flatten before encoding.
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let file = File::create(path)?;
            let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), quality);
            encoder.encode_image(&rgb)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::open_session;

    #[test]
    fn test_export_writes_one_png_per_page() {
        let dir = tempfile::tempdir().unwrap();
        let session = open_session(&["Alpha", "Beta"]);

        let written = session
            .export_images(&session.page_order(), dir.path(), ExportFormat::Png, 36)
            .unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(written[0].file_name().unwrap(), "page-001.png");
        assert_eq!(written[1].file_name().unwrap(), "page-002.png");

        let image = image::open(&written[0]).unwrap();
        assert_eq!((image.width(), image.height()), (306, 396));
    }

    #[test]
    fn test_export_subset_numbers_sequentially() {
        let dir = tempfile::tempdir().unwrap();
        let session = open_session(&["Alpha", "Beta", "Gamma"]);
        let order = session.page_order();

        // Argument order does not matter; display order decides.
        let written = session
            .export_images(&[order[2], order[0]], dir.path(), ExportFormat::Png, 36)
            .unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(written[0].file_name().unwrap(), "page-001.png");
        assert_eq!(written[1].file_name().unwrap(), "page-002.png");
    }

    #[test]
    fn test_export_jpeg_respects_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_session(&["Alpha"]);
        let uid = session.page_order()[0];
        session.rotate(&[uid], 90).unwrap();

        let written = session
            .export_images(&[uid], dir.path(), ExportFormat::jpeg(), 36)
            .unwrap();

        assert_eq!(written[0].file_name().unwrap(), "page-001.jpg");
        let image = image::open(&written[0]).unwrap();
        assert_eq!((image.width(), image.height()), (396, 306));
    }

    #[test]
    fn test_export_rejects_unknown_uids_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open_session(&["Alpha", "Beta"]);
        let removed = session.page_order()[0];
        session.remove(&[removed]).unwrap();

        let target = dir.path().join("out");
        let err = session
            .export_images(&[removed], &target, ExportFormat::Png, 36)
            .unwrap_err();

        assert!(matches!(err, SessionError::InvalidSelection(_)));
        assert!(!target.exists());
    }
}
