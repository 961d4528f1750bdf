use super::geotiff;
use ardhi_types::{Crs, GeoTransform, PipelineError, PipelineResult, Raster};
use image::DynamicImage;
use std::fmt;
use std::path::PathBuf;

/// Where the uploaded image comes from.
#[derive(Clone)]
pub enum Source {
    Path(PathBuf),
    Bytes { name: String, data: Vec<u8> },
}

impl Source {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Source::Path(path.into())
    }

    pub fn bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        Source::Bytes {
            name: name.into(),
            data,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Source::Path(path) => path.display().to_string(),
            Source::Bytes { name, .. } => name.clone(),
        }
    }

    /// Reads and decodes the source off the async runtime.
    pub async fn read(self) -> PipelineResult<Raster> {
        let name = self.name();
        let bytes = match self {
            Source::Path(path) => tokio::fs::read(&path)
                .await
                .map_err(|e| PipelineError::raster_read(&name, e))?,
            Source::Bytes { data, .. } => data,
        };
        let task_name = name.clone();
        tokio::task::spawn_blocking(move || decode_raster(&task_name, &bytes))
            .await
            .map_err(|e| PipelineError::raster_read(&name, e))?
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Source::Bytes { name, data } => f
                .debug_struct("Bytes")
                .field("name", name)
                .field("len", &data.len())
                .finish(),
        }
    }
}

/// Decodes GeoTIFF bytes with their georeferencing, or any other format the
/// `image` crate understands as an ungeoreferenced raster.
pub fn decode_raster(name: &str, bytes: &[u8]) -> PipelineResult<Raster> {
    if geotiff::is_tiff(bytes) {
        return geotiff::decode_geotiff_bytes(name, bytes);
    }

    let image =
        image::load_from_memory(bytes).map_err(|e| PipelineError::raster_read(name, e))?;
    tracing::warn!(
        "{} carries no georeferencing, using pixel coordinates",
        name
    );
    from_dynamic_image(name, image)
}

fn from_dynamic_image(name: &str, image: DynamicImage) -> PipelineResult<Raster> {
    let (width, height) = (image.width(), image.height());
    let color = image.color();
    let (bands, samples) = if color.has_color() {
        if color.has_alpha() {
            (4, image.into_rgba8().into_raw())
        } else {
            (3, image.into_rgb8().into_raw())
        }
    } else if color.has_alpha() {
        (2, image.into_luma_alpha8().into_raw())
    } else {
        (1, image.into_luma8().into_raw())
    };

    Raster::from_interleaved(
        width,
        height,
        bands,
        samples,
        Crs::Undefined,
        GeoTransform::identity(),
    )
    .map_err(|e| PipelineError::raster_read(name, e))
}
