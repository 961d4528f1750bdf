pub mod geotiff;
pub mod source;

pub use geotiff::{read_geotiff, write_geotiff};
pub use source::{Source, decode_raster};
