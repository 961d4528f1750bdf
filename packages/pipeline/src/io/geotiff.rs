//! Minimal GeoTIFF codec: 8-bit chunky rasters of any band count plus the georeferencing tags
//! the pipeline needs (`ModelPixelScale`, `ModelTiepoint`,
//! `ModelTransformation`, `GeoKeyDirectory`).

use ardhi_types::{Crs, GeoTransform, PipelineError, PipelineResult, Raster};
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;
use tiff::ColorType;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind, colortype};
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const USER_DEFINED: u32 = 32767;
const PLANAR_CHUNKY: u16 = 1;

fn geo_tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// True when the bytes start with a little or big endian TIFF header.
pub fn is_tiff(bytes: &[u8]) -> bool {
    bytes.starts_with(b"II*\0")
        || bytes.starts_with(b"MM\0*")
        || bytes.starts_with(b"II+\0")
        || bytes.starts_with(b"MM\0+")
}

pub fn read_geotiff(path: impl AsRef<Path>) -> PipelineResult<Raster> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| PipelineError::raster_read(path.display(), e))?;
    decode_geotiff(&path.display().to_string(), BufReader::new(file))
}

pub fn decode_geotiff_bytes(name: &str, bytes: &[u8]) -> PipelineResult<Raster> {
    decode_geotiff(name, Cursor::new(bytes))
}

pub fn decode_geotiff<R: Read + Seek>(name: &str, reader: R) -> PipelineResult<Raster> {
    let err = |e: tiff::TiffError| PipelineError::raster_read(name, e);

    let mut decoder = Decoder::new(reader)
        .map_err(err)?
        .with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions().map_err(err)?;
    // Chunky 8-bit samples only; extra samples beyond RGB are dropped by the decoder
    let color = decoder.colortype().map_err(err)?;
    let planar = decoder
        .find_tag_unsigned::<u16>(Tag::PlanarConfiguration)
        .map_err(err)?
        .unwrap_or(PLANAR_CHUNKY);
    let bands = usize::from(color.num_samples());
    if color.bit_depth() != 8 || matches!(color, ColorType::Palette(_)) {
        return Err(PipelineError::raster_read(
            name,
            format!("unsupported sample layout {color:?}, expected 8-bit samples"),
        ));
    }
    if planar != PLANAR_CHUNKY && bands > 1 {
        return Err(PipelineError::raster_read(
            name,
            "planar sample layout is not supported",
        ));
    }
    if bands == 0 {
        return Err(PipelineError::raster_read(name, "raster has no bands"));
    }

    let transform = read_transform(&mut decoder).map_err(err)?;
    let crs = read_crs(&mut decoder).map_err(err)?;

    let samples = match decoder.read_image().map_err(err)? {
        DecodingResult::U8(samples) => samples,
        _ => {
            return Err(PipelineError::raster_read(
                name,
                "sample format is not unsigned 8-bit",
            ));
        }
    };

    Raster::from_interleaved(
        width,
        height,
        bands,
        samples,
        crs,
        transform.unwrap_or_default(),
    )
    .map_err(|e| PipelineError::raster_read(name, e))
}

fn read_transform<R: Read + Seek>(
    decoder: &mut Decoder<R>,
) -> tiff::TiffResult<Option<GeoTransform>> {
    if let Some(value) = decoder.find_tag(geo_tag(MODEL_TRANSFORMATION))? {
        let m = value.into_f64_vec()?;
        if m.len() >= 8 {
            return Ok(Some(GeoTransform::new(m[0], m[1], m[3], m[4], m[5], m[7])));
        }
    }

    let scale = decoder.find_tag(geo_tag(MODEL_PIXEL_SCALE))?;
    let tiepoint = decoder.find_tag(geo_tag(MODEL_TIEPOINT))?;
    match (scale, tiepoint) {
        (Some(scale), Some(tiepoint)) => {
            let scale = scale.into_f64_vec()?;
            let tie = tiepoint.into_f64_vec()?;
            if scale.len() < 2 || tie.len() < 6 {
                return Ok(None);
            }
            let (sx, sy) = (scale[0], scale[1]);
            let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
            Ok(Some(GeoTransform::new(sx, 0.0, x - i * sx, 0.0, -sy, y + j * sy)))
        }
        _ => Ok(None),
    }
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> tiff::TiffResult<Crs> {
    let Some(value) = decoder.find_tag(geo_tag(GEO_KEY_DIRECTORY))? else {
        return Ok(Crs::Undefined);
    };
    let keys = value.into_u32_vec()?;
    if keys.len() < 4 {
        return Ok(Crs::Undefined);
    }

    let mut projected = None;
    let mut geographic = None;
    for entry in keys[4..].chunks_exact(4) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        // Only inline SHORT values carry EPSG codes
        if location != 0 || value == USER_DEFINED {
            continue;
        }
        match key as u16 {
            PROJECTED_CS_TYPE => projected = u16::try_from(value).ok(),
            GEOGRAPHIC_TYPE => geographic = u16::try_from(value).ok(),
            _ => {}
        }
    }

    Ok(projected
        .or(geographic)
        .map(Crs::Epsg)
        .unwrap_or(Crs::Undefined))
}

pub fn write_geotiff(path: impl AsRef<Path>, raster: &Raster) -> PipelineResult<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| PipelineError::raster_write(path.display(), e))?;
    let mut writer = BufWriter::new(file);
    encode_geotiff(&path.display().to_string(), &mut writer, raster)?;
    writer
        .flush()
        .map_err(|e| PipelineError::raster_write(path.display(), e))
}

pub fn encode_geotiff_bytes(name: &str, raster: &Raster) -> PipelineResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    encode_geotiff(name, &mut cursor, raster)?;
    Ok(cursor.into_inner())
}

/// Writes a single-image GeoTIFF. Supports 1 (gray), 3 (RGB) and 4 (RGBA)
/// bands.
pub fn encode_geotiff<W: Write + Seek>(
    name: &str,
    writer: &mut W,
    raster: &Raster,
) -> PipelineResult<()> {
    let err = |e: tiff::TiffError| PipelineError::raster_write(name, e);
    let mut encoder = TiffEncoder::new(writer).map_err(err)?;
    match raster.band_count() {
        1 => encode_image::<_, colortype::Gray8>(&mut encoder, raster).map_err(err),
        3 => encode_image::<_, colortype::RGB8>(&mut encoder, raster).map_err(err),
        4 => encode_image::<_, colortype::RGBA8>(&mut encoder, raster).map_err(err),
        n => Err(PipelineError::raster_write(
            name,
            format!("cannot encode {n} bands, expected 1, 3 or 4"),
        )),
    }
}

fn encode_image<W, C>(encoder: &mut TiffEncoder<W>, raster: &Raster) -> tiff::TiffResult<()>
where
    W: Write + Seek,
    C: colortype::ColorType<Inner = u8>,
{
    let mut image = encoder.new_image::<C>(raster.width(), raster.height())?;
    write_geo_tags(image.encoder(), raster)?;
    image.write_data(&raster.to_interleaved())
}

fn write_geo_tags<W: Write + Seek, K: TiffKind>(
    directory: &mut DirectoryEncoder<'_, W, K>,
    raster: &Raster,
) -> tiff::TiffResult<()> {
    let t = raster.transform;
    if !raster.crs.is_defined() && t == GeoTransform::identity() {
        return Ok(());
    }

    if t.is_north_up() && t.a > 0.0 && t.e < 0.0 {
        let scale = [t.a, -t.e, 0.0];
        let tiepoint = [0.0, 0.0, 0.0, t.c, t.f, 0.0];
        directory.write_tag(geo_tag(MODEL_PIXEL_SCALE), &scale[..])?;
        directory.write_tag(geo_tag(MODEL_TIEPOINT), &tiepoint[..])?;
    } else {
        let matrix = [
            t.a, t.b, 0.0, t.c, //
            t.d, t.e, 0.0, t.f, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        directory.write_tag(geo_tag(MODEL_TRANSFORMATION), &matrix[..])?;
    }

    let keys = geo_key_directory(raster.crs);
    directory.write_tag(geo_tag(GEO_KEY_DIRECTORY), &keys[..])
}

fn geo_key_directory(crs: Crs) -> Vec<u16> {
    let mut entries: Vec<[u16; 4]> = Vec::new();
    match crs {
        Crs::Epsg(code) if crs.is_geographic() => {
            entries.push([GT_MODEL_TYPE, 0, 1, MODEL_TYPE_GEOGRAPHIC]);
            entries.push([GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
            entries.push([GEOGRAPHIC_TYPE, 0, 1, code]);
        }
        Crs::Epsg(code) => {
            entries.push([GT_MODEL_TYPE, 0, 1, MODEL_TYPE_PROJECTED]);
            entries.push([GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
            entries.push([PROJECTED_CS_TYPE, 0, 1, code]);
        }
        Crs::Undefined => {
            entries.push([GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
        }
    }

    let mut keys = vec![1, 1, 0, entries.len() as u16];
    keys.extend(entries.into_iter().flatten());
    keys
}
