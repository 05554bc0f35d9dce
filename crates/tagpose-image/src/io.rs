use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use png::{BitDepth, ColorType, Decoder, Encoder, Transformations};

use crate::{error::ImageError, Image, ImageSize};

/// An error type for the io module.
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    /// Error when the file does not exist.
    #[error("File does not exist: {0}")]
    FileDoesNotExist(PathBuf),

    /// Invalid file extension.
    #[error("File does not have a valid extension: {0}")]
    InvalidFileExtension(PathBuf),

    /// Error to open the file.
    #[error("Failed to manipulate the file. {0}")]
    FileError(#[from] std::io::Error),

    /// Error to create the image.
    #[error("Failed to create image. {0}")]
    ImageCreationError(#[from] ImageError),

    /// Error to encode the PNG image.
    #[error("Failed to encode the png image. {0}")]
    PngEncodingError(String),

    /// Error to decode the PNG image.
    #[error("Failed to decode the png image. {0}")]
    PngDecodeError(String),
}

/// Read a PNG image as three channels (rgb8).
///
/// Grayscale inputs are replicated across channels and alpha is dropped.
///
/// # Arguments
///
/// * `file_path` - The path to the PNG file.
pub fn read_image_png_rgb8(file_path: impl AsRef<Path>) -> Result<Image<u8, 3>, IoError> {
    let (buf, size, channels) = read_png_impl(file_path)?;

    let rgb = match channels {
        3 => buf,
        _ => buf
            .chunks_exact(channels)
            .flat_map(|px| {
                if channels < 3 {
                    [px[0], px[0], px[0]]
                } else {
                    [px[0], px[1], px[2]]
                }
            })
            .collect(),
    };

    Ok(Image::new(size, rgb)?)
}

/// Read a PNG image as a single channel (mono8).
///
/// Color inputs are converted with the BT.601 luma weights.
///
/// # Arguments
///
/// * `file_path` - The path to the PNG file.
pub fn read_image_png_mono8(file_path: impl AsRef<Path>) -> Result<Image<u8, 1>, IoError> {
    let (buf, size, channels) = read_png_impl(file_path)?;

    let gray = match channels {
        1 => buf,
        2 => buf.chunks_exact(2).map(|px| px[0]).collect(),
        _ => buf
            .chunks_exact(channels)
            .map(|px| {
                let (r, g, b) = (px[0] as u16, px[1] as u16, px[2] as u16);
                ((r * 77 + g * 150 + b * 29) >> 8) as u8
            })
            .collect(),
    };

    Ok(Image::new(size, gray)?)
}

/// Write a RGB8 image to a PNG file.
///
/// # Arguments
///
/// * `file_path` - The path to the PNG file.
/// * `image` - The image to write.
pub fn write_image_png_rgb8(file_path: impl AsRef<Path>, image: &Image<u8, 3>) -> Result<(), IoError> {
    write_png_impl(file_path, image.as_slice(), image.size(), ColorType::Rgb)
}

/// Write a single channel image to a PNG file.
///
/// # Arguments
///
/// * `file_path` - The path to the PNG file.
/// * `image` - The image to write.
pub fn write_image_png_mono8(
    file_path: impl AsRef<Path>,
    image: &Image<u8, 1>,
) -> Result<(), IoError> {
    write_png_impl(
        file_path,
        image.as_slice(),
        image.size(),
        ColorType::Grayscale,
    )
}

fn read_png_impl(file_path: impl AsRef<Path>) -> Result<(Vec<u8>, ImageSize, usize), IoError> {
    let file_path = file_path.as_ref();
    if !file_path.exists() {
        return Err(IoError::FileDoesNotExist(file_path.to_path_buf()));
    }

    match file_path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("png") => {}
        _ => return Err(IoError::InvalidFileExtension(file_path.to_path_buf())),
    }

    let file = File::open(file_path)?;
    let mut decoder = Decoder::new(BufReader::new(file));
    decoder.set_transformations(Transformations::EXPAND | Transformations::STRIP_16);

    let mut reader = decoder
        .read_info()
        .map_err(|e| IoError::PngDecodeError(e.to_string()))?;

    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut buf)
        .map_err(|e| IoError::PngDecodeError(e.to_string()))?;
    buf.truncate(info.buffer_size());

    let channels = match info.color_type {
        ColorType::Grayscale => 1,
        ColorType::GrayscaleAlpha => 2,
        ColorType::Rgb => 3,
        ColorType::Rgba => 4,
        ColorType::Indexed => {
            return Err(IoError::PngDecodeError(
                "indexed color was not expanded".to_string(),
            ))
        }
    };

    log::debug!(
        "decoded {} ({}x{}, {} channels)",
        file_path.display(),
        info.width,
        info.height,
        channels
    );

    Ok((
        buf,
        [info.width as usize, info.height as usize].into(),
        channels,
    ))
}

fn write_png_impl(
    file_path: impl AsRef<Path>,
    image_data: &[u8],
    image_size: ImageSize,
    color_type: ColorType,
) -> Result<(), IoError> {
    let file = File::create(file_path)?;

    let mut encoder = Encoder::new(
        BufWriter::new(file),
        image_size.width as u32,
        image_size.height as u32,
    );
    encoder.set_color(color_type);
    encoder.set_depth(BitDepth::Eight);

    let mut writer = encoder
        .write_header()
        .map_err(|e| IoError::PngEncodingError(e.to_string()))?;
    writer
        .write_image_data(image_data)
        .map_err(|e| IoError::PngEncodingError(e.to_string()))?;
    writer
        .finish()
        .map_err(|e| IoError::PngEncodingError(e.to_string()))?;

    Ok(())
}
