use crate::{error::ImageError, image::Image};

/// Convert an RGB8 image to grayscale using the fixed point BT.601 weights.
///
/// # Arguments
///
/// * `src` - The input RGB image.
/// * `dst` - The output grayscale image.
///
/// Precondition: the input and output images must have the same size.
pub fn gray_from_rgb_u8(src: &Image<u8, 3>, dst: &mut Image<u8, 1>) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    src.as_slice()
        .chunks_exact(3)
        .zip(dst.as_slice_mut().iter_mut())
        .for_each(|(src_pixel, dst_pixel)| {
            let r = src_pixel[0] as u16;
            let g = src_pixel[1] as u16;
            let b = src_pixel[2] as u16;
            *dst_pixel = ((r * 77 + g * 150 + b * 29) >> 8) as u8;
        });

    Ok(())
}

/// Convert a grayscale image to RGB by replicating the gray value across all three channels.
///
/// # Arguments
///
/// * `src` - The input grayscale image.
/// * `dst` - The output RGB image.
///
/// Precondition: the input and output images must have the same size.
pub fn rgb_from_gray_u8(src: &Image<u8, 1>, dst: &mut Image<u8, 3>) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    src.as_slice()
        .iter()
        .zip(dst.as_slice_mut().chunks_exact_mut(3))
        .for_each(|(&gray, dst_pixel)| {
            dst_pixel.fill(gray);
        });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageSize;

    #[test]
    fn gray_from_rgb() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 2,
            height: 1,
        };
        let rgb = Image::<u8, 3>::new(size, vec![255, 255, 255, 255, 0, 0])?;
        let mut gray = Image::<u8, 1>::from_size_val(size, 0)?;

        gray_from_rgb_u8(&rgb, &mut gray)?;

        assert_eq!(gray.as_slice(), &[255, 76]);

        Ok(())
    }

    #[test]
    fn gray_roundtrip_is_identity_on_gray() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 3,
            height: 1,
        };
        let gray = Image::<u8, 1>::new(size, vec![0, 128, 255])?;
        let mut rgb = Image::<u8, 3>::from_size_val(size, 0)?;
        rgb_from_gray_u8(&gray, &mut rgb)?;
        assert_eq!(rgb.as_slice(), &[0, 0, 0, 128, 128, 128, 255, 255, 255]);

        let mut back = Image::<u8, 1>::from_size_val(size, 0)?;
        gray_from_rgb_u8(&rgb, &mut back)?;
        assert_eq!(back.as_slice(), gray.as_slice());

        Ok(())
    }

    #[test]
    fn size_mismatch() -> Result<(), ImageError> {
        let rgb = Image::<u8, 3>::from_size_val([2, 2].into(), 0)?;
        let mut gray = Image::<u8, 1>::from_size_val([3, 2].into(), 0)?;
        assert_eq!(
            gray_from_rgb_u8(&rgb, &mut gray),
            Err(ImageError::InvalidImageSize(2, 2, 3, 2))
        );
        Ok(())
    }
}
