/// Errors that can occur when working with AprilTag detection.
#[derive(Debug, thiserror::Error)]
pub enum AprilTagError {
    /// Error related to image.
    #[error(transparent)]
    ImageError(#[from] tagpose_image::ImageError),

    /// The source image dimensions do not match the dimensions the decoder was built for.
    #[error("Expected an image of {expected}, got {actual}")]
    ImageSizeMismatch {
        /// Size the decoder buffers were allocated for.
        expected: tagpose_image::ImageSize,
        /// Size of the image handed to the decoder.
        actual: tagpose_image::ImageSize,
    },

    /// The working image is smaller than a single threshold tile.
    #[error("The minimum image size is {0}x{0} after downscaling")]
    InvalidImageSize(usize),

    /// A tag family description is inconsistent.
    #[error("Invalid tag family: {0}")]
    InvalidFamily(String),

    /// A tag family could not be parsed from JSON.
    #[error("Failed to parse tag family: {0}")]
    FamilyParse(#[from] serde_json::Error),

    /// A tag family file could not be read.
    #[error("Failed to read tag family file: {0}")]
    FamilyIo(#[from] std::io::Error),

    /// Unknown tag family name.
    #[error("Unknown tag family: {0}")]
    UnknownFamily(String),

    /// The requested tag id does not exist in the family.
    #[error("Tag id {id} is out of range for family {family} ({len} codes)")]
    TagIdOutOfRange {
        /// Name of the family.
        family: String,
        /// Requested id.
        id: usize,
        /// Number of codes in the family.
        len: usize,
    },

    /// The allowed number of corrected bits is too large.
    #[error("max_hamming must be at most 3, got {0}")]
    InvalidMaxHamming(u8),

    /// The corners given for rendering a tag do not span a quadrilateral.
    #[error("Degenerate tag placement")]
    DegeneratePlacement,
}
