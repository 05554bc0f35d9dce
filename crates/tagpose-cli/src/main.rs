use std::{path::PathBuf, process::ExitCode};

use argh::FromArgs;
use tagpose::{Detection, Detector, DetectorConfig, FieldLayout, Pose, PoseShape};
use tagpose_apriltag::render::render_tag;
use tagpose_image::io::{read_image_png_rgb8, write_image_png_mono8, write_image_png_rgb8};

/// Detects one AprilTag in a PNG image and prints its pose
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the PNG image
    #[argh(positional)]
    image: Option<PathBuf>,

    /// horizontal focal length in pixels
    #[argh(option)]
    px: Option<f32>,

    /// vertical focal length in pixels
    #[argh(option)]
    py: Option<f32>,

    /// id of the tag to look for
    #[argh(option)]
    tag_id: Option<u32>,

    /// tag family name (tag16h5, tag25h9) or path to a family JSON file
    #[argh(option, short = 'f')]
    family: Option<String>,

    /// side of the tag border in meters
    #[argh(option, short = 's')]
    tag_size: Option<f64>,

    /// pose to report: position, translation or full
    #[argh(option, from_str_fn(to_pose_shape))]
    shape: Option<PoseShape>,

    /// where to write the annotated image
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,

    /// field layout JSON used to locate the camera
    #[argh(option)]
    field: Option<PathBuf>,

    /// detector configuration JSON
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// render the tag with this id instead of, or before, detecting
    #[argh(option)]
    render: Option<usize>,

    /// where to write the rendered tag
    #[argh(option, default = "PathBuf::from(\"tag.png\")")]
    render_out: PathBuf,

    /// pixels per cell of the rendered tag
    #[argh(option, default = "20")]
    render_scale: usize,
}

fn to_pose_shape(value: &str) -> Result<PoseShape, String> {
    value.parse().map_err(|e| format!("{e}"))
}

fn print_detection(detection: &Detection) {
    println!(
        "tag {} found (decision margin {:.1}, hamming {})",
        detection.tag_id, detection.decision_margin, detection.hamming
    );

    match detection.pose {
        Pose::PositionOnly { x, y, z } => println!("position: x={x:.4} y={y:.4} z={z:.4}"),
        Pose::Translation(t) => println!("translation: [{:.4}, {:.4}, {:.4}]", t.x, t.y, t.z),
        Pose::TranslationAndRotation {
            translation: t,
            rotation,
        } => {
            println!("translation: [{:.4}, {:.4}, {:.4}]", t.x, t.y, t.z);
            println!("rotation:");
            for row in rotation.0 {
                println!("  [{:.4}, {:.4}, {:.4}]", row[0], row[1], row[2]);
            }
        }
    }
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut config = match &args.config {
        Some(path) => DetectorConfig::from_file(path)?,
        None => DetectorConfig::default(),
    };
    if let Some(family) = args.family {
        config.family = family;
    }
    if let Some(tag_size) = args.tag_size {
        config.tag_size = tag_size;
    }
    if let Some(shape) = args.shape {
        config.pose_shape = shape;
    }

    if let Some(id) = args.render {
        let family = config.family_kind()?.to_family();
        let tag = render_tag(&family, id, args.render_scale)?;
        write_image_png_mono8(&args.render_out, &tag)?;
        println!("rendered {} id {id} to {}", family.name, args.render_out.display());

        if args.image.is_none() {
            return Ok(ExitCode::SUCCESS);
        }
    }

    let image_path = args.image.ok_or("missing image path")?;
    let px = args.px.ok_or("--px is required")?;
    let py = args.py.ok_or("--py is required")?;
    let tag_id = args.tag_id.ok_or("--tag-id is required")?;

    let image = read_image_png_rgb8(&image_path)?;
    log::info!("loaded {} ({}x{})", image_path.display(), image.width(), image.height());

    let detector = Detector::new(config)?;
    let Some(detection) = detector.detect_blocking(Some(image), px, py, tag_id).into_detection() else {
        println!("tag {tag_id} not found");
        return Ok(ExitCode::FAILURE);
    };

    print_detection(&detection);

    if let (Some(path), Some(image)) = (&args.output, &detection.image) {
        write_image_png_rgb8(path, image)?;
        println!("wrote {}", path.display());
    }

    if let Some(path) = &args.field {
        let layout = FieldLayout::from_file(path)?;
        match layout.camera_pose(tag_id, &detection.pose) {
            Some(pose) => println!("camera on field: {}", serde_json::to_string_pretty(&pose)?),
            None => log::warn!(
                "cannot locate the camera: tag {tag_id} is not in the layout or the pose has no rotation"
            ),
        }
    }

    Ok(ExitCode::SUCCESS)
}
