use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use image::DynamicImage;
use tracing_subscriber::EnvFilter;

use page_align::cli::{batch_output_name, output_path, Command, RoiArgs};
use page_align::{
    annotate::draw_contours, binarize_document, read_image, read_image_folder, Aligner,
    AlignmentOutcome, Cli, RoiDetector,
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Command::Crop { input, output, roi } => {
            let img = load(input)?;
            let cropped = detector(roi)?.crop_to_largest_contour(&img);
            save(&cropped, &output_path(output, input, "cropped"))?;
            eprintln!(
                "Dimensions: {}x{} -> {}x{}",
                img.width(),
                img.height(),
                cropped.width(),
                cropped.height()
            );
        }

        Command::Contours { input, output, roi } => {
            let img = load(input)?;
            let contours = detector(roi)?.detect_contours(&img);
            eprintln!("Detected {} contour(s)", contours.len());
            for (i, contour) in contours.iter().enumerate() {
                eprintln!(
                    "  #{}: {} points, area {:.0}",
                    i,
                    contour.len(),
                    contour.area()
                );
            }
            let overlay = DynamicImage::ImageRgba8(draw_contours(&img, &contours));
            save(&overlay, &output_path(output, input, "contours"))?;
        }

        Command::Align {
            query,
            train,
            output,
            align,
        } => {
            let query_img = load(query)?;
            let train_img = load(train)?;
            let aligner = Aligner::new(align.config()).context("Invalid alignment settings")?;
            let outcome = aligner.align(&query_img, &train_img);

            match &outcome {
                AlignmentOutcome::Aligned(alignment) => {
                    let e = &alignment.evaluation;
                    eprintln!(
                        "Aligned: rotation {:.2}°, {} matches, best distance {}",
                        e.rotation, e.match_count, e.best_distance
                    );
                    eprintln!(
                        "Match angles: mean {:.2}°, std dev {:.2}°",
                        e.angles.mean, e.angles.std_dev
                    );
                }
                AlignmentOutcome::Rejected { rejection, .. } => {
                    eprintln!("No match: {}", rejection);
                }
            }

            let img = DynamicImage::ImageRgba8(outcome.into_image());
            save(&img, &output_path(output, train, "aligned"))?;
        }

        Command::Binarize { input, output } => {
            let img = load(input)?;
            let binary = binarize_document(&img).context("Failed to binarize image")?;
            save(
                &DynamicImage::ImageLuma8(binary),
                &output_path(output, input, "binarized"),
            )?;
        }

        Command::BatchCrop {
            folder,
            output_dir,
            roi,
        } => {
            let detector = detector(roi)?;
            let images = read_image_folder(folder)
                .with_context(|| format!("Failed to read folder: {:?}", folder))?;
            fs::create_dir_all(output_dir)
                .with_context(|| format!("Failed to create output folder: {:?}", output_dir))?;

            for (path, img) in &images {
                let cropped = detector.crop_to_largest_contour(img);
                save(&cropped, &output_dir.join(batch_output_name(path)))?;
            }
            eprintln!("Cropped {} image(s) into {:?}", images.len(), output_dir);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn detector(roi: &RoiArgs) -> Result<RoiDetector> {
    RoiDetector::new(roi.config()).context("Invalid detection settings")
}

fn load(path: &Path) -> Result<DynamicImage> {
    read_image(path).with_context(|| format!("Failed to open input file: {:?}", path))
}

fn save(img: &DynamicImage, path: &Path) -> Result<()> {
    img.save(path)
        .with_context(|| format!("Failed to save output: {:?}", path))?;
    eprintln!("Saved: {:?}", path);
    Ok(())
}
