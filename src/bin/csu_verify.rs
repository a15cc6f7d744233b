// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, registry, EnvFilter};
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};

use csu_elements::errors::CsuError;
use csu_elements::image_utils::DetectorImage;
use csu_elements::transform::CoordinateTransform;
use mosfire_csu::bar_analyzer::{find_bar_positions_from_image, AnalysisConfig,
                                BarMeasurement};
use mosfire_csu::instrument::{verify_frame, InstrumentKind};
use mosfire_csu::mask::Mask;

/// Checks the MOSFIRE CSU bar positions seen in a detector image against the
/// positions commanded by a slit mask.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Directory for daily rotated log files. When omitted, logs go only to
    /// stdout.
    #[arg(long = "log_dir")]
    log_dir: Option<String>,

    /// Log file name prefix within `log_dir`.
    #[arg(long = "log_file", default_value = "csu_verify_log.txt")]
    log_file: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Measure the bars in an image and compare them with a mask.
    Verify {
        /// Detector image of the mask: a FITS frame, or PNG/TIFF.
        #[arg(long)]
        image: PathBuf,

        /// Mask XML file, FITS frame whose header gives the bar positions,
        /// OPEN, RANDOM, or a long slit as <width>x<length>.
        #[arg(long)]
        mask: String,

        /// Transform JSON file from fit-transform.
        #[arg(long)]
        transform: PathBuf,

        /// Instrument that took the image, used only when the image has no
        /// INSTRUME header. Defaults to MOSFIRE.
        #[arg(long)]
        instrument: Option<String>,

        /// Write the verification report here as JSON.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Measure the bars in an image without a mask to compare against.
    Measure {
        #[arg(long)]
        image: PathBuf,

        #[arg(long)]
        transform: PathBuf,

        /// Median filter window along X, pixels.
        #[arg(long, default_value_t = 7)]
        filter_size: usize,

        /// Rows trimmed from each side of every slit band.
        #[arg(long, default_value_t = 5)]
        pixel_shim: usize,

        /// Write the measured positions here as JSON.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write a PNG showing the slit bands and located edges.
        #[arg(long)]
        overlay: Option<PathBuf>,
    },

    /// Fit the pixel/physical transforms to measured correspondences.
    FitTransform {
        /// JSON array of {"pixel": [x, y], "physical": [mm, slit]}.
        #[arg(long)]
        correspondences: PathBuf,

        /// Where to save the fitted transform.
        #[arg(long)]
        output: PathBuf,
    },

    /// Print the slits of a mask.
    ShowMask {
        #[arg(long)]
        mask: String,

        /// Also write the mask as MAGMA XML.
        #[arg(long)]
        xml: Option<PathBuf>,
    },
}

#[derive(Deserialize, Debug)]
struct Correspondence {
    pixel: [f64; 2],
    physical: [f64; 2],
}

#[derive(Serialize)]
struct MeasureOutput<'a> {
    image: Option<&'a Path>,
    undetermined_bars: Vec<u32>,
    bars: Vec<&'a BarMeasurement>,
}

// Returned guards flush the non-blocking writers when dropped.
fn init_logging(log_dir: Option<&str>, log_file: &str)
                -> Result<Vec<WorkerGuard>, InitError> {
    let (non_blocking_stdout, stdout_guard) = NonBlockingBuilder::default()
        .lossy(false)
        .finish(std::io::stdout());
    let mut guards = vec![stdout_guard];

    let file_layer = match log_dir {
        Some(dir) => {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(log_file)
                .max_log_files(10)
                .build(dir)?;
            let (non_blocking_file, file_guard) = NonBlockingBuilder::default()
                .lossy(false)
                .finish(file_appender);
            guards.push(file_guard);
            Some(fmt::layer().with_ansi(false).with_writer(non_blocking_file))
        },
        None => None,
    };
    registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking_stdout))
        .with(file_layer)
        .init();
    Ok(guards)
}

fn verify(image: &Path, mask: &str, transform: &Path, instrument: Option<&str>,
          report_path: Option<&Path>) -> Result<bool, CsuError> {
    let mask = Mask::from_input(mask)?;
    let transform = CoordinateTransform::load(transform)?;
    let mut image = DetectorImage::open(image)?;
    if let (Some(header), Some(flag)) = (image.instrument(), instrument) {
        if !header.eq_ignore_ascii_case(flag) {
            warn!("Image INSTRUME is {}; ignoring --instrument {}", header, flag);
        }
    }
    if image.instrument().is_none() {
        image = image.with_instrument(instrument.unwrap_or("MOSFIRE"));
    }
    let kind = InstrumentKind::from_image(&image);

    let report = verify_frame(kind, &mask, &image, &transform)?;
    for check in report.checks.iter().filter(|c| !c.passed) {
        match check.difference {
            Some(d) => warn!("Bar {} (slit {}): commanded {:.3} mm, off by {:.2} px",
                             check.bar, check.slit, check.commanded_mm, d),
            None => warn!("Bar {} (slit {}): not located", check.bar, check.slit),
        }
    }
    if let Some(path) = report_path {
        fs::write(path, serde_json::to_string_pretty(&report)?)?;
        info!("Wrote report to {:?}", path);
    }
    Ok(report.passed)
}

fn measure(image: &Path, transform: &Path, config: &AnalysisConfig,
           output: Option<&Path>, overlay: Option<&Path>) -> Result<(), CsuError> {
    let transform = CoordinateTransform::load(transform)?;
    let image = DetectorImage::open(image)?;
    let positions = find_bar_positions_from_image(&image, &transform, config)?;
    for m in positions.measurements() {
        match (m.pixel_x, m.mm) {
            (Some(x), Some(mm)) => info!("Bar {:2}: x {:8.2} px  {:8.3} mm", m.bar, x, mm),
            _ => info!("Bar {:2}: undetermined", m.bar),
        }
    }
    if let Some(path) = output {
        let result = MeasureOutput{
            image: image.source(),
            undetermined_bars: positions.undetermined_bars(),
            bars: positions.measurements().collect(),
        };
        fs::write(path, serde_json::to_string_pretty(&result)?)?;
        info!("Wrote measurements to {:?}", path);
    }
    if let (Some(path), Some(canvas)) = (overlay, positions.overlay()) {
        canvas.save(path)?;
        info!("Wrote overlay to {:?}", path);
    }
    Ok(())
}

fn fit_transform(correspondences: &Path, output: &Path) -> Result<(), CsuError> {
    let points: Vec<Correspondence> =
        serde_json::from_str(&fs::read_to_string(correspondences)?)?;
    let pixel: Vec<[f64; 2]> = points.iter().map(|p| p.pixel).collect();
    let physical: Vec<[f64; 2]> = points.iter().map(|p| p.physical).collect();
    let transform = CoordinateTransform::fit(&pixel, &physical)?;
    info!("Fit {} correspondences, rms residual {:.4} px",
          points.len(), transform.rms_residual(&pixel, &physical));
    transform.save(output)
}

fn show_mask(mask: &str, xml: Option<&Path>) -> Result<(), CsuError> {
    let mask = Mask::from_input(mask)?;
    println!("{}", mask);
    if let Some(path) = xml {
        fs::write(path, mask.to_xml_string()?)?;
        info!("Wrote {} to {:?}", mask.name(), path);
    }
    Ok(())
}

// Ok(false) means the command ran but the mask failed verification.
fn run(command: Command) -> Result<bool, CsuError> {
    match command {
        Command::Verify{image, mask, transform, instrument, report} => {
            let _span = tracing::info_span!("verify", mask = %mask).entered();
            verify(&image, &mask, &transform, instrument.as_deref(), report.as_deref())
        },
        Command::Measure{image, transform, filter_size, pixel_shim, output, overlay} => {
            let _span = tracing::info_span!("measure").entered();
            let config = AnalysisConfig{filter_size, pixel_shim,
                                        render_overlay: overlay.is_some(),
                                        ..Default::default()};
            measure(&image, &transform, &config, output.as_deref(), overlay.as_deref())?;
            Ok(true)
        },
        Command::FitTransform{correspondences, output} => {
            let _span = tracing::info_span!("fit_transform").entered();
            fit_transform(&correspondences, &output)?;
            Ok(true)
        },
        Command::ShowMask{mask, xml} => {
            show_mask(&mask, xml.as_deref())?;
            Ok(true)
        },
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _guards = match init_logging(args.log_dir.as_deref(), &args.log_file) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("Could not set up logging in {:?}: {}", args.log_dir, e);
            return ExitCode::from(2);
        },
    };

    match run(args.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(2)
        },
    }
}
