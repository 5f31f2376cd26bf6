use std::{io::BufWriter, path::PathBuf, time::Instant};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use paddle_frog::{output::write_detections, DetectionOptions, Language, PaddleFrogBuilder};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

const MISSING_PATH: &str = "Path to image or directory not specified.";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Lang {
    En,
    Ch,
}

impl From<Lang> for Language {
    fn from(lang: Lang) -> Self {
        match lang {
            Lang::En => Language::English,
            Lang::Ch => Language::Chinese,
        }
    }
}

/// Detects text lines and prints their corner coordinates.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Image file or directory of images.
    path: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "en")]
    lang: Lang,

    /// Detection model, defaults to the model for --lang under models/.
    #[arg(long)]
    det_model: Option<PathBuf>,

    /// Angle classification model.
    #[arg(long)]
    cls_model: Option<PathBuf>,

    /// Skip angle classification.
    #[arg(long)]
    no_angle_cls: bool,

    #[arg(long, default_value_t = 960)]
    max_side_len: u32,

    #[arg(long, default_value_t = 4)]
    threads: usize,

    #[arg(long, default_value_t = 0.6)]
    box_thresh: f32,

    #[arg(long, default_value_t = 1.5)]
    unclip_ratio: f32,

    #[arg(long)]
    use_dilation: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(path) = cli.path else {
        println!("{MISSING_PATH}");
        std::process::exit(-1);
    };

    let mut builder = PaddleFrogBuilder::new()
        .lang(cli.lang.into())
        .use_angle_cls(!cli.no_angle_cls)
        .max_side_len(cli.max_side_len)
        .threads(cli.threads);
    if let Some(det_model) = cli.det_model {
        builder = builder.det_model(det_model);
    }
    if let Some(cls_model) = cli.cls_model {
        builder = builder.cls_model(cls_model);
    }
    let ocr = builder.build().context("Failed to build detection engine")?;

    let options = DetectionOptions {
        box_thresh: cli.box_thresh,
        unclip_ratio: cli.unclip_ratio,
        use_dilation: cli.use_dilation,
        ..DetectionOptions::default()
    };
    let start = Instant::now();
    let detections = ocr
        .detect_path(&path, options)
        .with_context(|| format!("Text detection failed for {}", path.display()))?;
    log::debug!("Detection took {:?}", start.elapsed());

    let mut stdout = BufWriter::new(std::io::stdout().lock());
    write_detections(&mut stdout, &detections).context("Failed to write detections")?;
    Ok(())
}
