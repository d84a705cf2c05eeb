// nvjp2k - decode JPEG2000 codestreams through the decoder registry
//
// Each input file is one packet (pts = its position on the command line).
// After the last file an end-of-stream packet drains the decoder.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use nvjp2k_core::{
    nvjp2k_available, status_code, DecoderParameters, DecoderRegistry, Options, Packet,
    PixelFormat, VideoFrame, NVJP2K_NAME,
};
use nvjp2k_core::options::{OPT_PLANAR, OPT_RGB};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Packing {
    Auto,
    Packed,
    Planar,
}

impl Packing {
    fn option_value(self) -> &'static str {
        match self {
            Packing::Auto => "-1",
            Packing::Packed => "0",
            Packing::Planar => "1",
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "nvjp2k", version, about = "GPU JPEG2000 decoder")]
struct Args {
    /// Decoder to use
    #[arg(long, default_value = NVJP2K_NAME)]
    decoder: String,

    /// Requested output pixel format
    #[arg(long, default_value = "yuv420p")]
    format: String,

    /// Force RGB output
    #[arg(long)]
    rgb: bool,

    #[arg(long, value_enum, default_value_t = Packing::Auto)]
    planar: Packing,

    /// Write <stem>.<format>.raw files here
    #[arg(long)]
    output: Option<PathBuf>,

    /// List decoders and exit
    #[arg(long)]
    list: bool,

    /// JPEG2000 codestreams, one image each
    files: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nvjp2k=info".parse()?)
                .add_directive("nvjp2k_core=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let registry = DecoderRegistry::with_defaults();

    if args.list {
        for name in registry.names() {
            println!("{}", name);
        }
        println!("nvJPEG2000 available: {}", nvjp2k_available());
        return Ok(());
    }
    if args.files.is_empty() {
        bail!("no input files");
    }

    let format: PixelFormat = args.format.parse()?;
    let options = Options::new()
        .with(OPT_RGB, if args.rgb { "1" } else { "0" })
        .with(OPT_PLANAR, args.planar.option_value());

    info!("nvjp2k v{} using decoder {}", nvjp2k_core::VERSION, args.decoder);

    let mut decoder = registry
        .create(&args.decoder, DecoderParameters::new(format, options))
        .with_context(|| format!("creating decoder {}", args.decoder))?;
    decoder.open().context("opening decoder")?;

    let mut frames: Vec<VideoFrame> = Vec::new();
    let mut failures = 0;
    for (index, path) in args.files.iter().enumerate() {
        let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let packet = Packet::new(data, index as i64);
        let result = decoder.decode(&packet, &mut |frame: VideoFrame| frames.push(frame));
        if status_code(&result) < 0 {
            warn!("{}: decode failed", path.display());
            failures += 1;
        }
    }
    decoder.decode(&Packet::end_of_stream(), &mut |frame: VideoFrame| frames.push(frame))?;
    decoder.close();

    for frame in &frames {
        let Some(path) = args.files.get(frame.pts as usize) else {
            continue;
        };
        info!(
            "{}: {}x{} {} ({} plane(s))",
            path.display(),
            frame.width,
            frame.height,
            frame.format,
            frame.planes.len()
        );
        if let Some(dir) = &args.output {
            let out = write_raw(dir, path, frame)?;
            info!("Wrote {}", out.display());
        }
    }

    if failures > 0 {
        bail!("{} of {} file(s) failed to decode", failures, args.files.len());
    }
    Ok(())
}

fn write_raw(dir: &Path, input: &Path, frame: &VideoFrame) -> Result<PathBuf> {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("frame{}", frame.pts));
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let out = dir.join(format!("{}.{}.raw", stem, frame.format));
    std::fs::write(&out, frame.to_packed_bytes())
        .with_context(|| format!("writing {}", out.display()))?;
    Ok(out)
}
