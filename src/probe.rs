use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::tool::{ToolRunner, FFMPEG, FFPROBE};

/// Stream bitrates below this are treated as bogus and discarded.
const MIN_PLAUSIBLE_BITRATE: u64 = 100_000;

/// Map ffprobe codec names to the encoder that produces the same family.
const CODEC_MAP: &[(&str, &str)] = &[
    ("h264", "libx264"),
    ("hevc", "libx265"),
    ("mpeg4", "mpeg4"),
    ("mpeg2video", "mpeg2video"),
    ("vp9", "libvpx-vp9"),
    ("av1", "libaom-av1"),
    ("theora", "libtheora"),
    ("prores", "prores_ks"),
    ("h263", "h263"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u64,
    pub height: u64,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Error)]
#[error("expected a resolution like 1920x1080, got '{0}'")]
pub struct ResolutionParseError(String);

impl FromStr for Resolution {
    type Err = ResolutionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| ResolutionParseError(s.to_string()))?;
        let width = w.parse().map_err(|_| ResolutionParseError(s.to_string()))?;
        let height = h.parse().map_err(|_| ResolutionParseError(s.to_string()))?;
        Ok(Resolution { width, height })
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run ffprobe: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("ffprobe failed: {0}")]
    Command(String),

    #[error("unreadable ffprobe output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no video stream found")]
    NoVideoStream,

    #[error("video stream has no dimensions")]
    MissingDimensions,

    #[error("source resolution is {actual}, expected exactly {required}")]
    ResolutionMismatch {
        actual: Resolution,
        required: Resolution,
    },
}

/// Properties of the first video stream, as reported by ffprobe.
#[derive(Debug, Clone)]
pub struct VideoProbe {
    pub codec_name: String,
    pub resolution: Resolution,
    pub pix_fmt: Option<String>,
    /// Stream bitrate with container fallback; None when unavailable ("N/A")
    /// or implausibly low.
    pub bit_rate: Option<u64>,
}

impl VideoProbe {
    /// Enforce an exact-resolution precondition, when one was configured.
    pub fn require_resolution(&self, required: Option<Resolution>) -> Result<(), ProbeError> {
        match required {
            Some(required) if self.resolution != required => {
                Err(ProbeError::ResolutionMismatch {
                    actual: self.resolution,
                    required,
                })
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FFProbeJsonOutput {
    #[serde(default)]
    streams: Vec<FFProbeJsonStream>,
    format: Option<FFProbeJsonFormat>,
}

#[derive(Debug, Deserialize)]
struct FFProbeJsonStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u64>,
    height: Option<u64>,
    pix_fmt: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FFProbeJsonFormat {
    bit_rate: Option<String>,
}

/// Query the first video stream of a file without decoding it.
pub fn probe_video(runner: &dyn ToolRunner, path: &Path) -> Result<VideoProbe, ProbeError> {
    let mut args: Vec<OsString> = [
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_streams",
        "-show_format",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(path.as_os_str().to_os_string());

    let output = runner.run(FFPROBE, &args)?;
    if !output.success {
        let reason = output
            .stderr
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("ffprobe did not exit successfully")
            .to_string();
        return Err(ProbeError::Command(reason));
    }

    parse_probe_output(&output.stdout)
}

fn parse_probe_output(json: &str) -> Result<VideoProbe, ProbeError> {
    let deserialized: FFProbeJsonOutput = serde_json::from_str(json)?;

    let stream = deserialized
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or(ProbeError::NoVideoStream)?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(ProbeError::MissingDimensions),
    };

    // Prefer the stream-level bitrate; fall back to the container's.
    let bit_rate = parse_bit_rate(stream.bit_rate.as_deref()).or_else(|| {
        deserialized
            .format
            .as_ref()
            .and_then(|f| parse_bit_rate(f.bit_rate.as_deref()))
    });

    Ok(VideoProbe {
        codec_name: stream.codec_name.clone().unwrap_or_default(),
        resolution: Resolution { width, height },
        pix_fmt: stream.pix_fmt.clone(),
        bit_rate,
    })
}

fn parse_bit_rate(raw: Option<&str>) -> Option<u64> {
    let rate: u64 = raw?.parse().ok()?;
    if rate < MIN_PLAUSIBLE_BITRATE {
        None
    } else {
        Some(rate)
    }
}

/// Encoder that keeps the output in the source's codec family.
pub fn encoder_for(codec_name: &str) -> &str {
    CODEC_MAP
        .iter()
        .find(|(name, _)| *name == codec_name)
        .map(|(_, encoder)| *encoder)
        .unwrap_or(codec_name)
}

/// A crop rectangle in ffmpeg's crop=w:h:x:y form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    pub width: u64,
    pub height: u64,
    pub x: u64,
    pub y: u64,
}

impl Crop {
    pub fn filter(&self) -> String {
        format!("crop={}:{}:{}:{}", self.width, self.height, self.x, self.y)
    }
}

// Encoders generally require mod-2 dimensions.
fn even(n: u64) -> u64 {
    n - n % 2
}

/// True when the frame is wider than 4:3 and carries bars worth cropping.
pub fn wider_than_4x3(resolution: Resolution) -> bool {
    let aspect = resolution.width as f64 / resolution.height as f64;
    aspect > 4.0 / 3.0 + 0.005
}

/// Scan the first `scan_seconds` of a file with ffmpeg's cropdetect filter
/// and return the most frequently suggested crop, even-aligned. Returns
/// None when no suggestion shows up (black frames, detection off).
pub fn run_cropdetect(
    runner: &dyn ToolRunner,
    path: &Path,
    scan_seconds: u32,
) -> Result<Option<Crop>, ProbeError> {
    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-ss", "0", "-t"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(OsString::from(scan_seconds.to_string()));
    args.push(OsString::from("-i"));
    args.push(path.as_os_str().to_os_string());
    args.extend(["-vf", "cropdetect=24:16:0", "-f", "null", "-"].iter().map(OsString::from));

    let output = runner.run(FFMPEG, &args)?;
    // cropdetect prints to stderr; whatever lines came through are usable
    // even when the scan exited non-zero.
    let combined = format!("{}\n{}", output.stdout, output.stderr);
    Ok(parse_cropdetect_output(&combined))
}

/// Pick the modal crop=w:h:x:y suggestion out of a cropdetect transcript.
fn parse_cropdetect_output(text: &str) -> Option<Crop> {
    let mut counts: Vec<(Crop, usize)> = Vec::new();

    for line in text.lines() {
        let Some((_, rest)) = line.split_once("crop=") else {
            continue;
        };
        let frag = rest.split_whitespace().next().unwrap_or(rest);
        let mut parts = frag.split(':');
        let (Some(w), Some(h), Some(x), Some(y)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let (Ok(width), Ok(height), Ok(x), Ok(y)) = (
            w.parse::<u64>(),
            h.parse::<u64>(),
            x.parse::<u64>(),
            y.parse::<u64>(),
        ) else {
            continue;
        };

        let crop = Crop {
            width,
            height,
            x,
            y,
        };
        match counts.iter_mut().find(|(seen, _)| *seen == crop) {
            Some((_, n)) => *n += 1,
            None => counts.push((crop, 1)),
        }
    }

    counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(crop, _)| Crop {
            width: even(crop.width),
            height: even(crop.height),
            x: even(crop.x),
            y: even(crop.y),
        })
}

/// Detections within a hair of 4:3 get nudged to the exact ratio, recentered
/// inside the frame.
pub fn snap_to_4x3(crop: Crop, frame: Resolution) -> Crop {
    if crop.height == 0 {
        return crop;
    }
    let aspect = crop.width as f64 / crop.height as f64;
    if (aspect - 4.0 / 3.0).abs() < 0.01 {
        let width = even((crop.height as f64 * 4.0 / 3.0).round() as u64);
        return Crop {
            width,
            x: even(frame.width.saturating_sub(width) / 2),
            ..crop
        };
    }
    crop
}

/// Centered 4:3 crop of a pillarboxed frame.
pub fn centered_4x3_crop(resolution: Resolution) -> Crop {
    let target_w = even(
        resolution
            .width
            .min((resolution.height as f64 * 4.0 / 3.0).round() as u64),
    );
    let target_h = even(resolution.height);
    Crop {
        width: target_w,
        height: target_h,
        x: even((resolution.width - target_w) / 2),
        y: even((resolution.height - target_h) / 2),
    }
}
