use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use thiserror::Error;

use crate::probe::Resolution;

/// Batch-convert media files by shelling out to ffmpeg.
#[derive(Debug, Parser)]
#[command(name = "convert_media", version)]
pub struct Args {
    /// Input directory (batch mode) or a single media file
    pub input: PathBuf,

    /// Output directory root; the input tree is mirrored under it
    pub output: PathBuf,

    /// Extension mapping as comma-separated src:dst pairs. A pair with the
    /// same extension on both sides means copy-through.
    #[arg(long, default_value = "m4a:mp3,mp3:mp3", value_name = "SPEC")]
    pub formats: FormatMap,

    /// Number of jobs to run at once; 0 means one per CPU
    #[arg(long, default_value_t = 1, value_name = "N")]
    pub jobs: usize,

    /// Replace existing output files instead of skipping them
    #[arg(long)]
    pub overwrite: bool,

    /// Abort the whole run on the first failed job
    #[arg(long)]
    pub fail_fast: bool,

    /// Re-encode videos with a centered 4:3 crop (same codec family,
    /// bitrate parity) instead of audio transcoding
    #[arg(long = "crop-4x3")]
    pub crop_4x3: bool,

    /// Find the exact bars with a short ffmpeg cropdetect scan instead of
    /// assuming centered pillarboxing
    #[arg(long, requires = "crop_4x3")]
    pub use_cropdetect: bool,

    /// Seconds of video to scan with cropdetect
    #[arg(long, default_value_t = 15, value_name = "N", requires = "use_cropdetect")]
    pub scan_seconds: u32,

    /// Require sources to have exactly this resolution before cropping
    #[arg(long, value_name = "WxH", requires = "crop_4x3")]
    pub require_resolution: Option<Resolution>,

    /// Constant-quality encode instead of bitrate parity (crop mode)
    #[arg(long, value_name = "N", requires = "crop_4x3")]
    pub crf: Option<u32>,

    /// Encoder preset (crop mode)
    #[arg(long, default_value = "medium")]
    pub preset: String,

    /// Print the external commands without running them
    #[arg(long)]
    pub dry_run: bool,
}

impl Args {
    /// How many workers to actually start.
    pub fn worker_count(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get()
        } else {
            self.jobs
        }
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct FormatSpecError(String);

/// Mapping from source extensions to target extensions, e.g. "m4a:mp3,mp3:mp3".
#[derive(Debug, Clone)]
pub struct FormatMap {
    rules: Vec<(String, String)>,
}

impl FormatMap {
    /// Target extension for a (lowercase) source extension.
    pub fn target_for(&self, extension: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|(src, _)| src == extension)
            .map(|(_, dst)| dst.as_str())
    }

    /// The set of source extensions the walker should emit.
    pub fn extensions(&self) -> Vec<String> {
        self.rules.iter().map(|(src, _)| src.clone()).collect()
    }
}

impl FromStr for FormatMap {
    type Err = FormatSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rules: Vec<(String, String)> = Vec::new();

        for pair in s.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (src, dst) = pair
                .split_once(':')
                .ok_or_else(|| FormatSpecError(format!("'{pair}' is not a src:dst pair")))?;
            let src = src.trim().trim_start_matches('.').to_lowercase();
            let dst = dst.trim().trim_start_matches('.').to_lowercase();
            if src.is_empty() || dst.is_empty() {
                return Err(FormatSpecError(format!("'{pair}' has an empty extension")));
            }
            if rules.iter().any(|(existing, _)| *existing == src) {
                return Err(FormatSpecError(format!(
                    "extension '{src}' is mapped twice"
                )));
            }
            rules.push((src, dst));
        }

        if rules.is_empty() {
            return Err(FormatSpecError("no format mappings given".to_string()));
        }

        Ok(FormatMap { rules })
    }
}
