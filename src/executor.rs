use std::ffi::OsString;
use std::fs;
use std::path::Path;

use crate::error::JobError;
use crate::planner::{Action, Job};
use crate::probe::{
    centered_4x3_crop, encoder_for, probe_video, run_cropdetect, snap_to_4x3, wider_than_4x3,
    Resolution,
};
use crate::tool::{render_command, ToolRunner, FFMPEG};

/// Knobs the executor needs from the CLI.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub crop_4x3: bool,
    pub use_cropdetect: bool,
    pub scan_seconds: u32,
    pub require_resolution: Option<Resolution>,
    pub crf: Option<u32>,
    pub preset: String,
    pub dry_run: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        ExecOptions {
            crop_4x3: false,
            use_cropdetect: false,
            scan_seconds: 15,
            require_resolution: None,
            crf: None,
            preset: "medium".to_string(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Converted,
    Copied,
    Skipped,
}

/// Executes one job at a time against an injected tool runner.
pub struct Executor<'a> {
    runner: &'a dyn ToolRunner,
    options: ExecOptions,
}

impl<'a> Executor<'a> {
    pub fn new(runner: &'a dyn ToolRunner, options: ExecOptions) -> Self {
        Executor { runner, options }
    }

    pub fn execute(&self, job: &Job) -> Result<Outcome, JobError> {
        match job.action {
            Action::Skip => Ok(Outcome::Skipped),
            // In crop mode the extension mapping only selects files; whether
            // a runnable job is copied or re-encoded comes from the probed
            // aspect, so same-extension mappings still go through the probe.
            Action::Transcode | Action::CopyThrough if self.options.crop_4x3 => {
                self.crop_transcode(job)
            }
            Action::CopyThrough => self.copy_through(job),
            Action::Transcode => self.audio_transcode(job),
        }
    }

    /// Byte-for-byte duplicate; the source already matches the target format.
    fn copy_through(&self, job: &Job) -> Result<Outcome, JobError> {
        if self.options.dry_run {
            println!(
                "$ cp {} {}",
                job.source.path.display(),
                job.target.display()
            );
            return Ok(Outcome::Copied);
        }

        prepare_target_dir(&job.target)?;
        if let Err(e) = fs::copy(&job.source.path, &job.target) {
            remove_partial(&job.target);
            return Err(e.into());
        }
        Ok(Outcome::Copied)
    }

    /// Fixed audio template: extract/convert the audio to mp3 at VBR ~190k.
    fn audio_transcode(&self, job: &Job) -> Result<Outcome, JobError> {
        let mut args = base_args(&job.source.path);
        push_str_args(
            &mut args,
            &["-vn", "-codec:a", "libmp3lame", "-qscale:a", "2"],
        );
        args.push(job.target.as_os_str().to_os_string());

        self.run_encoder(job, args, Outcome::Converted)
    }

    /// Probe first, then either remux (already ~4:3, nothing detected) or
    /// re-encode the video stream with a 4:3 crop, either centered or found
    /// by a cropdetect scan, while copying everything else.
    fn crop_transcode(&self, job: &Job) -> Result<Outcome, JobError> {
        let probe = probe_video(self.runner, &job.source.path)?;
        probe.require_resolution(self.options.require_resolution)?;

        // Exact bars from a cropdetect scan when requested; otherwise a
        // centered 4:3 crop of anything wider than 4:3.
        let crop = if self.options.use_cropdetect {
            run_cropdetect(self.runner, &job.source.path, self.options.scan_seconds)
                .map_err(JobError::Probe)?
                .map(|c| snap_to_4x3(c, probe.resolution))
        } else {
            None
        };
        let crop = crop.or_else(|| {
            wider_than_4x3(probe.resolution).then(|| centered_4x3_crop(probe.resolution))
        });

        let Some(crop) = crop else {
            println!(
                ":: {} already ~4:3; copying streams without re-encode",
                job.source.path.display()
            );
            let mut args = base_args(&job.source.path);
            push_str_args(
                &mut args,
                &[
                    "-map",
                    "0",
                    "-map_metadata",
                    "0",
                    "-map_chapters",
                    "0",
                    "-c",
                    "copy",
                    "-movflags",
                    "use_metadata_tags+faststart",
                ],
            );
            args.push(job.target.as_os_str().to_os_string());
            return self.run_encoder(job, args, Outcome::Copied);
        };

        let encoder = encoder_for(&probe.codec_name);
        if matches!(encoder, "libx264" | "libx265") {
            if let Some(pix_fmt) = &probe.pix_fmt {
                if pix_fmt.ends_with("10le") {
                    eprintln!(
                        "Warning: {} is 10-bit ({}); {} may downconvert",
                        job.source.path.display(),
                        pix_fmt,
                        encoder
                    );
                }
            }
        }

        let mut args = base_args(&job.source.path);
        push_str_args(
            &mut args,
            &[
                "-map",
                "0",
                "-map_metadata",
                "0",
                "-map_chapters",
                "0",
                "-c:a",
                "copy",
                "-c:s",
                "copy",
                "-c:d",
                "copy",
                "-c:t",
                "copy",
                "-c:v",
                encoder,
                "-vf",
                &crop.filter(),
                "-preset",
                &self.options.preset,
            ],
        );
        push_quality_args(&mut args, encoder, self.options.crf, probe.bit_rate);
        push_str_args(&mut args, &["-movflags", "use_metadata_tags+faststart"]);
        args.push(job.target.as_os_str().to_os_string());

        self.run_encoder(job, args, Outcome::Converted)
    }

    fn run_encoder(
        &self,
        job: &Job,
        args: Vec<OsString>,
        outcome: Outcome,
    ) -> Result<Outcome, JobError> {
        if self.options.dry_run {
            println!("$ {}", render_command(FFMPEG, &args));
            return Ok(outcome);
        }

        prepare_target_dir(&job.target)?;

        let output = match self.runner.run(FFMPEG, &args) {
            Ok(output) => output,
            Err(e) => {
                remove_partial(&job.target);
                return Err(e.into());
            }
        };

        if !output.success {
            remove_partial(&job.target);
            let detail = output
                .stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no diagnostic output")
                .to_string();
            return Err(JobError::Tool {
                program: FFMPEG.to_string(),
                code: output.code,
                detail,
            });
        }

        if !job.target.exists() {
            return Err(JobError::MissingOutput);
        }

        Ok(outcome)
    }
}

fn base_args(source: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(source.as_os_str().to_os_string());
    args
}

fn push_str_args(args: &mut Vec<OsString>, extra: &[&str]) {
    args.extend(extra.iter().map(OsString::from));
}

fn push_quality_args(
    args: &mut Vec<OsString>,
    encoder: &str,
    crf: Option<u32>,
    bit_rate: Option<u64>,
) {
    let constant_quality_zero_bitrate = matches!(encoder, "libvpx-vp9" | "libaom-av1");

    if let Some(crf) = crf {
        push_str_args(args, &["-crf", &crf.to_string()]);
        if constant_quality_zero_bitrate {
            push_str_args(args, &["-b:v", "0"]);
        }
    } else if let Some(rate) = bit_rate {
        // Aim for quality parity with the source.
        push_str_args(
            args,
            &[
                "-b:v",
                &rate.to_string(),
                "-maxrate",
                &rate.to_string(),
                "-bufsize",
                &(rate * 2).to_string(),
            ],
        );
    } else {
        let fallback = if matches!(encoder, "libx264" | "libx265") {
            "18"
        } else {
            "28"
        };
        push_str_args(args, &["-crf", fallback]);
        if constant_quality_zero_bitrate {
            push_str_args(args, &["-b:v", "0"]);
        }
    }
}

fn prepare_target_dir(target: &Path) -> Result<(), JobError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

// A failed or interrupted command must not leave half-written output behind.
fn remove_partial(target: &Path) {
    let _ = fs::remove_file(target);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::probe::ProbeError;
    use crate::scanner::SourceFile;
    use crate::tool::ToolOutput;
    use std::io;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const PROBE_1080P: &str = r#"{
        "streams": [{
            "codec_type": "video", "codec_name": "h264",
            "width": 1920, "height": 1080,
            "pix_fmt": "yuv420p", "bit_rate": "4500000"
        }]
    }"#;

    const PROBE_VGA: &str = r#"{
        "streams": [{
            "codec_type": "video", "codec_name": "h264",
            "width": 640, "height": 480,
            "pix_fmt": "yuv420p", "bit_rate": "900000"
        }]
    }"#;

    /// Records invocations; ffmpeg calls create the target (last argument)
    /// unless told to fail, ffprobe calls answer with canned JSON and
    /// cropdetect scans with a canned transcript.
    struct MockRunner {
        probe_json: Option<&'static str>,
        cropdetect_stderr: Option<&'static str>,
        fail_ffmpeg: bool,
        write_target: bool,
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl MockRunner {
        fn ok() -> Self {
            MockRunner {
                probe_json: None,
                cropdetect_stderr: None,
                fail_ffmpeg: false,
                write_target: true,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_probe(json: &'static str) -> Self {
            MockRunner {
                probe_json: Some(json),
                ..MockRunner::ok()
            }
        }

        fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }

        fn cropdetect_args(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .find(|(program, args)| {
                    program == FFMPEG && args.iter().any(|a| a.contains("cropdetect"))
                })
                .map(|(_, args)| args)
                .expect("cropdetect was not invoked")
        }

        fn ffmpeg_args(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .find(|(program, args)| {
                    program == FFMPEG && !args.iter().any(|a| a.contains("cropdetect"))
                })
                .map(|(_, args)| args)
                .expect("ffmpeg was not invoked")
        }
    }

    impl ToolRunner for MockRunner {
        fn run(&self, program: &str, args: &[OsString]) -> io::Result<ToolOutput> {
            let rendered: Vec<String> = args
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect();
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), rendered.clone()));

            if program == "ffprobe" {
                return Ok(ToolOutput {
                    success: true,
                    code: Some(0),
                    stdout: self.probe_json.unwrap_or("{}").to_string(),
                    stderr: String::new(),
                });
            }

            if rendered.iter().any(|a| a.contains("cropdetect")) {
                return Ok(ToolOutput {
                    success: true,
                    code: Some(0),
                    stdout: String::new(),
                    stderr: self.cropdetect_stderr.unwrap_or("").to_string(),
                });
            }

            let target = PathBuf::from(rendered.last().unwrap());
            if self.write_target {
                std::fs::write(&target, b"encoded").unwrap();
            }
            if self.fail_ffmpeg {
                return Ok(ToolOutput {
                    success: false,
                    code: Some(1),
                    stdout: String::new(),
                    stderr: "Conversion failed!\n".to_string(),
                });
            }
            Ok(ToolOutput {
                success: true,
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    fn job(dir: &TempDir, action: Action) -> Job {
        let source_path = dir.path().join("songs/track.m4a");
        std::fs::create_dir_all(source_path.parent().unwrap()).unwrap();
        std::fs::write(&source_path, b"source bytes").unwrap();
        Job {
            source: SourceFile {
                path: source_path,
                rel_path: PathBuf::from("songs/track.m4a"),
                extension: "m4a".to_string(),
            },
            target: dir.path().join("out/songs/track.mp3"),
            action,
        }
    }

    #[test]
    fn test_audio_transcode_invokes_ffmpeg_template() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::ok();
        let executor = Executor::new(&runner, ExecOptions::default());

        let job = job(&dir, Action::Transcode);
        let outcome = executor.execute(&job).unwrap();

        assert_eq!(outcome, Outcome::Converted);
        assert!(job.target.exists());
        let args = runner.ffmpeg_args();
        assert!(args.contains(&"libmp3lame".to_string()));
        assert!(args.contains(&"-nostdin".to_string()));
        assert_eq!(args.last().unwrap(), &job.target.display().to_string());
    }

    #[test]
    fn test_copy_through_duplicates_bytes() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::ok();
        let executor = Executor::new(&runner, ExecOptions::default());

        let job = job(&dir, Action::CopyThrough);
        let outcome = executor.execute(&job).unwrap();

        assert_eq!(outcome, Outcome::Copied);
        assert_eq!(std::fs::read(&job.target).unwrap(), b"source bytes");
        // No subprocess needed for a plain copy.
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_skip_does_nothing() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::ok();
        let executor = Executor::new(&runner, ExecOptions::default());

        let job = job(&dir, Action::Skip);
        assert_eq!(executor.execute(&job).unwrap(), Outcome::Skipped);
        assert!(!job.target.exists());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_failed_command_reports_and_removes_partial_output() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner {
            fail_ffmpeg: true,
            ..MockRunner::ok()
        };
        let executor = Executor::new(&runner, ExecOptions::default());

        let job = job(&dir, Action::Transcode);
        let err = executor.execute(&job).unwrap_err();

        assert!(matches!(err, JobError::Tool { code: Some(1), .. }));
        assert!(err.to_string().contains("Conversion failed!"));
        // The half-written target was cleaned up.
        assert!(!job.target.exists());
    }

    #[test]
    fn test_successful_command_without_output_is_an_error() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner {
            write_target: false,
            ..MockRunner::ok()
        };
        let executor = Executor::new(&runner, ExecOptions::default());

        let job = job(&dir, Action::Transcode);
        let err = executor.execute(&job).unwrap_err();
        assert!(matches!(err, JobError::MissingOutput));
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::ok();
        let executor = Executor::new(
            &runner,
            ExecOptions {
                dry_run: true,
                ..ExecOptions::default()
            },
        );

        let job = job(&dir, Action::Transcode);
        assert_eq!(executor.execute(&job).unwrap(), Outcome::Converted);
        assert!(!job.target.exists());
        assert!(runner.calls().is_empty());
    }

    fn crop_options() -> ExecOptions {
        ExecOptions {
            crop_4x3: true,
            ..ExecOptions::default()
        }
    }

    #[test]
    fn test_crop_transcode_builds_crop_command() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::with_probe(PROBE_1080P);
        let executor = Executor::new(&runner, crop_options());

        let job = job(&dir, Action::Transcode);
        let outcome = executor.execute(&job).unwrap();

        assert_eq!(outcome, Outcome::Converted);
        let args = runner.ffmpeg_args();
        assert!(args.contains(&"crop=1440:1080:240:0".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        // Bitrate parity with the probed stream.
        assert!(args.contains(&"4500000".to_string()));
        assert!(args.contains(&"-maxrate".to_string()));
    }

    #[test]
    fn test_crop_transcode_crf_overrides_bitrate() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::with_probe(PROBE_1080P);
        let executor = Executor::new(
            &runner,
            ExecOptions {
                crf: Some(18),
                ..crop_options()
            },
        );

        let job = job(&dir, Action::Transcode);
        executor.execute(&job).unwrap();

        let args = runner.ffmpeg_args();
        assert!(args.contains(&"-crf".to_string()));
        assert!(!args.contains(&"-maxrate".to_string()));
    }

    #[test]
    fn test_crop_transcode_already_4x3_stream_copies() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::with_probe(PROBE_VGA);
        let executor = Executor::new(&runner, crop_options());

        let job = job(&dir, Action::Transcode);
        let outcome = executor.execute(&job).unwrap();

        assert_eq!(outcome, Outcome::Copied);
        let args = runner.ffmpeg_args();
        assert!(args.contains(&"copy".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("crop=")));
    }

    #[test]
    fn test_crop_mode_probes_same_extension_mappings() {
        // An mp4:mp4 style mapping plans as CopyThrough, but in crop mode
        // the copy-vs-reencode decision belongs to the probe: a pillarboxed
        // source still gets cropped, not duplicated verbatim.
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::with_probe(PROBE_1080P);
        let executor = Executor::new(&runner, crop_options());

        let job = job(&dir, Action::CopyThrough);
        let outcome = executor.execute(&job).unwrap();

        assert_eq!(outcome, Outcome::Converted);
        let calls = runner.calls();
        assert_eq!(calls[0].0, "ffprobe");
        let args = runner.ffmpeg_args();
        assert!(args.contains(&"crop=1440:1080:240:0".to_string()));
        // The target is encoder output, not the source bytes.
        assert_eq!(std::fs::read(&job.target).unwrap(), b"encoded");
    }

    #[test]
    fn test_crop_mode_copy_through_already_4x3_stream_copies() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::with_probe(PROBE_VGA);
        let executor = Executor::new(&runner, crop_options());

        let job = job(&dir, Action::CopyThrough);
        let outcome = executor.execute(&job).unwrap();

        assert_eq!(outcome, Outcome::Copied);
        // Still remuxed through ffmpeg, never a blind byte copy.
        let args = runner.ffmpeg_args();
        assert!(args.contains(&"copy".to_string()));
    }

    #[test]
    fn test_cropdetect_result_overrides_centered_crop() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner {
            cropdetect_stderr: Some(
                "[Parsed_cropdetect_0 @ 0x1] ... crop=1434:1080:242:0\n\
                 [Parsed_cropdetect_0 @ 0x1] ... crop=1434:1080:242:0\n",
            ),
            ..MockRunner::with_probe(PROBE_1080P)
        };
        let executor = Executor::new(
            &runner,
            ExecOptions {
                use_cropdetect: true,
                ..crop_options()
            },
        );

        let job = job(&dir, Action::Transcode);
        executor.execute(&job).unwrap();

        // The scan was bounded to the configured window.
        let scan = runner.cropdetect_args();
        assert!(scan.contains(&"cropdetect=24:16:0".to_string()));
        assert!(scan.contains(&"15".to_string()));

        // 1434:1080 is near-4:3, so it snaps to the exact ratio.
        let args = runner.ffmpeg_args();
        assert!(args.contains(&"crop=1440:1080:240:0".to_string()));
    }

    #[test]
    fn test_cropdetect_without_suggestions_falls_back_to_centered() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner {
            cropdetect_stderr: Some("frame=  360 fps=120 q=-0.0 size=N/A\n"),
            ..MockRunner::with_probe(PROBE_1080P)
        };
        let executor = Executor::new(
            &runner,
            ExecOptions {
                use_cropdetect: true,
                ..crop_options()
            },
        );

        let job = job(&dir, Action::Transcode);
        executor.execute(&job).unwrap();

        let args = runner.ffmpeg_args();
        assert!(args.contains(&"crop=1440:1080:240:0".to_string()));
    }

    #[test]
    fn test_crop_transcode_resolution_precondition() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::with_probe(PROBE_VGA);
        let executor = Executor::new(
            &runner,
            ExecOptions {
                require_resolution: Some(Resolution {
                    width: 1920,
                    height: 1080,
                }),
                ..crop_options()
            },
        );

        let job = job(&dir, Action::Transcode);
        let err = executor.execute(&job).unwrap_err();

        assert!(matches!(
            err,
            JobError::Probe(ProbeError::ResolutionMismatch { .. })
        ));
        // Probe failure aborts before any encoder invocation.
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "ffprobe");
        assert!(!job.target.exists());
    }
}
