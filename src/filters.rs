//! Maps [`ProcessingOptions`] onto an ffmpeg filter chain.
//!
//! The mapping is pure: identical options always produce an identical
//! [`CommandSpec`], and stage order is fixed regardless of which toggles
//! are set.

use std::ffi::OsString;
use std::path::Path;

use crate::error::Result;
use crate::models::ProcessingOptions;

const LOUDNESS_TARGET: &str = "loudnorm=I=-16:TP=-1.5:LRA=11";
const STABILIZE: &str = "deshake";
const COLOR_BALANCE: &str = "eq=contrast=1.05:brightness=0.02:saturation=1.1";
const CROP_DETECT: &str = "cropdetect=limit=24:round=16:reset=0";
const SUBJECT_ZOOM: &str = "zoompan=z=1.2:d=1:x=iw/2-(iw/zoom/2):y=ih/2-(ih/zoom/2)";
const SCENE_SELECT: &str = "select='gt(scene,0.3)',setpts=N/FRAME_RATE/TB";

const ENCODING: [&str; 8] = [
    "-c:v", "libx264", "-crf", "23", "-preset", "medium", "-c:a", "aac",
];
const AUDIO_BITRATE: [&str; 2] = ["-b:a", "128k"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SilenceRemoval,
    LoudnessNormalization,
    Stabilization,
    ColorCorrection,
    CropDetection,
    SubjectFocus,
    SceneSelection,
    Encoding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub stage: Stage,
    pub expression: String,
}

impl Filter {
    fn new(stage: Stage, expression: impl Into<String>) -> Self {
        Self {
            stage,
            expression: expression.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub audio: Vec<Filter>,
    pub video: Vec<Filter>,
    pub min_segment_duration_us: u64,
}

impl CommandSpec {
    /// Applied stages in order, always ending with the fixed encoding stage.
    pub fn stages(&self) -> Vec<Stage> {
        self.audio
            .iter()
            .chain(self.video.iter())
            .map(|filter| filter.stage)
            .chain(std::iter::once(Stage::Encoding))
            .collect()
    }

    pub fn audio_chain(&self) -> Option<String> {
        join_chain(&self.audio)
    }

    pub fn video_chain(&self) -> Option<String> {
        join_chain(&self.video)
    }

    /// Render the discrete ffmpeg argument list. No shell is involved, so
    /// paths and expressions are passed through verbatim.
    pub fn to_args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-nostdin",
            "-nostats",
            "-progress",
            "pipe:2",
            "-y",
            "-i",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(input.as_os_str().to_owned());

        if let Some(chain) = self.audio_chain() {
            args.push("-af".into());
            args.push(chain.into());
        }

        if let Some(chain) = self.video_chain() {
            args.push("-vf".into());
            args.push(chain.into());
        }

        args.push("-min_seg_duration".into());
        args.push(self.min_segment_duration_us.to_string().into());

        args.extend(ENCODING.iter().chain(AUDIO_BITRATE.iter()).map(OsString::from));
        args.push(output.as_os_str().to_owned());

        args
    }
}

fn join_chain(filters: &[Filter]) -> Option<String> {
    if filters.is_empty() {
        return None;
    }

    Some(
        filters
            .iter()
            .map(|filter| filter.expression.as_str())
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Trim leading silence, reverse, trim again (now the trailing silence), and
/// reverse back.
fn silence_removal(threshold: f64) -> String {
    let db = threshold * 60.0;
    let trim = format!("silenceremove=start_periods=1:start_threshold=-{db:.2}dB");
    format!("{trim},areverse,{trim},areverse")
}

pub fn build(options: &ProcessingOptions) -> Result<CommandSpec> {
    options.validate()?;

    let mut audio = Vec::new();
    if options.remove_silence {
        audio.push(Filter::new(
            Stage::SilenceRemoval,
            silence_removal(options.silence_threshold),
        ));
    }
    if options.auto_volume {
        audio.push(Filter::new(Stage::LoudnessNormalization, LOUDNESS_TARGET));
    }

    let video = [
        (options.stabilize, Stage::Stabilization, STABILIZE),
        (options.color_correct, Stage::ColorCorrection, COLOR_BALANCE),
        (options.auto_crop, Stage::CropDetection, CROP_DETECT),
        (options.face_focus, Stage::SubjectFocus, SUBJECT_ZOOM),
        (
            options.remove_static || options.auto_pacing,
            Stage::SceneSelection,
            SCENE_SELECT,
        ),
    ]
    .into_iter()
    .filter(|(enabled, _, _)| *enabled)
    .map(|(_, stage, expression)| Filter::new(stage, expression))
    .collect();

    Ok(CommandSpec {
        audio,
        video,
        // validate() guarantees min_duration >= 0
        min_segment_duration_us: (options.min_duration as u64).saturating_mul(1_000_000),
    })
}
