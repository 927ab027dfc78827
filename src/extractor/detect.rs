use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use super::classify::{classify, is_too_quiet, SILENCE_THRESHOLD_DB};
use super::ffmpeg::{format_seconds, parse_float_token, run_command};
use super::model::{AudioStreamInfo, DetectionPosition, VolumeAnalysis, UNMEASURED_DB};
use super::pipeline::ExtractContext;
use super::probe::display_name;

/// 时长达到此值的视频使用完整的一分钟检测窗口
const LONG_MEDIA_SECS: f64 = 60.0;
const SHORT_WINDOW_MIN_SECS: f64 = 5.0;
const SHORT_WINDOW_MAX_SECS: f64 = 10.0;
/// 统计子进程的超时 = 窗口长度 + 此余量
const DETECTION_TIMEOUT_SLACK_SECS: f64 = 10.0;

lazy_static! {
    static ref RMS_LINE_REGEX: Regex = Regex::new(r"RMS level dB:\s*(\S+)").unwrap();
    static ref LEFT_CHANNEL_REGEX: Regex =
        Regex::new(r"Channel: 1(?:\D|$)|Channel 0(?:\D|$)|FL").unwrap();
    static ref RIGHT_CHANNEL_REGEX: Regex =
        Regex::new(r"Channel: 2(?:\D|$)|Channel 1(?:\D|$)|FR").unwrap();
}

/// 检测窗口：从 `start` 秒开始，长度 `length` 秒。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionWindow {
    pub start: f64,
    pub length: f64,
    pub position: DetectionPosition,
}

impl DetectionWindow {
    /// 根据总时长选择检测窗口。
    ///
    /// 不足一分钟的片段窗口被夹在 5~10 秒之间，极短片段（< 5 秒）的窗口会超过片段本身。
    /// 只有时长超过窗口 1.5 倍时才取中间位置，否则从开头检测。
    pub fn for_duration(duration: f64) -> Self {
        let length = if duration >= LONG_MEDIA_SECS {
            LONG_MEDIA_SECS
        } else {
            duration.clamp(SHORT_WINDOW_MIN_SECS, SHORT_WINDOW_MAX_SECS)
        };

        if duration > length * 1.5 {
            Self {
                start: ((duration - length) / 2.0).max(0.0),
                length,
                position: DetectionPosition::Middle,
            }
        } else {
            Self {
                start: 0.0,
                length,
                position: DetectionPosition::Start,
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.length + DETECTION_TIMEOUT_SLACK_SECS)
    }
}

/// 检测伪立体声：在一个窗口内测量左右声道电平并分类。
pub fn detect_pseudo_stereo(
    video: &Path,
    stream: &AudioStreamInfo,
    ctx: &ExtractContext,
) -> VolumeAnalysis {
    // 时长无法换算成检测窗口时整步检测失败
    if !stream.duration.is_finite() || stream.duration < 0.0 {
        tracing::warn!(
            "伪立体声检测失败 {}: 无效的时长 {}",
            display_name(video),
            stream.duration
        );
        return VolumeAnalysis::failed();
    }

    let window = DetectionWindow::for_duration(stream.duration);
    let (left_db, right_db) = measure_channel_levels(video, stream.stream_index, &window, ctx);
    let audio_type = classify(left_db, right_db);

    tracing::info!(
        "[音频检测] {} - {}位置({:.1}s): 左={left_db:.1}dB, 右={right_db:.1}dB → {audio_type} (阈值: {SILENCE_THRESHOLD_DB}dB)",
        display_name(video),
        window.position,
        window.start,
    );

    if is_too_quiet(left_db, right_db) {
        tracing::warn!(
            "{} - 音频音量过低，请检查视频是否有声音 (左={left_db:.1}dB, 右={right_db:.1}dB)",
            display_name(video)
        );
    }

    VolumeAnalysis {
        left_db,
        right_db,
        audio_type,
        position: window.position,
    }
}

/// 运行 astats 统计。子进程启动失败或超时时两个声道都返回哨兵值，窗口位置保持不变。
fn measure_channel_levels(
    video: &Path,
    stream_index: usize,
    window: &DetectionWindow,
    ctx: &ExtractContext,
) -> (f64, f64) {
    let mut command = Command::new(&ctx.tools.ffmpeg);
    command
        .arg("-ss")
        .arg(format_seconds(window.start))
        .arg("-i")
        .arg(video)
        .arg("-map")
        .arg(format!("0:a:{stream_index}"))
        .arg("-af")
        .arg("astats")
        .arg("-f")
        .arg("null")
        .arg("-t")
        .arg(format_seconds(window.length))
        .arg("-");

    match run_command(command, window.timeout()) {
        Ok(output) => parse_astats_channels(&output.stderr),
        Err(err) => {
            tracing::warn!("声道音量测量失败 {}: {err:#}", display_name(video));
            (UNMEASURED_DB, UNMEASURED_DB)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Overall,
    Left,
    Right,
}

/// 从 astats 报告中提取左右声道的 RMS 电平。
///
/// 报告按段落排列，每段以声道标记开头；`Overall` 段的数值被忽略。
/// 某一声道没有找到 RMS 行时保持哨兵值。
pub fn parse_astats_channels(report: &str) -> (f64, f64) {
    let mut left = UNMEASURED_DB;
    let mut right = UNMEASURED_DB;
    let mut section: Option<Section> = None;

    for line in report.lines().map(str::trim) {
        if line.contains("Overall") {
            section = Some(Section::Overall);
        } else if LEFT_CHANNEL_REGEX.is_match(line) {
            section = Some(Section::Left);
        } else if RIGHT_CHANNEL_REGEX.is_match(line) {
            section = Some(Section::Right);
        }

        let Some(current) = section else { continue };
        let Some(value) = RMS_LINE_REGEX
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| parse_float_token(m.as_str()))
        else {
            continue;
        };

        match current {
            Section::Left => left = value,
            Section::Right => right = value,
            Section::Overall => {}
        }
    }

    (left, right)
}
