use anyhow::{anyhow, Result};
use serde_json::Value;
use std::path::Path;
use std::process::Command;

use super::ffmpeg::{run_command, CommandOutput};
use super::model::AudioStreamInfo;
use super::pipeline::ExtractContext;

/// 获取第一个音频流的基本信息。
///
/// 任何失败（工具无法启动、退出码非零、JSON 无法解析、没有音频流）都只记录警告并返回
/// `None`，调用方据此把该文件报告为失败，批处理继续。
pub fn probe_audio_stream(video: &Path, ctx: &ExtractContext) -> Option<AudioStreamInfo> {
    match try_probe(video, ctx) {
        Ok(info) => Some(info),
        Err(err) => {
            tracing::warn!("获取音频流信息失败 {}: {err}", display_name(video));
            None
        }
    }
}

fn try_probe(video: &Path, ctx: &ExtractContext) -> Result<AudioStreamInfo> {
    let mut command = Command::new(&ctx.tools.ffprobe);
    command
        .arg("-v")
        .arg("quiet")
        .arg("-select_streams")
        .arg("a:0")
        .arg("-show_entries")
        .arg("stream=codec_name,channels,sample_rate,duration:format=duration")
        .arg("-of")
        .arg("json")
        .arg(video);

    let CommandOutput {
        status_ok,
        stdout,
        status_text,
        ..
    } = run_command(command, ctx.config.command_timeout())?;
    if !status_ok {
        return Err(anyhow!(
            "[E_FFPROBE_FAILED] ffprobe 执行失败 (status: {status_text})"
        ));
    }

    parse_probe_json(&stdout)
}

pub fn parse_probe_json(text: &str) -> Result<AudioStreamInfo> {
    let value: Value = serde_json::from_str(text)
        .map_err(|_| anyhow!("[E_PARSE_FFPROBE] ffprobe JSON 解析失败"))?;

    let stream = value
        .get("streams")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .ok_or_else(|| anyhow!("[E_NO_AUDIO_STREAM] 文件中没有音频流"))?;
    let format = value.get("format");

    let duration = parse_f64(stream.get("duration"))
        .filter(|d| *d > 0.0)
        .or_else(|| parse_f64(format.and_then(|f| f.get("duration"))))
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    Ok(AudioStreamInfo {
        codec: stream
            .get("codec_name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_owned(),
        channels: parse_u32(stream.get("channels")).unwrap_or(0),
        sample_rate: parse_u32(stream.get("sample_rate")).unwrap_or(0),
        duration,
        stream_index: 0,
    })
}

fn parse_u32(value: Option<&Value>) -> Option<u32> {
    match value {
        Some(Value::Number(num)) => num.as_u64().and_then(|v| u32::try_from(v).ok()),
        Some(Value::String(s)) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

fn parse_f64(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(num)) => num.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned()
}
