// ----------------------------------------------------------------
// 模块: extractor/pipeline.rs
// 描述: 单个文件的完整处理流程：
//      探测 → 检测 → 决策 → 执行 FFmpeg（监控进度）→ 体积检查与 MP3 再压缩。
//      每条路径都以且仅以一条 ProcessResult 结束。
// ----------------------------------------------------------------

use anyhow::{anyhow, Context, Result};
use std::ffi::OsString;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::config::ExtractorConfig;
use super::control::{emit, BatchControl, EventSink, ExtractEvent};
use super::decision::make_decision;
use super::detect::detect_pseudo_stereo;
use super::ffmpeg::{drain_pipe, ToolPaths};
use super::model::{
    AudioStreamInfo, DecisionReason, ProcessResult, ProcessingDecision, VolumeAnalysis,
};
use super::probe::{display_name, probe_audio_stream};
use super::progress::ProgressTracker;

/// 左右声道各取一半混合到两个输出声道，避免误判时丢失另一侧的声音。
pub const CHANNEL_AVERAGE_FILTER: &str = "pan=stereo|c0=0.5*c0+0.5*c1|c1=0.5*c0+0.5*c1";
pub const AAC_BITRATE: &str = "128k";
pub const MP3_BITRATE: &str = "128k";

const WAIT_POLL: Duration = Duration::from_millis(25);

/// 处理文件所需的全部上下文，由调度器创建并在工作线程间共享。
#[derive(Debug)]
pub struct ExtractContext {
    pub config: ExtractorConfig,
    pub tools: ToolPaths,
    pub control: Arc<BatchControl>,
    pub events: EventSink,
}

impl ExtractContext {
    pub fn new(
        config: ExtractorConfig,
        tools: ToolPaths,
        control: Arc<BatchControl>,
        events: EventSink,
    ) -> Self {
        Self {
            config,
            tools,
            control,
            events,
        }
    }

    /// 只有当前活跃文件的进度才会通知观察者，过期的进度直接丢弃。
    fn report_file_progress(&self, video: &Path, percent: u8) {
        if let Some(overall) = self.control.file_progress(video, percent) {
            emit(&self.events, ExtractEvent::FileProgress(percent));
            emit(&self.events, ExtractEvent::OverallProgress(overall));
        }
    }
}

/// FFmpeg 调用形态。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodePlan {
    /// 原样复制音频流
    DirectCopy,
    /// 合并声道并编码为 AAC 128k
    ChannelFix,
    /// 标准转码到目标编码器
    Standard { codec: String },
}

impl TranscodePlan {
    pub fn from_decision(decision: &ProcessingDecision) -> Self {
        if decision.can_copy_directly {
            TranscodePlan::DirectCopy
        } else if decision.needs_channel_fix {
            TranscodePlan::ChannelFix
        } else {
            TranscodePlan::Standard {
                codec: decision.target_codec.clone(),
            }
        }
    }

    /// 构建 ffmpeg 参数（不含程序名）。视频流被丢弃，只输出第一个音频流。
    pub fn ffmpeg_args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-i".into(),
            input.into(),
            "-map".into(),
            "0:a:0".into(),
            "-vn".into(),
        ];

        match self {
            TranscodePlan::DirectCopy => push_args(&mut args, &["-c:a", "copy"]),
            TranscodePlan::ChannelFix => push_args(
                &mut args,
                &["-af", CHANNEL_AVERAGE_FILTER, "-c:a", "aac", "-b:a", AAC_BITRATE],
            ),
            TranscodePlan::Standard { codec } => {
                push_args(&mut args, &["-c:a", codec.as_str()]);
                if codec == "aac" {
                    push_args(&mut args, &["-b:a", AAC_BITRATE]);
                }
            }
        }

        append_progress_args(&mut args, output);
        args
    }
}

fn push_args(args: &mut Vec<OsString>, items: &[&str]) {
    args.extend(items.iter().map(OsString::from));
}

fn append_progress_args(args: &mut Vec<OsString>, output: &Path) {
    push_args(args, &["-progress", "pipe:1", "-v", "warning", "-y"]);
    args.push(output.into());
}

/// 把体积过大的输出再编码为 MP3 128k 的参数。
pub fn mp3_compress_args(input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-i".into(),
        input.into(),
        "-c:a".into(),
        "mp3".into(),
        "-b:a".into(),
        MP3_BITRATE.into(),
    ];
    append_progress_args(&mut args, output);
    args
}

/// 运行 ffmpeg 并监控 `-progress` 输出。
///
/// 返回子进程是否成功退出。收到停止请求时终止子进程，结果即为失败。
pub fn run_with_progress(
    ctx: &ExtractContext,
    args: &[OsString],
    video: &Path,
    duration: f64,
) -> Result<bool> {
    let mut command = Command::new(&ctx.tools.ffmpeg);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    tracing::debug!("执行命令: {:?}", command);
    let mut child = command.spawn().context("[E_EXEC_SPAWN] 启动 ffmpeg 失败")?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("[E_EXEC_STDOUT] 无法捕获 stdout"))?;
    let stderr_thread = child.stderr.take().map(drain_pipe);

    let process = ctx.control.register_process(child);
    let mut tracker = ProgressTracker::new(duration);
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        if ctx.control.is_stopped() {
            process.kill();
            break;
        }

        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let line = String::from_utf8_lossy(&buf);
        if let Some(percent) = tracker.update(&line) {
            ctx.report_file_progress(video, percent);
        }
    }

    let status = process
        .wait(WAIT_POLL)
        .context("[E_EXEC_WAIT] 等待 ffmpeg 退出失败")?;
    drop(process);

    let stderr = stderr_thread
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();

    if !status.success() {
        let preview = stderr.chars().take(500).collect::<String>();
        tracing::warn!(
            "ffmpeg 执行失败 {} (status: {status}): {}",
            display_name(video),
            preview.trim()
        );
    }

    Ok(status.success())
}

/// 执行处理决策对应的 ffmpeg 调用。
fn execute_plan(
    ctx: &ExtractContext,
    video: &Path,
    output: &Path,
    stream: &AudioStreamInfo,
    decision: &ProcessingDecision,
) -> bool {
    let plan = TranscodePlan::from_decision(decision);
    let args = plan.ffmpeg_args(video, output);

    match run_with_progress(ctx, &args, video, stream.duration) {
        Ok(success) => success,
        Err(err) => {
            tracing::error!("音频处理执行失败 {}: {err:#}", display_name(video));
            false
        }
    }
}

/// 输出超过体积上限时再压缩为 MP3。
///
/// 压缩成功则删除原文件并返回 MP3 路径；失败时保留并返回原文件，绝不丢失已提取的音频。
pub fn compress_if_oversized(
    ctx: &ExtractContext,
    output: &Path,
    video: &Path,
    duration: f64,
) -> PathBuf {
    let size = match fs::metadata(output) {
        Ok(metadata) => metadata.len(),
        Err(err) => {
            tracing::warn!("文件大小检查失败 {}: {err}", output.display());
            return output.to_path_buf();
        }
    };

    let limit = ctx.config.max_output_bytes;
    if size <= limit {
        return output.to_path_buf();
    }

    let mp3_output = output.with_extension("mp3");
    if mp3_output == output {
        tracing::info!(
            "[文件压缩] {} 已是 MP3 ({:.1}MB)，不再压缩",
            display_name(output),
            mib(size)
        );
        return output.to_path_buf();
    }

    tracing::info!(
        "[文件压缩] {} 大小 {:.1}MB > {:.1}MB，转换为MP3",
        display_name(output),
        mib(size),
        mib(limit)
    );

    let args = mp3_compress_args(output, &mp3_output);
    let compressed = match run_with_progress(ctx, &args, video, duration) {
        Ok(success) => success,
        Err(err) => {
            tracing::warn!("MP3 压缩无法启动: {err:#}");
            false
        }
    };

    if compressed {
        if let Err(err) = fs::remove_file(output) {
            tracing::warn!("删除原文件失败 {}: {err}", output.display());
        }
        mp3_output
    } else {
        tracing::warn!("[压缩失败] 保留原文件: {}", display_name(output));
        let _ = fs::remove_file(&mp3_output);
        output.to_path_buf()
    }
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// 跳过策略：输出文件或其压缩后的 MP3 已存在。
fn existing_output(output: &Path) -> Option<PathBuf> {
    if output.exists() {
        return Some(output.to_path_buf());
    }
    let mp3 = output.with_extension("mp3");
    mp3.exists().then_some(mp3)
}

/// 处理单个视频文件，总是返回一条 `ProcessResult`。
pub fn extract_file(video: &Path, ctx: &ExtractContext) -> ProcessResult {
    let started = Instant::now();
    match try_extract(video, ctx, started) {
        Ok(result) => result,
        Err(err) => ProcessResult::early_failure(
            &video.to_string_lossy(),
            format!("音频提取异常: {err:#}"),
            started.elapsed().as_secs_f64(),
        ),
    }
}

fn try_extract(video: &Path, ctx: &ExtractContext, started: Instant) -> Result<ProcessResult> {
    let input_file = video.to_string_lossy().into_owned();

    // 第一步：获取音频流信息
    let Some(stream) = probe_audio_stream(video, ctx) else {
        return Ok(ProcessResult::early_failure(
            &input_file,
            "无法获取音频流信息",
            started.elapsed().as_secs_f64(),
        ));
    };

    // 第二步：检测伪立体声
    let volume = detect_pseudo_stereo(video, &stream, ctx);

    // 第三步：制定处理决策
    let decision = make_decision(&stream, &volume);
    log_decision(video, &stream, &volume, &decision);

    let output = ctx.config.output_path(video, &decision.target_codec);
    let finish = |success: bool, output_file: &Path, error_msg: &str, reason: String| {
        ProcessResult {
            success,
            input_file: input_file.clone(),
            output_file: output_file.to_string_lossy().into_owned(),
            error_msg: error_msg.to_owned(),
            processing_time: started.elapsed().as_secs_f64(),
            audio_type: volume.audio_type,
            left_volume: volume.left_db,
            right_volume: volume.right_db,
            was_copied_directly: success && decision.can_copy_directly,
            processing_decision: reason,
        }
    };

    if ctx.config.skip_existing {
        if let Some(existing) = existing_output(&output) {
            let mut result = finish(
                true,
                &existing,
                "",
                DecisionReason::SkippedExisting.to_string(),
            );
            result.was_copied_directly = false;
            return Ok(result);
        }
    }

    if ctx.control.is_stopped() {
        return Ok(finish(false, &output, "任务已停止", decision.reason_text()));
    }

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("无法创建输出目录: {}", parent.display()))?;
    }

    // 第四步：执行音频处理
    if !execute_plan(ctx, video, &output, &stream, &decision) {
        return Ok(finish(
            false,
            &output,
            "音频处理执行失败",
            decision.reason_text(),
        ));
    }

    // 第五步：体积检查
    let final_output = compress_if_oversized(ctx, &output, video, stream.duration);
    Ok(finish(true, &final_output, "", decision.reason_text()))
}

fn log_decision(
    video: &Path,
    stream: &AudioStreamInfo,
    volume: &VolumeAnalysis,
    decision: &ProcessingDecision,
) {
    tracing::info!(
        "[处理决策] {} - 类型: {}, 原始格式: {} ({}声道), 需要声道修复: {}, 可直接复制: {}, 目标格式: {}, 原因: {}",
        display_name(video),
        volume.audio_type,
        stream.codec,
        stream.channels,
        decision.needs_channel_fix,
        decision.can_copy_directly,
        decision.target_codec,
        decision.reason
    );
}
