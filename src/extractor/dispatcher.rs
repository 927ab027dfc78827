// ----------------------------------------------------------------
// 模块: extractor/dispatcher.rs
// 描述: 批处理调度器。扫描视频文件，用固定大小的线程池并行处理，
//      支持暂停/恢复/停止，并把逐文件结果汇总为整体进度。
// ----------------------------------------------------------------

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, TryRecvError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;

use super::config::ExtractorConfig;
use super::control::{emit, BatchControl, BatchState, EventSink, ExtractEvent};
use super::ffmpeg::ToolPaths;
use super::model::ProcessResult;
use super::pipeline::{extract_file, ExtractContext};
use super::probe::display_name;

/// 支持的视频文件扩展名（小写）
pub const VIDEO_EXTENSIONS: [&str; 12] = [
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "3gp", "mts", "m2ts", "ts",
];

/// 一次批处理的汇总。
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub copied_directly: usize,
    pub stopped: bool,
    pub results: Vec<ProcessResult>,
}

impl BatchSummary {
    fn from_results(total: usize, results: Vec<ProcessResult>, stopped: bool) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total,
            succeeded,
            failed: results.len() - succeeded,
            copied_directly: results.iter().filter(|r| r.was_copied_directly).count(),
            stopped,
            results,
        }
    }
}

/// 控制句柄，可在其他线程中暂停、恢复或停止正在运行的批处理。
#[derive(Debug, Clone)]
pub struct ExtractorHandle {
    control: Arc<BatchControl>,
}

impl ExtractorHandle {
    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn state(&self) -> BatchState {
        self.control.phase()
    }

    pub fn processed(&self) -> usize {
        self.control.processed()
    }
}

pub struct Extractor {
    config: ExtractorConfig,
    control: Arc<BatchControl>,
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            config,
            control: Arc::new(BatchControl::new()),
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn handle(&self) -> ExtractorHandle {
        ExtractorHandle {
            control: Arc::clone(&self.control),
        }
    }

    /// 定位外部工具后运行整个批处理（阻塞直到结束）。
    pub fn run(&self, events: EventSink) -> Result<BatchSummary> {
        let tools = match self
            .config
            .validate()
            .and_then(|_| ToolPaths::locate(&self.config))
        {
            Ok(tools) => tools,
            Err(err) => {
                self.abort(&events, &err);
                return Err(err);
            }
        };
        self.run_with_tools(tools, events)
    }

    /// 使用给定的外部工具运行批处理。
    ///
    /// 批处理级错误（根目录不可读、线程池创建失败）会发送 `Finished { aborted: true }` 并返回错误；
    /// 单个文件的失败只体现在对应的 `ProcessResult` 中。
    pub fn run_with_tools(&self, tools: ToolPaths, events: EventSink) -> Result<BatchSummary> {
        let started = Instant::now();
        self.set_phase(&events, BatchState::Scanning);

        let video_files = match scan_video_files(&self.config.input_dir) {
            Ok(files) => files,
            Err(err) => {
                self.abort(&events, &err);
                return Err(err);
            }
        };

        let total = video_files.len();
        emit(&events, ExtractEvent::ScanCompleted { total });
        tracing::info!(
            "扫描完成，找到 {total} 个视频文件: {}",
            self.config.input_dir.display()
        );

        if total == 0 {
            emit(&events, ExtractEvent::OverallProgress(100));
            return Ok(self.finish(&events, BatchSummary::default()));
        }

        if self.control.is_stopped() {
            let results = self.drain_unprocessed(video_files.into_iter(), &events);
            return Ok(self.finish(&events, BatchSummary::from_results(total, results, true)));
        }

        let initial_phase = self.control.begin_run(total);
        emit(&events, ExtractEvent::StateChanged(initial_phase));

        let (queue_tx, queue_rx) = crossbeam_channel::unbounded::<PathBuf>();
        for video in video_files {
            // 接收端仍然存活，发送不会失败
            let _ = queue_tx.send(video);
        }
        drop(queue_tx);

        let worker_count = self.config.thread_count().min(total);
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|i| format!("extract-worker-{i}"))
            .build()
            .context("[E_THREAD_POOL] 创建工作线程池失败")
        {
            Ok(pool) => pool,
            Err(err) => {
                self.abort(&events, &err);
                return Err(err);
            }
        };

        let ctx = ExtractContext::new(
            self.config.clone(),
            tools,
            Arc::clone(&self.control),
            events.clone(),
        );
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<ProcessResult>();

        pool.scope(|scope| {
            for _ in 0..worker_count {
                let queue = queue_rx.clone();
                let results = result_tx.clone();
                let ctx = &ctx;
                scope.spawn(move |_| worker_loop(ctx, &queue, |result| {
                    let _ = results.send(result);
                }));
            }
        });
        drop(result_tx);

        let mut results: Vec<ProcessResult> = result_rx.try_iter().collect();
        let stopped = self.control.is_stopped();
        if stopped {
            results.extend(self.drain_unprocessed(queue_rx.try_iter(), &events));
        }

        tracing::info!(
            "批处理结束: {} 个文件, 耗时 {:.1}s",
            results.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(self.finish(&events, BatchSummary::from_results(total, results, stopped)))
    }

    /// 停止后尚未出队的文件：各自生成一条失败记录，保证每个文件恰好一条结果。
    fn drain_unprocessed(
        &self,
        remaining: impl Iterator<Item = PathBuf>,
        events: &EventSink,
    ) -> Vec<ProcessResult> {
        remaining
            .map(|video| {
                let result = ProcessResult::early_failure(
                    &video.to_string_lossy(),
                    "任务已停止，文件未处理",
                    0.0,
                );
                self.control.complete_file();
                emit(events, ExtractEvent::FileProcessed(result.clone()));
                result
            })
            .collect()
    }

    fn set_phase(&self, events: &EventSink, phase: BatchState) {
        self.control.set_phase(phase);
        emit(events, ExtractEvent::StateChanged(phase));
    }

    fn finish(&self, events: &EventSink, summary: BatchSummary) -> BatchSummary {
        let phase = if summary.stopped {
            BatchState::Stopped
        } else {
            BatchState::Finished
        };
        self.set_phase(events, phase);
        emit(events, ExtractEvent::Finished { aborted: false });
        summary
    }

    fn abort(&self, events: &EventSink, err: &anyhow::Error) {
        tracing::error!("批处理中止: {err:#}");
        self.set_phase(events, BatchState::Stopped);
        emit(events, ExtractEvent::Finished { aborted: true });
    }
}

/// 工作线程：从共享队列取文件直到队列为空或收到停止请求。
fn worker_loop(
    ctx: &ExtractContext,
    queue: &Receiver<PathBuf>,
    mut on_result: impl FnMut(ProcessResult),
) {
    let poll = ctx.config.pause_poll_interval();

    while !ctx.control.is_stopped() {
        let video = match queue.try_recv() {
            Ok(video) => video,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        };

        if !ctx.control.wait_while_paused(poll) {
            // 已出队但未处理的文件同样需要一条结果
            on_result(finish_file(
                ctx,
                ProcessResult::early_failure(
                    &video.to_string_lossy(),
                    "任务已停止，文件未处理",
                    0.0,
                ),
            ));
            break;
        }

        ctx.control.announce(&video);
        emit(
            &ctx.events,
            ExtractEvent::FileStarted {
                name: display_name(&video),
                path: video.clone(),
            },
        );
        emit(&ctx.events, ExtractEvent::FileProgress(0));

        let result = extract_file(&video, ctx);
        if result.success {
            tracing::info!("处理完成: {} → {}", display_name(&video), result.output_file);
        } else {
            tracing::warn!("处理失败: {} - {}", display_name(&video), result.error_msg);
        }
        on_result(finish_file(ctx, result));
    }
}

/// 计数并通知，返回原结果。
fn finish_file(ctx: &ExtractContext, result: ProcessResult) -> ProcessResult {
    let (_, overall) = ctx.control.complete_file();
    emit(&ctx.events, ExtractEvent::FileProcessed(result.clone()));
    emit(&ctx.events, ExtractEvent::OverallProgress(overall));
    result
}

/// 递归扫描视频文件，按路径字典序排序。
///
/// 无权限访问的子目录会被跳过并记录警告；根目录本身无法读取时返回错误。
pub fn scan_video_files(root: &Path) -> Result<Vec<PathBuf>> {
    std::fs::read_dir(root)
        .with_context(|| format!("[E_SCAN_ROOT] 无法读取输入目录: {}", root.display()))?;

    let mut video_files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if err.depth() == 0 {
                    return Err(anyhow!(
                        "[E_SCAN_ROOT] 无法读取输入目录 {}: {err}",
                        root.display()
                    ));
                }
                let location = err
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                tracing::warn!("无权限访问目录，已跳过: {location} ({err})");
                continue;
            }
        };

        if entry.file_type().is_file() && is_video_file(entry.path()) {
            video_files.push(entry.into_path());
        }
    }

    video_files.sort();
    Ok(video_files)
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
