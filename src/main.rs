// ================================================================
// 项目: 视频音频提取器 (AudioExtract-rs)
// 文件: src/main.rs
// 描述: 程序主入口点，负责命令行解析、用户交互、运行期控制与结果展示
//
// 功能概述:
// - 支持直接模式和交互模式两种操作方式
// - 运行期间可输入 p/r/q 暂停、恢复、停止，Ctrl+C 等同于停止
// - 多进度条显示整体进度与当前文件进度
// - 结束后输出摘要并生成 CSV / JSON 报告
// ================================================================

use audio_extract::extractor::{
    BatchState, BatchSummary, ExtractEvent, Extractor, ExtractorConfig, ExtractorHandle,
    OutputTarget, ReportGenerator,
};

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::{ArgAction, Parser};
use crossbeam_channel::{select, Receiver};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// 当前正在运行的批处理，供 Ctrl+C 处理函数使用。
static ACTIVE_BATCH: Mutex<Option<ExtractorHandle>> = Mutex::new(None);

// ================================================================
// 命令行接口定义 (Command Line Interface Definition)
// ================================================================

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "从视频中批量提取音频，自动修复伪立体声",
    long_about = "递归扫描文件夹中的视频文件，检测左右声道音量差异，对只有单侧声道有声音的伪立体声做声道合并，其余情况尽量直接复制音频流。输出超过大小上限时自动压缩为 MP3。如果未提供路径参数，则会进入交互模式。"
)]
struct Cli {
    #[arg(value_name = "PATH", help = "要递归扫描的视频文件夹路径")]
    path: Option<PathBuf>,

    /// 输出根目录（默认输出到视频所在文件夹）
    #[arg(short, long, value_name = "DIR", conflicts_with = "same_folder")]
    output: Option<PathBuf>,

    /// 输出到每个视频所在的文件夹
    #[arg(long)]
    same_folder: bool,

    /// 输出到指定目录时不保留子目录结构
    #[arg(long)]
    flatten: bool,

    /// 覆盖已存在的输出文件（默认跳过）
    #[arg(long)]
    overwrite: bool,

    /// 并行处理的线程数 (1-32)
    #[arg(short = 'j', long, value_name = "N")]
    threads: Option<usize>,

    /// 输出文件大小上限，超过后压缩为 MP3 (MB)
    #[arg(long, value_name = "MB")]
    max_output_mb: Option<u64>,

    /// TOML 配置文件，命令行参数优先
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 不生成 CSV / JSON 报告
    #[arg(long)]
    no_report: bool,

    /// 日志详细程度 (-v 信息, -vv 调试)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

// ================================================================
// 初始化 (Initialization)
// ================================================================

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "audio_extract=warn",
        1 => "audio_extract=info",
        _ => "audio_extract=debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// 合并配置文件与命令行参数。
fn build_config(cli: &Cli, input_dir: PathBuf) -> Result<ExtractorConfig> {
    let mut config = match &cli.config {
        Some(path) => ExtractorConfig::from_file(path)?,
        None => ExtractorConfig::default(),
    };
    config.input_dir = input_dir;

    if let Some(root) = &cli.output {
        config.output = OutputTarget::Directory {
            root: root.clone(),
            keep_structure: !cli.flatten,
        };
    } else if cli.same_folder {
        config.output = OutputTarget::SameFolder;
    } else if cli.flatten {
        if let OutputTarget::Directory { keep_structure, .. } = &mut config.output {
            *keep_structure = false;
        }
    }

    if cli.overwrite {
        config.skip_existing = false;
    }
    if let Some(threads) = cli.threads {
        config.max_threads = threads;
    }
    if let Some(mb) = cli.max_output_mb {
        config.max_output_bytes = mb.saturating_mul(1024 * 1024);
    }
    Ok(config)
}

/// 单一的标准输入读取线程，菜单和运行期控制命令共用。
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

fn install_ctrlc_handler() -> Result<()> {
    ctrlc::set_handler(|| {
        let active = ACTIVE_BATCH
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or(None);
        match active {
            Some(handle) => {
                eprintln!("\n⏹  收到中断信号，正在停止...");
                handle.stop();
            }
            None => std::process::exit(130),
        }
    })
    .context("注册 Ctrl+C 处理函数失败")
}

// ================================================================
// 交互模式功能实现 (Interactive Mode Implementation)
// ================================================================

fn prompt(text: &str, lines: &Receiver<String>) -> Result<String> {
    print!("{text}");
    io::stdout().flush()?;
    lines
        .recv()
        .map(|line| line.trim().to_string())
        .map_err(|_| anyhow!("标准输入已关闭"))
}

fn show_menu() {
    println!("\n--- 🎬 视频音频提取器交互模式 ---");
    println!("1. 🎵 提取视频音频");
    println!("2. 🚪 退出程序");
}

fn interactive_mode(cli: &Cli, lines: &Receiver<String>) -> Result<()> {
    loop {
        show_menu();
        match prompt("请选择一个操作 (1-2): ", lines)?.as_str() {
            "1" => {
                let input = ask_input_dir(lines)?;
                let output = ask_output_target(lines)?;
                let result = build_config(cli, input).and_then(|mut config| {
                    if let Some(output) = output {
                        config.output = output;
                    }
                    run_extraction(config, !cli.no_report, lines)
                });
                if let Err(e) = result {
                    eprintln!("\n❌ 提取过程中发生错误: {e:#}");
                    println!("💡 建议检查文件路径、权限以及 FFmpeg 安装后重试");
                }
            }
            "2" => {
                println!("\n👋 感谢使用视频音频提取器，再见！");
                return Ok(());
            }
            _ => eprintln!("\n❌ 无效的选择，请输入 '1' 或 '2'"),
        }
    }
}

fn ask_input_dir(lines: &Receiver<String>) -> Result<PathBuf> {
    println!("\n📁 视频文件夹路径输入");
    println!("📝 示例: ./videos 或 /Users/username/Movies 或 D:\\Videos");

    loop {
        let input = prompt("\n🎯 请输入视频文件夹路径: ", lines)?;
        if input.is_empty() {
            eprintln!("❌ 路径不能为空，请重新输入");
            continue;
        }

        let path = PathBuf::from(&input);
        if path.is_dir() {
            match path.canonicalize() {
                Ok(canonical) => {
                    println!("✅ 路径验证通过: {}", canonical.display());
                    return Ok(canonical);
                }
                Err(e) => eprintln!("❌ 路径规范化失败: {e}"),
            }
        } else if path.exists() {
            eprintln!("❌ \"{}\" 不是一个文件夹，请提供文件夹路径", path.display());
        } else {
            eprintln!("❌ 路径不存在: \"{}\"", path.display());
        }
    }
}

/// 返回 `None` 表示沿用命令行或配置文件中的输出设置。
fn ask_output_target(lines: &Receiver<String>) -> Result<Option<OutputTarget>> {
    println!("\n📤 输出位置:");
    println!("1. 与视频相同的文件夹");
    println!("2. 指定输出文件夹（保留子目录结构）");
    println!("3. 指定输出文件夹（所有文件放在同一层）");

    loop {
        let choice = prompt("请选择 (1-3，直接回车使用默认设置): ", lines)?;
        let keep_structure = match choice.as_str() {
            "" => return Ok(None),
            "1" => return Ok(Some(OutputTarget::SameFolder)),
            "2" => true,
            "3" => false,
            _ => {
                eprintln!("❌ 无效的选择");
                continue;
            }
        };

        let root = prompt("🎯 请输入输出文件夹路径: ", lines)?;
        if root.is_empty() {
            eprintln!("❌ 路径不能为空");
            continue;
        }
        return Ok(Some(OutputTarget::Directory {
            root: PathBuf::from(root),
            keep_structure,
        }));
    }
}

// ================================================================
// 批处理执行与进度展示 (Batch Execution)
// ================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlCommand {
    Pause,
    Resume,
    Stop,
}

fn parse_command(line: &str) -> Option<ControlCommand> {
    match line.trim().to_lowercase().as_str() {
        "p" | "pause" => Some(ControlCommand::Pause),
        "r" | "resume" => Some(ControlCommand::Resume),
        "q" | "quit" | "stop" => Some(ControlCommand::Stop),
        _ => None,
    }
}

struct BatchBars {
    overall: ProgressBar,
    file: ProgressBar,
}

impl BatchBars {
    fn new() -> Result<Self> {
        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(100));
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% 剩余 {eta} {msg}")?
                .progress_chars("#>- "),
        );
        let file = multi.add(ProgressBar::new(100));
        file.set_style(
            ProgressStyle::default_bar()
                .template("  当前文件 [{bar:40.green/white}] {pos:>3}% {msg}")?
                .progress_chars("=>-"),
        );
        Ok(Self { overall, file })
    }

    fn apply(&self, event: &ExtractEvent, processed: &mut usize, total: &mut usize) {
        match event {
            ExtractEvent::StateChanged(state) => {
                let label = match state {
                    BatchState::Idle => "等待中",
                    BatchState::Scanning => "正在扫描...",
                    BatchState::Running => "处理中 (p 暂停 / q 停止)",
                    BatchState::Paused => "已暂停 (r 恢复 / q 停止)",
                    BatchState::Stopped => "已停止",
                    BatchState::Finished => "已完成",
                };
                self.overall.set_message(label);
            }
            ExtractEvent::ScanCompleted { total: found } => {
                *total = *found;
                self.overall
                    .println(format!("扫描完成，找到 {found} 个视频文件"));
            }
            ExtractEvent::FileStarted { name, .. } => {
                self.file.set_position(0);
                self.file.set_message(name.clone());
            }
            ExtractEvent::FileProgress(pct) => self.file.set_position(u64::from(*pct)),
            ExtractEvent::OverallProgress(pct) => self.overall.set_position(u64::from(*pct)),
            ExtractEvent::FileProcessed(result) => {
                *processed += 1;
                let mark = if result.success { "✅" } else { "❌" };
                let detail = if result.success {
                    result.processing_decision.as_str()
                } else {
                    result.error_msg.as_str()
                };
                self.overall.println(format!(
                    "{mark} [{processed}/{total}] {} - {detail}",
                    result.input_file
                ));
            }
            ExtractEvent::Finished { .. } => {
                self.file.finish_and_clear();
                self.overall.finish();
            }
        }
    }
}

fn run_extraction(config: ExtractorConfig, write_reports: bool, lines: &Receiver<String>) -> Result<()> {
    println!("\n--- ✨ 开始执行提取流程 ---");
    println!("开始时间: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    let started = Instant::now();
    println!("正在扫描文件夹: {}", config.input_dir.display());
    println!("运行中输入 p 回车暂停，r 恢复，q 停止");

    let report_dir = config.report_dir().to_path_buf();
    let bars = BatchBars::new()?;
    let extractor = Extractor::new(config);
    let handle = extractor.handle();
    if let Ok(mut active) = ACTIVE_BATCH.lock() {
        *active = Some(handle.clone());
    }

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let runner = thread::spawn(move || extractor.run(events_tx));

    let (mut processed, mut total) = (0usize, 0usize);
    let mut stdin_closed = false;
    'events: loop {
        select! {
            recv(events_rx) -> event => match event {
                Ok(event) => bars.apply(&event, &mut processed, &mut total),
                Err(_) => break 'events,
            },
            recv(lines) -> line => match line {
                Ok(line) => match parse_command(&line) {
                    Some(ControlCommand::Pause) => handle.pause(),
                    Some(ControlCommand::Resume) => handle.resume(),
                    Some(ControlCommand::Stop) => handle.stop(),
                    None => bars.overall.println("未知命令，可用: p 暂停 / r 恢复 / q 停止"),
                },
                Err(_) => {
                    stdin_closed = true;
                    break 'events;
                }
            },
        }
    }
    if stdin_closed {
        // 标准输入关闭后只等待事件
        for event in events_rx.iter() {
            bars.apply(&event, &mut processed, &mut total);
        }
    }

    if let Ok(mut active) = ACTIVE_BATCH.lock() {
        *active = None;
    }
    let summary = runner
        .join()
        .map_err(|_| anyhow!("批处理线程异常退出"))??;

    finish_batch(&summary, &report_dir, write_reports, started.elapsed())
}

fn finish_batch(
    summary: &BatchSummary,
    report_dir: &std::path::Path,
    write_reports: bool,
    elapsed: Duration,
) -> Result<()> {
    if summary.total == 0 {
        println!("在指定路径下没有找到支持的视频文件。");
        return Ok(());
    }

    let generator = ReportGenerator::new();
    generator.display_summary(&summary.results);

    if write_reports {
        std::fs::create_dir_all(report_dir)
            .with_context(|| format!("无法创建报告目录: {}", report_dir.display()))?;
        let (csv_path, json_path) = generator.write_reports(&summary.results, report_dir)?;
        println!("\n✅ CSV报告已保存到: {}", csv_path.display());
        println!("✅ JSON报告已保存到: {}", json_path.display());
    }

    println!("\n结束时间: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("{}", throughput_line(summary.results.len(), elapsed));
    if summary.stopped {
        println!("--- ⏹  任务已停止，已处理 {} / {} ---", summary.results.len(), summary.total);
    } else {
        println!("--- ✅ 提取流程完成 ---");
    }
    Ok(())
}

/// 总耗时与平均处理速度。
fn throughput_line(processed: usize, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { processed as f64 / secs } else { 0.0 };
    format!("总耗时: {secs:.1}s, 平均速度: {rate:.2} 个文件/秒")
}

// --- 程序入口 ---

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    install_ctrlc_handler()?;

    println!("欢迎使用视频音频提取器 (Rust 版)");
    let lines = spawn_stdin_reader();

    match cli.path.clone() {
        Some(path) => {
            if !path.is_dir() {
                return Err(anyhow!(
                    "错误: 命令行提供的路径 \"{}\" 不是一个有效的文件夹或不存在。",
                    path.display()
                ));
            }
            let config = build_config(&cli, path.canonicalize()?)?;
            run_extraction(config, !cli.no_report, &lines)
        }
        None => interactive_mode(&cli, &lines),
    }
}
