use anyhow::{anyhow, Context, Result};
use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use which::which;

use super::config::ExtractorConfig;

/// 已定位的外部工具。
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl ToolPaths {
    /// 按顺序查找: 配置中的显式路径 → 系统 PATH → 程序目录下的 `bin/` 与 `resources/`。
    pub fn locate(config: &ExtractorConfig) -> Result<Self> {
        Ok(Self {
            ffmpeg: locate_tool("ffmpeg", config.ffmpeg_path.as_deref())?,
            ffprobe: locate_tool("ffprobe", config.ffprobe_path.as_deref())?,
        })
    }
}

fn locate_tool(name: &str, explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(anyhow!(
            "[E_TOOL_MISSING] 配置的 {name} 路径不存在: {}",
            path.display()
        ));
    }

    if let Ok(path) = which(name) {
        tracing::debug!("在系统 PATH 中找到 {name}: {}", path.display());
        return Ok(path);
    }

    let exe_dir = env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let file_name = if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    };

    let candidates = [
        exe_dir.join("bin").join(&file_name),
        exe_dir.join("resources").join(&file_name),
    ];
    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| {
            anyhow!(
                "[E_TOOL_MISSING] 在系统 PATH 和备用目录 ({}) 中都找不到 {name}。\n请安装 FFmpeg 并确保其位于系统 PATH 中，或将可执行文件放在程序目录的 bin/ 下。",
                exe_dir.display()
            )
        })
}

#[derive(Debug)]
pub struct CommandOutput {
    pub status_ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub status_text: String,
}

/// 在后台线程中读完一个管道，避免子进程因管道写满而阻塞。
pub fn drain_pipe<R: Read + Send + 'static>(pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut reader = pipe;
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

/// 运行外部命令并收集输出，超时后终止子进程。
pub fn run_command(mut command: Command, timeout: Duration) -> Result<CommandOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    tracing::debug!("执行命令: {:?}", command);
    let mut child = command.spawn().context("[E_EXEC_SPAWN] 启动外部命令失败")?;
    let (Some(stdout_pipe), Some(stderr_pipe)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(anyhow!("[E_EXEC_PIPE] 无法捕获子进程输出"));
    };

    let stdout_thread = drain_pipe(stdout_pipe);
    let stderr_thread = drain_pipe(stderr_pipe);

    let status = match wait_with_timeout(&mut child, timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            terminate_and_reap(&mut child, stdout_thread, stderr_thread);
            return Err(anyhow!(
                "[E_TIMEOUT] 外部命令执行超时 (>{}s)",
                timeout.as_secs()
            ));
        }
        Err(err) => {
            terminate_and_reap(&mut child, stdout_thread, stderr_thread);
            return Err(err);
        }
    };

    let stdout_bytes = stdout_thread
        .join()
        .map_err(|_| anyhow!("[E_EXEC_STDOUT] 读取 stdout 线程崩溃"))?;
    let stderr_bytes = stderr_thread
        .join()
        .map_err(|_| anyhow!("[E_EXEC_STDERR] 读取 stderr 线程崩溃"))?;

    Ok(CommandOutput {
        status_ok: status.success(),
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
        status_text: status.to_string(),
    })
}

/// 终止子进程并回收，同时等待两个读管道线程结束。
fn terminate_and_reap(
    child: &mut Child,
    stdout_thread: JoinHandle<Vec<u8>>,
    stderr_thread: JoinHandle<Vec<u8>>,
) {
    let _ = child.kill();
    let _ = child.wait();
    let _ = stdout_thread.join();
    let _ = stderr_thread.join();
}

/// `None` 表示超时。
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().context("[E_EXEC_WAIT] 等待子进程失败")? {
            return Ok(Some(status));
        }
        if start.elapsed() > timeout {
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(25));
    }
}

/// 解析 ffmpeg 输出中的数值，兼容 `inf` / `-inf`。
pub fn parse_float_token(token: &str) -> Option<f64> {
    let text = token.trim().to_ascii_lowercase();
    match text.as_str() {
        "inf" | "+inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        "nan" => None,
        _ => text.parse::<f64>().ok(),
    }
}

/// ffmpeg 命令行中的秒数参数。
pub fn format_seconds(seconds: f64) -> String {
    format!("{seconds:.3}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_float_token() {
        assert_eq!(parse_float_token(" -20.5 "), Some(-20.5));
        assert_eq!(parse_float_token("-inf"), Some(f64::NEG_INFINITY));
        assert_eq!(parse_float_token("nan"), None);
        assert_eq!(parse_float_token("abc"), None);
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(10.0), "10.000");
        assert_eq!(format_seconds(45.25), "45.250");
    }

    #[test]
    fn test_explicit_missing_tool_is_error() {
        let mut config = ExtractorConfig::default();
        config.ffmpeg_path = Some(PathBuf::from("/definitely/not/here/ffmpeg"));
        let err = ToolPaths::locate(&config).expect_err("missing tool must fail");
        assert!(err.to_string().contains("E_TOOL_MISSING"));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_captures_output() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo out; echo err 1>&2");
        let output = run_command(command, Duration::from_secs(5)).expect("run sh");
        assert!(output.status_ok);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_times_out() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("sleep 5");
        let err = run_command(command, Duration::from_millis(200)).expect_err("should time out");
        assert!(err.to_string().contains("E_TIMEOUT"));
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_and_reap_kills_child_and_joins_readers() {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("spawn sleep");
        let stdout_thread = drain_pipe(child.stdout.take().expect("stdout"));
        let stderr_thread = drain_pipe(child.stderr.take().expect("stderr"));

        let started = Instant::now();
        terminate_and_reap(&mut child, stdout_thread, stderr_thread);

        assert!(started.elapsed() < Duration::from_secs(10));
        let status = child.try_wait().expect("try_wait").expect("child reaped");
        assert!(!status.success());
    }
}
