//! 批处理共享状态、暂停/停止控制与观察者事件。
//!
//! 工作线程共同修改的字段（阶段、活跃文件、计数、运行中的子进程）都放在同一个
//! `SharedState` 中，由一把锁保护。锁只在更新字段时持有，绝不跨越子进程调用。

use crossbeam_channel::Sender;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use super::model::ProcessResult;

/// 批处理生命周期: `Idle → Scanning → Running ⇄ Paused → (Stopped | Finished)`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Scanning,
    Running,
    Paused,
    Stopped,
    Finished,
}

/// 发往界面层的单向通知。
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractEvent {
    StateChanged(BatchState),
    ScanCompleted { total: usize },
    FileStarted { path: PathBuf, name: String },
    /// 当前文件的百分比。
    FileProgress(u8),
    /// 按文件数加权的整体百分比。
    OverallProgress(u8),
    FileProcessed(ProcessResult),
    Finished { aborted: bool },
}

pub type EventSink = Sender<ExtractEvent>;

/// 发送事件，不阻塞；接收端已关闭时静默忽略。
pub fn emit(sink: &EventSink, event: ExtractEvent) {
    let _ = sink.send(event);
}

#[derive(Debug)]
struct ActiveProcess {
    id: u64,
    child: Arc<Mutex<Child>>,
}

#[derive(Debug)]
struct SharedState {
    phase: BatchState,
    current_file: Option<PathBuf>,
    processed: usize,
    total: usize,
    active_processes: Vec<ActiveProcess>,
    next_process_id: u64,
}

#[derive(Debug)]
pub struct BatchControl {
    state: Mutex<SharedState>,
    stopped: AtomicBool,
    paused: Mutex<bool>,
    resume_signal: Condvar,
}

impl Default for BatchControl {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BatchControl {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SharedState {
                phase: BatchState::Idle,
                current_file: None,
                processed: 0,
                total: 0,
                active_processes: Vec::new(),
                next_process_id: 0,
            }),
            stopped: AtomicBool::new(false),
            paused: Mutex::new(false),
            resume_signal: Condvar::new(),
        }
    }

    // --- 控制 ---

    pub fn pause(&self) {
        *lock(&self.paused) = true;
        let mut state = lock(&self.state);
        if state.phase == BatchState::Running {
            state.phase = BatchState::Paused;
        }
    }

    pub fn resume(&self) {
        *lock(&self.paused) = false;
        self.resume_signal.notify_all();
        let mut state = lock(&self.state);
        if state.phase == BatchState::Paused {
            state.phase = BatchState::Running;
        }
    }

    /// 请求停止并终止所有运行中的子进程。
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.resume_signal.notify_all();

        let children: Vec<Arc<Mutex<Child>>> = lock(&self.state)
            .active_processes
            .iter()
            .map(|p| Arc::clone(&p.child))
            .collect();
        for child in children {
            let _ = lock(&child).kill();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        *lock(&self.paused)
    }

    /// 暂停期间阻塞，每隔 `poll` 重新检查一次。已请求停止时返回 `false`。
    pub fn wait_while_paused(&self, poll: Duration) -> bool {
        let mut paused = lock(&self.paused);
        while *paused && !self.is_stopped() {
            paused = self
                .resume_signal
                .wait_timeout(paused, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        !self.is_stopped()
    }

    // --- 批处理计数 ---

    pub fn phase(&self) -> BatchState {
        lock(&self.state).phase
    }

    pub fn set_phase(&self, phase: BatchState) {
        lock(&self.state).phase = phase;
    }

    /// 进入 `Running`；扫描期间收到暂停请求时进入 `Paused`。
    pub fn begin_run(&self, total: usize) -> BatchState {
        let paused = self.is_paused();
        let mut state = lock(&self.state);
        state.total = total;
        state.processed = 0;
        state.current_file = None;
        state.phase = if paused {
            BatchState::Paused
        } else {
            BatchState::Running
        };
        state.phase
    }

    pub fn announce(&self, path: &Path) {
        lock(&self.state).current_file = Some(path.to_path_buf());
    }

    pub fn is_active(&self, path: &Path) -> bool {
        lock(&self.state).current_file.as_deref() == Some(path)
    }

    /// `path` 的进度对应的整体百分比；`path` 已不是当前文件时返回 `None`，该进度被丢弃。
    pub fn file_progress(&self, path: &Path, file_percent: u8) -> Option<u8> {
        let state = lock(&self.state);
        if state.current_file.as_deref() != Some(path) {
            return None;
        }
        Some(overall_percent(state.processed, file_percent, state.total))
    }

    /// 记录一个完成的文件，返回 `(已处理数, 整体百分比)`。
    pub fn complete_file(&self) -> (usize, u8) {
        let mut state = lock(&self.state);
        state.processed += 1;
        (
            state.processed,
            overall_percent(state.processed, 0, state.total),
        )
    }

    pub fn processed(&self) -> usize {
        lock(&self.state).processed
    }

    // --- 子进程 ---

    /// 登记运行中的子进程以便 `stop` 终止它，返回的 guard 释放时自动注销。
    pub fn register_process(&self, child: Child) -> ProcessGuard<'_> {
        let child = Arc::new(Mutex::new(child));
        let mut state = lock(&self.state);
        let id = state.next_process_id;
        state.next_process_id += 1;
        state.active_processes.push(ActiveProcess {
            id,
            child: Arc::clone(&child),
        });
        ProcessGuard {
            control: self,
            id,
            child,
        }
    }

    pub fn active_process_count(&self) -> usize {
        lock(&self.state).active_processes.len()
    }

    fn unregister_process(&self, id: u64) {
        lock(&self.state).active_processes.retain(|p| p.id != id);
    }
}

fn overall_percent(processed: usize, file_percent: u8, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let fraction = (processed as f64 + f64::from(file_percent) / 100.0) / total as f64;
    (fraction * 100.0).clamp(0.0, 100.0) as u8
}

#[derive(Debug)]
pub struct ProcessGuard<'a> {
    control: &'a BatchControl,
    id: u64,
    child: Arc<Mutex<Child>>,
}

impl ProcessGuard<'_> {
    pub fn kill(&self) {
        let _ = lock(&self.child).kill();
    }

    /// 轮询等待退出，不在阻塞等待期间持锁，`BatchControl::stop` 仍可终止子进程。
    pub fn wait(&self, poll: Duration) -> std::io::Result<ExitStatus> {
        loop {
            {
                let mut child = lock(&self.child);
                if let Some(status) = child.try_wait()? {
                    return Ok(status);
                }
                if self.control.is_stopped() {
                    let _ = child.kill();
                }
            }
            thread::sleep(poll);
        }
    }
}

impl Drop for ProcessGuard<'_> {
    fn drop(&mut self) {
        self.control.unregister_process(self.id);
    }
}
