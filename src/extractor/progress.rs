/// 解析 `ffmpeg -progress pipe:1` 输出，把已输出时长换算成 0~100 的百分比。
///
/// 百分比单调递增：只有比上次更大的值才会返回；`progress=end` 总是返回 100。
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    duration_secs: f64,
    last_emitted: u8,
}

impl ProgressTracker {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            last_emitted: 0,
        }
    }

    /// 处理一行进度输出，返回需要通知观察者的新百分比。
    pub fn update(&mut self, line: &str) -> Option<u8> {
        let line = line.trim();

        if let Some(value) = line.strip_prefix("out_time_ms=") {
            // ffmpeg 的 out_time_ms 实际单位是微秒
            let micros: i64 = value.trim().parse().ok()?;
            if self.duration_secs <= 0.0 {
                return None;
            }
            let current_secs = micros as f64 / 1_000_000.0;
            let percent = ((current_secs / self.duration_secs) * 100.0).clamp(0.0, 100.0) as u8;
            if percent > self.last_emitted {
                self.last_emitted = percent;
                return Some(percent);
            }
            return None;
        }

        if line.starts_with("progress=end") {
            self.last_emitted = 100;
            return Some(100);
        }

        None
    }

    pub fn last_emitted(&self) -> u8 {
        self.last_emitted
    }
}
