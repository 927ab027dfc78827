// ----------------------------------------------------------------
// 模块: extractor
// 描述: 视频音频提取核心。探测 → 检测 → 决策 → 转码/复制 → 压缩，
//      由 dispatcher 以线程池批量驱动，结果经由事件通道通知界面层。
// ----------------------------------------------------------------

pub mod classify;
pub mod config;
pub mod control;
pub mod decision;
pub mod detect;
pub mod dispatcher;
pub mod ffmpeg;
pub mod model;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod report;
pub mod safe_io;

#[cfg(all(test, unix))]
pub(crate) mod test_support;

pub use config::{ExtractorConfig, OutputTarget};
pub use control::{BatchState, EventSink, ExtractEvent};
pub use dispatcher::{BatchSummary, Extractor, ExtractorHandle};
pub use model::{AudioType, ProcessResult};
pub use report::ReportGenerator;
