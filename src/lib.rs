//! 批量从视频中提取音频，自动识别并修复伪立体声。

pub mod extractor;
