use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::model::{AudioType, ProcessResult};
use super::safe_io;

pub const CSV_REPORT_NAME: &str = "audio_extract_report.csv";
pub const JSON_REPORT_NAME: &str = "audio_extract_results.json";

#[derive(Debug, Default)]
pub struct ReportGenerator;

impl ReportGenerator {
    pub fn new() -> Self {
        Self
    }

    /// 在 `report_dir` 下写出 CSV 和 JSON 两份报告，返回它们的路径。
    pub fn write_reports(
        &self,
        results: &[ProcessResult],
        report_dir: &Path,
    ) -> Result<(PathBuf, PathBuf)> {
        let csv_path = report_dir.join(CSV_REPORT_NAME);
        let json_path = report_dir.join(JSON_REPORT_NAME);
        self.generate_csv_report(results, &csv_path)?;
        self.generate_json_report(results, &json_path)?;
        Ok((csv_path, json_path))
    }

    /// CSV 报告：失败记录在前，其余按输入路径排序。
    pub fn generate_csv_report<P: AsRef<Path>>(
        &self,
        results: &[ProcessResult],
        output_path: P,
    ) -> Result<()> {
        let mut sorted: Vec<&ProcessResult> = results.iter().collect();
        sorted.sort_by(|a, b| {
            a.success
                .cmp(&b.success)
                .then_with(|| a.input_file.cmp(&b.input_file))
        });

        let mut buffer: Vec<u8> = Vec::new();
        {
            let mut writer = WriterBuilder::new()
                .has_headers(true)
                .from_writer(&mut buffer);
            for result in sorted {
                writer
                    .serialize(CsvRecord::from_result(result))
                    .context("写入CSV记录失败")?;
            }
            writer.flush().context("刷新CSV缓冲失败")?;
        }

        safe_io::atomic_write_bytes(output_path.as_ref(), &buffer)?;
        tracing::info!("CSV报告已保存到: {}", output_path.as_ref().display());
        Ok(())
    }

    /// JSON 报告：按处理完成顺序输出的结果数组。
    pub fn generate_json_report<P: AsRef<Path>>(
        &self,
        results: &[ProcessResult],
        output_path: P,
    ) -> Result<()> {
        let content = serde_json::to_string_pretty(results).context("序列化JSON报告失败")?;
        safe_io::atomic_write_string(output_path.as_ref(), &content)?;
        tracing::info!("JSON报告已保存到: {}", output_path.as_ref().display());
        Ok(())
    }

    pub fn display_summary(&self, results: &[ProcessResult]) {
        if results.is_empty() {
            println!("没有可显示的处理结果。");
            return;
        }

        println!("\n--- 📊 提取结果摘要 ---");
        self.display_type_distribution(results);
        self.display_statistics(results);
        self.display_failures(results, 10);
    }

    fn display_type_distribution(&self, results: &[ProcessResult]) {
        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for result in results.iter().filter(|r| r.success) {
            *counts.entry(type_label(result.audio_type)).or_insert(0) += 1;
        }
        if counts.is_empty() {
            return;
        }

        println!("\n🎧 音频类型分布:");
        for (label, count) in &counts {
            println!(" - {label}: {count} 个文件");
        }
    }

    fn display_statistics(&self, results: &[ProcessResult]) {
        let total = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        let copied = results.iter().filter(|r| r.was_copied_directly).count();
        let fixed = results
            .iter()
            .filter(|r| r.success && r.audio_type.is_pseudo_stereo())
            .count();
        let total_secs: f64 = results.iter().map(|r| r.processing_time).sum();

        println!("\n📈 处理统计:");
        println!(" - 总文件数: {total}");
        println!(" - 成功: {succeeded}");
        println!(" - 失败: {}", total - succeeded);
        println!(" - 直接复制: {copied}");
        println!(" - 声道修复: {fixed}");
        println!(" - 累计处理耗时: {total_secs:.1}s");
    }

    fn display_failures(&self, results: &[ProcessResult], max_rows: usize) {
        let failures: Vec<&ProcessResult> = results.iter().filter(|r| !r.success).collect();
        if failures.is_empty() {
            return;
        }

        println!("\n⚠️  失败文件 (共 {} 个):", failures.len());
        for result in failures.iter().take(max_rows) {
            let filename = Path::new(&result.input_file)
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("Unknown");
            println!(
                " - {}: {}",
                sanitize_for_terminal(filename),
                sanitize_for_terminal(&result.error_msg)
            );
        }
        if failures.len() > max_rows {
            println!(" ... 其余 {} 个见报告文件", failures.len() - max_rows);
        }
    }
}

fn type_label(audio_type: AudioType) -> &'static str {
    match audio_type {
        AudioType::Unknown => "未知",
        AudioType::NoAudio => "无声",
        AudioType::PseudoStereoLeft => "伪立体声(仅左声道)",
        AudioType::PseudoStereoRight => "伪立体声(仅右声道)",
        AudioType::TrueStereo => "真立体声",
        AudioType::Mono => "单声道",
    }
}

#[derive(Debug, Serialize)]
struct CsvRecord<'a> {
    #[serde(rename = "状态")]
    status: &'static str,
    #[serde(rename = "输入文件")]
    input_file: &'a str,
    #[serde(rename = "输出文件")]
    output_file: &'a str,
    #[serde(rename = "音频类型")]
    audio_type: &'static str,
    #[serde(rename = "左声道(dB)")]
    left_volume: f64,
    #[serde(rename = "右声道(dB)")]
    right_volume: f64,
    #[serde(rename = "直接复制")]
    was_copied_directly: bool,
    #[serde(rename = "处理决策")]
    processing_decision: &'a str,
    #[serde(rename = "耗时(秒)")]
    processing_time: String,
    #[serde(rename = "错误信息")]
    error_msg: &'a str,
}

impl<'a> CsvRecord<'a> {
    fn from_result(result: &'a ProcessResult) -> Self {
        Self {
            status: if result.success { "成功" } else { "失败" },
            input_file: &result.input_file,
            output_file: &result.output_file,
            audio_type: result.audio_type.as_str(),
            left_volume: result.left_volume,
            right_volume: result.right_volume,
            was_copied_directly: result.was_copied_directly,
            processing_decision: &result.processing_decision,
            processing_time: format!("{:.2}", result.processing_time),
            error_msg: &result.error_msg,
        }
    }
}

fn sanitize_for_terminal(input: &str) -> String {
    input
        .chars()
        .filter(|ch| {
            let c = *ch as u32;
            c == 0x09 || c == 0x20 || (0x21..=0x7e).contains(&c) || c >= 0xa0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn copied_result(input: &str) -> ProcessResult {
        ProcessResult {
            success: true,
            input_file: input.to_string(),
            output_file: input.replace(".mp4", ".aac"),
            error_msg: String::new(),
            processing_time: 1.25,
            audio_type: AudioType::TrueStereo,
            left_volume: -20.0,
            right_volume: -21.0,
            was_copied_directly: true,
            processing_decision: "直接复制音频流".to_string(),
        }
    }

    #[test]
    fn test_csv_report_lists_failures_first() {
        let dir = TempDir::new().expect("tempdir");
        let results = vec![
            copied_result("/v/a.mp4"),
            ProcessResult::early_failure("/v/b.mp4", "无法获取音频流信息", 0.1),
        ];

        let path = dir.path().join(CSV_REPORT_NAME);
        ReportGenerator::new()
            .generate_csv_report(&results, &path)
            .expect("csv");

        let content = std::fs::read_to_string(&path).expect("read csv");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("状态,输入文件,输出文件,音频类型"));
        assert!(lines[1].starts_with("失败,/v/b.mp4"));
        assert!(lines[2].contains("true_stereo"));
        assert!(lines[2].contains("1.25"));
    }

    #[test]
    fn test_json_report_uses_camel_case_fields() {
        let dir = TempDir::new().expect("tempdir");
        let results = vec![copied_result("/v/a.mp4")];

        let (csv_path, json_path) = ReportGenerator::new()
            .write_reports(&results, dir.path())
            .expect("reports");
        assert!(csv_path.exists());

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(json_path).expect("read json"))
                .expect("valid json");
        let first = &value[0];
        assert_eq!(first["inputFile"], "/v/a.mp4");
        assert_eq!(first["wasCopiedDirectly"], true);
        assert_eq!(first["audioType"], "true_stereo");
        assert_eq!(first["processingDecision"], "直接复制音频流");
    }

    #[test]
    fn test_display_summary_handles_empty_and_mixed() {
        let generator = ReportGenerator::new();
        generator.display_summary(&[]);
        generator.display_summary(&[
            copied_result("/v/a.mp4"),
            ProcessResult::early_failure("/v/b\u{7}.mp4", "失败", 0.0),
        ]);
    }

    #[test]
    fn test_sanitize_strips_control_characters() {
        assert_eq!(sanitize_for_terminal("a\u{1b}[31mb"), "a[31mb");
        assert_eq!(sanitize_for_terminal("中文 名称"), "中文 名称");
    }
}
