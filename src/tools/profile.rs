//! 扩展层级：`extended.profile_data <path>`，对分隔符表格文件做快速概览

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde_json::Value;

use crate::core::state::ToolTier;
use crate::env::Environment;
use crate::tools::args::{next_token, str_arg};
use crate::tools::schema::parameters_for;
use crate::tools::{Tool, ToolError};

const CANDIDATE_DELIMITERS: &[char] = &[',', '\t', ';', '|'];
const SAMPLE_ROWS: usize = 3;

#[allow(dead_code)]
#[derive(JsonSchema)]
struct ProfileArgs {
    /// 表格文件路径（csv / tsv 等）
    path: String,
}

/// 表格概览
#[derive(Debug, Clone, PartialEq)]
pub struct DataProfile {
    pub delimiter: char,
    pub columns: Vec<String>,
    pub rows: usize,
    /// 每列空值数，与 columns 对齐
    pub empty_fields: Vec<usize>,
    /// 列数与表头不一致的行数
    pub ragged_rows: usize,
    pub sample: Vec<String>,
}

impl DataProfile {
    /// 第一行为表头；分隔符取表头中出现最多的候选字符
    pub fn from_text(text: &str) -> Option<Self> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next()?;
        let delimiter = CANDIDATE_DELIMITERS
            .iter()
            .copied()
            .max_by_key(|d| header.matches(*d).count())
            .filter(|d| header.contains(*d))
            .unwrap_or(',');
        let columns: Vec<String> = header.split(delimiter).map(|c| c.trim().to_string()).collect();

        let mut profile = DataProfile {
            delimiter,
            empty_fields: vec![0; columns.len()],
            columns,
            rows: 0,
            ragged_rows: 0,
            sample: Vec::new(),
        };
        for line in lines {
            profile.rows += 1;
            let fields: Vec<&str> = line.split(delimiter).collect();
            if fields.len() != profile.columns.len() {
                profile.ragged_rows += 1;
            }
            for (i, count) in profile.empty_fields.iter_mut().enumerate() {
                if fields.get(i).map_or(true, |f| f.trim().is_empty()) {
                    *count += 1;
                }
            }
            if profile.sample.len() < SAMPLE_ROWS {
                profile.sample.push(line.to_string());
            }
        }
        Some(profile)
    }

    pub fn render(&self, path: &str) -> String {
        let delimiter = match self.delimiter {
            '\t' => "tab".to_string(),
            c => format!("'{c}'"),
        };
        let mut out = format!(
            "Profile of {path}: {} rows x {} columns (delimiter {delimiter})\n",
            self.rows,
            self.columns.len()
        );
        for (name, empty) in self.columns.iter().zip(&self.empty_fields) {
            out.push_str(&format!("- {name}: {empty} empty\n"));
        }
        if self.ragged_rows > 0 {
            out.push_str(&format!("Rows with mismatched column count: {}\n", self.ragged_rows));
        }
        if !self.sample.is_empty() {
            out.push_str("Sample:\n");
            for row in &self.sample {
                out.push_str(row);
                out.push('\n');
            }
        }
        out.trim_end().to_string()
    }
}

pub struct ProfileDataTool {
    env: Arc<dyn Environment>,
    timeout: Duration,
}

impl ProfileDataTool {
    pub fn new(env: Arc<dyn Environment>, timeout: Duration) -> Self {
        Self { env, timeout }
    }
}

#[async_trait]
impl Tool for ProfileDataTool {
    fn name(&self) -> &str {
        "extended.profile_data"
    }

    fn description(&self) -> &str {
        "Summarize a delimited data file (rows, columns, empty fields, sample). Usage: extended.profile_data <path>"
    }

    fn tier(&self) -> ToolTier {
        ToolTier::Extended
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ProfileArgs>()
    }

    fn parse_args(&self, raw: &str) -> Value {
        let path = next_token(raw).map(|(p, _)| p).unwrap_or_default();
        serde_json::json!({ "path": path })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let path = str_arg(&args, "path").unwrap_or("");
        if path.is_empty() {
            return Err(ToolError::InvalidArguments("missing path".to_string()));
        }
        let text = match self.env.read_file(path, self.timeout).await {
            Ok(t) => t,
            Err(e) => return ToolError::observe_env(&format!("reading file {path}"), e),
        };
        Ok(match DataProfile::from_text(&text) {
            Some(profile) => profile.render(path),
            None => format!("{path} is empty"),
        })
    }
}
