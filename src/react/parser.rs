//! 动作解析：把模型的自由文本拆成 (thought, action)
//!
//! 优先级：```tool 围栏 > ```bash / ```sh / ```shell 围栏（动作前加 `shell `）>
//! 文本含 "submit"（动作为 `submit`）> 空动作。永不失败。

use std::sync::OnceLock;

use regex::Regex;

/// shell 围栏块动作的前缀
pub const SHELL_INVOCATION: &str = "shell";
pub const SUBMIT_ACTION: &str = "submit";
pub const EXIT_ACTION: &str = "exit";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedAction {
    pub thought: String,
    pub action: String,
}

impl ParsedAction {
    /// 动作首词（小写），用于 exit / submit 判定
    pub fn head(&self) -> String {
        self.action
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase()
    }

    pub fn is_empty(&self) -> bool {
        self.action.trim().is_empty()
    }
}

fn tool_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```tool\b").expect("valid tool fence regex"))
}

fn shell_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:bash|sh|shell)\b").expect("valid shell fence regex"))
}

/// 取围栏内部内容：去掉开头标记，截到下一个 ```（缺失则到结尾），再 trim
fn fenced_body(text: &str, marker_end: usize) -> String {
    let rest = &text[marker_end..];
    let body = match rest.find("```") {
        Some(end) => &rest[..end],
        None => rest,
    };
    body.trim().to_string()
}

pub fn parse_action(text: &str) -> ParsedAction {
    if let Some(m) = tool_fence().find(text) {
        return ParsedAction {
            thought: text[..m.start()].trim().to_string(),
            action: fenced_body(text, m.end()),
        };
    }

    if let Some(m) = shell_fence().find(text) {
        let body = fenced_body(text, m.end());
        let action = if body.is_empty() {
            String::new()
        } else {
            format!("{SHELL_INVOCATION} {body}")
        };
        return ParsedAction {
            thought: text[..m.start()].trim().to_string(),
            action,
        };
    }

    let thought = text.trim().to_string();
    if text.to_lowercase().contains(SUBMIT_ACTION) {
        return ParsedAction {
            thought,
            action: SUBMIT_ACTION.to_string(),
        };
    }

    tracing::debug!("no action found in model output");
    ParsedAction {
        thought,
        action: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_block() {
        let parsed = parse_action("I will read it.\n```tool\nfile read notes.txt\n```\ntrailing");
        assert_eq!(parsed.thought, "I will read it.");
        assert_eq!(parsed.action, "file read notes.txt");
    }

    #[test]
    fn test_tool_block_without_closing_fence() {
        let parsed = parse_action("```tool\nexit   ");
        assert_eq!(parsed.thought, "");
        assert_eq!(parsed.action, "exit");
        assert_eq!(parsed.head(), "exit");
    }

    #[test]
    fn test_tool_block_wins_over_bash() {
        let parsed = parse_action("```bash\nls\n```\n```tool\nsubmit\n```");
        assert_eq!(parsed.action, "submit");
    }

    #[test]
    fn test_bash_block_prefixed_with_shell() {
        let parsed = parse_action("List files first\n```bash\nls -la\n```");
        assert_eq!(parsed.thought, "List files first");
        assert_eq!(parsed.action, "shell ls -la");
    }

    #[test]
    fn test_sh_and_shell_markers() {
        assert_eq!(parse_action("```sh\npwd\n```").action, "shell pwd");
        assert_eq!(parse_action("```shell\necho hi\n```").action, "shell echo hi");
    }

    #[test]
    fn test_submit_keyword() {
        let parsed = parse_action("Everything looks good, I will Submit now.");
        assert_eq!(parsed.action, "submit");
        assert_eq!(parsed.thought, "Everything looks good, I will Submit now.");
    }

    #[test]
    fn test_plain_text_is_empty_action() {
        let parsed = parse_action("  Let me think about this.  ");
        assert_eq!(parsed.thought, "Let me think about this.");
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_empty_bash_block_is_empty_action() {
        assert!(parse_action("```bash\n```").is_empty());
    }
}
