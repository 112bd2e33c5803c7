//! 动作参数提取的公共小工具：按词切分（支持引号）、保留剩余原文、shell 转义

use serde_json::Value;

/// 取出第一个词，返回 (词, 剩余原文)。'…' 或 "…" 包裹的词可以含空格，引号本身被去掉。
pub fn next_token(input: &str) -> Option<(String, &str)> {
    let input = input.trim_start();
    let first = input.chars().next()?;
    if first == '"' || first == '\'' {
        let body = &input[1..];
        return Some(match body.find(first) {
            Some(end) => (body[..end].to_string(), &body[end + 1..]),
            None => (body.to_string(), ""),
        });
    }
    let end = input.find(char::is_whitespace).unwrap_or(input.len());
    Some((input[..end].to_string(), &input[end..]))
}

/// 取出至多 n 个词，剩余部分去掉开头空白后原样返回
pub fn take_tokens(input: &str, n: usize) -> (Vec<String>, &str) {
    let mut tokens = Vec::with_capacity(n);
    let mut rest = input;
    while tokens.len() < n {
        match next_token(rest) {
            Some((token, remaining)) => {
                tokens.push(token);
                rest = remaining;
            }
            None => break,
        }
    }
    (tokens, rest.trim_start())
}

/// 单引号转义，供拼接 shell 命令
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

pub fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_token_plain_and_quoted() {
        assert_eq!(next_token("  read a.txt"), Some(("read".to_string(), " a.txt")));
        assert_eq!(
            next_token("\"old value\" new"),
            Some(("old value".to_string(), " new"))
        );
        assert_eq!(next_token("'unterminated"), Some(("unterminated".to_string(), "")));
        assert_eq!(next_token("   "), None);
    }

    #[test]
    fn test_take_tokens_keeps_rest_verbatim() {
        let (tokens, rest) = take_tokens("write notes.txt line one\n  line two", 2);
        assert_eq!(tokens, vec!["write", "notes.txt"]);
        assert_eq!(rest, "line one\n  line two");

        let (tokens, rest) = take_tokens("GET", 2);
        assert_eq!(tokens, vec!["GET"]);
        assert_eq!(rest, "");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
