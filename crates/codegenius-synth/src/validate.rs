//! Structural checks applied to generated content before acceptance. The
//! gate is deliberately syntax-level: balanced delimiters, sane indentation
//! and the presence of declared exports. Compiling or type-checking the
//! result is out of scope.

use codegenius_core::FileNode;

/// Strip markdown code fences the model tends to wrap replies in. When the
/// reply contains fenced blocks, only the fenced content survives; prose
/// around it is dropped.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.contains("```") {
        return trimmed.to_string();
    }

    let mut body = Vec::new();
    let mut in_fence = false;
    for line in trimmed.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            body.push(line);
        }
    }
    let joined = body.join("\n");
    if joined.trim().is_empty() {
        // unbalanced or decorative fences: keep everything except the fence
        // lines themselves
        trimmed
            .lines()
            .filter(|line| !line.trim_start().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        joined
    }
}

/// Run the gate. Returns the list of failure reasons, which the generator
/// feeds back into the retry prompt.
pub fn validate(content: &str, node: &FileNode) -> Result<(), Vec<String>> {
    let mut reasons = Vec::new();

    if content.trim().is_empty() {
        reasons.push("generated content is empty".to_string());
        return Err(reasons);
    }

    // markdown is prose; only the emptiness and export checks apply
    let is_markdown = node.path.ends_with(".md");
    // Rust uses single quotes for lifetimes and char literals, not strings
    let single_quote_strings = !node.path.ends_with(".rs");

    if !is_markdown {
        if let Err(reason) = check_balance(content, single_quote_strings) {
            reasons.push(reason);
        }
        if let Err(reason) = check_indentation(content) {
            reasons.push(reason);
        }
    }
    for name in &node.declared_exports {
        if !content.contains(name.as_str()) {
            reasons.push(format!("declared export '{}' is missing from the output", name));
        }
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(reasons)
    }
}

#[derive(PartialEq)]
enum Mode {
    Normal,
    LineComment,
    Str { delim: char, triple: bool },
}

/// Bracket and quote balance, tracked outside string literals and line
/// comments so apostrophes in prose do not trip the gate. When
/// `single_quote_strings` is false, a `'` only opens a char literal of the
/// `'x'` or `'\x'` shape; anything else (a lifetime marker) is plain text.
fn check_balance(content: &str, single_quote_strings: bool) -> Result<(), String> {
    let chars: Vec<char> = content.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut mode = Mode::Normal;
    let mut escaped = false;
    let mut line = 1;

    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '\n' {
            line += 1;
            if mode == Mode::LineComment {
                mode = Mode::Normal;
            }
            i += 1;
            continue;
        }

        match mode {
            Mode::Normal => match ch {
                '#' => mode = Mode::LineComment,
                '/' if chars.get(i + 1) == Some(&'/') => {
                    mode = Mode::LineComment;
                    i += 1;
                }
                '\'' if !single_quote_strings => {
                    if chars.get(i + 1) == Some(&'\\') && chars.get(i + 3) == Some(&'\'') {
                        i += 3;
                    } else if chars.get(i + 2) == Some(&'\'') && chars.get(i + 1) != Some(&'\n') {
                        i += 2;
                    }
                }
                '"' | '\'' => {
                    let triple = chars.get(i + 1) == Some(&ch) && chars.get(i + 2) == Some(&ch);
                    if triple {
                        i += 2;
                    }
                    mode = Mode::Str { delim: ch, triple };
                }
                '(' | '[' | '{' => stack.push((ch, line)),
                ')' | ']' | '}' => {
                    let expected = match ch {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, open_line)) => {
                            return Err(format!(
                                "mismatched '{}' at line {} (last open was '{}' from line {})",
                                ch, line, open, open_line
                            ));
                        }
                        None => {
                            return Err(format!("unmatched '{}' at line {}", ch, line));
                        }
                    }
                }
                _ => {}
            },
            Mode::LineComment => {}
            Mode::Str { delim, triple } => {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == delim {
                    if triple {
                        if chars.get(i + 1) == Some(&delim) && chars.get(i + 2) == Some(&delim) {
                            i += 2;
                            mode = Mode::Normal;
                        }
                    } else {
                        mode = Mode::Normal;
                    }
                }
            }
        }
        i += 1;
    }

    if let Mode::Str { delim, .. } = mode {
        return Err(format!("unterminated string literal ({})", delim));
    }
    if let Some((open, open_line)) = stack.pop() {
        return Err(format!("unclosed '{}' opened at line {}", open, open_line));
    }
    Ok(())
}

/// Reject leading whitespace that mixes tabs and spaces on one line; the most
/// common indentation corruption in model output.
fn check_indentation(content: &str) -> Result<(), String> {
    for (idx, line) in content.lines().enumerate() {
        let leading: Vec<char> = line.chars().take_while(|c| c.is_whitespace()).collect();
        if leading.contains(&'\t') && leading.contains(&' ') {
            return Err(format!("mixed tab/space indentation at line {}", idx + 1));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn node_with_exports(names: &[&str]) -> FileNode {
        node_at("app/models.py", names)
    }

    fn node_at(path: &str, names: &[&str]) -> FileNode {
        FileNode {
            path: path.into(),
            responsibility: "Data models".into(),
            declared_exports: names.iter().map(|n| n.to_string()).collect(),
            depends_on: BTreeSet::new(),
        }
    }

    #[test]
    fn accepts_balanced_content_with_exports() {
        let content = "class CrudPosts:\n    def save(self):\n        return {'ok': True}\n";
        assert!(validate(content, &node_with_exports(&["CrudPosts"])).is_ok());
    }

    #[test]
    fn rejects_unbalanced_brackets() {
        let content = "def broken(:\n    return [1, 2\n";
        let reasons = validate(content, &node_with_exports(&[])).unwrap_err();
        assert!(reasons.iter().any(|r| r.contains("unclosed")));
    }

    #[test]
    fn rejects_missing_export() {
        let content = "def something_else():\n    pass\n";
        let reasons = validate(content, &node_with_exports(&["CrudPosts"])).unwrap_err();
        assert!(reasons.iter().any(|r| r.contains("CrudPosts")));
    }

    #[test]
    fn rejects_empty_output() {
        let reasons = validate("   \n", &node_with_exports(&["CrudPosts"])).unwrap_err();
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("empty"));
    }

    #[test]
    fn apostrophes_in_comments_do_not_trip_the_gate() {
        let content = "# don't touch this\ndef ok():\n    return 1\n";
        assert!(validate(content, &node_with_exports(&["ok"])).is_ok());
        let content = "// it's fine\nfn ok() -> i32 { 1 }\n";
        assert!(validate(content, &node_with_exports(&["ok"])).is_ok());
    }

    #[test]
    fn brackets_inside_strings_are_ignored() {
        let content = "label = \"(unclosed in text\"\n";
        assert!(validate(content, &node_with_exports(&[])).is_ok());
    }

    #[test]
    fn triple_quoted_strings_span_lines() {
        let content = "def doc():\n    \"\"\"It's a (docstring.\n    Still going.\"\"\"\n    return 0\n";
        assert!(validate(content, &node_with_exports(&["doc"])).is_ok());
    }

    #[test]
    fn rust_lifetimes_are_not_string_delimiters() {
        let content = "pub fn first<'a>(items: &'a [String]) -> Option<&'a String> {\n    items.first()\n}\n";
        assert!(validate(content, &node_at("src/lib.rs", &["first"])).is_ok());
    }

    #[test]
    fn rust_char_literals_still_mask_brackets() {
        let content = "fn open() -> char {\n    '('\n}\n";
        assert!(validate(content, &node_at("src/lib.rs", &["open"])).is_ok());
        let content = "fn newline() -> char {\n    '\\n'\n}\n";
        assert!(validate(content, &node_at("src/lib.rs", &["newline"])).is_ok());
    }

    #[test]
    fn python_single_quoted_strings_still_mask_brackets() {
        let content = "label = 'text with ('\n";
        assert!(validate(content, &node_with_exports(&[])).is_ok());
    }

    #[test]
    fn markdown_is_only_checked_for_presence() {
        let content = "# My project\n\nIt's great (really.\n";
        assert!(validate(content, &node_at("README.md", &[])).is_ok());
        assert!(validate("  \n", &node_at("README.md", &[])).is_err());
    }

    #[test]
    fn rejects_mixed_indentation() {
        let content = "def f():\n\t  return 1\n";
        let reasons = validate(content, &node_with_exports(&[])).unwrap_err();
        assert!(reasons.iter().any(|r| r.contains("indentation")));
    }

    #[test]
    fn strips_markdown_fences() {
        let reply = "Here is the file:\n```python\ndef ok():\n    return 1\n```\nHope this helps!";
        assert_eq!(strip_code_fences(reply), "def ok():\n    return 1");
    }

    #[test]
    fn keeps_unfenced_replies_verbatim() {
        assert_eq!(strip_code_fences("def ok():\n    pass"), "def ok():\n    pass");
    }
}
