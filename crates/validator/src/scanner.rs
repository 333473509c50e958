use crate::rules::RuleSet;
use toolforge_core::ValidationFinding;

const MAX_SCAN_BYTES: usize = 512 * 1024;

#[derive(Default)]
struct StripState {
    triple: Option<char>,
}

/// Replace string literals and comments with blanks so needles only match
/// actual code. Tracks triple-quoted strings across lines.
fn strip_noise(line: &str, state: &mut StripState) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;

    while i < chars.len() {
        if let Some(q) = state.triple {
            if chars[i] == q && chars.get(i + 1) == Some(&q) && chars.get(i + 2) == Some(&q) {
                state.triple = None;
                i += 3;
            } else {
                i += 1;
            }
            continue;
        }

        let c = chars[i];
        match c {
            '#' => break,
            '"' | '\'' => {
                if chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c) {
                    state.triple = Some(c);
                    out.push(' ');
                    i += 3;
                } else {
                    out.push(' ');
                    i += 1;
                    while i < chars.len() {
                        if chars[i] == '\\' {
                            i += 2;
                        } else if chars[i] == c {
                            i += 1;
                            break;
                        } else {
                            i += 1;
                        }
                    }
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Boundary-aware needle search. A trailing `*` makes the needle a prefix
/// match; a trailing `(` or `.` already is its own right boundary.
fn needle_hits(code: &str, needle: &str) -> bool {
    let (pat, prefix) = match needle.strip_suffix('*') {
        Some(p) => (p, true),
        None => (needle, false),
    };
    if pat.is_empty() {
        return false;
    }

    let mut start = 0;
    while let Some(pos) = code[start..].find(pat) {
        let at = start + pos;
        let before_ok = code[..at]
            .chars()
            .next_back()
            .map(|c| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(true);
        let end = at + pat.len();
        let after_ok = prefix
            || pat.ends_with('(')
            || pat.ends_with('.')
            || code[end..]
                .chars()
                .next()
                .map(|c| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(true);
        if before_ok && after_ok {
            return true;
        }
        start = at + 1;
    }
    false
}

fn is_top_level(code: &str) -> bool {
    !code.starts_with(' ') && !code.starts_with('\t')
}

/// Screen candidate source against the deny rules. Pure and total: any
/// input terminates in one pass, and malformed source yields Block findings
/// instead of a parse failure. Matches inside strings and comments are
/// ignored.
pub fn validate(source: &str, rules: &RuleSet) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();

    if source.len() > MAX_SCAN_BYTES {
        findings.push(ValidationFinding::block(
            "syntax/oversized",
            None,
            format!("source exceeds {} bytes", MAX_SCAN_BYTES),
        ));
        return findings;
    }

    let mut state = StripState::default();
    let mut depth: i64 = 0;
    let mut unbalanced_line = None;
    let mut first_def: Option<usize> = None;

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let code = strip_noise(raw, &mut state);

        for rule in &rules.deny {
            for needle in &rule.needles {
                if needle_hits(&code, needle) {
                    findings.push(ValidationFinding::block(
                        &rule.id,
                        Some(line_no),
                        format!("{}: {}", needle.trim_end_matches('*'), rule.message),
                    ));
                }
            }
        }

        for c in code.chars() {
            match c {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => {
                    depth -= 1;
                    if depth < 0 && unbalanced_line.is_none() {
                        unbalanced_line = Some(line_no);
                    }
                }
                _ => {}
            }
        }

        let t = code.trim_start();
        if is_top_level(&code)
            && (t.starts_with("def ") || t.starts_with("async def "))
            && first_def.is_none()
        {
            first_def = Some(idx);
        }
    }

    if state.triple.is_some() {
        findings.push(ValidationFinding::block(
            "syntax/string",
            None,
            "unterminated string literal",
        ));
    }
    if let Some(line) = unbalanced_line {
        findings.push(ValidationFinding::block(
            "syntax/brackets",
            Some(line),
            "unbalanced brackets",
        ));
    } else if depth != 0 {
        findings.push(ValidationFinding::block(
            "syntax/brackets",
            None,
            "unbalanced brackets",
        ));
    }

    match first_def {
        None => findings.push(ValidationFinding::block(
            "syntax/no-def",
            None,
            "no top-level function definition found",
        )),
        Some(def_idx) => append_style_findings(source, def_idx, &mut findings),
    }

    findings
}

fn append_style_findings(source: &str, def_idx: usize, findings: &mut Vec<ValidationFinding>) {
    let lines: Vec<&str> = source.lines().collect();
    let def_line = lines[def_idx];

    if let (Some(open), Some(close)) = (def_line.find('('), def_line.rfind(')')) {
        if close > open {
            let params = &def_line[open + 1..close];
            let has_params = params.chars().any(|c| !c.is_whitespace());
            if has_params && !params.contains(':') {
                findings.push(ValidationFinding::warn(
                    "style/annotations",
                    Some(def_idx + 1),
                    "parameters lack type annotations",
                ));
            }
        }
    }

    let body_first = lines
        .iter()
        .skip(def_idx + 1)
        .map(|l| l.trim())
        .find(|l| !l.is_empty());
    let has_docstring = matches!(
        body_first,
        Some(l) if l.starts_with("\"\"\"") || l.starts_with("'''")
            || l.starts_with('"') || l.starts_with('\'')
    );
    if !has_docstring {
        findings.push(ValidationFinding::warn(
            "style/docstring",
            Some(def_idx + 1),
            "function has no docstring",
        ));
    }
}

/// True if the source defines a top-level function with the given name.
pub fn entry_point_defined(source: &str, entry: &str) -> bool {
    let mut state = StripState::default();
    for raw in source.lines() {
        let code = strip_noise(raw, &mut state);
        if !is_top_level(&code) {
            continue;
        }
        for prefix in ["def ", "async def "] {
            if let Some(rest) = code.trim_start().strip_prefix(prefix) {
                if let Some(after) = rest.trim_start().strip_prefix(entry) {
                    if after.trim_start().starts_with('(') {
                        return true;
                    }
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolforge_core::Severity;

    fn blocks(source: &str) -> Vec<ValidationFinding> {
        validate(source, &RuleSet::builtin())
            .into_iter()
            .filter(|f| f.severity == Severity::Block)
            .collect()
    }

    const CLEAN: &str = "def square(x: float) -> float:\n    \"\"\"Square a number.\"\"\"\n    return x * x\n";

    #[test]
    fn test_clean_function_passes() {
        assert!(blocks(CLEAN).is_empty());
    }

    #[test]
    fn test_subprocess_blocked() {
        let src = "import subprocess\ndef run(cmd: str) -> str:\n    \"\"\"Run.\"\"\"\n    return subprocess.check_output(cmd)\n";
        let found = blocks(src);
        assert!(found.iter().any(|f| f.rule_id == "deny/process"));
    }

    #[test]
    fn test_os_system_blocked() {
        let src = "import os\ndef f(x: str) -> int:\n    \"\"\"F.\"\"\"\n    return os.system(x)\n";
        assert!(blocks(src).iter().any(|f| f.rule_id == "deny/process"));
    }

    #[test]
    fn test_os_execv_prefix_blocked() {
        let src = "import os\ndef f(x: str) -> int:\n    \"\"\"F.\"\"\"\n    os.execv(x, [])\n    return 0\n";
        assert!(blocks(src).iter().any(|f| f.rule_id == "deny/process"));
    }

    #[test]
    fn test_eval_blocked() {
        let src = "def f(x: str) -> int:\n    \"\"\"F.\"\"\"\n    return eval(x)\n";
        assert!(blocks(src).iter().any(|f| f.rule_id == "deny/eval"));
    }

    #[test]
    fn test_open_blocked() {
        let src = "def f(p: str) -> str:\n    \"\"\"F.\"\"\"\n    with open(p, \"w\") as h:\n        h.write(\"x\")\n    return p\n";
        assert!(blocks(src).iter().any(|f| f.rule_id == "deny/filesystem"));
    }

    #[test]
    fn test_dynamic_import_blocked() {
        let src = "def f(m: str):\n    \"\"\"F.\"\"\"\n    return __import__(m)\n";
        assert!(blocks(src).iter().any(|f| f.rule_id == "deny/import"));
    }

    #[test]
    fn test_socket_blocked() {
        let src = "import socket\ndef f() -> str:\n    \"\"\"F.\"\"\"\n    return socket.gethostname()\n";
        assert!(blocks(src).iter().any(|f| f.rule_id == "deny/network"));
    }

    #[test]
    fn test_reflection_blocked() {
        let src = "import os\ndef f(name: str):\n    \"\"\"F.\"\"\"\n    return getattr(os, name)\n";
        assert!(blocks(src).iter().any(|f| f.rule_id == "deny/reflection"));
    }

    #[test]
    fn test_identifier_boundary_no_false_positive() {
        let src = "def f(websocket_url: str) -> str:\n    \"\"\"F.\"\"\"\n    my_eval_count = 1\n    return websocket_url + str(my_eval_count)\n";
        assert!(blocks(src).is_empty());
    }

    #[test]
    fn test_needle_in_comment_ignored() {
        let src = "def f(x: int) -> int:\n    \"\"\"F.\"\"\"\n    # do not use eval( here\n    return x\n";
        assert!(blocks(src).is_empty());
    }

    #[test]
    fn test_needle_in_string_ignored() {
        let src = "def f() -> str:\n    \"\"\"F.\"\"\"\n    return \"subprocess is a module name\"\n";
        assert!(blocks(src).is_empty());
    }

    #[test]
    fn test_style_findings_do_not_block() {
        let src = "def f(x):\n    return x\n";
        let findings = validate(src, &RuleSet::builtin());
        assert!(findings.iter().any(|f| f.rule_id == "style/docstring"));
        assert!(findings.iter().any(|f| f.rule_id == "style/annotations"));
        assert!(findings.iter().all(|f| f.severity == Severity::Warn));
    }

    #[test]
    fn test_unbalanced_brackets_blocked() {
        let src = "def f(x: int) -> int:\n    \"\"\"F.\"\"\"\n    return (x\n";
        assert!(blocks(src).iter().any(|f| f.rule_id == "syntax/brackets"));
    }

    #[test]
    fn test_no_def_blocked() {
        let src = "x = 1\n";
        assert!(blocks(src).iter().any(|f| f.rule_id == "syntax/no-def"));
    }

    #[test]
    fn test_unterminated_string_blocked() {
        let src = "def f() -> str:\n    \"\"\"unterminated\n    return 1\n";
        assert!(blocks(src).iter().any(|f| f.rule_id == "syntax/string"));
    }

    #[test]
    fn test_empty_source_blocked() {
        assert!(blocks("").iter().any(|f| f.rule_id == "syntax/no-def"));
    }

    #[test]
    fn test_entry_point_defined() {
        assert!(entry_point_defined(CLEAN, "square"));
        assert!(!entry_point_defined(CLEAN, "cube"));
        // Prefix of a longer name must not count.
        assert!(!entry_point_defined("def addition(a, b):\n    return a + b\n", "add"));
    }
}
