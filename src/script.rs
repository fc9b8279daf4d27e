//! Do-file preprocessing: comments and line continuations
//!
//! - `*` as the first non-blank character comments out the line
//! - `//` after whitespace (or at line start) comments out the rest
//! - `/* ... */` comments may span lines
//! - `///` after whitespace, or a trailing `\`, joins the next line
//!
//! Comment markers inside double quotes are left alone.

/// One command after preprocessing, with the 1-based line it started on
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptLine {
    pub number: usize,
    pub text: String,
}

/// Strip comments from one physical line. Returns the kept text and
/// whether the line continues onto the next one.
fn strip(line: &str, in_block: &mut bool) -> (String, bool) {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::new();
    let mut in_quote = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        if *in_block {
            if c == '*' && next == Some('/') {
                *in_block = false;
                out.push(' ');
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }
        if c == '"' {
            in_quote = !in_quote;
        } else if !in_quote && c == '/' {
            let after_space = i == 0 || chars[i - 1].is_whitespace();
            if next == Some('*') {
                *in_block = true;
                i += 2;
                continue;
            }
            if next == Some('/') && after_space {
                let continued = chars.get(i + 2) == Some(&'/');
                return (out, continued);
            }
        }
        out.push(c);
        i += 1;
    }
    if !*in_block && out.trim_end().ends_with('\\') {
        let trimmed = out.trim_end();
        let kept = trimmed[..trimmed.len() - 1].to_string();
        return (kept, true);
    }
    (out, false)
}

/// Split a do-file into commands
pub fn logical_lines(text: &str) -> Vec<ScriptLine> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut start = 0;
    let mut in_block = false;

    for (i, raw) in text.lines().enumerate() {
        if current.trim().is_empty() && !in_block && raw.trim_start().starts_with('*') {
            continue;
        }
        let (content, continued) = strip(raw, &mut in_block);
        if current.trim().is_empty() {
            start = i + 1;
            current.clear();
        } else {
            current.push(' ');
        }
        current.push_str(content.trim());
        if !continued && !in_block && !current.trim().is_empty() {
            lines.push(ScriptLine { number: start, text: current.trim().to_string() });
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        lines.push(ScriptLine { number: start, text: current.trim().to_string() });
    }
    lines
}

/// True when an interactive line asks for another (`///` or trailing `\`)
pub fn continues(line: &str) -> bool {
    let mut in_block = false;
    strip(line, &mut in_block).1 || in_block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(src: &str) -> Vec<(usize, String)> {
        logical_lines(src).into_iter().map(|l| (l.number, l.text)).collect()
    }

    #[test]
    fn comments_are_removed() {
        let src = "* header\nuse auto // load\n\ngen y = 1 /* note */ + 2\n";
        assert_eq!(texts(src), vec![(2, "use auto".to_string()), (4, "gen y = 1   + 2".to_string())]);
    }

    #[test]
    fn continuations_join_lines() {
        let src = "regress y x1 ///\n   x2, ///\n   robust\nsum y\n";
        assert_eq!(
            texts(src),
            vec![(1, "regress y x1 x2, robust".to_string()), (4, "sum y".to_string())]
        );
        assert_eq!(texts("list x \\\n in 1/2"), vec![(1, "list x in 1/2".to_string())]);
    }

    #[test]
    fn block_comments_span_lines() {
        let src = "/* a\n b\n*/\ndisplay 1\n";
        assert_eq!(texts(src), vec![(4, "display 1".to_string())]);
    }

    #[test]
    fn quotes_protect_markers() {
        assert_eq!(texts("display \"a // b\""), vec![(1, "display \"a // b\"".to_string())]);
        assert_eq!(texts("display 4*2"), vec![(1, "display 4*2".to_string())]);
        assert_eq!(texts("use http://x.org/d.dta"), vec![(1, "use http://x.org/d.dta".to_string())]);
    }

    #[test]
    fn interactive_continuation() {
        assert!(continues("regress y x ///"));
        assert!(continues("regress y x \\"));
        assert!(!continues("regress y x"));
    }
}
