//! HTML shell rendering.
//!
//! Placeholders use `$name` or `${name}`; `$$` is a literal dollar. Names the
//! caller does not supply are left in the output untouched, so the front end's
//! own `$` usage survives rendering.

use std::collections::HashMap;
use std::path::{MAIN_SEPARATOR, Path};

use tokio::fs;

use crate::error::FileServerError;

pub const TEMPLATE_FILE: &str = "index.html";

/// Load `index.html` from `assets_dir` and fill in the runtime variables.
pub async fn render_index(assets_dir: &Path, page_title: &str) -> Result<String, FileServerError> {
    let path = assets_dir.join(TEMPLATE_FILE);
    let template = fs::read_to_string(&path)
        .await
        .map_err(|e| FileServerError::from_io(e, &path))?;
    Ok(render_shell(&template, page_title))
}

/// Substitute `separator` and `page_title` into the shell template.
pub fn render_shell(template: &str, page_title: &str) -> String {
    let mut vars = HashMap::new();
    vars.insert("separator", separator_literal());
    vars.insert("page_title", page_title.to_string());
    safe_substitute(template, &vars)
}

/// Path separator as the front end expects it inside a JS string literal.
fn separator_literal() -> String {
    if MAIN_SEPARATOR == '\\' {
        "\\\\".to_string()
    } else {
        MAIN_SEPARATOR.to_string()
    }
}

pub fn safe_substitute(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(stripped) = after.strip_prefix('$') {
            out.push('$');
            rest = stripped;
            continue;
        }

        if let Some(braced) = after.strip_prefix('{') {
            if let Some(end) = braced.find('}') {
                let name = &braced[..end];
                if is_identifier(name) {
                    if let Some(value) = vars.get(name) {
                        out.push_str(value);
                        rest = &braced[end + 1..];
                        continue;
                    }
                }
            }
        } else {
            let len = identifier_len(after);
            if len > 0 {
                if let Some(value) = vars.get(&after[..len]) {
                    out.push_str(value);
                    rest = &after[len..];
                    continue;
                }
            }
        }

        out.push('$');
        rest = after;
    }

    out.push_str(rest);
    out
}

fn identifier_len(s: &str) -> usize {
    let mut len = 0;
    for (i, c) in s.char_indices() {
        let ok = if i == 0 {
            c == '_' || c.is_ascii_alphabetic()
        } else {
            c == '_' || c.is_ascii_alphanumeric()
        };
        if !ok {
            break;
        }
        len = i + c.len_utf8();
    }
    len
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && identifier_len(s) == s.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_render_shell_keys() {
        let html = render_shell("<title>$page_title</title><script>var sep='${separator}';</script>", "My Editor");
        assert!(html.contains("<title>My Editor</title>"));
        assert!(html.contains(&format!("var sep='{}';", separator_literal())));
    }

    #[test]
    fn test_safe_substitute_leaves_unknown() {
        let mut vars = HashMap::new();
        vars.insert("known", "v".to_string());
        assert_eq!(
            safe_substitute("$known $unknown ${other} $", &vars),
            "v $unknown ${other} $"
        );
        assert_eq!(safe_substitute("$(sel) costs $$5", &vars), "$(sel) costs $5");
        assert_eq!(safe_substitute("${known}x$knownx", &vars), "vx$knownx");
    }

    #[cfg(unix)]
    #[test]
    fn test_separator_on_unix() {
        assert_eq!(separator_literal(), "/");
    }

    #[tokio::test]
    async fn test_render_index_reads_template() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(TEMPLATE_FILE), "<h1>$page_title</h1>").unwrap();
        let html = render_index(dir.path(), "Files").await.unwrap();
        assert_eq!(html, "<h1>Files</h1>");
    }

    #[tokio::test]
    async fn test_render_index_missing_template() {
        let dir = TempDir::new().unwrap();
        let result = render_index(dir.path(), "Files").await;
        assert!(matches!(result, Err(FileServerError::NotFound(_))));
    }
}
