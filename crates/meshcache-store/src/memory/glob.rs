//! Store-style key globs (`*`, `?`, `[abc]`, `[^a]`, `\` escapes) compiled to regexes.

use regex::Regex;

use crate::error::StoreError;

pub(crate) fn compile(pattern: &str) -> Result<Regex, StoreError> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            '[' => {
                out.push('[');
                let mut closed = false;
                let mut first = true;
                for c in chars.by_ref() {
                    match c {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '^' if first => out.push('^'),
                        '\\' | '[' | '&' | '~' => {
                            out.push('\\');
                            out.push(c);
                        }
                        _ => out.push(c),
                    }
                    first = false;
                }
                if !closed {
                    return Err(StoreError::operation(format!("unterminated class in pattern '{pattern}'")));
                }
                out.push(']');
            }
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    out.push('$');
    Regex::new(&out).map_err(|e| StoreError::operation(format!("invalid pattern '{pattern}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_and_question() {
        let re = compile("claims:claim:*").unwrap();
        assert!(re.is_match("claims:claim:CLM-001"));
        assert!(re.is_match("claims:claim:"));
        assert!(!re.is_match("policy:claim:1"));

        let re = compile("k?").unwrap();
        assert!(re.is_match("k1"));
        assert!(!re.is_match("k12"));
    }

    #[test]
    fn test_classes_and_escapes() {
        let re = compile("v[12]").unwrap();
        assert!(re.is_match("v1"));
        assert!(!re.is_match("v3"));

        let re = compile("v[^1]").unwrap();
        assert!(re.is_match("v2"));
        assert!(!re.is_match("v1"));

        let re = compile(r"a\*b").unwrap();
        assert!(re.is_match("a*b"));
        assert!(!re.is_match("axb"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let re = compile("a.b+c").unwrap();
        assert!(re.is_match("a.b+c"));
        assert!(!re.is_match("axbbc"));
    }

    #[test]
    fn test_unterminated_class() {
        assert!(compile("a[bc").is_err());
    }
}
