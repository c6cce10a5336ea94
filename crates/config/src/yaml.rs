//! Minimal hand-rolled flat YAML grammar (spec.md §6 design note:
//! "preserved to avoid pulling a full YAML parser dependency"). Covers
//! exactly what Formula/Goal/Trajectory files need: `key: value` pairs,
//! inline `[a, b, c]` lists, block dash-lists, and `|`/`>` multiline
//! block scalars. Not a general YAML parser — unsupported constructs
//! are rejected rather than silently misparsed.

use serde_json::{Map, Value};
use std::collections::VecDeque;

#[derive(Debug)]
pub struct YamlError(pub String);

impl std::fmt::Display for YamlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "yaml: {}", self.0)
    }
}

impl std::error::Error for YamlError {}

struct Line {
    indent: usize,
    content: String,
}

fn indent_of(raw: &str) -> usize {
    raw.chars().take_while(|c| *c == ' ').count()
}

fn strip_comment(raw: &str) -> &str {
    // A `#` only starts a comment when preceded by whitespace or at
    // line start, so `http://example.com/#frag` style values survive.
    let bytes = raw.as_bytes();
    let mut in_quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match in_quote {
            Some(q) if b == q => in_quote = None,
            Some(_) => {}
            None => match b {
                b'\'' | b'"' => in_quote = Some(b),
                b'#' if i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t' => return &raw[..i],
                _ => {}
            },
        }
    }
    raw
}

fn tokenize(text: &str) -> Vec<Line> {
    text.lines()
        .filter_map(|raw| {
            let stripped = strip_comment(raw);
            if stripped.trim().is_empty() {
                return None;
            }
            Some(Line {
                indent: indent_of(raw),
                content: stripped.trim().to_string(),
            })
        })
        .collect()
}

fn parse_scalar(raw: &str) -> Value {
    let trimmed = raw.trim();
    if (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
        || (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
    {
        return Value::String(trimmed[1..trimmed.len() - 1].to_string());
    }
    if trimmed == "true" {
        return Value::Bool(true);
    }
    if trimmed == "false" {
        return Value::Bool(false);
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(n) = trimmed.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(n) {
            return Value::Number(num);
        }
    }
    Value::String(trimmed.to_string())
}

fn parse_inline_list(raw: &str) -> Value {
    let inner = raw.trim().trim_start_matches('[').trim_end_matches(']');
    if inner.trim().is_empty() {
        return Value::Array(Vec::new());
    }
    Value::Array(inner.split(',').map(|item| parse_scalar(item.trim())).collect())
}

/// Parse a flat mapping: `key: value` pairs at a single indent level,
/// where `value` may be an inline list, a block dash-list, or a `|`/`>`
/// block scalar consuming subsequent more-indented lines.
pub fn parse_mapping(text: &str) -> Result<Map<String, Value>, YamlError> {
    let tokens = tokenize(text);
    let mut queue: VecDeque<Line> = tokens.into_iter().collect();
    let indent = queue.front().map(|l| l.indent).unwrap_or(0);
    parse_mapping_at(&mut queue, indent)
}

fn parse_mapping_at(queue: &mut VecDeque<Line>, indent: usize) -> Result<Map<String, Value>, YamlError> {
    let mut map = Map::new();

    while let Some(line) = queue.front() {
        if line.indent < indent {
            break;
        }
        if line.indent > indent {
            return Err(YamlError(format!("unexpected indent in line: {}", line.content)));
        }
        let line = queue.pop_front().unwrap();
        let (key, rest) = split_key_value(&line.content)?;

        if rest.is_empty() {
            // Value lives on following, more-indented lines: either a
            // block list (`- item`) or a nested map — not used by
            // Formula/Goal, only by Trajectory's `steps:`, handled by
            // the caller via `parse_block_list` instead of here.
            let child_indent = queue.front().map(|l| l.indent);
            match child_indent {
                Some(ci) if ci > indent => {
                    if queue.front().unwrap().content.starts_with("- ") || queue.front().unwrap().content == "-" {
                        map.insert(key, parse_block_list_of_scalars(queue, ci)?);
                    } else {
                        map.insert(key, Value::Object(parse_mapping_at(queue, ci)?));
                    }
                }
                _ => {
                    map.insert(key, Value::Null);
                }
            }
        } else if rest == "|" || rest == ">" {
            let folded = rest == ">";
            let child_indent = queue.front().map(|l| l.indent);
            let mut block_lines = Vec::new();
            if let Some(ci) = child_indent {
                if ci > indent {
                    while let Some(next) = queue.front() {
                        if next.indent < ci {
                            break;
                        }
                        block_lines.push(queue.pop_front().unwrap().content);
                    }
                }
            }
            let text = if folded {
                block_lines.join(" ")
            } else {
                block_lines.join("\n")
            };
            map.insert(key, Value::String(text));
        } else if rest.starts_with('[') {
            map.insert(key, parse_inline_list(&rest));
        } else {
            map.insert(key, parse_scalar(&rest));
        }
    }

    Ok(map)
}

fn parse_block_list_of_scalars(queue: &mut VecDeque<Line>, indent: usize) -> Result<Value, YamlError> {
    let mut items = Vec::new();
    while let Some(line) = queue.front() {
        if line.indent != indent || !(line.content.starts_with("- ") || line.content == "-") {
            break;
        }
        let line = queue.pop_front().unwrap();
        let value = line.content.strip_prefix("- ").unwrap_or("").trim();
        items.push(parse_scalar(value));
    }
    Ok(Value::Array(items))
}

fn split_key_value(content: &str) -> Result<(String, String), YamlError> {
    let colon = content
        .find(": ")
        .or_else(|| if content.ends_with(':') { Some(content.len() - 1) } else { None })
        .ok_or_else(|| YamlError(format!("expected 'key: value' line: {content}")))?;
    let key = content[..colon].trim().to_string();
    let rest = content[colon..].trim_start_matches(':').trim().to_string();
    Ok((key, rest))
}

/// Parse `steps:` block list of maps (Trajectory's one nesting level
/// beyond flat key/value). Each item starts with `- key: value` and
/// continues with further-indented `key: value` lines belonging to the
/// same item.
pub fn parse_list_of_mappings(text: &str, key: &str) -> Result<Vec<Map<String, Value>>, YamlError> {
    parse_steps_block(text, key)
}

fn parse_steps_block(text: &str, key: &str) -> Result<Vec<Map<String, Value>>, YamlError> {
    let tokens = tokenize(text);
    let mut queue: VecDeque<Line> = tokens.into_iter().collect();

    while let Some(line) = queue.front() {
        if line.content == format!("{key}:") || line.content.starts_with(&format!("{key}:")) {
            queue.pop_front();
            break;
        }
        queue.pop_front();
    }

    let Some(list_indent) = queue.front().map(|l| l.indent) else {
        return Ok(Vec::new());
    };

    let mut steps = Vec::new();
    while let Some(line) = queue.front() {
        if line.indent != list_indent || !line.content.starts_with("- ") {
            break;
        }
        let dash_line = queue.pop_front().unwrap();
        let inline = dash_line.content.strip_prefix("- ").unwrap_or("").to_string();
        let mut item_text = String::new();
        if !inline.is_empty() {
            item_text.push_str(&inline);
            item_text.push('\n');
        }

        let item_indent = list_indent + 2;
        while let Some(next) = queue.front() {
            if next.indent < item_indent {
                break;
            }
            let next = queue.pop_front().unwrap();
            for _ in 0..(next.indent - item_indent) {
                item_text.push(' ');
            }
            item_text.push_str(&next.content);
            item_text.push('\n');
        }

        steps.push(parse_mapping(&item_text)?);
    }

    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_scalars() {
        let map = parse_mapping("version: 1\nscope: src/**\nmin_confidence: 60\n").unwrap();
        assert_eq!(map["version"], Value::Number(1.into()));
        assert_eq!(map["scope"], Value::String("src/**".to_string()));
        assert_eq!(map["min_confidence"], Value::Number(60.into()));
    }

    #[test]
    fn parses_inline_list() {
        let map = parse_mapping("categories: [bug, perf, docs]\n").unwrap();
        assert_eq!(
            map["categories"],
            Value::Array(vec![
                Value::String("bug".into()),
                Value::String("perf".into()),
                Value::String("docs".into())
            ])
        );
    }

    #[test]
    fn parses_literal_block_scalar() {
        let text = "prompt: |\n  line one\n  line two\nmodel: opus\n";
        let map = parse_mapping(text).unwrap();
        assert_eq!(map["prompt"], Value::String("line one\nline two".to_string()));
        assert_eq!(map["model"], Value::String("opus".to_string()));
    }

    #[test]
    fn parses_folded_block_scalar() {
        let text = "description: >\n  first part\n  second part\n";
        let map = parse_mapping(text).unwrap();
        assert_eq!(map["description"], Value::String("first part second part".to_string()));
    }

    #[test]
    fn parses_bool_and_quoted_values() {
        let map = parse_mapping("use_roadmap: true\nname: \"hello world\"\n").unwrap();
        assert_eq!(map["use_roadmap"], Value::Bool(true));
        assert_eq!(map["name"], Value::String("hello world".to_string()));
    }

    #[test]
    fn parses_block_list_of_scalars() {
        let text = "tags:\n  - fast\n  - safe\n";
        let map = parse_mapping(text).unwrap();
        assert_eq!(
            map["tags"],
            Value::Array(vec![Value::String("fast".into()), Value::String("safe".into())])
        );
    }

    #[test]
    fn ignores_comment_lines_and_trailing_comments() {
        let text = "# a comment\nversion: 1 # trailing\n";
        let map = parse_mapping(text).unwrap();
        assert_eq!(map["version"], Value::Number(1.into()));
    }

    #[test]
    fn parses_list_of_mappings_for_steps() {
        let text = "name: plan\nsteps:\n  - id: step1\n    title: First\n    depends_on: []\n  - id: step2\n    title: Second\n    depends_on: [step1]\n";
        let steps = parse_list_of_mappings(text, "steps").unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0]["id"], Value::String("step1".to_string()));
        assert_eq!(steps[1]["depends_on"], Value::Array(vec![Value::String("step1".into())]));
    }
}
