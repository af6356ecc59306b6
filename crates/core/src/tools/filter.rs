// Filter tool: narrows the JSON held in `auxiliary_context` with a path expression

use super::{non_empty, ParameterSpec, Tool, ToolContext, ToolOutput, ToolSchema};
use crate::error::ToolError;
use crate::types::{Parameters, RunState};
use serde_json::Value;

pub const FILTER_BY_PATH: &str = "filter_by_path";

/// One step of a path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    /// Negative values count from the end, `-1` being the last item
    Index(i64),
    Wildcard,
}

/// Parse a JSON path such as `$.data.items[0].name`, `$.items[*]` or
/// `$['odd key']`; `$.items[-1]` is the last item. A bare `name` or `a.b` is read as `$.name` / `$.a.b`.
/// Recursive descent (`..`) and filter expressions are not supported.
pub fn parse_path(expr: &str) -> Result<Vec<Segment>, String> {
    let expr = expr.trim();
    let body = match expr.strip_prefix('$') {
        Some(rest) => rest.to_string(),
        None if expr.starts_with('[') => expr.to_string(),
        None => format!(".{}", expr),
    };

    let mut segments = Vec::new();
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if chars.peek() == Some(&'.') {
                    return Err("recursive descent (`..`) is not supported".to_string());
                }
                let mut key = String::new();
                while let Some(&next) = chars.peek() {
                    if next == '.' || next == '[' {
                        break;
                    }
                    key.push(next);
                    chars.next();
                }
                if key.is_empty() {
                    return Err("empty key after `.`".to_string());
                }
                segments.push(if key == "*" {
                    Segment::Wildcard
                } else {
                    Segment::Key(key)
                });
            }
            '[' => {
                let mut inner = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(ch) => inner.push(ch),
                        None => return Err("unterminated `[`".to_string()),
                    }
                }
                segments.push(parse_bracket(inner.trim())?);
            }
            other => return Err(format!("unexpected character `{}`", other)),
        }
    }

    Ok(segments)
}

fn parse_bracket(inner: &str) -> Result<Segment, String> {
    if inner == "*" {
        return Ok(Segment::Wildcard);
    }

    for quote in ['\'', '"'] {
        if let Some(key) = inner
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Ok(Segment::Key(key.to_string()));
        }
    }

    inner
        .parse::<i64>()
        .map(Segment::Index)
        .map_err(|_| format!("invalid index `{}`", inner))
}

/// Every value reached by following `segments` from `root`
pub fn select<'a>(root: &'a Value, segments: &[Segment]) -> Vec<&'a Value> {
    let mut current = vec![root];

    for segment in segments {
        current = current
            .into_iter()
            .flat_map(|value| -> Vec<&'a Value> {
                match (segment, value) {
                    (Segment::Key(key), Value::Object(map)) => map.get(key).into_iter().collect(),
                    (Segment::Index(i), Value::Array(items)) => resolve_index(*i, items.len())
                        .and_then(|i| items.get(i))
                        .into_iter()
                        .collect(),
                    (Segment::Wildcard, Value::Array(items)) => items.iter().collect(),
                    (Segment::Wildcard, Value::Object(map)) => map.values().collect(),
                    _ => Vec::new(),
                }
            })
            .collect();
    }

    current
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    if index >= 0 {
        usize::try_from(index).ok()
    } else {
        len.checked_sub(usize::try_from(index.unsigned_abs()).ok()?)
    }
}

/// Replaces `auxiliary_context` with the part selected by `filter_key`
pub struct FilterByPathTool;

#[async_trait::async_trait]
impl Tool for FilterByPathTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: FILTER_BY_PATH.to_string(),
            description: "Filter the context data using a JSON path or key.".to_string(),
            parameters: vec![ParameterSpec::text("filter_key", "Filter Key (e.g., $.name)")],
        }
    }

    async fn invoke(
        &self,
        mut state: RunState,
        parameters: &Parameters,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let filter_key = non_empty(parameters, "filter_key")
            .ok_or_else(|| ToolError::MissingParameter("filter_key".into()))?;

        let segments = parse_path(filter_key).map_err(|e| ToolError::invalid("filter_key", e))?;

        if state.auxiliary_context.trim().is_empty() {
            return Err(ToolError::Failed(
                "no context data available to filter".to_string(),
            ));
        }

        let context: Value = serde_json::from_str(&state.auxiliary_context)
            .map_err(|e| ToolError::Failed(format!("context is not valid JSON: {}", e)))?;

        let output = match select(&context, &segments).as_slice() {
            [] => {
                return Err(ToolError::Failed(format!(
                    "no data found for filter key {}",
                    filter_key
                )))
            }
            [single] => single.to_string(),
            many => Value::Array(many.iter().map(|v| (*v).clone()).collect()).to_string(),
        };

        state.auxiliary_context = output.clone();
        Ok(ToolOutput::new(state, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;
    use serde_json::json;
    use std::time::Duration;

    fn ctx() -> ToolContext {
        ToolContext {
            node_id: NodeId::new("filter"),
            timeout: Duration::from_secs(1),
        }
    }

    fn with_context(context: &str) -> RunState {
        RunState {
            primary: "payload".to_string(),
            api_key: String::new(),
            auxiliary_context: context.to_string(),
        }
    }

    fn filter(key: &str) -> Parameters {
        let mut params = Parameters::new();
        params.insert("filter_key".to_string(), key.to_string());
        params
    }

    #[test]
    fn test_parse_path_forms() {
        assert_eq!(
            parse_path("$.data.items[0].name").unwrap(),
            vec![
                Segment::Key("data".into()),
                Segment::Key("items".into()),
                Segment::Index(0),
                Segment::Key("name".into()),
            ]
        );
        assert_eq!(parse_path("name").unwrap(), vec![Segment::Key("name".into())]);
        assert_eq!(
            parse_path("$['odd key'][*]").unwrap(),
            vec![Segment::Key("odd key".into()), Segment::Wildcard]
        );
        assert!(parse_path("$").unwrap().is_empty());
        assert!(parse_path("$..name").is_err());
        assert!(parse_path("$.items[x]").is_err());
        assert!(parse_path("$.items[0").is_err());
    }

    #[test]
    fn test_negative_index_counts_from_end() {
        let doc = json!({"items": ["a", "b", "c"]});

        assert_eq!(parse_path("$.items[-1]").unwrap()[1], Segment::Index(-1));
        assert_eq!(select(&doc, &parse_path("$.items[-1]").unwrap()), vec![&json!("c")]);
        assert_eq!(select(&doc, &parse_path("$.items[-3]").unwrap()), vec![&json!("a")]);
        assert!(select(&doc, &parse_path("$.items[-4]").unwrap()).is_empty());
        assert!(select(&doc, &parse_path("$.items[3]").unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_last_item_filter() {
        let out = FilterByPathTool
            .invoke(with_context(r#"{"items": [{"n": 1}, {"n": 2}]}"#), &filter("$.items[-1].n"), &ctx())
            .await
            .unwrap();
        assert_eq!(out.output, "2");
    }

    #[test]
    fn test_select_wildcard() {
        let doc = json!({"items": [{"name": "a"}, {"name": "b"}, {"id": 3}]});
        let found = select(&doc, &parse_path("$.items[*].name").unwrap());
        assert_eq!(found, vec![&json!("a"), &json!("b")]);
    }

    #[tokio::test]
    async fn test_single_match_written_to_context() {
        let out = FilterByPathTool
            .invoke(with_context(r#"{"user": {"name": "Ada"}}"#), &filter("$.user.name"), &ctx())
            .await
            .unwrap();

        assert_eq!(out.output, "\"Ada\"");
        assert_eq!(out.state.auxiliary_context, "\"Ada\"");
        assert_eq!(out.state.primary, "payload");
    }

    #[tokio::test]
    async fn test_multiple_matches_become_array() {
        let out = FilterByPathTool
            .invoke(with_context(r#"[{"n": 1}, {"n": 2}]"#), &filter("$[*].n"), &ctx())
            .await
            .unwrap();
        assert_eq!(out.output, "[1,2]");
    }

    #[tokio::test]
    async fn test_failures() {
        let err = FilterByPathTool
            .invoke(with_context(""), &filter("$.a"), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no context data"));

        let err = FilterByPathTool
            .invoke(with_context("{}"), &filter("$.a"), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no data found for filter key $.a"));

        let err = FilterByPathTool
            .invoke(with_context("not json"), &filter("$.a"), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));

        let err = FilterByPathTool
            .invoke(with_context("{}"), &Parameters::new(), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::MissingParameter("filter_key".into()));
    }
}
