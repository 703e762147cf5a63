//! Output formatting for query results.

use logstore_query::{BlockResult, ValueWithHits};
use serde_json::{Map, Value};

/// Renders every row of `br` as a JSON object on its own line.
pub fn block_to_json_lines(br: &BlockResult) -> String {
    let mut out = String::new();
    for i in 0..br.rows_len() {
        let obj: Map<String, Value> = br
            .row(i)
            .into_iter()
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect();
        out.push_str(&Value::Object(obj).to_string());
        out.push('\n');
    }
    out
}

pub fn values_with_hits_to_json_lines(values: &[ValueWithHits]) -> String {
    let mut out = String::new();
    for v in values {
        if let Ok(line) = serde_json::to_string(v) {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_to_json_lines() {
        let br = BlockResult::from_result_columns(
            2,
            vec![
                ("host".to_string(), vec!["a".to_string(), "b".to_string()]),
                ("n".to_string(), vec!["1".to_string(), "".to_string()]),
            ],
        );
        assert_eq!(
            block_to_json_lines(&br),
            "{\"host\":\"a\",\"n\":\"1\"}\n{\"host\":\"b\",\"n\":\"\"}\n"
        );
    }

    #[test]
    fn test_values_with_hits() {
        let values = vec![ValueWithHits {
            value: "x".to_string(),
            hits: 3,
        }];
        assert_eq!(values_with_hits_to_json_lines(&values), "{\"value\":\"x\",\"hits\":3}\n");
    }
}
