use serde_json::Value;

use crate::assertion::types::{AssertError, AssertValue, PathSegment, ValuePath};
use crate::http::Response;

/// 从响应中提取可比较的值
pub fn extract_value(response: &Response, path: &ValuePath) -> Result<AssertValue, AssertError> {
    match path {
        ValuePath::Status => Ok(AssertValue::Number(response.status.code() as f64)),
        ValuePath::Header(name) => response
            .header(name)
            .map(|v| AssertValue::String(v.to_string()))
            .ok_or_else(|| AssertError::PathNotFound(format!("Header '{}' not found", name))),
        ValuePath::Body(segments) => {
            let json = response.json()?;
            json_to_assert_value(lookup(&json, segments, path)?)
        }
        ValuePath::ResponseTime => Ok(AssertValue::Number(response.duration.as_millis() as f64)),
    }
}

/// 提取为文本，用于变量捕获
///
/// JSON 字符串去掉引号，对象与数组保留 JSON 文本。
pub fn extract_text(response: &Response, path: &ValuePath) -> Result<String, AssertError> {
    match path {
        ValuePath::Body(segments) if segments.is_empty() => Ok(response.body.clone()),
        ValuePath::Body(segments) => {
            let json = response.json()?;
            Ok(match lookup(&json, segments, path)? {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        }
        ValuePath::Header(_) => match extract_value(response, path)? {
            AssertValue::String(s) => Ok(s),
            other => Ok(other.to_string()),
        },
        ValuePath::Status => Ok(response.status.code().to_string()),
        ValuePath::ResponseTime => Ok(response.duration.as_millis().to_string()),
    }
}

fn lookup<'v>(
    json: &'v Value,
    segments: &[PathSegment],
    path: &ValuePath,
) -> Result<&'v Value, AssertError> {
    segments.iter().try_fold(json, |current, segment| {
        let next = match segment {
            PathSegment::Key(key) => current.get(key.as_str()),
            // 对象上的数字段按键名查找
            PathSegment::Index(index) => current
                .get(*index)
                .or_else(|| current.get(index.to_string().as_str())),
        };
        next.ok_or_else(|| AssertError::PathNotFound(format!("Path '{}' not found", path)))
    })
}

fn json_to_assert_value(value: &Value) -> Result<AssertValue, AssertError> {
    match value {
        Value::Number(n) => n.as_f64().map(AssertValue::Number).ok_or_else(|| {
            AssertError::TypeMismatch {
                expected: "f64".to_string(),
                actual: n.to_string(),
            }
        }),
        Value::String(s) => Ok(AssertValue::String(s.clone())),
        Value::Bool(b) => Ok(AssertValue::Bool(*b)),
        Value::Null => Ok(AssertValue::Null),
        // 数组和对象按 JSON 文本参与比较（contains / matches）
        Value::Array(_) | Value::Object(_) => Ok(AssertValue::String(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn create_test_response(status: u16, body: &str) -> Response {
        Response::new(
            status,
            vec![("Content-Type".to_string(), "application/json".to_string())],
            body.to_string(),
            Duration::from_millis(123),
        )
        .unwrap()
    }

    fn body_path(segments: &[&str]) -> ValuePath {
        ValuePath::Body(
            segments
                .iter()
                .map(|s| match s.parse::<usize>() {
                    Ok(i) => PathSegment::Index(i),
                    Err(_) => PathSegment::Key(s.to_string()),
                })
                .collect(),
        )
    }

    #[test]
    fn test_extract_status_and_time() {
        let response = create_test_response(201, "{}");
        assert_eq!(
            extract_value(&response, &ValuePath::Status).unwrap(),
            AssertValue::Number(201.0)
        );
        assert_eq!(
            extract_value(&response, &ValuePath::ResponseTime).unwrap(),
            AssertValue::Number(123.0)
        );
    }

    #[test]
    fn test_extract_header_case_insensitive() {
        let response = create_test_response(200, "{}");
        let value =
            extract_value(&response, &ValuePath::Header("content-type".to_string())).unwrap();
        assert_eq!(value, AssertValue::String("application/json".to_string()));

        let missing = extract_value(&response, &ValuePath::Header("x-missing".to_string()));
        assert!(matches!(missing, Err(AssertError::PathNotFound(_))));
    }

    #[test]
    fn test_extract_body_values() {
        let response = create_test_response(
            200,
            r#"{"id": 42, "name": "test", "active": true, "data": null, "user": {"id": 7}}"#,
        );
        assert_eq!(
            extract_value(&response, &body_path(&["id"])).unwrap(),
            AssertValue::Number(42.0)
        );
        assert_eq!(
            extract_value(&response, &body_path(&["name"])).unwrap(),
            AssertValue::String("test".to_string())
        );
        assert_eq!(
            extract_value(&response, &body_path(&["active"])).unwrap(),
            AssertValue::Bool(true)
        );
        assert_eq!(
            extract_value(&response, &body_path(&["data"])).unwrap(),
            AssertValue::Null
        );
        assert_eq!(
            extract_value(&response, &body_path(&["user", "id"])).unwrap(),
            AssertValue::Number(7.0)
        );
        assert!(extract_value(&response, &body_path(&["missing"])).is_err());
    }

    #[test]
    fn test_extract_array_index() {
        let response = create_test_response(200, r#"{"items": [{"id": "a"}, {"id": "b"}]}"#);
        assert_eq!(
            extract_value(&response, &body_path(&["items", "1", "id"])).unwrap(),
            AssertValue::String("b".to_string())
        );
        assert!(extract_value(&response, &body_path(&["items", "5"])).is_err());
    }

    #[test]
    fn test_extract_non_json_body() {
        let response = create_test_response(200, "plain text");
        let result = extract_value(&response, &body_path(&["id"]));
        assert!(matches!(result, Err(AssertError::JsonError(_))));
    }

    #[test]
    fn test_extract_text_for_capture() {
        let response = create_test_response(200, r#"{"token": "abc", "user": {"id": 7}}"#);
        assert_eq!(
            extract_text(&response, &body_path(&["token"])).unwrap(),
            "abc"
        );
        assert_eq!(
            extract_text(&response, &body_path(&["user"])).unwrap(),
            r#"{"id":7}"#
        );
        assert_eq!(extract_text(&response, &ValuePath::Status).unwrap(), "200");
        assert_eq!(
            extract_text(&response, &ValuePath::Header("CONTENT-TYPE".to_string())).unwrap(),
            "application/json"
        );
    }
}
