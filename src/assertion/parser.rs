use crate::assertion::types::{
    AssertError, AssertExpr, AssertValue, CompareOp, PathSegment, ValuePath,
};

/// 解析断言表达式
///
/// 支持的格式：
/// - `status == 200`
/// - `headers.content-type contains "json"`
/// - `body.items.0.id > 0`
/// - `response.time < 1000`
/// - `body.token exists` / `body.error not exists`
/// - `body.email matches "^[a-z]+@"`
pub fn parse_assertion(input: &str) -> Result<AssertExpr, AssertError> {
    let input = input.trim();

    if let Some(path_str) = input.strip_suffix("not exists") {
        let path = parse_value_path(path_str)?;
        return Ok(AssertExpr::Exists {
            path,
            negated: true,
        });
    }
    if let Some(path_str) = input.strip_suffix("exists") {
        let path = parse_value_path(path_str)?;
        return Ok(AssertExpr::Exists {
            path,
            negated: false,
        });
    }

    let (op, op_pos) = find_operator(input).ok_or_else(|| {
        AssertError::InvalidSyntax(format!("No valid operator found in assertion: {}", input))
    })?;

    let left_str = input[..op_pos].trim();
    let right_str = input[op_pos + op.as_str().len()..].trim();

    if left_str.is_empty() {
        return Err(AssertError::InvalidSyntax(
            "Left side of assertion is empty".to_string(),
        ));
    }
    if right_str.is_empty() {
        return Err(AssertError::InvalidSyntax(
            "Right side of assertion is empty".to_string(),
        ));
    }

    Ok(AssertExpr::Compare {
        left: parse_value_path(left_str)?,
        op,
        right: parse_assert_value(right_str),
    })
}

/// 最左侧的运算符；同一位置上更长的运算符优先
fn find_operator(input: &str) -> Option<(CompareOp, usize)> {
    CompareOp::SEARCH_ORDER
        .into_iter()
        .filter_map(|op| {
            if op.is_word() {
                input
                    .find(&format!(" {} ", op.as_str()))
                    .map(|pos| (op, pos + 1))
            } else {
                input.find(op.as_str()).map(|pos| (op, pos))
            }
        })
        .min_by_key(|(op, pos)| (*pos, usize::MAX - op.as_str().len()))
}

/// 解析值路径：`status`、`response.time`、`headers.<name>`（或 `header.<name>`）、`body[.<path>]`
pub fn parse_value_path(input: &str) -> Result<ValuePath, AssertError> {
    let input = input.trim();

    match input {
        "status" => return Ok(ValuePath::Status),
        "response.time" => return Ok(ValuePath::ResponseTime),
        "body" => return Ok(ValuePath::Body(Vec::new())),
        _ => {}
    }

    if let Some(rest) = input
        .strip_prefix("headers.")
        .or_else(|| input.strip_prefix("header."))
    {
        if rest.is_empty() {
            return Err(AssertError::InvalidSyntax(
                "Header name cannot be empty".to_string(),
            ));
        }
        return Ok(ValuePath::Header(rest.to_string()));
    }

    if let Some(rest) = input.strip_prefix("body.") {
        let segments = rest
            .split('.')
            .map(|s| match s.parse::<usize>() {
                Ok(index) => Ok(PathSegment::Index(index)),
                Err(_) if s.is_empty() => Err(AssertError::InvalidSyntax(format!(
                    "Empty segment in body path: {}",
                    input
                ))),
                Err(_) => Ok(PathSegment::Key(s.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(ValuePath::Body(segments));
    }

    Err(AssertError::InvalidSyntax(format!(
        "Invalid value path: {}. Must start with 'status', 'headers.', 'body' or 'response.time'",
        input
    )))
}

/// 解析断言值（右值）
pub fn parse_assert_value(input: &str) -> AssertValue {
    let input = input.trim();

    match input {
        "null" => return AssertValue::Null,
        "true" => return AssertValue::Bool(true),
        "false" => return AssertValue::Bool(false),
        _ => {}
    }

    if input.len() >= 2
        && ((input.starts_with('"') && input.ends_with('"'))
            || (input.starts_with('\'') && input.ends_with('\'')))
    {
        return AssertValue::String(input[1..input.len() - 1].to_string());
    }

    if let Ok(n) = input.parse::<f64>() {
        return AssertValue::Number(n);
    }

    // 未带引号的字符串（用于 contains 等）
    AssertValue::String(input.to_string())
}
