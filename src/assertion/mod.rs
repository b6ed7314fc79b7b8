/// 断言模块 - 对响应求值的断言表达式
mod evaluator;
mod extractor;
mod parser;
mod types;

pub use evaluator::{AssertionResult, evaluate_assertion};
pub use extractor::{extract_text, extract_value};
pub use parser::{parse_assert_value, parse_assertion, parse_value_path};
pub use types::{AssertError, AssertExpr, AssertValue, CompareOp, PathSegment, ValuePath};
