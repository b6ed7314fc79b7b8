use serde::Serialize;
use tracing::debug;

use crate::collection::Auth;
use crate::error::ExecutionError;
use crate::http::{Credential, OutgoingRequest};
use crate::variable::{ExecutionContext, VariableResolver};

/// 认证最终落到请求上的形式
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AuthInjection {
    None,
    Header { name: String, value: String },
    Query { name: String, value: String },
    Credential(Credential),
}

/// 解析认证参数并注入请求
///
/// 注入的 Header 或查询参数替换请求中已有的同名项。
pub fn apply_auth(
    auth: &Auth,
    context: &ExecutionContext,
    request: &mut OutgoingRequest,
) -> Result<AuthInjection, ExecutionError> {
    let injection = build_injection(auth, context)?;
    match &injection {
        AuthInjection::None => {}
        AuthInjection::Header { name, value } => {
            if request.has_header(name) {
                debug!(header = %name, "auth replaces explicit header");
            }
            request.set_header(name, value);
        }
        AuthInjection::Query { name, value } => request.set_query(name, value),
        AuthInjection::Credential(credential) => request.credential = Some(credential.clone()),
    }
    Ok(injection)
}

/// 按认证类型构造注入项，参数先经上下文解析
pub fn build_injection(
    auth: &Auth,
    context: &ExecutionContext,
) -> Result<AuthInjection, ExecutionError> {
    let params = Params { auth, context };

    match auth.auth_type.to_ascii_lowercase().as_str() {
        "noauth" => Ok(AuthInjection::None),
        "basic" => {
            let username = params.required("username")?;
            let password = params.optional("password")?.filter(|p| !p.is_empty());
            Ok(AuthInjection::Credential(Credential::Basic { username, password }))
        }
        "bearer" => {
            let token = params.required("token")?;
            Ok(AuthInjection::Header {
                name: "Authorization".to_string(),
                value: format!("Bearer {}", token),
            })
        }
        "apikey" => {
            let name = params.required("key")?;
            let value = params.optional("value")?.unwrap_or_default();
            let location = params.optional("in")?.unwrap_or_else(|| "header".to_string());
            place(&auth.auth_type, &location, name, value)
        }
        "oauth2" => {
            let token = params.required("accessToken")?;
            let location = params
                .optional("addTokenTo")?
                .unwrap_or_else(|| "header".to_string());
            if location.eq_ignore_ascii_case("query") || location.eq_ignore_ascii_case("queryParams")
            {
                return Ok(AuthInjection::Query {
                    name: "access_token".to_string(),
                    value: token,
                });
            }
            let prefix = params
                .optional("headerPrefix")?
                .unwrap_or_else(|| "Bearer".to_string());
            let value = if prefix.is_empty() {
                token
            } else {
                format!("{} {}", prefix, token)
            };
            place(&auth.auth_type, &location, "Authorization".to_string(), value)
        }
        other => Err(ExecutionError::authentication(
            other,
            "unsupported authentication type",
        )),
    }
}

fn place(
    auth_type: &str,
    location: &str,
    name: String,
    value: String,
) -> Result<AuthInjection, ExecutionError> {
    match location.to_ascii_lowercase().as_str() {
        "header" => Ok(AuthInjection::Header { name, value }),
        "query" | "queryparams" => Ok(AuthInjection::Query { name, value }),
        other => Err(ExecutionError::authentication(
            auth_type,
            format!("unknown placement '{}'", other),
        )),
    }
}

struct Params<'a> {
    auth: &'a Auth,
    context: &'a ExecutionContext,
}

impl Params<'_> {
    fn optional(&self, key: &str) -> Result<Option<String>, ExecutionError> {
        let Some(raw) = self.auth.param(key) else {
            return Ok(None);
        };
        let value = self.context.resolve_variables(raw);
        if let Some(name) = VariableResolver::unresolved(&value).into_iter().next() {
            return Err(ExecutionError::authentication(
                &self.auth.auth_type,
                format!("parameter '{}' references undefined variable '{}'", key, name),
            ));
        }
        Ok(Some(value))
    }

    fn required(&self, key: &str) -> Result<String, ExecutionError> {
        self.optional(key)?
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ExecutionError::authentication(
                    &self.auth.auth_type,
                    format!("missing required parameter '{}'", key),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use crate::variable::VariableScope;

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        ctx.set_variable("token", "tok-123", VariableScope::Environment);
        ctx.set_variable("user", "alice", VariableScope::Global);
        ctx
    }

    fn request() -> OutgoingRequest {
        OutgoingRequest::new(Method::Get, "http://localhost/api")
    }

    #[test]
    fn test_bearer_header() {
        let mut req = request().with_header("authorization", "stale");
        let injection = apply_auth(&Auth::bearer("{{token}}"), &context(), &mut req).unwrap();
        assert_eq!(
            injection,
            AuthInjection::Header {
                name: "Authorization".to_string(),
                value: "Bearer tok-123".to_string(),
            }
        );
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("Authorization"), Some("Bearer tok-123"));
    }

    #[test]
    fn test_basic_becomes_transport_credential() {
        let mut req = request();
        apply_auth(&Auth::basic("{{user}}", ""), &context(), &mut req).unwrap();
        assert_eq!(
            req.credential,
            Some(Credential::Basic {
                username: "alice".to_string(),
                password: None,
            })
        );
        assert!(!req.has_header("Authorization"));
    }

    #[test]
    fn test_api_key_placement() {
        let mut req = request();
        apply_auth(
            &Auth::api_key("X-Api-Key", "{{token}}", "header"),
            &context(),
            &mut req,
        )
        .unwrap();
        assert_eq!(req.header("x-api-key"), Some("tok-123"));

        let mut req = request();
        apply_auth(
            &Auth::api_key("api_key", "{{token}}", "query"),
            &context(),
            &mut req,
        )
        .unwrap();
        assert_eq!(req.query_param("api_key"), Some("tok-123"));

        let err = apply_auth(&Auth::api_key("k", "v", "cookie"), &context(), &mut request())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Authentication { .. }));
    }

    #[test]
    fn test_oauth2_prefix_and_query() {
        let auth = Auth::new("oauth2")
            .with_param("accessToken", "{{token}}")
            .with_param("headerPrefix", "Token");
        let mut req = request();
        apply_auth(&auth, &context(), &mut req).unwrap();
        assert_eq!(req.header("Authorization"), Some("Token tok-123"));

        let auth = Auth::new("oauth2")
            .with_param("accessToken", "raw")
            .with_param("addTokenTo", "queryParams");
        let mut req = request();
        apply_auth(&auth, &context(), &mut req).unwrap();
        assert_eq!(req.query_param("access_token"), Some("raw"));
    }

    #[test]
    fn test_noauth_injects_nothing() {
        let mut req = request();
        let injection = apply_auth(&Auth::none(), &context(), &mut req).unwrap();
        assert_eq!(injection, AuthInjection::None);
        assert_eq!(req, request());
    }

    #[test]
    fn test_missing_and_unresolved_parameters() {
        let err = build_injection(&Auth::new("bearer"), &context()).unwrap_err();
        assert_eq!(
            err,
            ExecutionError::authentication("bearer", "missing required parameter 'token'")
        );

        let err = build_injection(&Auth::bearer("{{missing_token}}"), &context()).unwrap_err();
        match err {
            ExecutionError::Authentication { message, .. } => {
                assert!(message.contains("missing_token"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type() {
        let err = build_injection(&Auth::new("hawk"), &context()).unwrap_err();
        assert!(matches!(err, ExecutionError::Authentication { ref auth_type, .. } if auth_type == "hawk"));
    }
}
