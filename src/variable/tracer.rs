use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::collection::{CollectionTree, NodeId};
use crate::variable::context::ExecutionContext;
use crate::variable::resolver::VariableResolver;
use crate::variable::types::{ScopeStore, VariableScope};

/// 一处变量定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableReference {
    pub name: String,
    pub value: Option<String>,
    pub scope: VariableScope,
    /// 定义所在的树节点；外部作用域（环境、全局）为 None
    pub node: Option<NodeId>,
    /// 如 `Folder 'Users'`、`Environment 'dev'`
    pub location: String,
}

/// 一处变量使用
#[derive(Debug, Clone)]
struct Usage {
    name: String,
    location: String,
    /// 从集合到使用点节点（含）的祖先链
    lineage: Vec<NodeId>,
    /// 请求自身绑定的路径参数名
    path_bindings: Vec<String>,
    path_param: bool,
}

/// 对静态集合树做变量分析
///
/// 使用点通过携带祖先链的下行遍历获得，不依赖回引用。
pub struct VariableTracer<'a> {
    tree: &'a CollectionTree,
    external: Vec<ScopeStore>,
}

impl<'a> VariableTracer<'a> {
    pub fn new(tree: &'a CollectionTree) -> Self {
        Self {
            tree,
            external: Vec::new(),
        }
    }

    /// 附加树之外的作用域（环境、全局），按优先级顺序附加
    pub fn with_external_scope(mut self, store: ScopeStore) -> Self {
        self.external.push(store);
        self
    }

    /// 按声明顺序列出定义：树的先序遍历，然后是外部作用域
    pub fn trace(&self, name: &str) -> Vec<VariableReference> {
        self.definitions()
            .into_iter()
            .filter(|r| r.name == name)
            .collect()
    }

    /// 列出通过 `context` 可见的定义，按解析优先级排列（第一个即生效者）
    pub fn trace_in(&self, name: &str, context: &ExecutionContext) -> Vec<VariableReference> {
        context
            .stores()
            .into_iter()
            .filter_map(|store| {
                store.get(name).map(|value| VariableReference {
                    name: name.to_string(),
                    value: Some(value.to_string()),
                    scope: store.scope,
                    node: store.origin,
                    location: store.name.clone(),
                })
            })
            .collect()
    }

    /// 在两处及以上声明的变量
    pub fn find_shadowed(&self) -> BTreeMap<String, Vec<VariableReference>> {
        let mut grouped: BTreeMap<String, Vec<VariableReference>> = BTreeMap::new();
        for reference in self.definitions() {
            grouped
                .entry(reference.name.clone())
                .or_default()
                .push(reference);
        }
        grouped.retain(|_, refs| refs.len() >= 2);
        grouped
    }

    /// 在使用点没有任何可达定义的变量
    pub fn find_undefined(&self) -> BTreeSet<String> {
        self.usages()
            .into_iter()
            .filter(|usage| !self.is_reachable(usage))
            .map(|usage| usage.name)
            .collect()
    }

    /// 变量的所有使用位置，按遍历顺序
    pub fn find_usage(&self, name: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.usages()
            .into_iter()
            .filter(|usage| usage.name == name)
            .map(|usage| usage.location)
            .filter(|location| seen.insert(location.clone()))
            .collect()
    }

    fn definitions(&self) -> Vec<VariableReference> {
        let tree_defs = self.tree.walk(self.tree.root()).into_iter().flat_map(|id| {
            let node = self.tree.node(id);
            node.enabled_variables().map(move |variable| VariableReference {
                name: variable.key.clone(),
                value: variable.value.clone(),
                scope: VariableScope::of_node(node.kind),
                node: Some(id),
                location: node.label(),
            })
        });

        let external_defs = self.external.iter().flat_map(|store| {
            let mut keys: Vec<&str> = store.keys().collect();
            keys.sort_unstable();
            keys.into_iter().map(move |key| VariableReference {
                name: key.to_string(),
                value: store.get(key).map(str::to_string),
                scope: store.scope,
                node: store.origin,
                location: store.name.clone(),
            })
        });

        tree_defs.chain(external_defs).collect()
    }

    fn is_reachable(&self, usage: &Usage) -> bool {
        if VariableResolver::is_dynamic(&usage.name) {
            return true;
        }
        if usage.path_param && usage.path_bindings.contains(&usage.name) {
            return true;
        }
        usage
            .lineage
            .iter()
            .any(|id| self.tree.node(*id).variable(&usage.name).is_some())
            || self.external.iter().any(|store| store.contains(&usage.name))
    }

    fn usages(&self) -> Vec<Usage> {
        let mut usages = Vec::new();
        let mut lineage = Vec::new();
        self.collect_usages(self.tree.root(), &mut lineage, &mut usages);
        usages
    }

    fn collect_usages(&self, id: NodeId, lineage: &mut Vec<NodeId>, out: &mut Vec<Usage>) {
        lineage.push(id);
        let node = self.tree.node(id);
        let label = node.label();

        let mut texts: Vec<(String, &str)> = Vec::new();
        let mut path_bindings = Vec::new();
        let mut url = None;

        if let Some(request) = &node.request {
            url = Some(request.url.as_str());
            texts.push((format!("{} url", label), request.url.as_str()));
            for header in request.headers.iter().filter(|h| !h.disabled) {
                texts.push((format!("{} header '{}'", label, header.key), header.value.as_str()));
            }
            for param in request.query.iter().filter(|q| !q.disabled) {
                texts.push((format!("{} query '{}'", label, param.key), param.value.as_str()));
            }
            for binding in request.path_variables.iter().filter(|p| !p.disabled) {
                path_bindings.push(binding.key.clone());
                texts.push((
                    format!("{} path variable '{}'", label, binding.key),
                    binding.value.as_str(),
                ));
            }
            if let Some(body) = &request.body {
                for text in body.texts() {
                    texts.push((format!("{} body", label), text));
                }
            }
        }
        if let Some(auth) = &node.auth {
            for param in &auth.params {
                texts.push((format!("{} auth parameter '{}'", label, param.key), param.value.as_str()));
            }
        }
        if let Some(script) = &node.scripts.pre_request {
            texts.push((format!("{} prerequest script", label), script.as_str()));
        }
        if let Some(script) = &node.scripts.test {
            texts.push((format!("{} test script", label), script.as_str()));
        }

        for (location, text) in texts {
            for name in VariableResolver::placeholders(text) {
                out.push(Usage {
                    name,
                    location: location.clone(),
                    lineage: lineage.clone(),
                    path_bindings: path_bindings.clone(),
                    path_param: false,
                });
            }
        }
        if let Some(url) = url {
            for name in VariableResolver::path_params(url) {
                out.push(Usage {
                    name,
                    location: format!("{} url", label),
                    lineage: lineage.clone(),
                    path_bindings: path_bindings.clone(),
                    path_param: true,
                });
            }
        }

        for child in node.children() {
            self.collect_usages(*child, lineage, out);
        }
        lineage.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{Auth, Body, RequestDef, Variable};
    use std::collections::HashMap;

    /// 集合与文件夹都定义 base_url
    fn scenario_a() -> (CollectionTree, NodeId, NodeId) {
        let mut tree = CollectionTree::new("API");
        let root = tree.root();
        tree.node_mut(root)
            .with_variable(Variable::new("base_url", "https://prod.example.com"));
        let folder = tree.add_folder(root, "Staging").unwrap();
        tree.node_mut(folder)
            .with_variable(Variable::new("base_url", "https://staging.example.com"));
        let request = tree
            .add_request(folder, "Health", RequestDef::get("{{base_url}}/health"))
            .unwrap();
        tree.wire();
        (tree, folder, request)
    }

    #[test]
    fn test_trace_declaration_order() {
        let (tree, folder, _) = scenario_a();
        let refs = VariableTracer::new(&tree).trace("base_url");

        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].scope, VariableScope::Collection);
        assert_eq!(refs[0].node, Some(tree.root()));
        assert_eq!(refs[1].scope, VariableScope::Folder);
        assert_eq!(refs[1].node, Some(folder));
        assert_eq!(refs[1].location, "Folder 'Staging'");
    }

    #[test]
    fn test_trace_in_precedence_order() {
        let (tree, folder, request) = scenario_a();
        let mut ctx = ExecutionContext::new();
        ctx.enter_lineage(&tree, request);

        let refs = VariableTracer::new(&tree).trace_in("base_url", &ctx);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].node, Some(folder));
        assert_eq!(
            refs[0].value.as_deref(),
            Some("https://staging.example.com")
        );
        assert_eq!(refs[1].scope, VariableScope::Collection);
        assert_eq!(
            ctx.resolve_variables("{{base_url}}"),
            "https://staging.example.com"
        );
    }

    #[test]
    fn test_trace_includes_external_scopes() {
        let (tree, _, _) = scenario_a();
        let env = ScopeStore::new(VariableScope::Environment, "Environment 'dev'")
            .with_values(HashMap::from([(
                "base_url".to_string(),
                "http://localhost".to_string(),
            )]));
        let refs = VariableTracer::new(&tree)
            .with_external_scope(env)
            .trace("base_url");
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[2].scope, VariableScope::Environment);
        assert_eq!(refs[2].node, None);
    }

    #[test]
    fn test_find_shadowed() {
        let (mut tree, folder, _) = scenario_a();
        tree.node_mut(folder)
            .with_variable(Variable::new("only_here", "x"))
            .with_variable(Variable::new("base_url", "ignored").disabled());

        let shadowed = VariableTracer::new(&tree).find_shadowed();
        assert_eq!(shadowed.len(), 1);
        assert_eq!(shadowed["base_url"].len(), 2);
        assert!(!shadowed.contains_key("only_here"));
    }

    #[test]
    fn test_find_undefined_path_params() {
        let mut tree = CollectionTree::new("API");
        let root = tree.root();
        tree.node_mut(root)
            .with_variable(Variable::new("base", "http://localhost"));
        tree.add_request(root, "Get", RequestDef::get("{{base}}/:id"))
            .unwrap();

        let undefined = VariableTracer::new(&tree).find_undefined();
        assert!(undefined.contains("id"));
        assert!(!undefined.contains("base"));
    }

    #[test]
    fn test_find_undefined_respects_lineage() {
        let mut tree = CollectionTree::new("API");
        let root = tree.root();
        let a = tree.add_folder(root, "A").unwrap();
        tree.node_mut(a).with_variable(Variable::new("token", "t"));
        let b = tree.add_folder(root, "B").unwrap();
        tree.add_request(a, "InA", RequestDef::get("http://h/{{token}}"))
            .unwrap();
        tree.add_request(
            b,
            "InB",
            RequestDef::get("http://h/users/:uid/:post")
                .with_header("Authorization", "{{token}}")
                .with_path_variable("uid", "1")
                .with_body(Body::json(r#"{"t":"{{$timestamp}}"}"#)),
        )
        .unwrap();

        // 文件夹 A 的定义对文件夹 B 中的请求不可达
        let undefined = VariableTracer::new(&tree).find_undefined();
        assert_eq!(
            undefined.into_iter().collect::<Vec<_>>(),
            vec!["post".to_string(), "token".to_string()]
        );
    }

    #[test]
    fn test_external_scope_defines_usage() {
        let mut tree = CollectionTree::new("API");
        let root = tree.root();
        tree.add_request(root, "Get", RequestDef::get("{{host}}/x"))
            .unwrap();
        let globals = ScopeStore::new(VariableScope::Global, "Globals").with_values(
            HashMap::from([("host".to_string(), "http://h".to_string())]),
        );

        assert!(VariableTracer::new(&tree).find_undefined().contains("host"));
        assert!(
            VariableTracer::new(&tree)
                .with_external_scope(globals)
                .find_undefined()
                .is_empty()
        );
    }

    #[test]
    fn test_find_usage_locations() {
        let mut tree = CollectionTree::new("API");
        let root = tree.root();
        let folder = tree.add_folder(root, "Admin").unwrap();
        tree.node_mut(folder).with_auth(Auth::bearer("{{token}}"));
        let request = tree
            .add_request(
                folder,
                "X",
                RequestDef::get("http://h")
                    .with_header("Authorization", "Bearer {{token}}")
                    .with_header("X-Trace", "{{ token }}"),
            )
            .unwrap();
        tree.node_mut(request).scripts.pre_request =
            Some("set request t = \"{{token}}\"".to_string());

        let usage = VariableTracer::new(&tree).find_usage("token");
        assert_eq!(
            usage,
            vec![
                "Folder 'Admin' auth parameter 'token'".to_string(),
                "Request 'X' header 'Authorization'".to_string(),
                "Request 'X' header 'X-Trace'".to_string(),
                "Request 'X' prerequest script".to_string(),
            ]
        );
    }
}
