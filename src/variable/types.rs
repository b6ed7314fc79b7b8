use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CollrunError;
use crate::collection::{Node, NodeId, NodeKind};

/// 变量作用域层级，声明顺序即优先级（高 → 低）
///
/// `Override` 是执行期的临时替换层；`Folder` 层可能有多个，内层优先。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableScope {
    Override,
    Request,
    Folder,
    Collection,
    Environment,
    Global,
}

impl VariableScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariableScope::Override => "override",
            VariableScope::Request => "request",
            VariableScope::Folder => "folder",
            VariableScope::Collection => "collection",
            VariableScope::Environment => "environment",
            VariableScope::Global => "global",
        }
    }

    /// 树节点声明的变量所属的层级
    pub fn of_node(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Collection => VariableScope::Collection,
            NodeKind::Folder => VariableScope::Folder,
            NodeKind::Request => VariableScope::Request,
        }
    }
}

impl fmt::Display for VariableScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VariableScope {
    type Err = CollrunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "override" | "local" => Ok(VariableScope::Override),
            "request" => Ok(VariableScope::Request),
            "folder" => Ok(VariableScope::Folder),
            "collection" => Ok(VariableScope::Collection),
            "environment" | "env" => Ok(VariableScope::Environment),
            "global" | "globals" => Ok(VariableScope::Global),
            other => Err(CollrunError::ParseError(format!(
                "Unknown variable scope: {}",
                other
            ))),
        }
    }
}

/// 单个作用域层的变量存储
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeStore {
    pub scope: VariableScope,
    /// 人类可读的来源，如 `Folder 'Users'`、`Environment 'dev'`
    pub name: String,
    /// 来源于树节点时的节点索引
    pub origin: Option<NodeId>,
    values: HashMap<String, String>,
}

impl ScopeStore {
    pub fn new(scope: VariableScope, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
            origin: None,
            values: HashMap::new(),
        }
    }

    /// 由树节点的变量声明构建；禁用的变量被忽略，未赋值的变量绑定为空串
    pub fn from_node(id: NodeId, node: &Node) -> Self {
        let mut store = Self::new(VariableScope::of_node(node.kind), node.label());
        store.origin = Some(id);
        for variable in node.enabled_variables() {
            store.insert(
                variable.key.clone(),
                variable.value.clone().unwrap_or_default(),
            );
        }
        store
    }

    pub fn with_values(mut self, values: HashMap<String, String>) -> Self {
        self.values.extend(values);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    /// 有序副本，用于快照与序列化
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// 脚本请求的一次变量写入；`value` 为 `None` 表示删除
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableWrite {
    pub scope: VariableScope,
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl VariableWrite {
    pub fn set(scope: VariableScope, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn unset(scope: VariableScope, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
            value: None,
        }
    }
}

/// 一个作用域层的只读快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSnapshot {
    pub scope: VariableScope,
    pub name: String,
    pub values: BTreeMap<String, String>,
}

/// 交给沙箱或调用方的只读变量视图
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSnapshot {
    /// 按优先级排列的各作用域层
    pub scopes: Vec<ScopeSnapshot>,
    /// 每个变量名最终生效并完成替换的值
    pub resolved: BTreeMap<String, String>,
}

impl VariableSnapshot {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.resolved.get(name).map(|s| s.as_str())
    }

    pub fn scope(&self, scope: VariableScope) -> Option<&ScopeSnapshot> {
        self.scopes.iter().find(|s| s.scope == scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{CollectionTree, Variable};

    #[test]
    fn test_scope_order_is_precedence() {
        assert!(VariableScope::Override < VariableScope::Request);
        assert!(VariableScope::Request < VariableScope::Folder);
        assert!(VariableScope::Folder < VariableScope::Collection);
        assert!(VariableScope::Collection < VariableScope::Environment);
        assert!(VariableScope::Environment < VariableScope::Global);
    }

    #[test]
    fn test_scope_from_str() {
        assert_eq!(
            "Globals".parse::<VariableScope>().unwrap(),
            VariableScope::Global
        );
        assert_eq!(
            "env".parse::<VariableScope>().unwrap(),
            VariableScope::Environment
        );
        assert!("session".parse::<VariableScope>().is_err());
    }

    #[test]
    fn test_store_from_node_skips_disabled() {
        let mut tree = CollectionTree::new("API");
        let root = tree.root();
        tree.node_mut(root)
            .with_variable(Variable::new("host", "localhost"))
            .with_variable(Variable::new("old", "x").disabled())
            .with_variable(Variable {
                key: "empty".to_string(),
                value: None,
                var_type: None,
                description: None,
                disabled: false,
            });

        let store = ScopeStore::from_node(root, tree.node(root));
        assert_eq!(store.scope, VariableScope::Collection);
        assert_eq!(store.name, "Collection 'API'");
        assert_eq!(store.origin, Some(root));
        assert_eq!(store.get("host"), Some("localhost"));
        assert_eq!(store.get("old"), None);
        assert_eq!(store.get("empty"), Some(""));
    }
}
