use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::collection::types::{
    Auth, CollectionDefinition, ItemDefinition, RequestDef, Scripts, Variable,
};
use crate::{CollrunError, Result};

/// 节点在树中的不透明索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Collection,
    Folder,
    Request,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Collection => write!(f, "Collection"),
            NodeKind::Folder => write!(f, "Folder"),
            NodeKind::Request => write!(f, "Request"),
        }
    }
}

/// 树中的一个节点：集合、文件夹或请求
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub description: Option<String>,
    pub variables: Vec<Variable>,
    pub auth: Option<Auth>,
    pub scripts: Scripts,
    /// 仅 Request 节点持有
    pub request: Option<RequestDef>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    collection: Option<NodeId>,
}

impl Node {
    fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            variables: Vec::new(),
            auth: None,
            scripts: Scripts::default(),
            request: None,
            children: Vec::new(),
            parent: None,
            collection: None,
        }
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// 父节点回引用（仅在 wire() 之后存在）
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// 所属集合回引用（仅在 wire() 之后存在）
    pub fn collection(&self) -> Option<NodeId> {
        self.collection
    }

    pub fn is_request(&self) -> bool {
        self.kind == NodeKind::Request
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    pub fn is_collection(&self) -> bool {
        self.kind == NodeKind::Collection
    }

    /// 未禁用的变量声明
    pub fn enabled_variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter().filter(|v| v.is_enabled())
    }

    pub fn variable(&self, key: &str) -> Option<&Variable> {
        self.enabled_variables().find(|v| v.key == key)
    }

    pub fn with_variable(&mut self, variable: Variable) -> &mut Self {
        self.variables.push(variable);
        self
    }

    pub fn with_auth(&mut self, auth: Auth) -> &mut Self {
        self.auth = Some(auth);
        self
    }

    /// 人类可读的位置描述，如 `Folder 'Users'`
    pub fn label(&self) -> String {
        format!("{} '{}'", self.kind, self.name)
    }
}

/// 以 arena 存储的只读集合树
///
/// 子节点列表在构建时确定；父节点与集合的回引用只由显式的 `wire()` 设置，
/// 向上遍历因此只是索引查找。
#[derive(Debug, Clone)]
pub struct CollectionTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl CollectionTree {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            nodes: vec![Node::new(name, NodeKind::Collection)],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// 按索引获取节点；`NodeId` 只能由本树产生
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn add_folder(&mut self, parent: NodeId, name: impl Into<String>) -> Result<NodeId> {
        self.add_child(parent, Node::new(name, NodeKind::Folder))
    }

    pub fn add_request(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        request: RequestDef,
    ) -> Result<NodeId> {
        let mut node = Node::new(name, NodeKind::Request);
        node.request = Some(request);
        self.add_child(parent, node)
    }

    fn add_child(&mut self, parent: NodeId, node: Node) -> Result<NodeId> {
        match self.get(parent) {
            Some(p) if !p.is_request() => {}
            Some(p) => {
                return Err(CollrunError::InvalidArgument(format!(
                    "{} cannot hold children",
                    p.label()
                )));
            }
            None => {
                return Err(CollrunError::InvalidArgument(format!(
                    "Unknown parent node {}",
                    parent.0
                )));
            }
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// 根据子节点列表设置所有父节点与集合回引用
    pub fn wire(&mut self) {
        let root = self.root;
        for index in 0..self.nodes.len() {
            let children = self.nodes[index].children.clone();
            for child in children {
                let node = &mut self.nodes[child.0];
                node.parent = Some(NodeId(index));
                node.collection = Some(root);
            }
        }
    }

    /// 手动覆盖单个节点的父回引用
    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        self.nodes[id.0].parent = parent;
    }

    /// 父节点为 Folder 时返回它
    pub fn parent_folder(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)
            .parent
            .filter(|p| self.get(*p).is_some_and(Node::is_folder))
    }

    /// 从 `start`（含）开始沿父回引用向外的文件夹链，内层在前
    ///
    /// 遇到缺失的回引用、非 Folder 节点或重复节点时停止。
    pub fn folder_chain_from(&self, start: Option<NodeId>) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = start;

        while let Some(id) = current {
            match self.get(id) {
                Some(node) if node.is_folder() && seen.insert(id) => {
                    chain.push(id);
                    current = node.parent;
                }
                _ => break,
            }
        }

        chain
    }

    /// 节点所在的文件夹链（不含节点本身），内层在前
    pub fn folder_chain(&self, id: NodeId) -> Vec<NodeId> {
        self.folder_chain_from(self.parent_folder(id))
    }

    /// 节点所属集合：回引用优先，节点本身是集合时返回自身
    pub fn collection_of(&self, id: NodeId) -> Option<NodeId> {
        let node = self.get(id)?;
        if node.is_collection() {
            return Some(id);
        }
        node.collection
    }

    /// 从根到叶的节点名称
    pub fn path(&self, id: NodeId) -> Vec<String> {
        let node = self.node(id);
        let start = if node.is_folder() {
            Some(id)
        } else {
            self.parent_folder(id)
        };
        let chain = self.folder_chain_from(start);
        self.path_of(self.collection_of(id), &chain, node.is_request().then_some(id))
    }

    /// 由集合、文件夹链（内层在前）与叶子请求组装根到叶路径
    pub fn path_of(
        &self,
        collection: Option<NodeId>,
        folders_inner_first: &[NodeId],
        leaf: Option<NodeId>,
    ) -> Vec<String> {
        collection
            .iter()
            .chain(folders_inner_first.iter().rev())
            .chain(leaf.iter())
            .filter_map(|id| self.get(*id))
            .map(|n| n.name.clone())
            .collect()
    }

    /// 深度优先先序遍历（声明顺序），包含 `start`
    pub fn walk(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.node(id).children.iter().rev());
        }
        order
    }

    /// 所有请求节点，声明顺序
    pub fn requests(&self) -> Vec<NodeId> {
        self.walk(self.root)
            .into_iter()
            .filter(|id| self.node(*id).is_request())
            .collect()
    }

    /// 按名称查找第一个节点（深度优先）
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.walk(self.root)
            .into_iter()
            .find(|id| self.node(*id).name == name)
    }

    /// 由外部解析得到的文档构建树，并完成回引用连接
    pub fn from_definition(def: CollectionDefinition) -> Result<Self> {
        let mut tree = CollectionTree::new(def.name);
        let root = tree.root();
        {
            let node = tree.node_mut(root);
            node.description = def.description;
            node.variables = def.variables;
            node.auth = def.auth;
            node.scripts = def.scripts;
        }
        tree.add_items(root, def.items)?;
        tree.wire();
        Ok(tree)
    }

    fn add_items(&mut self, parent: NodeId, items: Vec<ItemDefinition>) -> Result<()> {
        for item in items {
            match item {
                ItemDefinition::Folder(folder) => {
                    let id = self.add_folder(parent, folder.name)?;
                    let node = self.node_mut(id);
                    node.description = folder.description;
                    node.variables = folder.variables;
                    node.auth = folder.auth;
                    node.scripts = folder.scripts;
                    self.add_items(id, folder.items)?;
                }
                ItemDefinition::Request(request) => {
                    let id = self.add_request(parent, request.name, request.request)?;
                    let node = self.node_mut(id);
                    node.description = request.description;
                    node.variables = request.variables;
                    node.auth = request.auth;
                    node.scripts = request.scripts;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> (CollectionTree, NodeId, NodeId, NodeId) {
        let mut tree = CollectionTree::new("API");
        let root = tree.root();
        let outer = tree.add_folder(root, "Users").unwrap();
        let inner = tree.add_folder(outer, "Admin").unwrap();
        let req = tree
            .add_request(inner, "Delete user", RequestDef::get("/users/:id"))
            .unwrap();
        tree.wire();
        (tree, outer, inner, req)
    }

    #[test]
    fn test_back_references_require_wiring() {
        let mut tree = CollectionTree::new("API");
        let folder = tree.add_folder(tree.root(), "F").unwrap();
        assert_eq!(tree.node(folder).parent(), None);

        tree.wire();
        assert_eq!(tree.node(folder).parent(), Some(tree.root()));
        assert_eq!(tree.node(folder).collection(), Some(tree.root()));
    }

    #[test]
    fn test_folder_chain_inner_first() {
        let (tree, outer, inner, req) = sample_tree();
        assert_eq!(tree.folder_chain(req), vec![inner, outer]);
        assert_eq!(tree.parent_folder(outer), None);
    }

    #[test]
    fn test_missing_back_reference_stops_walk() {
        let (mut tree, _outer, inner, req) = sample_tree();
        tree.set_parent(inner, None);
        assert_eq!(tree.folder_chain(req), vec![inner]);
    }

    #[test]
    fn test_parent_cycle_terminates() {
        let (mut tree, outer, inner, req) = sample_tree();
        tree.set_parent(outer, Some(inner));
        assert_eq!(tree.folder_chain(req), vec![inner, outer]);
    }

    #[test]
    fn test_path_root_to_leaf() {
        let (tree, outer, _inner, req) = sample_tree();
        assert_eq!(tree.path(req), vec!["API", "Users", "Admin", "Delete user"]);
        assert_eq!(tree.path(outer), vec!["API", "Users"]);
        assert_eq!(tree.path(tree.root()), vec!["API"]);
    }

    #[test]
    fn test_walk_declaration_order() {
        let mut tree = CollectionTree::new("API");
        let root = tree.root();
        let a = tree.add_request(root, "a", RequestDef::get("/a")).unwrap();
        let f = tree.add_folder(root, "f").unwrap();
        let b = tree.add_request(f, "b", RequestDef::get("/b")).unwrap();
        let c = tree.add_request(root, "c", RequestDef::get("/c")).unwrap();

        assert_eq!(tree.walk(root), vec![root, a, f, b, c]);
        assert_eq!(tree.requests(), vec![a, b, c]);
        assert_eq!(tree.find("b"), Some(b));
    }

    #[test]
    fn test_request_cannot_hold_children() {
        let (mut tree, _, _, req) = sample_tree();
        let err = tree.add_folder(req, "nested").unwrap_err();
        assert!(matches!(err, CollrunError::InvalidArgument(_)));
    }

    #[test]
    fn test_from_definition_keeps_collection_and_folder_scripts() {
        let def: CollectionDefinition = serde_json::from_value(serde_json::json!({
            "name": "API",
            "scripts": {"pre_request": "set request trace = \"c\""},
            "items": [{
                "type": "folder",
                "name": "Users",
                "scripts": {"test": "assert status == 200"},
                "items": [{
                    "type": "request",
                    "name": "List",
                    "request": {"url": "http://api.test/users"}
                }]
            }]
        }))
        .unwrap();

        let tree = CollectionTree::from_definition(def).unwrap();
        let root = tree.node(tree.root());
        assert_eq!(root.scripts.pre_request.as_deref(), Some("set request trace = \"c\""));
        let users = tree.node(tree.find("Users").unwrap());
        assert_eq!(users.scripts.test.as_deref(), Some("assert status == 200"));
        assert_eq!(users.scripts.pre_request, None);
        assert_eq!(tree.node(tree.find("List").unwrap()).scripts, Scripts::default());
    }
}
