use std::collections::HashMap;

use tracing::debug;

use crate::collection::{CollectionTree, NodeId};
use crate::variable::resolver::VariableResolver;
use crate::variable::types::{
    ScopeSnapshot, ScopeStore, VariableScope, VariableSnapshot, VariableWrite,
};

/// 单次运行的可变作用域栈
///
/// 每个层级一个存储：临时替换层、当前请求、文件夹栈（外层在前）、集合、环境、全局。
/// 查找与 `VariableResolver` 使用同一优先级，严格首个命中。
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    overrides: ScopeStore,
    request: Option<ScopeStore>,
    folders: Vec<ScopeStore>,
    collection: Option<ScopeStore>,
    /// 集合层自创建以来是否被写过
    collection_written: bool,
    environment: ScopeStore,
    globals: ScopeStore,
}

/// `enter_lineage` 压入的层，用于之后原样撤销
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Layering {
    collection_set: bool,
    folders_pushed: usize,
    request_set: bool,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            overrides: ScopeStore::new(VariableScope::Override, "Overrides"),
            request: None,
            folders: Vec::new(),
            collection: None,
            collection_written: false,
            environment: ScopeStore::new(VariableScope::Environment, "Environment"),
            globals: ScopeStore::new(VariableScope::Global, "Globals"),
        }
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_environment(mut self, name: &str, values: HashMap<String, String>) -> Self {
        self.environment = ScopeStore::new(
            VariableScope::Environment,
            format!("Environment '{}'", name),
        )
        .with_values(values);
        self
    }

    pub fn with_globals(mut self, values: HashMap<String, String>) -> Self {
        self.globals = ScopeStore::new(VariableScope::Global, "Globals").with_values(values);
        self
    }

    pub fn with_overrides(mut self, values: HashMap<String, String>) -> Self {
        self.overrides = self.overrides.with_values(values);
        self
    }

    /// 以集合根节点的变量作为集合层
    pub fn with_collection(mut self, tree: &CollectionTree) -> Self {
        let root = tree.root();
        self.collection = Some(ScopeStore::from_node(root, tree.node(root)));
        self
    }

    /// 按优先级（高 → 低）排列的所有存储
    pub fn stores(&self) -> Vec<&ScopeStore> {
        let mut stores = Vec::with_capacity(self.folders.len() + 5);
        stores.push(&self.overrides);
        stores.extend(self.request.iter());
        stores.extend(self.folders.iter().rev());
        stores.extend(self.collection.iter());
        stores.push(&self.environment);
        stores.push(&self.globals);
        stores
    }

    /// 指定层级的存储；Folder 返回最内层
    pub fn store(&self, scope: VariableScope) -> Option<&ScopeStore> {
        match scope {
            VariableScope::Override => Some(&self.overrides),
            VariableScope::Request => self.request.as_ref(),
            VariableScope::Folder => self.folders.last(),
            VariableScope::Collection => self.collection.as_ref(),
            VariableScope::Environment => Some(&self.environment),
            VariableScope::Global => Some(&self.globals),
        }
    }

    /// 未经替换的原始值，来自优先级最高的定义
    pub fn get_variable(&self, name: &str) -> Option<&str> {
        VariableResolver::lookup(name, &self.stores())
    }

    /// 用本上下文的存储解析模板
    pub fn resolve_variables(&self, template: &str) -> String {
        VariableResolver::resolve(template, &self.stores())
    }

    /// 写入指定层级
    ///
    /// 没有对应层时：Request/Collection 层按需创建；Folder 写入落到集合层。
    pub fn set_variable(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        scope: VariableScope,
    ) {
        let (name, value) = (name.into(), value.into());
        debug!(scope = %scope, name = %name, "set variable");
        self.store_for_write(scope).insert(name, value);
    }

    pub fn unset_variable(&mut self, name: &str, scope: VariableScope) -> Option<String> {
        self.store_for_write(scope).remove(name)
    }

    /// 按顺序应用脚本返回的写入
    pub fn apply_writes(&mut self, writes: &[VariableWrite]) {
        for write in writes {
            match &write.value {
                Some(value) => self.set_variable(write.name.clone(), value.clone(), write.scope),
                None => {
                    self.unset_variable(&write.name, write.scope);
                }
            }
        }
    }

    fn store_for_write(&mut self, scope: VariableScope) -> &mut ScopeStore {
        match scope {
            VariableScope::Override => &mut self.overrides,
            VariableScope::Request => self
                .request
                .get_or_insert_with(|| ScopeStore::new(VariableScope::Request, "Request")),
            VariableScope::Folder if !self.folders.is_empty() => {
                let last = self.folders.len() - 1;
                &mut self.folders[last]
            }
            VariableScope::Folder | VariableScope::Collection => {
                self.collection_written = true;
                self.collection
                    .get_or_insert_with(|| ScopeStore::new(VariableScope::Collection, "Collection"))
            }
            VariableScope::Environment => &mut self.environment,
            VariableScope::Global => &mut self.globals,
        }
    }

    pub fn push_folder(&mut self, store: ScopeStore) {
        self.folders.push(store);
    }

    pub fn pop_folder(&mut self) -> Option<ScopeStore> {
        self.folders.pop()
    }

    pub fn folder_depth(&self) -> usize {
        self.folders.len()
    }

    pub fn set_request_scope(&mut self, store: ScopeStore) -> Option<ScopeStore> {
        self.request.replace(store)
    }

    pub fn clear_request_scope(&mut self) -> Option<ScopeStore> {
        self.request.take()
    }

    pub fn set_collection_scope(&mut self, store: ScopeStore) -> Option<ScopeStore> {
        self.collection.replace(store)
    }

    /// 替换临时替换层，返回旧的一层以便恢复
    pub fn replace_overrides(&mut self, store: ScopeStore) -> ScopeStore {
        std::mem::replace(&mut self.overrides, store)
    }

    pub fn overrides(&self) -> &ScopeStore {
        &self.overrides
    }

    /// 上下文中是否已有来自该节点的层
    pub fn has_origin(&self, id: NodeId) -> bool {
        self.stores().iter().any(|s| s.origin == Some(id))
    }

    /// 为节点补齐尚未存在的集合层、祖先文件夹层（外 → 内）以及请求层
    ///
    /// 祖先关系通过回引用获得；返回值交给 `leave_lineage` 撤销。
    pub fn enter_lineage(&mut self, tree: &CollectionTree, node: NodeId) -> Layering {
        let mut layering = Layering::default();
        let target = tree.node(node);

        if self.collection.is_none()
            && let Some(collection) = tree.collection_of(node)
        {
            self.collection = Some(ScopeStore::from_node(collection, tree.node(collection)));
            self.collection_written = false;
            layering.collection_set = true;
        }

        let chain = if target.is_folder() {
            tree.folder_chain_from(Some(node))
        } else {
            tree.folder_chain(node)
        };
        for folder in chain.into_iter().rev() {
            if !self.has_origin(folder) {
                self.push_folder(ScopeStore::from_node(folder, tree.node(folder)));
                layering.folders_pushed += 1;
            }
        }

        if target.is_request() && self.request.as_ref().and_then(|r| r.origin) != Some(node) {
            let previous = self.set_request_scope(ScopeStore::from_node(node, target));
            if previous.is_some() {
                debug!(request = %target.name, "replaced stale request scope");
            }
            layering.request_set = true;
        }

        layering
    }

    pub fn leave_lineage(&mut self, layering: Layering) {
        if layering.request_set {
            self.clear_request_scope();
        }
        for _ in 0..layering.folders_pushed {
            self.pop_folder();
        }
        // 收到写入的集合层保留下来，后续调用可见
        if layering.collection_set {
            if self.collection_written {
                debug!("keeping written collection scope");
            } else {
                self.collection = None;
            }
        }
    }

    /// 并行分支共享的部分：去掉请求层与文件夹栈
    pub fn shared(&self) -> Self {
        Self {
            overrides: self.overrides.clone(),
            request: None,
            folders: Vec::new(),
            collection: self.collection.clone(),
            collection_written: self.collection_written,
            environment: self.environment.clone(),
            globals: self.globals.clone(),
        }
    }

    /// 只读快照，每个变量附带完成替换后的值
    pub fn snapshot(&self) -> VariableSnapshot {
        let stores = self.stores();
        let mut snapshot = VariableSnapshot {
            scopes: stores
                .iter()
                .map(|s| ScopeSnapshot {
                    scope: s.scope,
                    name: s.name.clone(),
                    values: s.to_map(),
                })
                .collect(),
            ..Default::default()
        };

        for store in stores.iter().rev() {
            for key in store.keys() {
                if !snapshot.resolved.contains_key(key) {
                    let raw = format!("{{{{{}}}}}", key);
                    snapshot
                        .resolved
                        .insert(key.to_string(), VariableResolver::resolve(&raw, &stores));
                }
            }
        }

        snapshot
    }
}
