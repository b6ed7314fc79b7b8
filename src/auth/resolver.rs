use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::collection::{Auth, CollectionTree, NodeId};

/// 生效认证的来源层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthSource {
    Request,
    Folder,
    Collection,
    None,
}

impl fmt::Display for AuthSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthSource::Request => write!(f, "request"),
            AuthSource::Folder => write!(f, "folder"),
            AuthSource::Collection => write!(f, "collection"),
            AuthSource::None => write!(f, "none"),
        }
    }
}

/// 认证解析结果，每次按需重新计算
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedAuth {
    pub auth: Option<Auth>,
    pub source: AuthSource,
    /// 定义认证的节点；来源为 None 时为空
    pub source_node: Option<NodeId>,
    /// 从根到叶的节点名称，与来源无关
    pub path: Vec<String>,
}

impl ResolvedAuth {
    /// 是否需要注入凭证（`noauth` 与未定义都不需要）
    pub fn is_active(&self) -> bool {
        self.auth.as_ref().is_some_and(|a| !a.is_noauth())
    }
}

/// 沿请求 → 文件夹链 → 集合查找第一个定义的认证
pub struct AuthResolver;

impl AuthResolver {
    /// 显式给出父文件夹与集合；显式参数总是优先于节点上保存的回引用
    ///
    /// 文件夹链从 `parent_folder` 开始沿父回引用向外，遇到缺失的回引用即停止。
    pub fn resolve_auth(
        tree: &CollectionTree,
        request: NodeId,
        parent_folder: Option<NodeId>,
        collection: Option<NodeId>,
    ) -> ResolvedAuth {
        let folders = tree.folder_chain_from(parent_folder);
        let leaf = tree.get(request).filter(|n| n.is_request()).map(|_| request);
        let path = tree.path_of(collection, &folders, leaf);

        let found = leaf
            .and_then(|id| tree.node(id).auth.as_ref().map(|a| (a, AuthSource::Request, id)))
            .or_else(|| {
                folders.iter().find_map(|id| {
                    tree.node(*id)
                        .auth
                        .as_ref()
                        .map(|a| (a, AuthSource::Folder, *id))
                })
            })
            .or_else(|| {
                collection.and_then(|id| {
                    tree.get(id)?
                        .auth
                        .as_ref()
                        .map(|a| (a, AuthSource::Collection, id))
                })
            });

        let resolved = match found {
            Some((auth, source, node)) => ResolvedAuth {
                auth: Some(auth.clone()),
                source,
                source_node: Some(node),
                path,
            },
            None => ResolvedAuth {
                auth: None,
                source: AuthSource::None,
                source_node: None,
                path,
            },
        };

        debug!(
            path = %resolved.path.join(" / "),
            source = %resolved.source,
            "auth resolved"
        );
        resolved
    }

    /// 使用节点上保存的回引用
    ///
    /// 对文件夹，链从文件夹自身开始；对集合，只看集合自身。
    pub fn effective_auth(tree: &CollectionTree, node: NodeId) -> ResolvedAuth {
        let Some(target) = tree.get(node) else {
            return ResolvedAuth {
                auth: None,
                source: AuthSource::None,
                source_node: None,
                path: Vec::new(),
            };
        };

        let collection = tree.collection_of(node);
        if target.is_request() {
            Self::resolve_auth(tree, node, tree.parent_folder(node), collection)
        } else if target.is_folder() {
            Self::resolve_auth(tree, node, Some(node), collection)
        } else {
            Self::resolve_auth(tree, node, None, Some(node))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::RequestDef;

    /// 集合 → Outer → Inner → Request
    fn tree() -> (CollectionTree, NodeId, NodeId, NodeId) {
        let mut tree = CollectionTree::new("API");
        let root = tree.root();
        let outer = tree.add_folder(root, "Outer").unwrap();
        let inner = tree.add_folder(outer, "Inner").unwrap();
        let request = tree
            .add_request(inner, "Get", RequestDef::get("http://h"))
            .unwrap();
        tree.wire();
        (tree, outer, inner, request)
    }

    #[test]
    fn test_collection_basic_auth_is_inherited() {
        let (mut tree, _, _, request) = tree();
        let root = tree.root();
        tree.node_mut(root).with_auth(Auth::basic("user", "pass"));

        let resolved = AuthResolver::effective_auth(&tree, request);
        assert_eq!(resolved.source, AuthSource::Collection);
        assert_eq!(resolved.source_node, Some(root));
        assert_eq!(resolved.auth.as_ref().unwrap().auth_type, "basic");
        assert_eq!(resolved.path, vec!["API", "Outer", "Inner", "Get"]);
    }

    #[test]
    fn test_precedence_request_folder_collection() {
        let (mut tree, outer, inner, request) = tree();
        let root = tree.root();
        tree.node_mut(root).with_auth(Auth::basic("c", "c"));
        tree.node_mut(outer).with_auth(Auth::bearer("outer"));

        let resolved = AuthResolver::effective_auth(&tree, request);
        assert_eq!(resolved.source, AuthSource::Folder);
        assert_eq!(resolved.source_node, Some(outer));

        tree.node_mut(inner).with_auth(Auth::bearer("inner"));
        let resolved = AuthResolver::effective_auth(&tree, request);
        assert_eq!(resolved.source_node, Some(inner));
        assert_eq!(resolved.auth.unwrap().param("token"), Some("inner"));

        tree.node_mut(request).with_auth(Auth::bearer("own"));
        let resolved = AuthResolver::effective_auth(&tree, request);
        assert_eq!(resolved.source, AuthSource::Request);
        assert_eq!(resolved.path, vec!["API", "Outer", "Inner", "Get"]);
    }

    #[test]
    fn test_noauth_stops_inheritance() {
        let (mut tree, _, inner, request) = tree();
        let root = tree.root();
        tree.node_mut(root).with_auth(Auth::bearer("secret"));
        tree.node_mut(inner).with_auth(Auth::none());

        let resolved = AuthResolver::effective_auth(&tree, request);
        assert_eq!(resolved.source, AuthSource::Folder);
        assert!(!resolved.is_active());
    }

    #[test]
    fn test_no_auth_anywhere() {
        let (tree, _, _, request) = tree();
        let resolved = AuthResolver::effective_auth(&tree, request);
        assert_eq!(resolved.source, AuthSource::None);
        assert!(resolved.auth.is_none());
        assert_eq!(resolved.path.len(), 4);
    }

    #[test]
    fn test_explicit_arguments_override_back_references() {
        let (mut tree, outer, inner, request) = tree();
        tree.node_mut(inner).with_auth(Auth::bearer("inner"));
        tree.node_mut(outer).with_auth(Auth::bearer("outer"));

        // 从 Outer 开始，跳过 Inner
        let resolved = AuthResolver::resolve_auth(&tree, request, Some(outer), None);
        assert_eq!(resolved.source_node, Some(outer));
        assert_eq!(resolved.path, vec!["Outer", "Get"]);

        // 不给文件夹也不给集合
        let root = tree.root();
        tree.node_mut(root).with_auth(Auth::basic("u", "p"));
        let resolved = AuthResolver::resolve_auth(&tree, request, None, None);
        assert_eq!(resolved.source, AuthSource::None);
    }

    #[test]
    fn test_missing_back_reference_ends_walk() {
        let (mut tree, outer, inner, request) = tree();
        tree.node_mut(outer).with_auth(Auth::bearer("outer"));
        tree.set_parent(inner, None);

        let resolved = AuthResolver::resolve_auth(&tree, request, Some(inner), None);
        assert_eq!(resolved.source, AuthSource::None);
        assert_eq!(resolved.path, vec!["Inner", "Get"]);
    }

    #[test]
    fn test_parent_cycle_terminates() {
        let (mut tree, outer, inner, request) = tree();
        tree.set_parent(outer, Some(inner));

        let resolved = AuthResolver::resolve_auth(&tree, request, Some(inner), None);
        assert_eq!(resolved.source, AuthSource::None);
        assert_eq!(resolved.path, vec!["Outer", "Inner", "Get"]);
    }

    #[test]
    fn test_unwired_tree_has_no_inheritance() {
        let mut tree = CollectionTree::new("API");
        let root = tree.root();
        tree.node_mut(root).with_auth(Auth::bearer("t"));
        let request = tree
            .add_request(root, "Get", RequestDef::get("http://h"))
            .unwrap();

        let resolved = AuthResolver::effective_auth(&tree, request);
        assert_eq!(resolved.source, AuthSource::None);

        tree.wire();
        let resolved = AuthResolver::effective_auth(&tree, request);
        assert_eq!(resolved.source, AuthSource::Collection);
    }

    #[test]
    fn test_folder_effective_auth() {
        let (mut tree, outer, inner, _) = tree();
        tree.node_mut(outer).with_auth(Auth::bearer("outer"));

        let resolved = AuthResolver::effective_auth(&tree, inner);
        assert_eq!(resolved.source, AuthSource::Folder);
        assert_eq!(resolved.source_node, Some(outer));
        assert_eq!(resolved.path, vec!["API", "Outer", "Inner"]);
    }
}
