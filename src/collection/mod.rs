pub mod tree;
pub mod types;

pub use tree::{CollectionTree, Node, NodeId, NodeKind};
pub use types::{
    Auth, AuthParam, Body, CollectionDefinition, FolderDefinition, ItemDefinition, KeyValue,
    RequestDef, RequestDefinition, Scripts, Variable,
};
