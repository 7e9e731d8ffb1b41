//! Variable catalog
//!
//! Mirrors the controller's symbol tree in an arena of nodes referenced by
//! index. Built once per connection attempt with an explicit worklist and
//! dropped as a whole when the attempt ends.

use errors::AdsRxResult;
use tracing::debug;

use crate::transport::{AdsTransport, SymbolCategory, SymbolDescriptor};

/// Metadata tag carried by every real node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub name: String,
    pub type_name: String,
    pub category: SymbolCategory,
    pub size: usize,
}

/// Index of a node in its [`SymbolTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug)]
struct NodeData {
    text: String,
    tag: SymbolInfo,
    children: Vec<NodeId>,
}

/// Arena-backed symbol tree
#[derive(Debug, Default)]
pub struct SymbolTree {
    nodes: Vec<NodeData>,
    roots: Vec<NodeId>,
}

impl SymbolTree {
    /// Build from uploaded descriptors without recursion
    pub fn from_descriptors(descriptors: &[SymbolDescriptor]) -> Self {
        let mut tree = SymbolTree::default();
        let mut stack: Vec<(&SymbolDescriptor, Option<NodeId>)> =
            descriptors.iter().rev().map(|d| (d, None)).collect();

        while let Some((desc, parent)) = stack.pop() {
            let id = NodeId(tree.nodes.len());
            tree.nodes.push(NodeData {
                text: desc.name.clone(),
                tag: SymbolInfo {
                    name: desc.name.clone(),
                    type_name: desc.type_name.clone(),
                    category: desc.category,
                    size: desc.size,
                },
                children: Vec::new(),
            });
            match parent {
                Some(p) => tree.nodes[p.0].children.push(id),
                None => tree.roots.push(id),
            }
            stack.extend(desc.children.iter().rev().map(|c| (c, Some(id))));
        }
        tree
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = NodeRef<'_>> {
        self.roots.iter().map(move |&id| NodeRef::new(self, id))
    }

    pub fn node(&self, id: NodeId) -> NodeRef<'_> {
        NodeRef::new(self, id)
    }

    fn find_child(&self, candidates: &[NodeId], segment: &str) -> Option<NodeId> {
        candidates
            .iter()
            .copied()
            .find(|id| self.nodes[id.0].text.eq_ignore_ascii_case(segment))
    }

    /// Resolve a dotted path; never fails, returns a placeholder when not found
    ///
    /// One leading `.` is stripped, each segment matches case-insensitively by
    /// exact equality and the first match wins.
    pub fn search(&self, path: &str) -> NodeRef<'_> {
        let trimmed = path.strip_prefix('.').unwrap_or(path);
        let mut segments = trimmed.split('.');

        let found = segments
            .next()
            .and_then(|first| self.find_child(&self.roots, first))
            .and_then(|root| {
                segments.try_fold(root, |current, segment| {
                    self.find_child(&self.nodes[current.0].children, segment)
                })
            });

        match found {
            Some(id) => NodeRef::new(self, id),
            None => NodeRef::placeholder(self),
        }
    }
}

/// Borrowed view of a node, or of the empty placeholder
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    tree: &'a SymbolTree,
    id: Option<NodeId>,
}

impl<'a> NodeRef<'a> {
    fn new(tree: &'a SymbolTree, id: NodeId) -> Self {
        Self { tree, id: Some(id) }
    }

    fn placeholder(tree: &'a SymbolTree) -> Self {
        Self { tree, id: None }
    }

    /// True when the lookup that produced this node failed
    pub fn is_placeholder(&self) -> bool {
        self.id.is_none()
    }

    /// Tree this node belongs to
    pub fn tree(&self) -> &'a SymbolTree {
        self.tree
    }

    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn text(&self) -> &'a str {
        match self.id {
            Some(id) => &self.tree.nodes[id.0].text,
            None => "",
        }
    }

    pub fn tag(&self) -> Option<&'a SymbolInfo> {
        self.id.map(|id| &self.tree.nodes[id.0].tag)
    }

    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let tree = self.tree;
        let ids: &'a [NodeId] = match self.id {
            Some(id) => &tree.nodes[id.0].children,
            None => &[],
        };
        ids.iter().map(move |&id| NodeRef::new(tree, id))
    }

    pub fn child_count(&self) -> usize {
        self.id
            .map(|id| self.tree.nodes[id.0].children.len())
            .unwrap_or(0)
    }
}

/// Symbol catalog of one connection
#[derive(Debug, Default)]
pub struct VariableCatalog {
    tree: SymbolTree,
}

impl VariableCatalog {
    /// Upload the symbol tree of the controller the transport is connected to
    pub async fn load(transport: &dyn AdsTransport) -> AdsRxResult<Self> {
        let descriptors = transport.upload_symbols().await?;
        let tree = SymbolTree::from_descriptors(&descriptors);
        debug!(
            "Symbol catalog loaded: {} roots, {} nodes",
            tree.roots.len(),
            tree.len()
        );
        Ok(Self { tree })
    }

    pub fn from_tree(tree: SymbolTree) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &SymbolTree {
        &self.tree
    }

    pub fn search(&self, path: &str) -> NodeRef<'_> {
        self.tree.search(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> SymbolTree {
        SymbolTree::from_descriptors(&[
            SymbolDescriptor::primitive("Tag1", "DINT"),
            SymbolDescriptor::compound(
                "MAIN",
                "MAIN",
                vec![
                    SymbolDescriptor::primitive("Counter", "UDINT"),
                    SymbolDescriptor::compound(
                        "Drive",
                        "ST_Drive",
                        vec![
                            SymbolDescriptor::primitive("Enable", "BOOL"),
                            SymbolDescriptor::primitive("Speed", "REAL"),
                        ],
                    ),
                ],
            ),
        ])
    }

    #[test]
    fn test_search_with_leading_separator() {
        let tree = sample_tree();
        let node = tree.search(".Tag1");
        assert!(!node.is_placeholder());
        assert_eq!(node.tag().unwrap().type_name, "DINT");
    }

    #[test]
    fn test_search_nested_case_insensitive() {
        let tree = sample_tree();
        let node = tree.search("main.drive.SPEED");
        assert_eq!(node.text(), "Speed");
        assert_eq!(tree.search("MAIN.Drive").child_count(), 2);
    }

    #[test]
    fn test_search_unresolvable_returns_placeholder() {
        let tree = sample_tree();
        for path in ["", ".", ".Missing", "MAIN.Missing.Deeper", "MAIN.Dri"] {
            let node = tree.search(path);
            assert!(node.is_placeholder(), "{path} should not resolve");
            assert!(node.tag().is_none());
            assert_eq!(node.children().count(), 0);
        }
    }

    #[test]
    fn test_children_keep_declaration_order() {
        let tree = sample_tree();
        let names: Vec<_> = tree.search("MAIN").children().map(|c| c.text()).collect();
        assert_eq!(names, vec!["Counter", "Drive"]);
        assert_eq!(tree.len(), 6);
    }

    #[test]
    fn test_first_match_wins() {
        let tree = SymbolTree::from_descriptors(&[
            SymbolDescriptor::primitive("Dup", "INT"),
            SymbolDescriptor::primitive("DUP", "REAL"),
        ]);
        assert_eq!(tree.search("dup").tag().unwrap().type_name, "INT");
    }
}
