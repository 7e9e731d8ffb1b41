//! Type resolution
//!
//! Turns catalog nodes into local [`PlcType`] descriptors. Compound symbols are
//! resolved into [`StructLayout`]s by a post-order worklist over the node's
//! subtree; layouts already built in the same pass are reused through a
//! [`LayoutContext`].

use errors::{AdsRxError, AdsRxResult};
use std::collections::HashMap;
use tracing::debug;

use crate::catalog::{NodeId, NodeRef, SymbolTree};
use crate::transport::SymbolCategory;
use crate::value::{PlcType, StructLayout};

/// Resolves a catalog node into a locally usable type
///
/// `Ok(None)` means "no structured descriptor available"; the caller then falls
/// back to converting the remote type name.
pub trait TypeResolver: Send + Sync {
    /// Resolve while sharing `ctx` with the other resolutions of one pass
    fn resolve_in(&self, node: NodeRef<'_>, ctx: &mut LayoutContext) -> AdsRxResult<Option<PlcType>>;

    fn resolve(&self, node: NodeRef<'_>) -> AdsRxResult<Option<PlcType>> {
        let mut ctx = LayoutContext::new();
        self.resolve_in(node, &mut ctx)
    }
}

/// Layouts built during one resolution pass, keyed by upper-cased type name
#[derive(Debug, Default)]
pub struct LayoutContext {
    layouts: HashMap<String, StructLayout>,
}

impl LayoutContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, type_name: &str) -> Option<&StructLayout> {
        self.layouts.get(&type_name.to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    fn insert(&mut self, layout: StructLayout) {
        self.layouts.insert(layout.name.to_uppercase(), layout);
    }
}

/// Default resolver: primitive names via the converter, compound symbols via
/// their member nodes
#[derive(Debug, Default, Clone)]
pub struct LayoutResolver;

impl LayoutResolver {
    /// Resolve `node` while sharing `ctx` with other resolutions of the same pass
    pub fn resolve_with(
        &self,
        node: NodeRef<'_>,
        tree: &SymbolTree,
        ctx: &mut LayoutContext,
    ) -> AdsRxResult<Option<PlcType>> {
        let Some(info) = node.tag() else {
            return Ok(None);
        };

        match info.category {
            SymbolCategory::Primitive | SymbolCategory::String | SymbolCategory::Array => {
                Ok(PlcType::from_plc_name(&info.type_name))
            },
            SymbolCategory::Compound => {
                let Some(root) = node.id() else {
                    return Ok(None);
                };
                build_struct(root, tree, ctx).map(|layout| Some(PlcType::Struct(layout)))
            },
        }
    }
}

impl TypeResolver for LayoutResolver {
    fn resolve_in(&self, node: NodeRef<'_>, ctx: &mut LayoutContext) -> AdsRxResult<Option<PlcType>> {
        self.resolve_with(node, node.tree(), ctx)
    }
}

/// Post-order worklist: children layouts are built before their parents
fn build_struct(root: NodeId, tree: &SymbolTree, ctx: &mut LayoutContext) -> AdsRxResult<StructLayout> {
    let mut stack = vec![(root, false)];

    while let Some((id, expanded)) = stack.pop() {
        let node = tree.node(id);
        let Some(info) = node.tag() else { continue };

        if ctx.get(&info.type_name).is_some() {
            continue;
        }

        if !expanded {
            stack.push((id, true));
            for child in node.children() {
                if let (Some(child_id), Some(child_info)) = (child.id(), child.tag()) {
                    if child_info.category == SymbolCategory::Compound {
                        stack.push((child_id, false));
                    }
                }
            }
            continue;
        }

        let mut fields = Vec::with_capacity(node.child_count());
        for child in node.children() {
            let Some(child_info) = child.tag() else { continue };
            let ty = match child_info.category {
                SymbolCategory::Compound => ctx
                    .get(&child_info.type_name)
                    .cloned()
                    .map(PlcType::Struct),
                _ => PlcType::from_plc_name(&child_info.type_name),
            }
            .ok_or_else(|| AdsRxError::TypeResolution {
                variable: format!("{}.{}", info.name, child_info.name),
                reason: format!("unsupported member type {}", child_info.type_name),
            })?;
            fields.push((child_info.name.clone(), ty));
        }

        let mut layout = StructLayout::packed(info.type_name.clone(), fields);
        layout.size = layout.size.max(info.size);
        debug!(
            "Built layout {} ({} fields, {} bytes)",
            layout.name,
            layout.fields.len(),
            layout.size
        );
        ctx.insert(layout);
    }

    let info = tree
        .node(root)
        .tag()
        .ok_or_else(|| AdsRxError::Internal("layout root without tag".to_string()))?;
    ctx.get(&info.type_name)
        .cloned()
        .ok_or_else(|| AdsRxError::Layout(format!("layout {} was not built", info.type_name)))
}
