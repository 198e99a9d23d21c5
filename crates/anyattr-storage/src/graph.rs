//! Graph implementation of [`AttrStore`] on a petgraph [`StableGraph`].
//!
//! Owners, resources, schemas, classes and any types are nodes. Edges
//! record `MEMBER_OF` (member to group, weighted with the membership key),
//! `HAS_RESOURCE`, `HAS_AUX_CLASS` and `IN_CLASS` (schema to class). Plain
//! attributes live in a JSON side table on each owner node, written with
//! [`list2json`] and read back with [`json2list`].
//!
//! A file-backed store rewrites its JSON snapshot after every write. Each
//! write runs against a copy of the previous state, so a failed write,
//! including a failed snapshot, leaves the store unchanged.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tracing::debug;

use anyattr_core::{
    Any, AnyKey, AnyType, AnyTypeClass, AnyTypeKind, AttrValue, CoreError, ExternalResource, MembershipKey,
    PlainSchema, Schema, SchemaRegistry,
};

use crate::convert::{
    decompose, detach_class, json2list, json_to_records, list2json, recompose, records_to_json, unique_token,
    AnyRecord, DecomposedAny, PlainAttrRecord,
};
use crate::error::StorageError;
use crate::traits::AttrStore;
use crate::types::{AnySummary, StorageKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "label", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphNode {
    AnyType {
        any_type: AnyType,
    },
    Class {
        class: AnyTypeClass,
    },
    Schema {
        schema: Schema,
    },
    Resource {
        resource: ExternalResource,
    },
    Any {
        record: AnyRecord,
        #[serde(rename = "plainAttrs")]
        plain_attrs_json: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "label", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphEdge {
    MemberOf { membership: MembershipKey },
    HasResource,
    HasAuxClass,
    InClass,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NodeKey {
    AnyType(String),
    Class(String),
    Schema(String),
    Resource(String),
    Any(AnyKey),
}

impl GraphNode {
    fn key(&self) -> NodeKey {
        match self {
            GraphNode::AnyType { any_type } => NodeKey::AnyType(any_type.key.clone()),
            GraphNode::Class { class } => NodeKey::Class(class.key.clone()),
            GraphNode::Schema { schema } => NodeKey::Schema(schema.key().to_string()),
            GraphNode::Resource { resource } => NodeKey::Resource(resource.key.clone()),
            GraphNode::Any { record, .. } => NodeKey::Any(record.key),
        }
    }
}

type AttrGraph = StableGraph<GraphNode, GraphEdge>;

/// Graph [`AttrStore`], optionally mirrored to a JSON snapshot file.
pub struct GraphStore {
    graph: AttrGraph,
    /// Node lookup by domain key; rebuilt from the graph on open.
    index: HashMap<NodeKey, NodeIndex>,
    path: Option<PathBuf>,
}

impl GraphStore {
    /// Empty store holding only the reserved USER and GROUP any types.
    pub fn in_memory() -> Self {
        let mut store = GraphStore {
            graph: AttrGraph::default(),
            index: HashMap::new(),
            path: None,
        };
        for any_type in [
            AnyType::new(AnyType::USER, AnyTypeKind::User),
            AnyType::new(AnyType::GROUP, AnyTypeKind::Group),
        ] {
            store.upsert(GraphNode::AnyType { any_type });
        }
        store
    }

    /// Opens the snapshot at `path`, creating it when missing.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if !path.exists() {
            let mut store = GraphStore::in_memory();
            store.path = Some(path.to_path_buf());
            store.persist()?;
            return Ok(store);
        }

        let graph: AttrGraph = serde_json::from_str(&fs::read_to_string(path)?)?;
        let index = graph
            .node_indices()
            .map(|idx| (graph[idx].key(), idx))
            .collect::<HashMap<_, _>>();
        if index.len() != graph.node_count() {
            return Err(StorageError::IntegrityError {
                reason: format!("snapshot {} has duplicate nodes", path.display()),
            });
        }
        debug!(path = %path.display(), nodes = graph.node_count(), "graph snapshot loaded");
        Ok(GraphStore {
            graph,
            index,
            path: Some(path.to_path_buf()),
        })
    }

    /// Writes the graph to a temporary file next to the snapshot and
    /// renames it over the old one. No-op for in-memory stores.
    fn persist(&self) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(&self.graph)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Runs `op` as a single write followed by [`persist`](Self::persist).
    /// Any error restores the graph and index taken before `op` ran.
    fn write<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T, StorageError>) -> Result<T, StorageError> {
        let graph = self.graph.clone();
        let index = self.index.clone();
        let result = op(&mut *self).and_then(|out| {
            self.persist()?;
            Ok(out)
        });
        if result.is_err() {
            self.graph = graph;
            self.index = index;
            debug!("graph write rolled back");
        }
        result
    }

    // -----------------------------------------------------------------------
    // Node helpers
    // -----------------------------------------------------------------------

    /// Inserts `node`, or replaces the node with the same key in place so
    /// its edges survive.

    fn upsert(&mut self, node: GraphNode) -> NodeIndex {
        let key = node.key();
        match self.index.get(&key) {
            Some(&idx) => {
                self.graph[idx] = node;
                idx
            }
            None => {
                let idx = self.graph.add_node(node);
                self.index.insert(key, idx);
                idx
            }
        }
    }

    fn node(&self, key: &NodeKey) -> Option<&GraphNode> {
        self.index.get(key).map(|&idx| &self.graph[idx])
    }

    fn has(&self, key: NodeKey) -> bool {
        self.index.contains_key(&key)
    }

    /// Removes the node together with every edge touching it.
    fn remove(&mut self, key: &NodeKey) -> Option<GraphNode> {
        let idx = self.index.remove(key)?;
        self.graph.remove_node(idx)
    }

    /// Drops every edge leaving `idx`; saves rebuild them from the record.
    fn clear_outgoing(&mut self, idx: NodeIndex) {
        let edges: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        for edge in edges {
            self.graph.remove_edge(edge);
        }
    }

    /// Adds `edge` when `to` exists. References were checked before the
    /// write, so a missing target only happens for catalog entries.
    fn link(&mut self, from: NodeIndex, to: NodeKey, edge: GraphEdge) {
        if let Some(&target) = self.index.get(&to) {
            self.graph.add_edge(from, target, edge);
        }
    }

    /// Owner records with their decoded attributes, ordered by key.
    fn owners(&self) -> Result<Vec<(&AnyRecord, Vec<PlainAttrRecord>)>, StorageError> {
        let mut owners = Vec::new();
        for idx in self.graph.node_indices() {
            if let GraphNode::Any {
                record,
                plain_attrs_json,
            } = &self.graph[idx]
            {
                owners.push((record, json_to_records(plain_attrs_json)?));
            }
        }
        owners.sort_by_key(|(record, _)| record.key);
        Ok(owners)
    }

    /// Rewrites every owner node through `edit`, which returns whether it
    /// changed the record or the attributes.
    fn edit_owners(
        &mut self,
        mut edit: impl FnMut(&mut AnyRecord, &mut Vec<PlainAttrRecord>) -> bool,
    ) -> Result<usize, StorageError> {
        let mut changed = 0;
        let indices: Vec<NodeIndex> = self.graph.node_indices().collect();
        for idx in indices {
            if let GraphNode::Any {
                record,
                plain_attrs_json,
            } = &mut self.graph[idx]
            {
                let mut attrs = json_to_records(plain_attrs_json)?;
                if edit(record, &mut attrs) {
                    *plain_attrs_json = records_to_json(&attrs)?;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    /// Owners with an edge into `target` accepted by `matches`, sorted and
    /// deduplicated.
    fn sources(&self, target: NodeKey, matches: impl Fn(&GraphEdge) -> bool) -> Vec<AnyKey> {
        let Some(&idx) = self.index.get(&target) else {
            return Vec::new();
        };
        let mut keys: Vec<AnyKey> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|e| matches(e.weight()))
            .filter_map(|e| match &self.graph[e.source()] {
                GraphNode::Any { record, .. } => Some(record.key),
                _ => None,
            })
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Same checks, in the same order, as the relational backend: any type,
    /// auxiliary classes, resources, then groups.
    fn check_references(&self, record: &AnyRecord) -> Result<(), StorageError> {
        if !self.has(NodeKey::AnyType(record.any_type.clone())) {
            return Err(CoreError::AnyTypeNotFound {
                key: record.any_type.clone(),
            }
            .into());
        }
        for class in &record.aux_classes {
            if !self.has(NodeKey::Class(class.clone())) {
                return Err(CoreError::ClassNotFound { key: class.clone() }.into());
            }
        }
        for resource in &record.resources {
            if !self.has(NodeKey::Resource(resource.clone())) {
                return Err(StorageError::ResourceNotFound(resource.clone()));
            }
        }
        for m in &record.memberships {
            match self.node(&NodeKey::Any(m.group)) {
                Some(GraphNode::Any { record: group, .. }) if group.kind() == AnyTypeKind::Group => {}
                _ => return Err(StorageError::AnyNotFound(m.group)),
            }
        }
        Ok(())
    }

    fn check_unique(&self, any: &Any) -> Result<(), StorageError> {
        let owners = self.owners()?;
        for attr in any.all_plain_attrs() {
            let (Some(schema), Some(value)) = (attr.schema(), attr.unique_value()) else {
                continue;
            };
            let token = unique_token(value);
            let taken = owners.iter().any(|(record, attrs)| {
                record.key != any.key()
                    && attrs.iter().any(|a| {
                        a.schema == schema.key && a.unique_value.as_ref().is_some_and(|v| unique_token(v) == token)
                    })
            });
            if taken {
                return Err(StorageError::Duplicate {
                    schema: schema.key.clone(),
                    value: token,
                });
            }
        }
        Ok(())
    }
}

impl AttrStore for GraphStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Graph
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    fn save_class(&mut self, class: &AnyTypeClass) -> Result<(), StorageError> {
        if self.has(NodeKey::Class(class.key.clone())) {
            return Ok(());
        }
        self.write(|store| {
            store.upsert(GraphNode::Class { class: class.clone() });
            Ok(())
        })
    }

    fn delete_class(&mut self, key: &str) -> Result<(), StorageError> {
        if !self.has(NodeKey::Class(key.to_string())) {
            return Err(CoreError::ClassNotFound { key: key.to_string() }.into());
        }
        self.write(|store| {
            for idx in store.graph.node_indices().collect::<Vec<_>>() {
                match &mut store.graph[idx] {
                    GraphNode::Schema { schema } => {
                        detach_class(schema, key);
                    }
                    GraphNode::AnyType { any_type } => any_type.classes.retain(|c| c != key),
                    _ => {}
                }
            }
            store.edit_owners(|record, _| {
                let before = record.aux_classes.len();
                record.aux_classes.retain(|c| c != key);
                record.aux_classes.len() != before
            })?;
            store.remove(&NodeKey::Class(key.to_string()));
            Ok(())
        })
    }

    fn list_classes(&self) -> Result<Vec<AnyTypeClass>, StorageError> {
        let mut classes: Vec<AnyTypeClass> = self
            .graph
            .node_weights()
            .filter_map(|n| match n {
                GraphNode::Class { class } => Some(class.clone()),
                _ => None,
            })
            .collect();
        classes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(classes)
    }

    fn save_any_type(&mut self, any_type: &AnyType) -> Result<(), StorageError> {
        for class in &any_type.classes {
            if !self.has(NodeKey::Class(class.clone())) {
                return Err(CoreError::ClassNotFound { key: class.clone() }.into());
            }
        }
        self.write(|store| {
            store.upsert(GraphNode::AnyType {
                any_type: any_type.clone(),
            });
            Ok(())
        })
    }

    fn list_any_types(&self) -> Result<Vec<AnyType>, StorageError> {
        let mut types: Vec<AnyType> = self
            .graph
            .node_weights()
            .filter_map(|n| match n {
                GraphNode::AnyType { any_type } => Some(any_type.clone()),
                _ => None,
            })
            .collect();
        types.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(types)
    }

    fn save_schema(&mut self, schema: &Schema) -> Result<(), StorageError> {
        if let Some(class) = schema.any_type_class() {
            if !self.has(NodeKey::Class(class.to_string())) {
                return Err(CoreError::ClassNotFound { key: class.to_string() }.into());
            }
        }
        self.write(|store| {
            let idx = store.upsert(GraphNode::Schema { schema: schema.clone() });
            store.clear_outgoing(idx);
            if let Some(class) = schema.any_type_class() {
                store.link(idx, NodeKey::Class(class.to_string()), GraphEdge::InClass);
            }
            Ok(())
        })?;
        debug!(schema = %schema.key(), kind = schema.kind().as_str(), "schema saved");
        Ok(())
    }

    fn delete_schema(&mut self, key: &str) -> Result<(), StorageError> {
        let node_key = NodeKey::Schema(key.to_string());
        let is_plain = match self.node(&node_key) {
            Some(GraphNode::Schema { schema }) => matches!(schema, Schema::Plain(_)),
            _ => return Err(StorageError::SchemaNotFound(key.to_string())),
        };
        self.write(|store| {
            if is_plain {
                let owners = store.edit_owners(|_, attrs| {
                    let before = attrs.len();
                    attrs.retain(|a| a.schema != key);
                    attrs.len() != before
                })?;
                debug!(schema = %key, owners, "removed attributes of deleted schema");
            }
            store.remove(&node_key);
            Ok(())
        })
    }

    fn list_schemas(&self) -> Result<Vec<Schema>, StorageError> {
        let mut schemas: Vec<Schema> = self
            .graph
            .node_weights()
            .filter_map(|n| match n {
                GraphNode::Schema { schema } => Some(schema.clone()),
                _ => None,
            })
            .collect();
        schemas.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(schemas)
    }

    fn save_resource(&mut self, resource: &ExternalResource) -> Result<(), StorageError> {
        resource.validate()?;
        self.write(|store| {
            store.upsert(GraphNode::Resource {
                resource: resource.clone(),
            });
            Ok(())
        })
    }

    fn load_resource(&self, key: &str) -> Result<ExternalResource, StorageError> {
        match self.node(&NodeKey::Resource(key.to_string())) {
            Some(GraphNode::Resource { resource }) => Ok(resource.clone()),
            _ => Err(StorageError::ResourceNotFound(key.to_string())),
        }
    }

    fn delete_resource(&mut self, key: &str) -> Result<(), StorageError> {
        if !self.has(NodeKey::Resource(key.to_string())) {
            return Err(StorageError::ResourceNotFound(key.to_string()));
        }
        self.write(|store| {
            store.remove(&NodeKey::Resource(key.to_string()));
            store.edit_owners(|record, _| {
                let before = record.resources.len();
                record.resources.retain(|r| r != key);
                record.resources.len() != before
            })?;
            Ok(())
        })
    }

    fn list_resources(&self) -> Result<Vec<ExternalResource>, StorageError> {
        let mut resources: Vec<ExternalResource> = self
            .graph
            .node_weights()
            .filter_map(|n| match n {
                GraphNode::Resource { resource } => Some(resource.clone()),
                _ => None,
            })
            .collect();
        resources.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(resources)
    }

    // -----------------------------------------------------------------------
    // Owners
    // -----------------------------------------------------------------------

    fn save_any(&mut self, any: &Any) -> Result<(), StorageError> {
        let DecomposedAny { record, attrs } = decompose(any)?;
        self.check_references(&record)?;
        self.check_unique(any)?;
        let plain_attrs_json = list2json(any.all_plain_attrs())?;

        let edges: Vec<(NodeKey, GraphEdge)> = record
            .resources
            .iter()
            .map(|r| (NodeKey::Resource(r.clone()), GraphEdge::HasResource))
            .chain(
                record
                    .aux_classes
                    .iter()
                    .map(|c| (NodeKey::Class(c.clone()), GraphEdge::HasAuxClass)),
            )
            .chain(record.memberships.iter().map(|m| {
                (
                    NodeKey::Any(m.group),
                    GraphEdge::MemberOf { membership: m.key },
                )
            }))
            .collect();

        self.write(|store| {
            let idx = store.upsert(GraphNode::Any {
                record,
                plain_attrs_json,
            });
            store.clear_outgoing(idx);
            for (target, edge) in edges {
                store.link(idx, target, edge);
            }
            Ok(())
        })?;
        debug!(any = %any.key(), attributes = attrs.len(), "owner saved");
        Ok(())
    }

    fn load_any(&self, key: AnyKey, registry: &SchemaRegistry) -> Result<Any, StorageError> {
        match self.node(&NodeKey::Any(key)) {
            Some(GraphNode::Any {
                record,
                plain_attrs_json,
            }) => {
                let mut any = recompose(
                    DecomposedAny {
                        record: record.clone(),
                        attrs: Vec::new(),
                    },
                    registry,
                )?;
                for attr in json2list(plain_attrs_json, key, registry)? {
                    any.restore_plain_attr(attr)?;
                }
                Ok(any)
            }
            _ => Err(StorageError::AnyNotFound(key)),
        }
    }

    fn delete_any(&mut self, key: AnyKey) -> Result<(), StorageError> {
        let node_key = NodeKey::Any(key);
        let Some(&idx) = self.index.get(&node_key) else {
            return Err(StorageError::AnyNotFound(key));
        };

        let memberships: Vec<(NodeIndex, MembershipKey)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter_map(|e| match e.weight() {
                GraphEdge::MemberOf { membership } => Some((e.source(), *membership)),
                _ => None,
            })
            .collect();
        if !memberships.is_empty() {
            debug!(group = %key, members = memberships.len(), "removing group memberships");
        }

        self.write(|store| {
            for (member, membership) in &memberships {
                if let GraphNode::Any {
                    record,
                    plain_attrs_json,
                } = &mut store.graph[*member]
                {
                    let mut attrs = json_to_records(plain_attrs_json)?;
                    attrs.retain(|a| a.membership != Some(*membership));
                    record.memberships.retain(|m| m.key != *membership);
                    *plain_attrs_json = records_to_json(&attrs)?;
                }
            }
            store.remove(&node_key);
            Ok(())
        })
    }

    fn list_anys(&self, kind: Option<AnyTypeKind>) -> Result<Vec<AnySummary>, StorageError> {
        let mut out: Vec<AnySummary> = self
            .graph
            .node_weights()
            .filter_map(|n| match n {
                GraphNode::Any { record, .. } if kind.map_or(true, |k| record.kind() == k) => Some(AnySummary {
                    key: record.key,
                    kind: record.kind(),
                    any_type: record.any_type.clone(),
                    name: record.name().to_string(),
                    realm: record.realm.clone(),
                }),
                _ => None,
            })
            .collect();
        out.sort_by_key(|s| s.key);
        Ok(out)
    }

    fn find_by_unique_value(&self, schema: &PlainSchema, value: &AttrValue) -> Result<Option<AnyKey>, StorageError> {
        let token = unique_token(value);
        Ok(self.owners()?.into_iter().find_map(|(record, attrs)| {
            attrs
                .iter()
                .any(|a| a.schema == schema.key && a.unique_value.as_ref().is_some_and(|v| unique_token(v) == token))
                .then_some(record.key)
        }))
    }

    fn find_by_plain_attr_value(&self, schema: &PlainSchema, value: &AttrValue) -> Result<Vec<AnyKey>, StorageError> {
        let token = unique_token(value);
        Ok(self
            .owners()?
            .into_iter()
            .filter(|(_, attrs)| {
                attrs.iter().any(|a| {
                    a.schema == schema.key
                        && a.values
                            .iter()
                            .chain(a.unique_value.iter())
                            .any(|v| unique_token(v) == token)
                })
            })
            .map(|(record, _)| record.key)
            .collect())
    }

    fn find_members(&self, group: AnyKey) -> Result<Vec<AnyKey>, StorageError> {
        Ok(self.sources(NodeKey::Any(group), |e| matches!(e, GraphEdge::MemberOf { .. })))
    }

    fn find_by_resource(&self, resource: &str) -> Result<Vec<AnyKey>, StorageError> {
        Ok(self.sources(NodeKey::Resource(resource.to_string()), |e| {
            matches!(e, GraphEdge::HasResource)
        }))
    }

    fn plain_attr_count(&self, schema: &str) -> Result<usize, StorageError> {
        Ok(self
            .owners()?
            .iter()
            .map(|(_, attrs)| attrs.iter().filter(|a| a.schema == schema).count())
            .sum())
    }
}
