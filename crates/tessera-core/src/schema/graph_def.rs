//! Immutable graph schema snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ddl::{DdlError, DdlOperation, DdlRequest, TypeSpec};

/// Whether a type describes vertices or edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    /// Vertex type.
    Vertex,
    /// Edge type.
    Edge,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => write!(f, "vertex"),
            Self::Edge => write!(f, "edge"),
        }
    }
}

/// Property value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Boolean.
    Bool,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Raw bytes.
    Bytes,
    /// List of 32-bit integers.
    IntList,
    /// List of 64-bit integers.
    LongList,
    /// List of strings.
    StringList,
}

/// One property of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Graph-wide property id.
    pub id: u32,
    /// Property name, unique within its type.
    pub name: String,
    /// Value type.
    pub data_type: DataType,
    /// Part of the primary key.
    pub primary_key: bool,
}

/// A vertex or edge type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    /// Type label, unique across the graph.
    pub label: String,
    /// Graph-wide label id.
    pub label_id: u32,
    /// Vertex or edge.
    pub kind: TypeKind,
    /// Properties in declaration order.
    pub properties: Vec<PropertyDef>,
}

impl TypeDef {
    /// Look up a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Names of the primary-key properties.
    pub fn primary_keys(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .filter(|p| p.primary_key)
            .map(|p| p.name.as_str())
    }
}

/// Permission for an edge type to connect two vertex types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKind {
    /// Edge type label.
    pub edge_label: String,
    /// Source vertex type label.
    pub src_vertex_label: String,
    /// Destination vertex type label.
    pub dst_vertex_label: String,
}

impl EdgeKind {
    /// Create an edge kind.
    #[must_use]
    pub fn new(
        edge_label: impl Into<String>,
        src_vertex_label: impl Into<String>,
        dst_vertex_label: impl Into<String>,
    ) -> Self {
        Self {
            edge_label: edge_label.into(),
            src_vertex_label: src_vertex_label.into(),
            dst_vertex_label: dst_vertex_label.into(),
        }
    }

    fn references(&self, label: &str) -> bool {
        self.edge_label == label || self.src_vertex_label == label || self.dst_vertex_label == label
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-[{}]->{}",
            self.src_vertex_label, self.edge_label, self.dst_vertex_label
        )
    }
}

/// Schema of the graph at one version.
///
/// Never mutated once published; a DDL produces a new value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDef {
    version: u64,
    types: BTreeMap<String, TypeDef>,
    edge_kinds: BTreeSet<EdgeKind>,
    next_label_id: u32,
    next_property_id: u32,
}

impl GraphDef {
    /// Schema version. Incremented by one per committed DDL batch.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Look up a type by label.
    #[must_use]
    pub fn get_type(&self, label: &str) -> Option<&TypeDef> {
        self.types.get(label)
    }

    /// All vertex types, ordered by label.
    pub fn vertex_types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values().filter(|t| t.kind == TypeKind::Vertex)
    }

    /// All edge types, ordered by label.
    pub fn edge_types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values().filter(|t| t.kind == TypeKind::Edge)
    }

    /// All edge kinds, ordered.
    pub fn edge_kinds(&self) -> impl Iterator<Item = &EdgeKind> {
        self.edge_kinds.iter()
    }

    /// Same schema at a different version.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Apply a decoded DDL operation as a replica would, setting the
    /// version it carries.
    ///
    /// # Errors
    ///
    /// Returns a [`DdlError`] if the request does not apply to this schema.
    pub fn apply_operation(&self, operation: &DdlOperation) -> Result<Self, DdlError> {
        let mut next = self.clone();
        next.apply_request(&operation.request)?;
        next.version = operation.schema_version;
        Ok(next)
    }

    /// Apply one request in place. The version is left alone.
    ///
    /// # Errors
    ///
    /// Returns a [`DdlError`] if the request is invalid against the current
    /// schema. `self` is unchanged then.
    pub fn apply_request(&mut self, request: &DdlRequest) -> Result<(), DdlError> {
        match request {
            DdlRequest::CreateVertexType(spec) => self.create_type(spec, TypeKind::Vertex),
            DdlRequest::CreateEdgeType(spec) => self.create_type(spec, TypeKind::Edge),
            DdlRequest::DropVertexType { label } => self.drop_type(label, TypeKind::Vertex),
            DdlRequest::DropEdgeType { label } => self.drop_type(label, TypeKind::Edge),
            DdlRequest::AddEdgeKind(kind) => self.add_edge_kind(kind),
            DdlRequest::RemoveEdgeKind(kind) => {
                if self.edge_kinds.remove(kind) {
                    Ok(())
                } else {
                    Err(DdlError::EdgeKindNotFound(kind.to_string()))
                }
            }
        }
    }

    fn create_type(&mut self, spec: &TypeSpec, kind: TypeKind) -> Result<(), DdlError> {
        if spec.label.trim().is_empty() {
            return Err(DdlError::InvalidRequest("type label is empty".into()));
        }
        if self.types.contains_key(&spec.label) {
            return Err(DdlError::TypeAlreadyExists(spec.label.clone()));
        }
        let mut seen = BTreeSet::new();
        for property in &spec.properties {
            if property.name.trim().is_empty() {
                return Err(DdlError::InvalidRequest(format!(
                    "type {} has a property without a name",
                    spec.label
                )));
            }
            if !seen.insert(property.name.as_str()) {
                return Err(DdlError::InvalidRequest(format!(
                    "type {} declares property {} twice",
                    spec.label, property.name
                )));
            }
        }
        if kind == TypeKind::Vertex && !spec.properties.iter().any(|p| p.primary_key) {
            return Err(DdlError::InvalidRequest(format!(
                "vertex type {} has no primary key",
                spec.label
            )));
        }

        let mut next_property_id = self.next_property_id;
        let properties = spec
            .properties
            .iter()
            .map(|p| {
                next_property_id += 1;
                PropertyDef {
                    id: next_property_id,
                    name: p.name.clone(),
                    data_type: p.data_type,
                    primary_key: p.primary_key,
                }
            })
            .collect();
        self.next_property_id = next_property_id;
        self.next_label_id += 1;
        self.types.insert(
            spec.label.clone(),
            TypeDef {
                label: spec.label.clone(),
                label_id: self.next_label_id,
                kind,
                properties,
            },
        );
        Ok(())
    }

    fn drop_type(&mut self, label: &str, kind: TypeKind) -> Result<(), DdlError> {
        let existing = self
            .types
            .get(label)
            .ok_or_else(|| DdlError::TypeNotFound(label.to_string()))?;
        if existing.kind != kind {
            return Err(DdlError::WrongTypeKind {
                label: label.to_string(),
                expected: kind,
            });
        }
        if let Some(edge_kind) = self.edge_kinds.iter().find(|k| k.references(label)) {
            return Err(DdlError::TypeInUse {
                label: label.to_string(),
                edge_kind: edge_kind.to_string(),
            });
        }
        self.types.remove(label);
        Ok(())
    }

    fn add_edge_kind(&mut self, kind: &EdgeKind) -> Result<(), DdlError> {
        self.expect_kind(&kind.edge_label, TypeKind::Edge)?;
        self.expect_kind(&kind.src_vertex_label, TypeKind::Vertex)?;
        self.expect_kind(&kind.dst_vertex_label, TypeKind::Vertex)?;
        if !self.edge_kinds.insert(kind.clone()) {
            return Err(DdlError::EdgeKindExists(kind.to_string()));
        }
        Ok(())
    }

    fn expect_kind(&self, label: &str, expected: TypeKind) -> Result<(), DdlError> {
        match self.types.get(label) {
            Some(t) if t.kind == expected => Ok(()),
            Some(_) => Err(DdlError::WrongTypeKind {
                label: label.to_string(),
                expected,
            }),
            None => Err(DdlError::TypeNotFound(label.to_string())),
        }
    }
}
