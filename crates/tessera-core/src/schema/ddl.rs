//! DDL requests and their translation into log operations.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::graph_def::{DataType, EdgeKind, GraphDef, TypeKind};
use crate::oplog::{Operation, OperationType};

/// Declared property of a new type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Property name.
    pub name: String,
    /// Value type.
    pub data_type: DataType,
    /// Part of the primary key.
    #[serde(default)]
    pub primary_key: bool,
}

impl PropertySpec {
    /// A regular property.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            primary_key: false,
        }
    }

    /// A primary-key property.
    #[must_use]
    pub fn primary_key(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            primary_key: true,
            ..Self::new(name, data_type)
        }
    }
}

/// Definition of a new vertex or edge type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSpec {
    /// Type label.
    pub label: String,
    /// Properties in declaration order.
    pub properties: Vec<PropertySpec>,
}

/// One schema change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DdlRequest {
    /// Create a vertex type.
    CreateVertexType(TypeSpec),
    /// Drop a vertex type.
    DropVertexType {
        /// Label of the type to drop.
        label: String,
    },
    /// Create an edge type.
    CreateEdgeType(TypeSpec),
    /// Drop an edge type.
    DropEdgeType {
        /// Label of the type to drop.
        label: String,
    },
    /// Allow an edge type between two vertex types.
    AddEdgeKind(EdgeKind),
    /// Disallow an edge type between two vertex types.
    RemoveEdgeKind(EdgeKind),
}

impl DdlRequest {
    /// Log operation type carrying this request.
    #[must_use]
    pub fn op_type(&self) -> OperationType {
        match self {
            Self::CreateVertexType(_) => OperationType::CreateVertexType,
            Self::DropVertexType { .. } => OperationType::DropVertexType,
            Self::CreateEdgeType(_) => OperationType::CreateEdgeType,
            Self::DropEdgeType { .. } => OperationType::DropEdgeType,
            Self::AddEdgeKind(_) => OperationType::AddEdgeKind,
            Self::RemoveEdgeKind(_) => OperationType::RemoveEdgeKind,
        }
    }
}

/// Ordered schema changes applied atomically as one version bump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlRequestBatch {
    /// Requests in application order.
    pub requests: Vec<DdlRequest>,
}

impl DdlRequestBatch {
    /// Empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request.
    #[must_use]
    pub fn with(mut self, request: DdlRequest) -> Self {
        self.requests.push(request);
        self
    }

    /// Append a vertex type creation.
    #[must_use]
    pub fn create_vertex_type(self, label: impl Into<String>, properties: Vec<PropertySpec>) -> Self {
        self.with(DdlRequest::CreateVertexType(TypeSpec {
            label: label.into(),
            properties,
        }))
    }

    /// Append an edge type creation.
    #[must_use]
    pub fn create_edge_type(self, label: impl Into<String>, properties: Vec<PropertySpec>) -> Self {
        self.with(DdlRequest::CreateEdgeType(TypeSpec {
            label: label.into(),
            properties,
        }))
    }

    /// Append an edge kind.
    #[must_use]
    pub fn add_edge_kind(self, edge: &str, src: &str, dst: &str) -> Self {
        self.with(DdlRequest::AddEdgeKind(EdgeKind::new(edge, src, dst)))
    }

    /// Whether the batch has no requests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Payload of a DDL log operation, as replicas decode it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlOperation {
    /// Schema version the batch produces.
    pub schema_version: u64,
    /// The request to apply.
    pub request: DdlRequest,
}

impl DdlOperation {
    /// Decode the payload of a DDL operation.
    ///
    /// # Errors
    ///
    /// Returns [`DdlError::Decode`] if the operation is not a DDL operation
    /// or its payload is malformed.
    pub fn decode(operation: &Operation) -> Result<Self, DdlError> {
        if !operation.op_type.is_ddl() {
            return Err(DdlError::Decode(format!(
                "{} is not a schema operation",
                operation.op_type
            )));
        }
        serde_json::from_slice(&operation.payload).map_err(|e| DdlError::Decode(e.to_string()))
    }

    fn encode(&self) -> Result<Bytes, DdlError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| DdlError::Decode(e.to_string()))
    }
}

/// Result of applying a DDL batch.
#[derive(Debug, Clone)]
pub struct DdlResult {
    /// Schema after the batch.
    pub graph_def: GraphDef,
    /// Log operations replicas apply to reach it.
    pub operations: Vec<Operation>,
}

/// Errors from DDL validation and translation.
#[derive(Debug, thiserror::Error)]
pub enum DdlError {
    /// A type with this label exists.
    #[error("type already exists: {0}")]
    TypeAlreadyExists(String),

    /// No type with this label.
    #[error("type not found: {0}")]
    TypeNotFound(String),

    /// The label names a type of the other kind.
    #[error("type {label} is not a {expected} type")]
    WrongTypeKind {
        /// Offending label.
        label: String,
        /// Kind the request needed.
        expected: TypeKind,
    },

    /// The type is referenced by an edge kind.
    #[error("type {label} is used by edge kind {edge_kind}")]
    TypeInUse {
        /// Type that cannot be dropped.
        label: String,
        /// Edge kind referencing it.
        edge_kind: String,
    },

    /// The edge kind exists already.
    #[error("edge kind already exists: {0}")]
    EdgeKindExists(String),

    /// No such edge kind.
    #[error("edge kind not found: {0}")]
    EdgeKindNotFound(String),

    /// The request is malformed.
    #[error("invalid DDL request: {0}")]
    InvalidRequest(String),

    /// A DDL payload could not be encoded or decoded.
    #[error("DDL payload error: {0}")]
    Decode(String),

    /// The batch has no requests.
    #[error("empty DDL batch")]
    EmptyBatch,
}

/// Translates a DDL batch into the next schema and its log operations.
///
/// Must be pure and deterministic: the same batch against the same schema
/// always yields the same result.
pub trait DdlExecutor: Send + Sync + 'static {
    /// Apply `batch` to `graph_def`, fanning operations out to
    /// `partition_count` partitions.
    ///
    /// # Errors
    ///
    /// Returns a [`DdlError`] if any request in the batch is invalid.
    fn apply_ddl(
        &self,
        batch: &DdlRequestBatch,
        graph_def: &GraphDef,
        partition_count: u32,
    ) -> Result<DdlResult, DdlError>;
}

/// [`DdlExecutor`] that validates against [`GraphDef`] and emits one JSON
/// [`DdlOperation`] per request per partition.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphDefDdlExecutor;

impl DdlExecutor for GraphDefDdlExecutor {
    fn apply_ddl(
        &self,
        batch: &DdlRequestBatch,
        graph_def: &GraphDef,
        partition_count: u32,
    ) -> Result<DdlResult, DdlError> {
        if batch.is_empty() {
            return Err(DdlError::EmptyBatch);
        }
        let schema_version = graph_def.version() + 1;
        let mut next = graph_def.clone();
        let mut operations = Vec::with_capacity(batch.requests.len() * partition_count as usize);

        for request in &batch.requests {
            next.apply_request(request)?;
            let payload = DdlOperation {
                schema_version,
                request: request.clone(),
            }
            .encode()?;
            for partition in 0..partition_count {
                operations.push(Operation::new(
                    request.op_type(),
                    Some(partition),
                    payload.clone(),
                ));
            }
        }

        Ok(DdlResult {
            graph_def: next.with_version(schema_version),
            operations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn social() -> DdlRequestBatch {
        DdlRequestBatch::new()
            .create_vertex_type(
                "person",
                vec![
                    PropertySpec::primary_key("id", DataType::Long),
                    PropertySpec::new("name", DataType::String),
                ],
            )
            .create_edge_type("knows", vec![])
            .add_edge_kind("knows", "person", "person")
    }

    #[test]
    fn test_apply_bumps_version_and_fans_out() {
        let result = GraphDefDdlExecutor
            .apply_ddl(&social(), &GraphDef::default(), 4)
            .unwrap();
        assert_eq!(result.graph_def.version(), 1);
        assert_eq!(result.operations.len(), 12);
        assert_eq!(result.operations[0].partition_id, Some(0));
        assert_eq!(result.operations[3].partition_id, Some(3));
        assert_eq!(result.operations[4].op_type, OperationType::CreateEdgeType);
        assert_eq!(result.graph_def.edge_kinds().count(), 1);
    }

    #[test]
    fn test_deterministic() {
        let a = GraphDefDdlExecutor
            .apply_ddl(&social(), &GraphDef::default(), 2)
            .unwrap();
        let b = GraphDefDdlExecutor
            .apply_ddl(&social(), &GraphDef::default(), 2)
            .unwrap();
        assert_eq!(a.graph_def, b.graph_def);
        assert_eq!(a.operations, b.operations);
    }

    #[test]
    fn test_invalid_request_fails_whole_batch() {
        let batch = social().add_edge_kind("knows", "person", "city");
        let err = GraphDefDdlExecutor
            .apply_ddl(&batch, &GraphDef::default(), 1)
            .unwrap_err();
        assert!(matches!(err, DdlError::TypeNotFound(_)));
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(matches!(
            GraphDefDdlExecutor.apply_ddl(&DdlRequestBatch::new(), &GraphDef::default(), 1),
            Err(DdlError::EmptyBatch)
        ));
    }

    #[test]
    fn test_replica_decode_reaches_same_schema() {
        let base = GraphDef::default();
        let result = GraphDefDdlExecutor.apply_ddl(&social(), &base, 3).unwrap();

        let mut replica = base;
        for op in result.operations.iter().filter(|op| op.partition_id == Some(1)) {
            let decoded = DdlOperation::decode(op).unwrap();
            assert_eq!(decoded.schema_version, 1);
            replica = replica.apply_operation(&decoded).unwrap();
        }
        assert_eq!(replica, result.graph_def);
    }

    #[test]
    fn test_decode_rejects_data_operation() {
        let op = Operation::new(OperationType::Marker, None, Bytes::new());
        assert!(matches!(DdlOperation::decode(&op), Err(DdlError::Decode(_))));
    }

    #[test]
    fn test_request_json_shape() {
        let json = serde_json::to_value(DdlRequest::DropVertexType { label: "p".into() }).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "drop_vertex_type", "label": "p" }));

        let parsed: DdlRequest = serde_json::from_str(
            r#"{ "kind": "add_edge_kind", "edge_label": "e", "src_vertex_label": "a", "dst_vertex_label": "b" }"#,
        )
        .unwrap();
        assert_eq!(parsed, DdlRequest::AddEdgeKind(EdgeKind::new("e", "a", "b")));
    }
}
