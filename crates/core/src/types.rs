use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Payloads flowing between function nodes
pub type Payload = serde_json::Value;

/// Unique identifier for a graph invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvocationId(pub Uuid);

impl InvocationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InvocationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifies one run of a node within an invocation.
///
/// `index` is assigned in creation order per node, so it stays unique when a
/// node is reached through several fan-outs or convergent edges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRunId {
    pub node: String,
    pub index: u64,
}

impl NodeRunId {
    pub fn new(node: impl Into<String>, index: u64) -> Self {
        Self {
            node: node.into(),
            index,
        }
    }
}

impl fmt::Display for NodeRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.node, self.index)
    }
}

/// Declared type of a node's input or output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeDescriptor {
    Any,
    Null,
    Boolean,
    Integer,
    Number,
    String,
    /// Named structured type; only the object shape is checked here
    Record(String),
    List(Box<TypeDescriptor>),
}

impl TypeDescriptor {
    pub fn list(element: TypeDescriptor) -> Self {
        Self::List(Box::new(element))
    }

    pub fn record(name: impl Into<String>) -> Self {
        Self::Record(name.into())
    }

    /// Element type when this is a collection
    pub fn element(&self) -> Option<&TypeDescriptor> {
        match self {
            Self::List(inner) => Some(inner),
            _ => None,
        }
    }

    /// Whether a value of this type can be handed to something expecting `target`
    pub fn satisfies(&self, target: &TypeDescriptor) -> bool {
        match (self, target) {
            (_, Self::Any) | (Self::Any, _) => true,
            (Self::Integer, Self::Number) => true,
            (Self::List(source), Self::List(target)) => source.satisfies(target),
            (source, target) => source == target,
        }
    }

    /// Check a concrete payload against this type
    pub fn accepts(&self, value: &Payload) -> bool {
        match self {
            Self::Any => true,
            Self::Null => value.is_null(),
            Self::Boolean => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Record(_) => value.is_object(),
            Self::List(element) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|item| element.accepts(item))),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Null => write!(f, "null"),
            Self::Boolean => write!(f, "boolean"),
            Self::Integer => write!(f, "integer"),
            Self::Number => write!(f, "number"),
            Self::String => write!(f, "string"),
            Self::Record(name) => write!(f, "record:{}", name),
            Self::List(element) => write!(f, "list<{}>", element),
        }
    }
}

impl FromStr for TypeDescriptor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix("list<").and_then(|rest| rest.strip_suffix('>')) {
            return Ok(Self::list(inner.parse()?));
        }
        if let Some(name) = s.strip_prefix("record:") {
            let name = name.trim();
            if name.is_empty() {
                return Err("record type requires a name".to_string());
            }
            return Ok(Self::record(name));
        }
        match s {
            "any" => Ok(Self::Any),
            "null" => Ok(Self::Null),
            "boolean" | "bool" => Ok(Self::Boolean),
            "integer" | "int" => Ok(Self::Integer),
            "number" | "float" => Ok(Self::Number),
            "string" | "str" => Ok(Self::String),
            other => Err(format!("unknown type descriptor '{}'", other)),
        }
    }
}

impl TryFrom<String> for TypeDescriptor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TypeDescriptor> for String {
    fn from(value: TypeDescriptor) -> Self {
        value.to_string()
    }
}

/// How an edge carries a source node's output to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRouting {
    /// Target receives the whole output as one run
    PassThrough,
    /// Target receives one run per element of a collection output
    FanOut,
}

impl EdgeRouting {
    /// Decide routing statically from the declared types, pass-through first
    pub fn resolve(source_output: &TypeDescriptor, target_input: &TypeDescriptor) -> Option<Self> {
        if source_output.satisfies(target_input) {
            return Some(Self::PassThrough);
        }
        match source_output.element() {
            Some(element) if element.satisfies(target_input) => Some(Self::FanOut),
            _ => None,
        }
    }
}

/// Status of a single node run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Aggregate status of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Cancelled,
    /// Processing halted on an engine invariant violation
    Failed,
}

impl InvocationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One execution of a node for an invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRun {
    pub id: NodeRunId,
    /// Run whose output produced this run's input
    pub parent: Option<NodeRunId>,
    /// Position in the parent's collection output when fanned out
    pub element: Option<usize>,
    pub input: Payload,
    pub status: RunStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of an invocation's state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationSummary {
    pub id: InvocationId,
    pub graph: String,
    pub status: InvocationStatus,
    pub runs_created: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub outstanding: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// What a node run left behind: a payload or an error record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NodeOutput {
    Payload(Payload),
    Error(String),
}

impl NodeOutput {
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Payload(payload) => Some(payload),
            Self::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// SHA-256 digest of a stored output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadDigest(pub String);

impl PayloadDigest {
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let hash = Sha256::digest(data);
        Self(hex::encode(hash))
    }
}

/// Metadata describing one stored output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRecord {
    pub id: String,
    pub invocation_id: InvocationId,
    pub node: String,
    pub index: u64,
    pub payload_size: u64,
    pub payload_sha256: PayloadDigest,
    pub created_at: DateTime<Utc>,
}

/// An output together with its record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredOutput {
    pub record: OutputRecord,
    pub output: NodeOutput,
}

impl StoredOutput {
    pub fn new(
        invocation_id: InvocationId,
        node: &str,
        index: u64,
        output: NodeOutput,
    ) -> serde_json::Result<Self> {
        let bytes = match &output {
            NodeOutput::Payload(payload) => serde_json::to_vec(payload)?,
            NodeOutput::Error(message) => message.as_bytes().to_vec(),
        };

        Ok(Self {
            record: OutputRecord {
                id: format!("{}/{}/{}", invocation_id, node, index),
                invocation_id,
                node: node.to_string(),
                index,
                payload_size: bytes.len() as u64,
                payload_sha256: PayloadDigest::from_bytes(&bytes),
                created_at: Utc::now(),
            },
            output,
        })
    }
}
