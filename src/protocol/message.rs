//! Message catalog for the exploring interpreter protocol.
//!
//! The envelope follows JSON-RPC 2.0. Requests carry a [`Call`], a closed union of the
//! methods an interpreter understands, and responses are classified once at parse time
//! into an [`Outcome`].
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

/// Node in the interpreter's explored state tree.
pub type Reference = u64;

/// Identifier shared by a request and its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Id the interpreter uses for errors it cannot attribute to a request.
    pub const UNATTRIBUTABLE: &str = "0";

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unattributable(&self) -> bool {
        self.0 == Self::UNATTRIBUTABLE
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    Execute,
    Jump,
    Revert,
    Deref,
    GetExecutionTree,
    GetTrace,
    GetPath,
    GetCurrentReference,
    GetAllReferences,
    GetLeaves,
}

impl Method {
    pub const ALL: [Method; 10] = [
        Method::Execute,
        Method::Jump,
        Method::Revert,
        Method::Deref,
        Method::GetExecutionTree,
        Method::GetTrace,
        Method::GetPath,
        Method::GetCurrentReference,
        Method::GetAllReferences,
        Method::GetLeaves,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Execute => "execute",
            Method::Jump => "jump",
            Method::Revert => "revert",
            Method::Deref => "deref",
            Method::GetExecutionTree => "getExecutionTree",
            Method::GetTrace => "getTrace",
            Method::GetPath => "getPath",
            Method::GetCurrentReference => "getCurrentReference",
            Method::GetAllReferences => "getAllReferences",
            Method::GetLeaves => "getLeaves",
        }
    }

    /// Whether an interpreter may answer this method with `code`.
    ///
    /// Reserved JSON-RPC codes are legal everywhere; domain codes only where the
    /// method can produce them.
    pub fn allows(self, code: ErrorCode) -> bool {
        use ErrorCode::*;

        if code.is_reserved() {
            return true;
        }

        matches!(
            (self, code),
            (Method::Execute, ProgramParseError)
                | (Method::Jump, ReferenceNotInTree)
                | (Method::Revert, ReferenceNotInTree | ReferenceRevertInvalid)
                | (Method::Deref, ReferenceNotInTree)
                | (Method::GetPath, PathNonExisting)
                | (Method::GetLeaves, ReferenceNotInTree)
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteParams {
    pub program: String,
}

/// Parameters of `jump`, `revert` and `deref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceParams {
    pub reference: Reference,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathParams {
    pub source: Reference,
    pub target: Reference,
}

/// Method and parameters of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum Call {
    Execute(ExecuteParams),
    Jump(ReferenceParams),
    Revert(ReferenceParams),
    Deref(ReferenceParams),
    GetExecutionTree,
    GetTrace(TraceParams),
    GetPath(PathParams),
    GetCurrentReference,
    GetAllReferences,
    GetLeaves,
}

impl Call {
    pub fn method(&self) -> Method {
        match self {
            Call::Execute(_) => Method::Execute,
            Call::Jump(_) => Method::Jump,
            Call::Revert(_) => Method::Revert,
            Call::Deref(_) => Method::Deref,
            Call::GetExecutionTree => Method::GetExecutionTree,
            Call::GetTrace(_) => Method::GetTrace,
            Call::GetPath(_) => Method::GetPath,
            Call::GetCurrentReference => Method::GetCurrentReference,
            Call::GetAllReferences => Method::GetAllReferences,
            Call::GetLeaves => Method::GetLeaves,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: RequestId,
    pub call: Call,
}

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    jsonrpc: &'static str,
    id: &'a RequestId,
    #[serde(flatten)]
    call: &'a Call,
}

impl Request {
    pub fn new(id: RequestId, call: Call) -> Self {
        Self { id, call }
    }

    pub fn method(&self) -> Method {
        self.call.method()
    }

    /// Serializes the request into its JSON body.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&RequestEnvelope {
            jsonrpc: JSONRPC_VERSION,
            id: &self.id,
            call: &self.call,
        })
    }
}

/// Error codes an interpreter may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ReferenceNotInTree,
    ReferenceRevertInvalid,
    ProgramParseError,
    PathNonExisting,
    Other(i64),
}

impl ErrorCode {
    pub fn code(self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::ReferenceNotInTree => 1,
            ErrorCode::ReferenceRevertInvalid => 2,
            ErrorCode::ProgramParseError => 3,
            ErrorCode::PathNonExisting => 4,
            ErrorCode::Other(code) => code,
        }
    }

    /// Codes defined by JSON-RPC itself.
    pub fn is_reserved(self) -> bool {
        matches!(
            self,
            ErrorCode::ParseError
                | ErrorCode::InvalidRequest
                | ErrorCode::MethodNotFound
                | ErrorCode::InvalidParams
                | ErrorCode::InternalError
        )
    }
}

impl From<i64> for ErrorCode {
    fn from(value: i64) -> Self {
        match value {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::InternalError,
            1 => ErrorCode::ReferenceNotInTree,
            2 => ErrorCode::ReferenceRevertInvalid,
            3 => ErrorCode::ProgramParseError,
            4 => ErrorCode::PathNonExisting,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<ErrorCode> for i64 {
    fn from(value: ErrorCode) -> Self {
        value.code()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

/// Result or error carried by a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    /// `partial` holds a `result` member sent alongside the error, if any.
    Failure {
        error: ResponseError,
        partial: Option<Value>,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot decode response: {reason}")]
pub struct ProtocolDecodeError {
    /// Id of the response, when it got far enough to read one.
    pub id: Option<RequestId>,
    pub reason: String,
}

impl ProtocolDecodeError {
    pub fn new(id: Option<RequestId>, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// `None` when the interpreter sent `null`.
    pub id: Option<RequestId>,
    pub outcome: Outcome,
}

impl Response {
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            outcome: Outcome::Success(result),
        }
    }

    pub fn failure(id: impl Into<RequestId>, error: ResponseError) -> Self {
        Self {
            id: Some(id.into()),
            outcome: Outcome::Failure {
                error,
                partial: None,
            },
        }
    }

    /// Responses that cannot be matched to a request: id `"0"` or `null`.
    pub fn is_unattributable(&self) -> bool {
        self.id.as_ref().is_none_or(RequestId::is_unattributable)
    }

    pub fn error(&self) -> Option<&ResponseError> {
        match &self.outcome {
            Outcome::Failure { error, .. } => Some(error),
            Outcome::Success(_) => None,
        }
    }

    /// Parses a response body.
    ///
    /// A missing `jsonrpc` member is tolerated; any other version is rejected. Integer
    /// ids are normalised to their decimal string.
    pub fn parse(body: &str) -> Result<Self, ProtocolDecodeError> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| ProtocolDecodeError::new(None, format!("invalid JSON: {e}")))?;
        let Value::Object(mut obj) = value else {
            return Err(ProtocolDecodeError::new(None, "response is not an object"));
        };

        match obj.remove("jsonrpc") {
            None => {}
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(other) => {
                return Err(ProtocolDecodeError::new(
                    None,
                    format!("unsupported jsonrpc version {other}"),
                ));
            }
        }

        let id = match obj.remove("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(RequestId::from(id)),
            Some(Value::Number(n)) => Some(RequestId::from(n.to_string())),
            Some(other) => {
                return Err(ProtocolDecodeError::new(None, format!("invalid id {other}")));
            }
        };

        let result = obj.remove("result");
        let outcome = match obj.remove("error") {
            None | Some(Value::Null) => match result {
                Some(result) => Outcome::Success(result),
                None => {
                    return Err(ProtocolDecodeError::new(
                        id,
                        "response carries neither result nor error",
                    ));
                }
            },
            Some(error) => {
                let error: ResponseError = serde_json::from_value(error).map_err(|e| {
                    ProtocolDecodeError::new(id.clone(), format!("invalid error object: {e}"))
                })?;
                Outcome::Failure {
                    error,
                    partial: result,
                }
            }
        };

        Ok(Self { id, outcome })
    }

    /// Serializes the response into its JSON body.
    pub fn encode(&self) -> String {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), json!(JSONRPC_VERSION));
        obj.insert("id".into(), json!(self.id));

        match &self.outcome {
            Outcome::Success(result) => {
                obj.insert("result".into(), result.clone());
            }
            Outcome::Failure { error, partial } => {
                obj.insert("error".into(), json!(error));
                if let Some(partial) = partial {
                    obj.insert("result".into(), partial.clone());
                }
            }
        }

        Value::Object(obj).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeLabel {
    pub program: String,
    pub mval: Value,
}

/// Transition between two references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: Reference,
    pub target: Reference,
    pub label: EdgeLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTree {
    pub current: Reference,
    pub references: Vec<Reference>,
    pub transitions: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub reference: Reference,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JumpResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RevertWire")]
pub struct RevertResult {
    pub deleted_references: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<Value>,
}

// Interpreters answer revert with either a bare list or the full object.
#[derive(Deserialize)]
#[serde(untagged)]
enum RevertWire {
    Deleted(Vec<Reference>),
    Full {
        deleted_references: Vec<Reference>,
        #[serde(default)]
        post: Option<Value>,
    },
}

impl From<RevertWire> for RevertResult {
    fn from(value: RevertWire) -> Self {
        match value {
            RevertWire::Deleted(deleted_references) => Self {
                deleted_references,
                post: None,
            },
            RevertWire::Full {
                deleted_references,
                post,
            } => Self {
                deleted_references,
                post,
            },
        }
    }
}

/// Typed successful result, one variant per method.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Execute(ExecuteResult),
    Jump(JumpResult),
    Revert(RevertResult),
    Deref(Value),
    ExecutionTree(ExecutionTree),
    Trace(Vec<Edge>),
    Path(Vec<Edge>),
    CurrentReference(Reference),
    AllReferences(Vec<Reference>),
    Leaves(Vec<Reference>),
}

impl Reply {
    /// Decodes `result` into the shape `method` returns.
    pub fn decode(method: Method, result: Value) -> Result<Self, serde_json::Error> {
        use serde_json::from_value;

        Ok(match method {
            Method::Execute => Reply::Execute(from_value(result)?),
            Method::Jump => {
                Reply::Jump(from_value::<Option<JumpResult>>(result)?.unwrap_or_default())
            }
            Method::Revert => Reply::Revert(from_value(result)?),
            Method::Deref => Reply::Deref(result),
            Method::GetExecutionTree => Reply::ExecutionTree(from_value(result)?),
            Method::GetTrace => Reply::Trace(from_value(result)?),
            Method::GetPath => Reply::Path(from_value(result)?),
            Method::GetCurrentReference => Reply::CurrentReference(from_value(result)?),
            Method::GetAllReferences => Reply::AllReferences(from_value(result)?),
            Method::GetLeaves => Reply::Leaves(from_value(result)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(call: Call) -> Value {
        let body = Request::new(RequestId::from(1), call).encode().unwrap();
        serde_json::from_str(&body).unwrap()
    }

    #[test]
    fn request_with_params() {
        let body = encoded(Call::Execute(ExecuteParams {
            program: "x".into(),
        }));

        assert_eq!(
            body,
            json!({"jsonrpc": "2.0", "id": "1", "method": "execute", "params": {"program": "x"}})
        );
    }

    #[test]
    fn request_without_params() {
        assert_eq!(
            encoded(Call::GetLeaves),
            json!({"jsonrpc": "2.0", "id": "1", "method": "getLeaves"})
        );
        assert_eq!(
            encoded(Call::GetExecutionTree),
            json!({"jsonrpc": "2.0", "id": "1", "method": "getExecutionTree"})
        );
    }

    #[test]
    fn request_trace_reference_is_optional() {
        assert_eq!(
            encoded(Call::GetTrace(TraceParams::default()))["params"],
            json!({})
        );
        assert_eq!(
            encoded(Call::GetTrace(TraceParams { reference: Some(4) }))["params"],
            json!({"reference": 4})
        );
    }

    #[test]
    fn request_method_matches_tag() {
        let path = Call::GetPath(PathParams {
            source: 0,
            target: 3,
        });
        let body = encoded(path.clone());

        assert_eq!(body["method"], json!(path.method().as_str()));
        assert_eq!(body["params"], json!({"source": 0, "target": 3}));
    }

    #[test]
    fn method_names_are_wire_names() {
        for method in Method::ALL {
            assert_eq!(serde_json::to_value(method).unwrap(), json!(method.as_str()));
        }
    }

    #[test]
    fn parse_success() {
        let resp = Response::parse(r#"{"jsonrpc":"2.0","id":"3","result":[1,2]}"#).unwrap();

        assert_eq!(resp, Response::success("3", json!([1, 2])));
        assert!(!resp.is_unattributable());
    }

    #[test]
    fn parse_error_keeps_partial_result() {
        let resp = Response::parse(
            r#"{"jsonrpc":"2.0","id":"2","error":{"code":1,"message":"not in tree"},"result":{"post":{}}}"#,
        )
        .unwrap();

        assert_eq!(
            resp.outcome,
            Outcome::Failure {
                error: ResponseError {
                    code: ErrorCode::ReferenceNotInTree,
                    message: "not in tree".into(),
                    data: None,
                },
                partial: Some(json!({"post": {}})),
            }
        );
    }

    #[test]
    fn parse_normalises_integer_ids() {
        let resp = Response::parse(r#"{"jsonrpc":"2.0","id":12,"result":0}"#).unwrap();
        assert_eq!(resp.id, Some(RequestId::from("12")));
    }

    #[test]
    fn parse_unattributable() {
        let zero = Response::parse(r#"{"id":"0","error":{"code":-32700,"message":"parse"}}"#)
            .unwrap();
        let null = Response::parse(r#"{"id":null,"error":{"code":-32600,"message":"bad"}}"#)
            .unwrap();

        assert!(zero.is_unattributable());
        assert!(null.is_unattributable());
        assert_eq!(null.error().unwrap().code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn parse_rejects_bad_envelopes() {
        let cases = [
            "not json",
            "[1,2]",
            r#"{"jsonrpc":"1.0","id":"1","result":0}"#,
            r#"{"jsonrpc":"2.0","id":true,"result":0}"#,
            r#"{"jsonrpc":"2.0","id":"1"}"#,
            r#"{"jsonrpc":"2.0","id":"1","error":{"message":"no code"}}"#,
        ];

        for case in cases {
            assert!(Response::parse(case).is_err(), "{case}");
        }
    }

    #[test]
    fn parse_decode_error_keeps_id() {
        let err = Response::parse(r#"{"jsonrpc":"2.0","id":"9"}"#).unwrap_err();
        assert_eq!(err.id, Some(RequestId::from("9")));
    }

    #[test]
    fn encode_then_parse_failure() {
        let resp = Response::failure(
            "5",
            ResponseError {
                code: ErrorCode::Other(77),
                message: "odd".into(),
                data: Some(json!({"hint": 1})),
            },
        );

        assert_eq!(Response::parse(&resp.encode()).unwrap(), resp);
    }

    #[test]
    fn error_codes_by_method() {
        assert!(Method::Revert.allows(ErrorCode::ReferenceRevertInvalid));
        assert!(Method::GetPath.allows(ErrorCode::PathNonExisting));
        assert!(Method::GetLeaves.allows(ErrorCode::InternalError));
        assert!(!Method::Jump.allows(ErrorCode::ProgramParseError));
        assert!(!Method::GetCurrentReference.allows(ErrorCode::ReferenceNotInTree));
        assert!(!Method::Execute.allows(ErrorCode::Other(42)));
    }

    #[test]
    fn reply_revert_accepts_both_shapes() {
        let bare = Reply::decode(Method::Revert, json!([3, 4])).unwrap();
        let full = Reply::decode(
            Method::Revert,
            json!({"deleted_references": [3, 4], "post": {"x": 1}}),
        )
        .unwrap();

        assert_eq!(
            bare,
            Reply::Revert(RevertResult {
                deleted_references: vec![3, 4],
                post: None
            })
        );
        assert_eq!(
            full,
            Reply::Revert(RevertResult {
                deleted_references: vec![3, 4],
                post: Some(json!({"x": 1}))
            })
        );
    }

    #[test]
    fn reply_execution_tree() {
        let tree = json!({
            "current": 1,
            "references": [0, 1],
            "transitions": [
                {"source": 0, "target": 1, "label": {"program": "x = 1", "mval": {}}}
            ]
        });

        let Reply::ExecutionTree(tree) = Reply::decode(Method::GetExecutionTree, tree).unwrap()
        else {
            panic!("wrong reply variant");
        };
        assert_eq!(tree.current, 1);
        assert_eq!(tree.transitions[0].label.program, "x = 1");
    }

    #[test]
    fn reply_jump_accepts_null() {
        assert_eq!(
            Reply::decode(Method::Jump, Value::Null).unwrap(),
            Reply::Jump(JumpResult::default())
        );
    }

    #[test]
    fn reply_rejects_wrong_shape() {
        assert!(Reply::decode(Method::GetCurrentReference, json!("one")).is_err());
        assert!(Reply::decode(Method::Execute, json!({"output": {}})).is_err());
    }
}
