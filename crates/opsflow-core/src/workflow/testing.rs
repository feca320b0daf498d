//! Shared fakes for workflow engine tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use opsflow_types::approval::{Approval, ApprovalStatus};
use opsflow_types::connector::{
    ConnectorResponse, OperationSchema, OperationType, ParameterSchema, ParameterSpec,
};
use opsflow_types::error::CipherError;
use opsflow_types::secure::Ciphertext;
use serde_json::{json, Map, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connector::{Connector, ConnectorError, ConnectorRequest};
use crate::service::cipher::SecretCipher;
use crate::service::hash::TokenHasher;

use super::context::{ExecutionContext, VariableScope};

/// Scripted connector. Clones share state so a test can inspect calls
/// after handing a clone to the registry.
#[derive(Clone)]
pub struct FakeConnector {
    name: String,
    ops: Vec<OperationSchema>,
    responses: Arc<Mutex<VecDeque<Result<ConnectorResponse, ConnectorError>>>>,
    calls: Arc<AtomicU32>,
    last: Arc<Mutex<Option<Map<String, Value>>>>,
    hang: Arc<AtomicBool>,
    entered: Arc<Notify>,
}

impl FakeConnector {
    pub fn new(name: &str, ops: Vec<OperationSchema>) -> Self {
        Self {
            name: name.to_string(),
            ops,
            responses: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(AtomicU32::new(0)),
            last: Arc::new(Mutex::new(None)),
            hang: Arc::new(AtomicBool::new(false)),
            entered: Arc::new(Notify::new()),
        }
    }

    /// Queue a response. With the queue empty the connector succeeds.
    pub fn push_response(&self, response: Result<ConnectorResponse, ConnectorError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_parameters(&self) -> Option<Map<String, Value>> {
        self.last.lock().unwrap().clone()
    }

    /// Make every later call block forever once entered.
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    /// Resolves once a call has reached the connector.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }
}

impl Connector for FakeConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn operations(&self) -> &[OperationSchema] {
        &self.ops
    }

    async fn invoke(&self, request: &ConnectorRequest) -> Result<ConnectorResponse, ConnectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request.parameters.clone());
        self.entered.notify_one();
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let scripted = self.responses.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(ConnectorResponse::ok(json!({
                "operation": request.operation,
                "echo": Value::Object(request.parameters.clone()),
            })))
        })
    }
}

/// `createRefund`: write operation with `customerId` and `amount` required.
pub fn refund_schema() -> OperationSchema {
    let mut schema = ParameterSchema::default();
    schema.properties.insert(
        "customerId".to_string(),
        ParameterSpec {
            param_type: "string".to_string(),
            description: "Customer to refund".to_string(),
            required: true,
        },
    );
    schema.properties.insert(
        "amount".to_string(),
        ParameterSpec {
            param_type: "number".to_string(),
            description: "Refund amount".to_string(),
            required: false,
        },
    );
    schema.required = vec!["amount".to_string()];
    OperationSchema {
        name: "createRefund".to_string(),
        description: "Refund an order".to_string(),
        operation_type: OperationType::Write,
        requires_approval: None,
        parameters: schema,
    }
}

/// `getOrder`: read operation with `orderId` required.
pub fn lookup_schema() -> OperationSchema {
    let mut schema = ParameterSchema::default();
    schema.properties.insert(
        "orderId".to_string(),
        ParameterSpec {
            param_type: "string".to_string(),
            description: "Order id".to_string(),
            required: true,
        },
    );
    OperationSchema {
        name: "getOrder".to_string(),
        description: String::new(),
        operation_type: OperationType::Read,
        requires_approval: None,
        parameters: schema,
    }
}

/// "Encrypts" by reversing the JSON string. Enough to prove the decrypt
/// path ran.
pub struct ReverseCipher;

impl SecretCipher for ReverseCipher {
    fn encrypt(&self, plaintext: &Value) -> Result<Ciphertext, CipherError> {
        let s = plaintext.as_str().ok_or(CipherError::Encryption)?;
        Ok(Ciphertext::new(s.chars().rev().collect::<String>()))
    }

    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<Value, CipherError> {
        Ok(Value::String(ciphertext.expose().chars().rev().collect()))
    }
}

/// Prefixes the token; lets tests predict stored hashes.
pub struct PlainHasher;

impl TokenHasher for PlainHasher {
    fn hash_token(&self, token: &str) -> String {
        format!("h:{token}")
    }
}

pub fn ctx(scope: VariableScope) -> ExecutionContext {
    ExecutionContext::new(
        "org-1",
        Uuid::now_v7(),
        Some("thread-1".to_string()),
        CancellationToken::new(),
        scope,
    )
}

pub fn approval(status: ApprovalStatus) -> Approval {
    Approval {
        id: Uuid::now_v7(),
        organization_id: "org-1".to_string(),
        wf_execution_id: Uuid::now_v7(),
        step_slug: "refund".to_string(),
        status,
        resource_type: None,
        resource_id: None,
        metadata: Value::Null,
        created_at: Utc::now(),
        resolved_at: None,
        resolved_by: None,
    }
}
