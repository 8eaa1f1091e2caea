use uuid::Uuid;

/// Per-call context handed to workflow operations and copied into every
/// delivery the call publishes.
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Correlates log lines of one operation with the deliveries it caused.
    pub request_id: Uuid,
    /// Username of whoever performed the operation.
    pub operator: String,
}

impl OperationContext {
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            operator: operator.into(),
        }
    }

    /// Context for work the registry does on its own behalf.
    pub fn system() -> Self {
        Self::new("system")
    }
}
