//! Identity of the logical process that owns a work item.

/// Immutable identity of the owning logical job process.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub process_id: String,
    pub cluster_id: String,
}

/// Handle to the owning logical job, constructed on demand from the
/// process identity carried by a lease token.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    info: ProcessInfo,
}

impl ProcessHandle {
    pub fn new(info: ProcessInfo) -> Self {
        Self { info }
    }

    pub fn process_id(&self) -> &str {
        &self.info.process_id
    }

    pub fn cluster_id(&self) -> &str {
        &self.info.cluster_id
    }
}
