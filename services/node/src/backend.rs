//! Backing-service interface and in-memory implementation.
//!
//! The backend is whatever actually creates databases, users, and dumps on
//! this host. The node only needs to know whether each call succeeded.

use std::sync::atomic::{AtomicU16, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use rand::distr::Alphanumeric;
use rand::Rng;
use svcb_id::{BindingId, InstanceId, NodeId};
use svcb_proto::Credentials;
use tracing::{debug, info};

/// Backing-service interface.
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    async fn provision(
        &self,
        instance_id: InstanceId,
        plan: &str,
        params: &serde_json::Value,
    ) -> Result<Credentials>;

    async fn unprovision(&self, instance_id: InstanceId) -> Result<()>;

    async fn bind(
        &self,
        instance_id: InstanceId,
        binding_id: BindingId,
        params: &serde_json::Value,
    ) -> Result<Credentials>;

    async fn unbind(&self, binding_id: BindingId) -> Result<()>;

    async fn restore(&self, instance_id: InstanceId, backup_path: &str) -> Result<()>;

    async fn disable(&self, instance_id: InstanceId) -> Result<()>;

    async fn enable(&self, instance_id: InstanceId) -> Result<()>;

    async fn import(&self, instance_id: InstanceId, data: &str) -> Result<()>;

    async fn update(
        &self,
        instance_id: InstanceId,
        params: &serde_json::Value,
    ) -> Result<Credentials>;

    async fn cleanup_nfs(&self, instance_id: InstanceId) -> Result<()>;
}

/// In-memory backend for tests and the dev binary.
pub struct MemoryBackend {
    node_id: NodeId,
    hostname: String,
    next_port: AtomicU16,
    /// Whether every call should fault.
    fail: bool,
}

impl MemoryBackend {
    pub fn new(node_id: NodeId, hostname: impl Into<String>) -> Self {
        Self {
            node_id,
            hostname: hostname.into(),
            next_port: AtomicU16::new(10_000),
            fail: false,
        }
    }

    /// A backend whose every call faults, as if the resource were unreachable.
    pub fn failing(node_id: NodeId, hostname: impl Into<String>) -> Self {
        Self {
            fail: true,
            ..Self::new(node_id, hostname)
        }
    }

    fn check(&self, call: &str) -> Result<()> {
        if self.fail {
            anyhow::bail!("{call}: backing resource unreachable");
        }
        Ok(())
    }

    fn credentials(&self, instance_id: InstanceId, binding_id: Option<BindingId>) -> Credentials {
        Credentials {
            name: instance_id,
            binding_id,
            node_id: self.node_id,
            hostname: self.hostname.clone(),
            port: self.next_port.fetch_add(1, Ordering::Relaxed),
            username: format!("u{}", random_token(10).to_lowercase()),
            password: random_token(16),
        }
    }
}

fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[async_trait]
impl ServiceBackend for MemoryBackend {
    async fn provision(
        &self,
        instance_id: InstanceId,
        plan: &str,
        _params: &serde_json::Value,
    ) -> Result<Credentials> {
        self.check("provision")?;
        info!(instance_id = %instance_id, plan, "[MEMORY] Provisioning instance");
        Ok(self.credentials(instance_id, None))
    }

    async fn unprovision(&self, instance_id: InstanceId) -> Result<()> {
        self.check("unprovision")?;
        info!(instance_id = %instance_id, "[MEMORY] Unprovisioning instance");
        Ok(())
    }

    async fn bind(
        &self,
        instance_id: InstanceId,
        binding_id: BindingId,
        _params: &serde_json::Value,
    ) -> Result<Credentials> {
        self.check("bind")?;
        debug!(instance_id = %instance_id, binding_id = %binding_id, "[MEMORY] Binding");
        Ok(self.credentials(instance_id, Some(binding_id)))
    }

    async fn unbind(&self, binding_id: BindingId) -> Result<()> {
        self.check("unbind")?;
        debug!(binding_id = %binding_id, "[MEMORY] Unbinding");
        Ok(())
    }

    async fn restore(&self, instance_id: InstanceId, backup_path: &str) -> Result<()> {
        self.check("restore")?;
        info!(instance_id = %instance_id, backup_path, "[MEMORY] Restoring instance");
        Ok(())
    }

    async fn disable(&self, instance_id: InstanceId) -> Result<()> {
        self.check("disable")?;
        debug!(instance_id = %instance_id, "[MEMORY] Disabling instance");
        Ok(())
    }

    async fn enable(&self, instance_id: InstanceId) -> Result<()> {
        self.check("enable")?;
        debug!(instance_id = %instance_id, "[MEMORY] Enabling instance");
        Ok(())
    }

    async fn import(&self, instance_id: InstanceId, data: &str) -> Result<()> {
        self.check("import")?;
        info!(instance_id = %instance_id, data, "[MEMORY] Importing instance");
        Ok(())
    }

    async fn update(
        &self,
        instance_id: InstanceId,
        _params: &serde_json::Value,
    ) -> Result<Credentials> {
        self.check("update")?;
        info!(instance_id = %instance_id, "[MEMORY] Updating instance");
        Ok(self.credentials(instance_id, None))
    }

    async fn cleanup_nfs(&self, instance_id: InstanceId) -> Result<()> {
        self.check("cleanupnfs")?;
        debug!(instance_id = %instance_id, "[MEMORY] Cleaning NFS");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_hands_out_distinct_credentials() {
        let backend = MemoryBackend::new(NodeId::new(), "10.0.0.5");
        let params = serde_json::json!({});

        let a = backend.provision(InstanceId::new(), "free", &params).await.unwrap();
        let b = backend.provision(InstanceId::new(), "free", &params).await.unwrap();

        assert_eq!(a.hostname, "10.0.0.5");
        assert_ne!(a.port, b.port);
        assert_eq!(a.password.len(), 16);
        assert!(a.binding_id.is_none());
    }

    #[tokio::test]
    async fn test_failing_backend_faults_every_call() {
        let backend = MemoryBackend::failing(NodeId::new(), "localhost");
        let instance_id = InstanceId::new();

        assert!(backend
            .provision(instance_id, "free", &serde_json::Value::Null)
            .await
            .is_err());
        assert!(backend.unprovision(instance_id).await.is_err());
        assert!(backend.unbind(BindingId::new()).await.is_err());
        assert!(backend.cleanup_nfs(instance_id).await.is_err());
    }
}
