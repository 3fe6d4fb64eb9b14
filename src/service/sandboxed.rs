//! Backend for the sandboxed packaging
//!
//! The sandbox forbids this process from starting the helper, so enabling is
//! left to the CLI invocation path. Stop, disable and restart go straight to
//! the helper over RPC.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::error::Result;
use super::ServiceBackend;
use crate::accounts::UserIdentity;
use crate::supervisor::SupervisorProvider;

/// [`ServiceBackend`] delegating to a per-uid supervisor
pub struct SandboxedBackend {
    supervisors: Arc<dyn SupervisorProvider>,
}

impl SandboxedBackend {
    /// Create a backend over `supervisors`
    pub fn new(supervisors: Arc<dyn SupervisorProvider>) -> Self {
        Self { supervisors }
    }
}

#[async_trait]
impl ServiceBackend for SandboxedBackend {
    async fn enable(&self, identity: &UserIdentity) -> Result<()> {
        debug!(uid = identity.uid, "Enable is driven by the CLI under the sandbox");
        Ok(())
    }

    async fn stop(&self, uid: u32) -> Result<()> {
        self.supervisors.supervisor(uid).stop(false).await?;
        Ok(())
    }

    async fn disable(&self, uid: u32) -> Result<()> {
        self.supervisors.supervisor(uid).stop(true).await?;
        Ok(())
    }

    async fn restart(&self, uid: u32) -> Result<()> {
        self.supervisors.supervisor(uid).restart().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceError;
    use crate::supervisor::{ChildProcessSupervisor, ProcessStatus, SupervisorError};
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(u32, &'static str)>>,
        fail: bool,
    }

    struct FakeSupervisor {
        uid: u32,
        recorder: Arc<Recorder>,
    }

    impl FakeSupervisor {
        fn record(&self, call: &'static str) -> crate::supervisor::Result<()> {
            self.recorder.calls.lock().unwrap().push((self.uid, call));
            if self.recorder.fail {
                Err(SupervisorError::Rejected("busy".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ChildProcessSupervisor for FakeSupervisor {
        async fn start(&self) -> crate::supervisor::Result<()> {
            self.record("start")
        }
        async fn stop(&self, disable: bool) -> crate::supervisor::Result<()> {
            self.record(if disable { "stop-disable" } else { "stop" })
        }
        async fn restart(&self) -> crate::supervisor::Result<()> {
            self.record("restart")
        }
        async fn ping(&self) -> crate::supervisor::Result<()> {
            self.record("ping")
        }
        async fn process_status(&self) -> ProcessStatus {
            ProcessStatus::Running
        }
    }

    impl SupervisorProvider for Arc<Recorder> {
        fn supervisor(&self, uid: u32) -> Arc<dyn ChildProcessSupervisor> {
            Arc::new(FakeSupervisor {
                uid,
                recorder: self.clone(),
            })
        }
    }

    fn backend(recorder: &Arc<Recorder>) -> SandboxedBackend {
        SandboxedBackend::new(Arc::new(recorder.clone()))
    }

    #[tokio::test]
    async fn test_delegates_to_supervisor() {
        let recorder = Arc::new(Recorder::default());
        let backend = backend(&recorder);

        backend.stop(1000).await.unwrap();
        backend.disable(1001).await.unwrap();
        backend.restart(1002).await.unwrap();

        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec![(1000, "stop"), (1001, "stop-disable"), (1002, "restart")]
        );
    }

    #[tokio::test]
    async fn test_enable_is_noop() {
        let recorder = Arc::new(Recorder::default());
        let identity = UserIdentity {
            username: "alice".to_string(),
            uid: 1000,
            gid: 1000,
            home: PathBuf::from("/home/alice"),
        };

        backend(&recorder).enable(&identity).await.unwrap();
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_supervisor_error_surfaces() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });

        assert!(matches!(
            backend(&recorder).stop(1000).await,
            Err(ServiceError::Supervisor(SupervisorError::Rejected(_)))
        ));
    }
}
