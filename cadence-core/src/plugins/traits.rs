use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::CadenceResult;
use crate::models::ValidationResult;

use super::context::InstanceContext;
use super::settings::{Action, Setting};

/// The lifecycle contract every plugin honours.
///
/// Calls are made through a shared reference; plugins keep mutable state in
/// their setting cells or behind their own locks. Every async call receives a
/// cancellation token and should return promptly once it fires.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn settings(&self) -> Vec<Setting>;

    fn actions(&self) -> Vec<Action> {
        Vec::new()
    }

    async fn initialize(
        &self,
        _ctx: &InstanceContext,
        _cancel: CancellationToken,
    ) -> CadenceResult<()> {
        Ok(())
    }

    async fn validate_settings(
        &self,
        _cancel: CancellationToken,
    ) -> CadenceResult<ValidationResult> {
        Ok(ValidationResult::ok())
    }

    async fn on_session_start(&self, cancel: CancellationToken) -> CadenceResult<()>;

    async fn on_session_end(&self, cancel: CancellationToken) -> CadenceResult<()>;

    /// Handles both design-time and live action invocations.
    async fn on_action(&self, _key: &str, _cancel: CancellationToken) -> CadenceResult<()> {
        Ok(())
    }

    /// Called exactly once by the owning instance.
    fn dispose(&self) {}
}

pub trait PluginFactory: Send + Sync {
    fn create(&self, ctx: &InstanceContext) -> CadenceResult<Box<dyn Plugin>>;
}

impl<F> PluginFactory for F
where
    F: Fn(&InstanceContext) -> CadenceResult<Box<dyn Plugin>> + Send + Sync,
{
    fn create(&self, ctx: &InstanceContext) -> CadenceResult<Box<dyn Plugin>> {
        self(ctx)
    }
}

pub type DynPlugin = Box<dyn Plugin>;
