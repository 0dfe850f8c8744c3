use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CadenceResult;

/// Per-instance dependency scope handed to a plugin.
///
/// Every instance gets its own HTTP client, data directory and cancellation
/// token, so nothing leaks between two instances of the same plugin. The
/// context is closed exactly once, together with the owning instance.
pub struct InstanceContext {
    instance_key: String,
    plugin_id: String,
    data_dir: PathBuf,
    http: reqwest::Client,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl InstanceContext {
    /// Builds the scope without touching the filesystem.
    pub fn new(
        plugin_id: impl Into<String>,
        instance_key: impl Into<String>,
        data_root: &Path,
        parent: &CancellationToken,
    ) -> CadenceResult<Self> {
        let plugin_id = plugin_id.into();
        let instance_key = instance_key.into();
        let data_dir = data_root
            .join(sanitize_segment(&plugin_id))
            .join(sanitize_segment(&instance_key));
        let http = reqwest::Client::builder()
            .user_agent(concat!("cadence/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            instance_key,
            plugin_id,
            data_dir,
            http,
            cancel: parent.child_token(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn instance_key(&self) -> &str {
        &self.instance_key
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Creates the instance data directory on first use.
    pub async fn ensure_data_dir(&self) -> CadenceResult<PathBuf> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(self.data_dir.clone())
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Cancelled when the instance is disposed or the host shuts down.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns true for the call that actually closed the scope.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();
        debug!(
            plugin_id = %self.plugin_id,
            instance_id = %self.instance_key,
            "Instance context closed"
        );
        true
    }
}

impl std::fmt::Debug for InstanceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceContext")
            .field("plugin_id", &self.plugin_id)
            .field("instance_key", &self.instance_key)
            .field("data_dir", &self.data_dir)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_paths_are_sanitized() {
        let root = CancellationToken::new();
        let ctx = InstanceContext::new("announcer", "sandbox:mod-1", Path::new("/data"), &root)
            .unwrap();
        assert_eq!(ctx.data_dir(), Path::new("/data/announcer/sandbox_mod-1"));
        assert!(!ctx.data_dir().exists());
    }

    #[test]
    fn test_close_once_cancels_token() {
        let root = CancellationToken::new();
        let ctx = InstanceContext::new("p", "i", Path::new("/tmp"), &root).unwrap();
        let token = ctx.cancellation();

        assert!(ctx.close());
        assert!(!ctx.close());
        assert!(token.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[test]
    fn test_parent_cancel_propagates() {
        let root = CancellationToken::new();
        let ctx = InstanceContext::new("p", "i", Path::new("/tmp"), &root).unwrap();
        root.cancel();
        assert!(ctx.cancellation().is_cancelled());
    }
}
