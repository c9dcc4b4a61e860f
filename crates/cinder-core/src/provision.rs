//! Working-copy provisioning.
//!
//! A provisioner materialises the project source for one build into a
//! fresh directory and removes it again once the run is over.

use async_trait::async_trait;
use std::path::Path;

use crate::{Build, BuildLogger, Result};

/// Trait for working-copy provisioners.
#[async_trait]
pub trait WorkingCopyProvisioner: Send + Sync {
    /// Name of this provisioner.
    fn name(&self) -> &'static str;

    /// Create the working copy for `build` at `path`.
    ///
    /// `Ok(false)` means the copy could not be created for a reason the
    /// provisioner already reported to `log`.
    async fn create_working_copy(
        &self,
        build: &Build,
        path: &Path,
        log: &BuildLogger,
    ) -> Result<bool>;

    /// Remove a working copy. Removing a path that does not exist is not
    /// an error.
    async fn remove_working_copy(&self, path: &Path) -> Result<()>;
}
