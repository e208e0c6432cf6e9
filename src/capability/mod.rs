//! Capability-scoped runtime surface.
//!
//! Snippets running in the sandbox cannot touch the host directly; every
//! side effect goes through a capability value granted by one of the
//! `request_*` combinators. A capability carries its own allowlist and is
//! only usable inside the dynamic extent of the call that granted it.
//!
//! Scoping is enforced with revocation shells: each capability shares an
//! atomic `revoked` flag with an RAII guard held by the combinator. When
//! the combinator returns -- normally or by error -- the guard flips the
//! flag, and every primitive checks it before acting. A reference that
//! leaks out of the scope is inert: any operation through it fails with a
//! security error.
//!
//! # Example
//!
//! ```no_run
//! use safexec::capability::request_filesystem;
//! use safexec::config::SandboxConfig;
//!
//! # fn example() -> safexec::error::Result<()> {
//! let config = SandboxConfig::default();
//! let content = request_filesystem(&config, "/tmp/work", |fs| {
//!     fs.access("notes.txt")?.read()
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod filesystem;
pub mod network;
pub mod process;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::classified::transform_active;
use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};

pub use chat::ChatClient;
pub use filesystem::{FileEntry, FileSystem, GrepMatch};
pub use network::Network;
pub use process::{ProcessPermission, ProcessResult, DEFAULT_EXEC_TIMEOUT_MS};

/// Shared liveness flag for one capability grant.
///
/// Cloned into every value derived from the grant (the capability itself,
/// file handles, etc.) so revocation reaches them all at once.
#[derive(Debug, Clone)]
pub struct CapabilityState {
    revoked: Arc<AtomicBool>,
}

impl CapabilityState {
    fn new() -> Self {
        Self {
            revoked: Arc::new(AtomicBool::new(false)),
        }
    }

    fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    /// Gate called by every primitive before it acts.
    ///
    /// Fails if the grant has been revoked (use outside the granting
    /// scope) or if a classified transform is running on this thread
    /// (transforms must be pure).
    pub fn ensure_active(&self) -> Result<()> {
        if transform_active() {
            return Err(SandboxError::security(
                "capability use inside a classified transform",
            ));
        }
        if self.is_revoked() {
            return Err(SandboxError::security(
                "capability used outside its granting scope",
            ));
        }
        Ok(())
    }
}

/// RAII guard that revokes a capability grant when dropped.
///
/// Held by the `request_*` combinators for the duration of the callback;
/// dropping on any exit path (including panics and errors) revokes.
pub struct RevocationGuard {
    state: CapabilityState,
}

impl RevocationGuard {
    fn new(state: CapabilityState) -> Self {
        Self { state }
    }
}

impl Drop for RevocationGuard {
    fn drop(&mut self) {
        self.state.revoke();
    }
}

/// Mints a fresh grant: the live state plus the guard that ends it.
pub fn new_grant() -> (CapabilityState, RevocationGuard) {
    let state = CapabilityState::new();
    let guard = RevocationGuard::new(state.clone());
    (state, guard)
}

/// Grants a filesystem capability rooted at `root` for the duration of
/// `f`. The capability is revoked on every exit path.
pub fn request_filesystem<R>(
    config: &SandboxConfig,
    root: impl AsRef<std::path::Path>,
    f: impl FnOnce(&FileSystem) -> Result<R>,
) -> Result<R> {
    if transform_active() {
        return Err(SandboxError::security(
            "capability request inside a classified transform",
        ));
    }
    let (state, _guard) = new_grant();
    let fs = FileSystem::new(config, root, state);
    f(&fs)
}

/// Grants a process-permission capability for the listed command names.
pub fn request_exec_permission<R>(
    config: &SandboxConfig,
    commands: impl IntoIterator<Item = String>,
    f: impl FnOnce(&ProcessPermission) -> Result<R>,
) -> Result<R> {
    if transform_active() {
        return Err(SandboxError::security(
            "capability request inside a classified transform",
        ));
    }
    let (state, _guard) = new_grant();
    let permission = ProcessPermission::new(commands, config.strict, state);
    f(&permission)
}

/// Grants a network capability for the listed host names.
pub fn request_network<R>(
    hosts: impl IntoIterator<Item = String>,
    f: impl FnOnce(&Network) -> Result<R>,
) -> Result<R> {
    if transform_active() {
        return Err(SandboxError::security(
            "capability request inside a classified transform",
        ));
    }
    let (state, _guard) = new_grant();
    let network = Network::new(hosts, state);
    f(&network)
}
