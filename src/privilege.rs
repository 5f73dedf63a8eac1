//! Scoped privilege elevation, grounded in `caps.cpp`/`capability.cpp`
//! from the original implementation: two selectable backends
//! (`capabilities` and `setuid`), each exposing the same raise/lower/drop
//! interface, plus a "user mode" fallback when neither is available.
//!
//! Every raise is expressed as a [`PrivilegeGuard`] whose `Drop` lowers
//! again, so a raise can never leak across a function boundary even on
//! an early return or panic-driven unwind.

use crate::error::{Result, WsError};
use nix::unistd::{seteuid, Uid};

/// The authorities a caller may want raised together. Named after the
/// POSIX capabilities the original links against (`CAP_CHOWN`,
/// `CAP_DAC_OVERRIDE`, `CAP_DAC_READ_SEARCH`, `CAP_FOWNER`), kept as a
/// small bitset rather than modeling each capability as its own type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authority {
    pub chown: bool,
    pub dac_override: bool,
    pub dac_read_search: bool,
    pub fowner: bool,
}

impl Authority {
    pub const NONE: Authority = Authority {
        chown: false,
        dac_override: false,
        dac_read_search: false,
        fowner: false,
    };

    pub const FS_OVERRIDE: Authority = Authority {
        chown: false,
        dac_override: true,
        dac_read_search: true,
        fowner: false,
    };

    pub const OWNERSHIP: Authority = Authority {
        chown: true,
        dac_override: false,
        dac_read_search: false,
        fowner: false,
    };

    pub const FILE_OWNER: Authority = Authority {
        chown: false,
        dac_override: false,
        dac_read_search: false,
        fowner: true,
    };

    #[cfg(feature = "capabilities")]
    fn as_cap_list(&self) -> Vec<caps::Capability> {
        let mut v = Vec::new();
        if self.chown {
            v.push(caps::Capability::CAP_CHOWN);
        }
        if self.dac_override {
            v.push(caps::Capability::CAP_DAC_OVERRIDE);
        }
        if self.dac_read_search {
            v.push(caps::Capability::CAP_DAC_READ_SEARCH);
        }
        if self.fowner {
            v.push(caps::Capability::CAP_FOWNER);
        }
        v
    }
}

/// Which elevation mechanism this process actually has available,
/// mirroring `Cap::Cap()`'s `issetuid`/`hascaps`/`isusermode` derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Capabilities,
    Setuid,
    UserMode,
}

/// The privilege broker. One instance is constructed near the start of
/// `main` (before the permitted set is permanently dropped) and threaded
/// through every engine that needs to touch the database or workspace
/// directories with elevated rights.
pub struct Broker {
    backend: Backend,
    /// Effective uid to switch to under `setuid` backend when lowering;
    /// typically the database uid or the invoking user's real uid.
    real_uid: Uid,
}

impl Broker {
    pub fn new() -> Self {
        let backend = if cfg!(feature = "capabilities") {
            Backend::Capabilities
        } else if crate::identity::is_setuid() {
            Backend::Setuid
        } else {
            Backend::UserMode
        };
        Broker {
            backend,
            real_uid: nix::unistd::getuid(),
        }
    }

    pub fn is_setuid(&self) -> bool {
        self.backend == Backend::Setuid
    }

    pub fn has_caps(&self) -> bool {
        self.backend == Backend::Capabilities
    }

    pub fn is_user_mode(&self) -> bool {
        self.backend == Backend::UserMode
    }

    /// Permanently restricts the process to a bounded permitted set.
    /// Called once at startup, after the per-user preferences file (which
    /// must be read as the real user) has been consulted.
    pub fn drop_to(&self, authority: Authority, target_uid: Uid) -> Result<()> {
        match self.backend {
            #[cfg(feature = "capabilities")]
            Backend::Capabilities => {
                let mut current =
                    caps::read(None, caps::CapSet::Permitted).map_err(|e| {
                        WsError::PrivilegeFailed(format!("reading permitted set: {e}"))
                    })?;
                current.retain(|c| authority.as_cap_list().contains(c));
                caps::set(None, caps::CapSet::Permitted, &current).map_err(|e| {
                    WsError::PrivilegeFailed(format!("dropping permitted set: {e}"))
                })?;
                Ok(())
            }
            #[cfg(not(feature = "capabilities"))]
            Backend::Capabilities => unreachable!(),
            Backend::Setuid => seteuid(target_uid)
                .map_err(|e| WsError::PrivilegeFailed(format!("seteuid({target_uid}): {e}"))),
            Backend::UserMode => Ok(()),
        }
    }

    /// Raises `authority` on the current task, returning a guard that
    /// re-lowers to `target_uid` (meaningful only for the `setuid`
    /// backend) when dropped.
    pub fn raise(&self, authority: Authority) -> Result<PrivilegeGuard<'_>> {
        self.transition(authority, true)?;
        Ok(PrivilegeGuard {
            broker: self,
            authority,
            lower_to: self.real_uid,
        })
    }

    /// Raises authority and, under the `setuid` backend, additionally
    /// impersonates `impersonate` (typically the database uid) so
    /// operations succeed on root-squashed filesystems. The returned
    /// guard restores the real uid on drop.
    pub fn raise_as(&self, authority: Authority, impersonate: Uid) -> Result<PrivilegeGuard<'_>> {
        self.transition(authority, true)?;
        if self.backend == Backend::Setuid {
            seteuid(impersonate)
                .map_err(|e| WsError::PrivilegeFailed(format!("seteuid({impersonate}): {e}")))?;
        }
        Ok(PrivilegeGuard {
            broker: self,
            authority,
            lower_to: self.real_uid,
        })
    }

    fn transition(&self, authority: Authority, raising: bool) -> Result<()> {
        match self.backend {
            #[cfg(feature = "capabilities")]
            Backend::Capabilities => {
                for cap in authority.as_cap_list() {
                    let result = if raising {
                        caps::raise(None, caps::CapSet::Effective, cap)
                    } else {
                        caps::drop(None, caps::CapSet::Effective, cap)
                    };
                    result.map_err(|e| {
                        WsError::PrivilegeFailed(format!(
                            "{} {cap:?}: {e}",
                            if raising { "raising" } else { "lowering" }
                        ))
                    })?;
                }
                Ok(())
            }
            #[cfg(not(feature = "capabilities"))]
            Backend::Capabilities => unreachable!(),
            Backend::Setuid => {
                let target = if raising {
                    Uid::from_raw(0)
                } else {
                    self.real_uid
                };
                seteuid(target)
                    .map_err(|e| WsError::PrivilegeFailed(format!("seteuid({target}): {e}")))
            }
            Backend::UserMode => Ok(()),
        }
    }

    fn lower(&self, authority: Authority, target_uid: Uid) {
        if self.backend == Backend::Setuid {
            if let Err(e) = seteuid(target_uid) {
                // A failure to lower is always fatal: continuing would
                // run with the wrong authority.
                crate::logging::error(format!("can not lower privileges: {e}"));
                std::process::exit(crate::error::WsError::PrivilegeFailed(e.to_string()).exit_code());
            }
            return;
        }
        if let Err(e) = self.transition(authority, false) {
            crate::logging::error(format!("can not lower privileges: {e}"));
            std::process::exit(7);
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by [`Broker::raise`]/[`Broker::raise_as`]. Lowers
/// the raised authority (and, in setuid mode, restores the real uid)
/// when dropped, including during unwind.
pub struct PrivilegeGuard<'a> {
    broker: &'a Broker,
    authority: Authority,
    lower_to: Uid,
}

impl Drop for PrivilegeGuard<'_> {
    fn drop(&mut self) {
        self.broker.lower(self.authority, self.lower_to);
    }
}
