/*!
 * Fork Configuration
 *
 * Runtime configuration for the duplication walk and the sharing policy
 */

use super::errors::{ForkError, ForkResult};
use super::limits::{
    IDENTITY_SLOT, PFTEMP, PGSIZE, PTSIZE, USTACKTOP, UTEXT, UTOP, UXSTACKTOP,
};
use super::types::{is_page_aligned, round_down, VirtAddr};
use serde::{Deserialize, Serialize};

/// Environment variable selecting the fork policy (`cow` or `shared`)
pub const POLICY_ENV_VAR: &str = "COW_FORK_POLICY";

/// How writable pages are handed to the child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkPolicy {
    /// Every writable page becomes copy-on-write in both processes
    #[default]
    Cow,
    /// Writable pages outside the private ranges are shared writable
    Shared,
}

impl std::str::FromStr for ForkPolicy {
    type Err = ForkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cow" => Ok(ForkPolicy::Cow),
            "shared" | "sfork" => Ok(ForkPolicy::Shared),
            other => Err(ForkError::InvalidConfig(format!(
                "unknown fork policy '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ForkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ForkPolicy::Cow => write!(f, "cow"),
            ForkPolicy::Shared => write!(f, "shared"),
        }
    }
}

/// User address-space layout the library relies on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    /// First address of the duplicable range (inclusive)
    pub dup_start: VirtAddr,
    /// End of the duplicable range (exclusive)
    pub dup_end: VirtAddr,
    /// Top of the one-page exception stack
    pub exception_stack_top: VirtAddr,
    /// Scratch page used by the fault handler
    pub scratch: VirtAddr,
    /// Lowest address of the normal stack region
    pub stack_bottom: VirtAddr,
    /// Address of the cached identity word
    pub identity_slot: VirtAddr,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            dup_start: UTEXT,
            dup_end: USTACKTOP,
            exception_stack_top: UXSTACKTOP,
            scratch: PFTEMP,
            stack_bottom: USTACKTOP - PTSIZE,
            identity_slot: IDENTITY_SLOT,
        }
    }
}

impl Layout {
    /// Page that backs the exception stack
    pub const fn exception_stack_page(&self) -> VirtAddr {
        self.exception_stack_top - PGSIZE
    }

    /// Page holding the identity word
    pub const fn identity_page(&self) -> VirtAddr {
        round_down(self.identity_slot)
    }

    /// Whether `va` lies in the duplicable range
    pub const fn is_duplicable(&self, va: VirtAddr) -> bool {
        va >= self.dup_start && va < self.dup_end
    }

    /// Whether `va` is in the normal stack region
    pub const fn is_stack(&self, va: VirtAddr) -> bool {
        va >= self.stack_bottom && va < self.dup_end
    }

    /// Check alignment and ordering constraints
    pub fn validate(&self) -> ForkResult<()> {
        let aligned = [
            ("dup_start", self.dup_start),
            ("dup_end", self.dup_end),
            ("exception_stack_top", self.exception_stack_top),
            ("scratch", self.scratch),
            ("stack_bottom", self.stack_bottom),
        ];
        for (name, va) in aligned {
            if !is_page_aligned(va) {
                return Err(ForkError::InvalidConfig(format!(
                    "{} 0x{:x} is not page aligned",
                    name, va
                )));
            }
        }

        if self.dup_start >= self.dup_end {
            return Err(ForkError::InvalidConfig(
                "duplicable range is empty".to_string(),
            ));
        }
        if self.exception_stack_top > UTOP || self.exception_stack_page() < self.dup_end {
            return Err(ForkError::InvalidConfig(
                "exception stack must sit above the duplicable range and below UTOP".to_string(),
            ));
        }
        if !self.is_duplicable(self.stack_bottom) {
            return Err(ForkError::InvalidConfig(
                "stack region must start inside the duplicable range".to_string(),
            ));
        }
        if self.is_duplicable(self.scratch) {
            return Err(ForkError::InvalidConfig(
                "scratch page must lie outside the duplicable range".to_string(),
            ));
        }
        if !self.is_duplicable(self.identity_slot) || self.identity_slot % 4 != 0 {
            return Err(ForkError::InvalidConfig(
                "identity slot must be a word inside the duplicable range".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fork configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ForkConfig {
    pub layout: Layout,
    pub policy: ForkPolicy,
}

impl ForkConfig {
    /// Copy-on-write fork over the default layout
    pub fn cow() -> Self {
        Self::default()
    }

    /// Shared-memory fork over the default layout
    pub fn shared() -> Self {
        Self {
            policy: ForkPolicy::Shared,
            ..Self::default()
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_policy(mut self, policy: ForkPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Default configuration with the policy taken from `COW_FORK_POLICY`
    pub fn from_env() -> ForkResult<Self> {
        match std::env::var(POLICY_ENV_VAR) {
            Ok(value) => Ok(Self::default().with_policy(value.parse()?)),
            Err(_) => Ok(Self::default()),
        }
    }
}
