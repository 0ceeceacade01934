/*!
 * Address-Space Limits and Constants
 *
 * Fixed layout of a user address space, as seen by the fork library.
 * Values follow the classic 32-bit exokernel layout:
 *
 * ```text
 *    UTOP, UXSTACKTOP -> +------------------------------+ 0xeec00000
 *                        |    user exception stack      |  one page, never shared
 *                        +------------------------------+ 0xeebff000
 *                        |        empty guard           |
 *          USTACKTOP  -> +------------------------------+ 0xeebfe000
 *                        |    normal user stack         |
 *                        +------------------------------+
 *                        :            ...               :
 *              UTEXT  -> +------------------------------+ 0x00800000
 *             PFTEMP  -> |    fault scratch page        | 0x007ff000
 *              UTEMP  -> +------------------------------+ 0x00400000
 * ```
 */

// =============================================================================
// PAGE GEOMETRY
// =============================================================================

/// log2(PGSIZE)
pub const PGSHIFT: usize = 12;

/// Bytes per page
pub const PGSIZE: usize = 1 << PGSHIFT;

/// log2(PTSIZE)
pub const PTSHIFT: usize = 22;

/// Bytes mapped by one page-directory entry (4MB)
pub const PTSIZE: usize = 1 << PTSHIFT;

/// Page-table entries per table
pub const NPTENTRIES: usize = PTSIZE / PGSIZE;

// =============================================================================
// USER LAYOUT
// =============================================================================

/// Top of user-accessible, user-mappable memory
pub const UTOP: usize = 0xeec0_0000;

/// Top of the one-page user exception stack
pub const UXSTACKTOP: usize = UTOP;

/// Top of the normal user stack (one guard page below the exception stack)
pub const USTACKTOP: usize = UTOP - 2 * PGSIZE;

/// Start of program text; lower bound of the duplicable range
pub const UTEXT: usize = 2 * PTSIZE;

/// Scratch window below UTEXT, usable for temporary mappings
pub const UTEMP: usize = PTSIZE;

/// Page the fault handler maps its fresh copy at before moving it into place
pub const PFTEMP: usize = UTEMP + PTSIZE - PGSIZE;

/// Page holding the library's cached "which environment am I" word
pub const IDENTITY_SLOT: usize = 0x00ff_f000;

// =============================================================================
// SIMULATOR DEFAULTS
// =============================================================================

/// Physical frames available to a simulated machine (16MB)
pub const DEFAULT_FRAMES: usize = 4096;

/// Environments a simulated machine can hold at once
pub const DEFAULT_MAX_ENVS: usize = 1024;

/// First identifier handed out by a simulated machine
pub const FIRST_ENV_ID: u32 = 0x1000;
