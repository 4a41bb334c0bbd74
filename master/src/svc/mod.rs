//! The two-layer SVC engine (§4.A, §4.B): [`atomic`] drives one element
//! transfer per slave per cycle; [`macro_engine`] binds a sequence of
//! atomic transfers to a full parameter access; [`procedure_command`]
//! factors the repeated Clear→Set→Poll→Clear pattern used by both the
//! Phase Sequencer and the Hot-Plug Coordinator.

pub mod atomic;
pub mod macro_engine;
pub mod procedure_command;

/// §9 Open Questions resolution: both the macro and atomic layers are
/// exported as public API (see `DESIGN.md`). The macro layer,
/// [`macro_engine::SvcMacroRequest`], is the documented entry point for
/// ordinary parameter access; [`atomic::AtomicRequest`] stays available for
/// integrators who need single-cycle control over one element transfer.
pub use atomic::{AtomicOp, AtomicRequest, AtomicState};
pub use macro_engine::{ChainedOp, MacroState, SvcMacroRequest};
