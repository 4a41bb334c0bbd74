//! The Phase Sequencer (§4.C) and its SCP Class Reasoner collaborator
//! (§4.D): orchestrates CP0→CP4 for every projected slave in parallel.

pub mod fanout;
pub mod scp;
pub mod sequencer;

pub use sequencer::{CommunicationPhase, PhaseSequencer};
