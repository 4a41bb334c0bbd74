//! The single error type returned by every fallible public operation (§7).
//!
//! Per-slave failures encountered while a batch operation (a phase
//! transition, a Hot-Plug sweep) is in flight do not construct this type
//! directly — they are appended to a [`crate::diagnostics::ExtendedDiagnostic`]
//! and only surfaced as a `MasterError` once the whole batch has finished
//! (§7 "Propagation"), at which point the *first* recorded slave error is
//! returned to the caller.

use sercos_hal::idn::Idn;
use snafu::Snafu;

use crate::model::slave::SlaveIdx;

/// Every `Kind` named in §7, one variant each.
#[derive(Snafu, Debug, Clone, Copy, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum MasterError {
    #[snafu(display("slave {slave:?} reported Sercos error code {code:#06x} for {idn}"))]
    SvcErrorMessage {
        slave: SlaveIdx,
        idn: Idn,
        code: u16,
    },

    #[snafu(display("write length for {idn} on slave {slave:?} does not match the element's declared length"))]
    SvcWriteLengthError { slave: SlaveIdx, idn: Idn },

    #[snafu(display("element number {element} is not a valid SVC element (1..=7)"))]
    WrongElementNbr { element: u8 },

    #[snafu(display("slave {slave:?} has not set M_BUSY; re-enter next cycle"))]
    MBusyNotSet { slave: SlaveIdx },

    #[snafu(display("slave {slave:?} violated the SVC handshake protocol"))]
    ProtocolError { slave: SlaveIdx },

    #[snafu(display("slave {slave:?} did not advance the SVC handshake within budget"))]
    HandshakeTimeout { slave: SlaveIdx },

    #[snafu(display("slave {slave:?} did not set M_BUSY within budget"))]
    BusyTimeout { slave: SlaveIdx },

    #[snafu(display("slave index {index} is out of range for this fleet"))]
    WrongSlaveIndex { index: usize },

    #[snafu(display("unrecoverable internal error: {detail}"))]
    SystemError { detail: &'static str },

    #[snafu(display("request addressed to slave {slave:?} which is mid Hot-Plug"))]
    RequestToHpSlave { slave: SlaveIdx },

    #[snafu(display("operation is not valid in the current communication phase"))]
    WrongPhase,

    #[snafu(display("Hot-Plug is not supported by this configuration"))]
    HpNotSupported,

    #[snafu(display("Hot-Plug requires a closed ring topology"))]
    HpNotWithClosedRing,

    #[snafu(display("no Hot-Plug-capable slave is attached"))]
    HpNoHotplugSlave,

    #[snafu(display("Hot-Plug topology does not match the configured line shape"))]
    HpWrongTopology,

    #[snafu(display("Hot-Plug topology-change command failed"))]
    HpTopologyChange,

    #[snafu(display("Hot-Plug phase 0 (parameter broadcast) timed out"))]
    HpPhase0Timeout,

    #[snafu(display("Hot-Plug slave scan timed out"))]
    HpSlaveScanTimeout,

    #[snafu(display("Hot-Plug slave scan found no slaves"))]
    HpNoSlaveFound,

    #[snafu(display("Hot-Plug phase 0 failed"))]
    HpPhase0Failed,

    #[snafu(display("Hot-Plug scan found address {address:#05x} already active in CP0"))]
    HpSlaveRecognizedInCp0 { address: u16 },

    #[snafu(display("Hot-Plug scan found address {address:#05x} which is not projected"))]
    HpSlaveIsNotProjected { address: u16 },

    #[snafu(display("Hot-Plug phase 1 (parameter dispatch) timed out"))]
    HpPhase1Timeout,

    #[snafu(display("Hot-Plug SVC activation failed"))]
    HpSwitchToSvcFailed,

    #[snafu(display("Hot-Plug SVC activation timed out"))]
    HpSwitchToSvcTimeout,

    #[snafu(display("Hot-Plug operation was aborted by the caller"))]
    HpOperationAborted,

    #[snafu(display("Hot-Plug scan found duplicate address {address:#05x}"))]
    HpDoubleSlaveAddresses { address: u16 },

    #[snafu(display("Hot-Plug scan found illegal address {address:#05x}"))]
    HpIllegalSlaveAddress { address: u16 },

    #[snafu(display("internal state machine reached an impossible case"))]
    IllegalCase,

    #[snafu(display("slave {slave:?} reports an incompatible Sercos version"))]
    SercosVersionMismatch { slave: SlaveIdx },

    #[snafu(display("slave {slave:?} carries both a FixCFG and a VarCFG basic class, or neither"))]
    BasicScpTypeMismatch { slave: SlaveIdx },

    #[snafu(display("slave {slave:?} requests more connections than S-0-1051 permits"))]
    TooManyConnections { slave: SlaveIdx },

    #[snafu(display("connection {connection} on slave {slave:?} is invalid"))]
    InvalidConnection { slave: SlaveIdx, connection: u8 },

    #[snafu(display("requested MTU is not achievable by slave {slave:?}"))]
    InvalidMtu { slave: SlaveIdx },

    #[snafu(display("connection {connection} on slave {slave:?} has length 0"))]
    ConnectionLength0 { slave: SlaveIdx, connection: u8 },

    #[snafu(display("procedure command {idn} on slave {slave:?} finished with an error status"))]
    S00CmdError { slave: SlaveIdx, idn: Idn },

    #[snafu(display("procedure command {idn} on slave {slave:?} timed out before reaching finished"))]
    S00CmdTimeoutError { slave: SlaveIdx, idn: Idn },
}

pub type Result<T, E = MasterError> = core::result::Result<T, E>;
