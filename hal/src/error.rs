//! Errors that originate at the hardware boundary itself, as opposed to
//! protocol-level errors (those live in `sercos_master::error`).

use snafu::Snafu;

/// Failures reported by an [`crate::bus::interface::IpCoreBus`] implementation.
#[derive(Snafu, Debug, Clone, Copy, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum BusError {
    #[snafu(display("register offset {offset:#06x} is out of range for this IP-core"))]
    OffsetOutOfRange { offset: u16 },

    #[snafu(display("IP-core did not acknowledge the access within the configured timeout"))]
    Timeout,

    #[snafu(display("IP-core reported a DMA/frame-RAM parity or overrun fault"))]
    HardwareFault,
}
