//! Radio gateway: owns the transceiver, runs the RX/TX loops, and
//! dispatches parsed frames to the node store and command queue.

mod gateway;
mod transceiver;

pub use gateway::{RadioGateway, RadioStatus};
pub use transceiver::{RadioTransceiver, ReceivedFrame, StubRadio};
