//! Code shared by the server and the client: the wire codec and opcode
//! tables, stream framing, the input capture and record codec, and the stage
//! simulation both ends run or mirror.

pub mod framing;
pub mod input;
pub mod protocol;
pub mod record;
pub mod stage;
pub mod wire;

pub use input::{Control, InputCapture, KeyAutomaton, KeyPhase, KeyTick, TickLine};
pub use protocol::{BlockEditOp, ClientOp, ProtocolError, ServerOp};
pub use record::{RecordEncoder, Recording, Replayer};
pub use stage::{BlockEdit, Stage, StageTemplate};
pub use wire::{HashToken, Reader, WireError, Writer};
