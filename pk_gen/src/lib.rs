//! Generator for the game's delta wire protocol.
//!
//! The input is a packet definitions file describing every packet, its tag
//! number, direction, flags and fields. The output is the C++ source that
//! the client and server compile in: packet structs, delta-encoding send and
//! receive routines, and the capability-aware dispatch tables. The emitted
//! code only calls into externally provided primitives (dataio, bitvectors,
//! genhash, the connection struct); nothing here runs at game time.

use log::info;
use std::{fs, io, path::Path};
use thiserror::Error;

mod config;
pub mod gen;
mod packet;

pub use config::GenConfig;
pub use packet::{
  parse, ArraySize, CapGate, Dirs, Field, FieldType, InfoKind, Packet, ParseError, TypeAlias,
  Variant, WireKind,
};

/// Which header/source pair to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  /// Structs, codecs, and dispatch tables shared by both sides.
  Common,
  /// The client's handler prototypes and dispatch switch.
  Client,
  /// The server's handler prototypes and dispatch switch.
  Server,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("{0}")]
  Parse(#[from] ParseError),
  #[error(transparent)]
  Io(#[from] io::Error),
}

/// Reads the definitions file and writes the header and source for the
/// requested mode.
pub fn generate(
  input: &Path,
  header: &Path,
  source: &Path,
  mode: Mode,
  cfg: &GenConfig,
) -> Result<(), Error> {
  let text = fs::read_to_string(input)?;
  let packets = packet::parse(&text)?;
  info!("parsed {} packets from {}", packets.len(), input.display());

  let input_name = input.display().to_string();
  let (h, s) = match mode {
    Mode::Common => (
      packet::common_header(&packets, cfg, &input_name),
      packet::common_source(&packets, cfg, &input_name),
    ),
    Mode::Client => (
      packet::client_header(&packets, cfg, &input_name),
      packet::client_source(&packets, cfg, &input_name),
    ),
    Mode::Server => (
      packet::server_header(&packets, cfg, &input_name),
      packet::server_source(&packets, cfg, &input_name),
    ),
  };
  fs::write(header, h)?;
  fs::write(source, s)?;
  info!("wrote {} and {}", header.display(), source.display());
  Ok(())
}
