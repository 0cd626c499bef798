use std::fmt;

mod dispatch;
mod gen;
mod output;
mod parse;
mod variant;

#[cfg(test)]
mod tests;

pub use parse::ParseError;
pub use variant::Variant;

pub(crate) use output::{
  client_header, client_source, common_header, common_source, server_header, server_source,
};

/// Parses a packet definitions file into the packet list. The result is
/// immutable; everything the emitters need is derived here once.
pub fn parse(input: &str) -> Result<Vec<Packet>, ParseError> { parse::parse_defs(input) }

/// A type alias from a `type NAME = EXPANSION` line. Expansions may name
/// other aliases; they are resolved to a fixed point right after the file is
/// read, so lookups during field parsing are a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAlias {
  pub alias: String,
  pub dest:  String,
}

/// The on-wire encoding family of a field. The known families each get their
/// own comparison/put/get shapes; everything else is a plain dataio tag that
/// only shows up inside `DIO_PUT`/`DIO_GET` invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireKind {
  Memory,
  Bitvector,
  String,
  EString,
  CityMap,
  Worklist,
  CmParameter,
  /// Any other dataio tag (`uint8`, `sint16`, `unit_order`, ...).
  Plain(String),
}

impl WireKind {
  pub fn from_name(name: &str) -> WireKind {
    match name {
      "memory" => WireKind::Memory,
      "bitvector" => WireKind::Bitvector,
      "string" => WireKind::String,
      "estring" => WireKind::EString,
      "city_map" => WireKind::CityMap,
      "worklist" => WireKind::Worklist,
      "cm_parameter" => WireKind::CmParameter,
      _ => WireKind::Plain(name.into()),
    }
  }
  /// The dataio tag, as spelled inside the emitted `DIO_PUT`/`DIO_GET`.
  pub fn name(&self) -> &str {
    match self {
      WireKind::Memory => "memory",
      WireKind::Bitvector => "bitvector",
      WireKind::String => "string",
      WireKind::EString => "estring",
      WireKind::CityMap => "city_map",
      WireKind::Worklist => "worklist",
      WireKind::CmParameter => "cm_parameter",
      WireKind::Plain(n) => n,
    }
  }
  /// String-ish kinds, stored as `char` buffers and compared with `strcmp`.
  pub fn is_text(&self) -> bool { matches!(self, WireKind::String | WireKind::EString) }
}

impl fmt::Display for WireKind {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.name()) }
}

/// A parsed `WIRE(STORAGE)` expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldType {
  pub wire:         WireKind,
  /// The storage type in the emitted struct (`int`, `bool`, `float`,
  /// `struct worklist`, `enum unit_orders`, ...).
  pub storage:      String,
  /// Scale factor for `float` storage, parsed from the trailing digits of
  /// the wire kind (`ufloat10000` -> `ufloat` with factor 10000).
  pub float_factor: Option<u32>,
}

impl FieldType {
  pub fn is_struct(&self) -> bool { self.storage.starts_with("struct") }
  pub fn is_bool(&self) -> bool { self.storage == "bool" }
  pub fn is_float(&self) -> bool { self.storage == "float" }
  /// Storage types `DIO_GET` fills directly; everything else reads into an
  /// `int` first and casts.
  pub fn reads_direct(&self) -> bool { matches!(self.storage.as_str(), "int" | "bool") }
}

/// One array dimension. The declared size is the compile-time constant used
/// in the struct declaration; the used size is the runtime count to
/// transmit; the old size is the cached prior value's count. A `DECL:USED`
/// token expands to `(DECL, real_packet->USED, old->USED)`, a bare token to
/// the same size three times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArraySize {
  pub declared: String,
  pub used:     String,
  pub old:      String,
}

impl ArraySize {
  pub fn from_token(token: &str) -> Option<ArraySize> {
    let mut parts = token.split(':');
    let first = parts.next()?.trim();
    if first.is_empty() {
      return None;
    }
    match parts.next() {
      None => Some(ArraySize {
        declared: first.into(),
        used:     first.into(),
        old:      first.into(),
      }),
      Some(used) => {
        let used = used.trim();
        if used.is_empty() || parts.next().is_some() {
          return None;
        }
        Some(ArraySize {
          declared: first.into(),
          used:     format!("real_packet->{}", used),
          old:      format!("old->{}", used),
        })
      }
    }
  }
  /// True when the used count is the declared constant itself, so the two
  /// can never disagree at runtime.
  pub fn is_fixed(&self) -> bool { self.declared == self.used }
}

/// Capability gate on a field: the field only exists in variants where the
/// named capability was (`Add`) or was not (`Remove`) negotiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapGate {
  Add(String),
  Remove(String),
}

impl CapGate {
  pub fn cap(&self) -> &str {
    match self {
      CapGate::Add(c) | CapGate::Remove(c) => c,
    }
  }
}

/// One field of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
  pub name:   String,
  pub ty:     FieldType,
  /// One entry per array dimension, in declaration order. Empty for
  /// scalars; at most two entries.
  pub sizes:  Vec<ArraySize>,
  /// Key fields identify the delta snapshot this packet updates.
  pub is_key: bool,
  /// The array is sent as a sparse (index, value) diff stream.
  pub diff:   bool,
  pub cap:    Option<CapGate>,
}

impl Field {
  pub fn rank(&self) -> usize { self.sizes.len() }
  pub fn is_array(&self) -> bool { !self.sizes.is_empty() }
}

/// How a packet participates in the "discard if nothing changed" logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKind {
  /// Always transmitted.
  Normal,
  Info,
  GameInfo,
}

/// The directions a packet may travel in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dirs {
  pub sc: bool,
  pub cs: bool,
}

impl Dirs {
  pub fn sc_only(&self) -> bool { self.sc && !self.cs }
  pub fn cs_only(&self) -> bool { self.cs && !self.sc }
  pub fn unrestricted(&self) -> bool { self.sc && self.cs }
}

/// A packet definition, plus the capability variants derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
  /// The symbolic tag, e.g. `PACKET_CITY_INFO`.
  pub tag:               String,
  /// The lowercased tag, used for struct and function names.
  pub name:              String,
  pub number:            u16,
  pub dirs:              Dirs,
  pub info:              InfoKind,
  pub want_pre_send:     bool,
  pub want_post_recv:    bool,
  pub want_post_send:    bool,
  pub delta:             bool,
  pub no_packet:         bool,
  pub handle_via_packet: bool,
  pub handle_per_conn:   bool,
  pub no_handle:         bool,
  pub want_dsend:        bool,
  pub want_lsend:        bool,
  pub want_force:        bool,
  /// Tags whose cached snapshots this packet evicts when sent or received.
  pub cancel:            Vec<String>,
  pub fields:            Vec<Field>,
  pub variants:          Vec<Variant>,
}

impl Packet {
  /// The name without the `packet_` prefix, used for handler names.
  pub fn short_name(&self) -> &str { self.name.strip_prefix("packet_").unwrap_or(&self.name) }

  pub fn key_fields(&self) -> impl Iterator<Item = &Field> {
    self.fields.iter().filter(|f| f.is_key)
  }
  pub fn other_fields(&self) -> impl Iterator<Item = &Field> {
    self.fields.iter().filter(|f| !f.is_key)
  }
}
