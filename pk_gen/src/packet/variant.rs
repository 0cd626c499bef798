use super::{CapGate, Field};
use itertools::Itertools;
use std::collections::BTreeSet;

/// A capability variant of a packet: the packet as it looks when a specific
/// subset of the referenced capabilities was negotiated. Variant 100 + k is
/// the k-th subset; the field list is already filtered and split into key
/// and non-key fields, and the position of a field in `other_fields` is its
/// bit in the delta bitvector.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
  pub no:           usize,
  /// `<packet name>_<no>`, the suffix of the emitted codec functions.
  pub name:         String,
  pub poscaps:      Vec<String>,
  pub negcaps:      Vec<String>,
  /// The emitted activation predicate, `true` when no caps are referenced.
  pub condition:    String,
  pub fields:       Vec<Field>,
  pub key_fields:   Vec<Field>,
  pub other_fields: Vec<Field>,
  /// Like the parent packet's flags, but forced off/on when this variant's
  /// filtered field list ends up empty.
  pub delta:        bool,
  pub no_packet:    bool,
}

impl Variant {
  /// Width of the delta bitvector.
  pub fn bits(&self) -> usize { self.other_fields.len() }

  /// Enumerates every capability subset of a packet in a stable order:
  /// capabilities are sorted by name, and subsets are walked by ascending
  /// bitmask, so a regenerated file is identical to the last one. The first
  /// variant is the one with no positive capabilities.
  pub fn expand_all(
    packet_name: &str,
    fields: &[Field],
    delta: bool,
    no_packet: bool,
  ) -> Vec<Variant> {
    let caps = caps_of(fields);
    let mut variants = vec![];
    for mask in 0usize..(1 << caps.len()) {
      let (pos, neg): (Vec<String>, Vec<String>) = caps
        .iter()
        .cloned()
        .enumerate()
        .partition_map(|(i, c)| {
          if mask & (1 << i) != 0 {
            itertools::Either::Left(c)
          } else {
            itertools::Either::Right(c)
          }
        });

      let kept: Vec<Field> = fields
        .iter()
        .filter(|f| match &f.cap {
          None => true,
          Some(CapGate::Add(c)) => pos.contains(c),
          Some(CapGate::Remove(c)) => neg.contains(c),
        })
        .cloned()
        .collect();

      let condition = if caps.is_empty() {
        "true".to_string()
      } else {
        pos
          .iter()
          .map(|c| format!("has_capability(\"{}\", capability)", c))
          .chain(neg.iter().map(|c| format!("!has_capability(\"{}\", capability)", c)))
          .join(" && ")
      };

      let key_fields: Vec<Field> = kept.iter().filter(|f| f.is_key).cloned().collect();
      let other_fields: Vec<Field> = kept.iter().filter(|f| !f.is_key).cloned().collect();
      let (delta, no_packet) =
        if kept.is_empty() { (false, true) } else { (delta, no_packet) };

      let no = 100 + mask;
      variants.push(Variant {
        no,
        name: format!("{}_{}", packet_name, no),
        poscaps: pos,
        negcaps: neg,
        condition,
        fields: kept,
        key_fields,
        other_fields,
        delta,
        no_packet,
      });
    }
    variants
  }
}

/// The sorted set of capability names referenced by any of the fields.
pub(super) fn caps_of(fields: &[Field]) -> Vec<String> {
  let caps: BTreeSet<&str> = fields.iter().filter_map(|f| f.cap.as_ref()).map(CapGate::cap).collect();
  caps.into_iter().map(String::from).collect()
}
