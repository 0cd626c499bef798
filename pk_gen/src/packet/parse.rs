use super::{
  variant::Variant, ArraySize, CapGate, Dirs, Field, FieldType, InfoKind, Packet, TypeAlias,
  WireKind,
};
use log::debug;
use std::collections::HashMap;
use thiserror::Error;

/// Everything that can go wrong while reading a packet definitions file. All
/// of these abort the build; nothing is retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
  #[error("line {line}: {msg}")]
  Syntax { line: usize, msg: String },
  #[error("line {line}: unknown flag `{flag}`")]
  UnknownFlag { line: usize, flag: String },
  #[error("duplicate packet number {number} used by {first} and {second}")]
  DuplicateNumber { number: u16, first: String, second: String },
  #[error("type alias cycle involving `{alias}`")]
  AliasCycle { alias: String },
  #[error("missing `end` before end of input")]
  MissingEnd,
}

fn syntax(line: usize, msg: impl Into<String>) -> ParseError {
  ParseError::Syntax { line, msg: msg.into() }
}

pub(super) fn parse_defs(input: &str) -> Result<Vec<Packet>, ParseError> {
  let lines = strip_comments(input);

  // Pull out the type aliases first; they may appear anywhere at top level.
  let mut aliases = vec![];
  let mut remaining = vec![];
  for (no, line) in lines {
    match parse_alias(no, &line)? {
      Some(alias) => aliases.push(alias),
      None => remaining.push((no, line)),
    }
  }
  resolve_aliases(&mut aliases)?;

  // The rest of the file is packet blocks, each terminated by `end`.
  let mut packets: Vec<Packet> = vec![];
  let mut block: Vec<(usize, String)> = vec![];
  for (no, line) in remaining {
    if line == "end" {
      if block.is_empty() {
        return Err(syntax(no, "`end` without a packet definition"));
      }
      packets.push(parse_packet(&block, &aliases)?);
      block.clear();
    } else {
      block.push((no, line));
    }
  }
  if !block.is_empty() {
    return Err(ParseError::MissingEnd);
  }

  let mut numbers: HashMap<u16, String> = HashMap::new();
  for p in &packets {
    if let Some(first) = numbers.insert(p.number, p.tag.clone()) {
      return Err(ParseError::DuplicateNumber {
        number: p.number,
        first,
        second: p.tag.clone(),
      });
    }
  }

  debug!("parsed {} aliases and {} packets", aliases.len(), packets.len());
  Ok(packets)
}

/// Removes block comments and full-line `#`/`//` comments, drops blank
/// lines, and keeps the 1-based line number of everything that survives.
fn strip_comments(input: &str) -> Vec<(usize, String)> {
  let mut out = vec![];
  let mut in_block = false;
  for (i, raw) in input.lines().enumerate() {
    let mut line = String::new();
    let mut rest = raw;
    loop {
      if in_block {
        match rest.find("*/") {
          Some(p) => {
            rest = &rest[p + 2..];
            in_block = false;
          }
          None => break,
        }
      } else {
        match rest.find("/*") {
          Some(p) => {
            line.push_str(&rest[..p]);
            rest = &rest[p + 2..];
            in_block = true;
          }
          None => {
            line.push_str(rest);
            break;
          }
        }
      }
    }
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
      continue;
    }
    out.push((i + 1, trimmed.to_string()));
  }
  out
}

fn parse_alias(no: usize, line: &str) -> Result<Option<TypeAlias>, ParseError> {
  let rest = match line.strip_prefix("type") {
    Some(r) if r.starts_with(char::is_whitespace) => r.trim(),
    _ => return Ok(None),
  };
  let (alias, dest) = rest
    .split_once('=')
    .ok_or_else(|| syntax(no, "type alias without `=`"))?;
  let (alias, dest) = (alias.trim(), dest.trim());
  if alias.is_empty() || dest.is_empty() {
    return Err(syntax(no, "type alias needs a name and an expansion"));
  }
  Ok(Some(TypeAlias { alias: alias.into(), dest: dest.into() }))
}

/// Resolves every alias destination to a fixed point, so later lookups are a
/// single step. Cycles are rejected.
fn resolve_aliases(aliases: &mut [TypeAlias]) -> Result<(), ParseError> {
  for i in 0..aliases.len() {
    let mut dest = aliases[i].dest.clone();
    let mut steps = 0;
    while let Some(t) = aliases.iter().find(|t| t.alias == dest) {
      dest = t.dest.clone();
      steps += 1;
      if steps > aliases.len() {
        return Err(ParseError::AliasCycle { alias: aliases[i].alias.clone() });
      }
    }
    aliases[i].dest = dest;
  }
  Ok(())
}

fn lookup_alias(aliases: &[TypeAlias], name: &str) -> String {
  match aliases.iter().find(|t| t.alias == name) {
    Some(t) => t.dest.clone(),
    None => name.into(),
  }
}

fn parse_packet(block: &[(usize, String)], aliases: &[TypeAlias]) -> Result<Packet, ParseError> {
  let (head_no, head) = (block[0].0, block[0].1.as_str());

  let (decl, flags) = head
    .split_once(';')
    .ok_or_else(|| syntax(head_no, "missing `;` in packet header"))?;
  let (tag, number) = decl
    .split_once('=')
    .ok_or_else(|| syntax(head_no, "missing `=` in packet header"))?;
  let tag = tag.trim().to_string();
  let number: u16 = number
    .trim()
    .parse()
    .map_err(|_| syntax(head_no, "packet number must be in 0..=65535"))?;
  let name = tag.to_lowercase();

  let mut dirs = Dirs { sc: false, cs: false };
  let mut info = InfoKind::Normal;
  let mut want_pre_send = false;
  let mut want_post_recv = false;
  let mut want_post_send = false;
  let mut delta = true;
  let mut no_packet = false;
  let mut handle_via_packet = false;
  let mut handle_per_conn = false;
  let mut no_handle = false;
  let mut want_dsend = false;
  let mut want_lsend = false;
  let mut want_force = false;
  let mut cancel = vec![];

  for flag in flags.split(',').map(str::trim).filter(|f| !f.is_empty()) {
    match flag {
      "sc" => dirs.sc = true,
      "cs" => dirs.cs = true,
      "is-info" => info = InfoKind::Info,
      "is-game-info" => info = InfoKind::GameInfo,
      "pre-send" => want_pre_send = true,
      "post-recv" => want_post_recv = true,
      "post-send" => want_post_send = true,
      "no-delta" => delta = false,
      "no-packet" => no_packet = true,
      "handle-via-packet" => handle_via_packet = true,
      "handle-per-conn" => handle_per_conn = true,
      "no-handle" => no_handle = true,
      "dsend" => want_dsend = true,
      "lsend" => want_lsend = true,
      "force" => want_force = true,
      _ => match paren_arg(flag, "cancel") {
        Some(t) => cancel.push(t.to_string()),
        None => {
          return Err(ParseError::UnknownFlag { line: head_no, flag: flag.into() });
        }
      },
    }
  }
  if !dirs.sc && !dirs.cs {
    return Err(syntax(head_no, format!("packet {} has no direction", tag)));
  }

  let mut fields = vec![];
  for (no, line) in &block[1..] {
    fields.extend(parse_field_line(*no, line, aliases)?);
  }

  if fields.iter().filter(|f| f.is_key).count() > 2 {
    return Err(syntax(head_no, format!("packet {} has more than two key fields", tag)));
  }

  if fields.is_empty() {
    delta = false;
    no_packet = true;
    if want_dsend {
      return Err(syntax(head_no, "dsend for a packet without fields isn't useful"));
    }
  }
  if fields.len() > 5 || name.split('_').nth(1) == Some("ruleset") {
    handle_via_packet = true;
  }

  let variants = Variant::expand_all(&name, &fields, delta, no_packet);

  Ok(Packet {
    tag,
    name,
    number,
    dirs,
    info,
    want_pre_send,
    want_post_recv,
    want_post_send,
    delta,
    no_packet,
    handle_via_packet,
    handle_per_conn,
    no_handle,
    want_dsend,
    want_lsend,
    want_force,
    cancel,
    fields,
    variants,
  })
}

/// Matches `name(ARG)` and returns ARG.
fn paren_arg<'a>(flag: &'a str, name: &str) -> Option<&'a str> {
  flag
    .strip_prefix(name)?
    .strip_prefix('(')?
    .strip_suffix(')')
}

/// Parses one field line of the form `TYPE NAMES; FLAGS`, where NAMES is a
/// comma-separated list of name expressions with optional `[S]`/`[S][T]`
/// suffixes. Returns one Field per name.
fn parse_field_line(
  no: usize,
  line: &str,
  aliases: &[TypeAlias],
) -> Result<Vec<Field>, ParseError> {
  let (decl, flags) = line
    .split_once(';')
    .ok_or_else(|| syntax(no, "missing `;` in field line"))?;
  let decl = decl.trim();

  // The type token either carries an inline `WIRE(STORAGE)` or is a single
  // word naming an alias.
  let (type_tok, names) = if let Some(open) = decl.find('(') {
    let close = decl
      .rfind(')')
      .filter(|&c| c > open)
      .ok_or_else(|| syntax(no, "unbalanced parentheses in field type"))?;
    (decl[..=close].trim(), decl[close + 1..].trim())
  } else {
    decl
      .split_once(char::is_whitespace)
      .map(|(t, n)| (t.trim(), n.trim()))
      .ok_or_else(|| syntax(no, "field line has no field names"))?
  };
  if names.is_empty() {
    return Err(syntax(no, "field line has no field names"));
  }

  let expansion = lookup_alias(aliases, type_tok);
  let ty = parse_field_type(no, &expansion)?;

  let mut is_key = false;
  let mut diff = false;
  let mut cap: Option<CapGate> = None;
  for flag in flags.split(',').map(str::trim).filter(|f| !f.is_empty()) {
    let gate = if let Some(c) = paren_arg(flag, "add-cap") {
      Some(CapGate::Add(c.into()))
    } else if let Some(c) = paren_arg(flag, "remove-cap") {
      Some(CapGate::Remove(c.into()))
    } else {
      match flag {
        "key" => {
          is_key = true;
          None
        }
        "diff" => {
          diff = true;
          None
        }
        _ => return Err(ParseError::UnknownFlag { line: no, flag: flag.into() }),
      }
    };
    if let Some(gate) = gate {
      if cap.is_some() {
        return Err(syntax(no, "at most one add-cap or remove-cap per field"));
      }
      cap = Some(gate);
    }
  }

  let mut fields = vec![];
  for expr in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
    let (name, sizes) = parse_name(no, expr)?;
    if ty.wire == WireKind::Memory && sizes.len() != 1 {
      return Err(syntax(no, format!("memory field `{}` needs exactly one array size", name)));
    }
    fields.push(Field {
      name,
      ty: ty.clone(),
      sizes,
      is_key,
      diff,
      cap: cap.clone(),
    });
  }
  if fields.is_empty() {
    return Err(syntax(no, "field line has no field names"));
  }
  Ok(fields)
}

fn parse_field_type(no: usize, expansion: &str) -> Result<FieldType, ParseError> {
  let open = expansion
    .find('(')
    .filter(|_| expansion.ends_with(')'))
    .ok_or_else(|| {
      syntax(no, format!("type `{}` does not match WIRE(STORAGE)", expansion))
    })?;
  let mut wire_name = &expansion[..open];
  let storage = expansion[open + 1..expansion.len() - 1].trim().to_string();
  if wire_name.is_empty() || storage.is_empty() {
    return Err(syntax(no, format!("type `{}` does not match WIRE(STORAGE)", expansion)));
  }

  // A float storage type scales through an integer factor taken from the
  // trailing digits of the wire kind.
  let mut float_factor = None;
  if storage == "float" {
    let trailing = wire_name.bytes().rev().take_while(u8::is_ascii_digit).count();
    let (stem, factor) = wire_name.split_at(wire_name.len() - trailing);
    if stem.is_empty() || factor.is_empty() {
      return Err(syntax(
        no,
        format!("float wire kind `{}` must end in a scale factor", wire_name),
      ));
    }
    float_factor = Some(
      factor
        .parse()
        .map_err(|_| syntax(no, format!("bad float factor in `{}`", wire_name)))?,
    );
    wire_name = stem;
  }

  Ok(FieldType { wire: WireKind::from_name(wire_name), storage, float_factor })
}

/// Parses a name expression: `NAME`, `NAME[S]`, or `NAME[S][T]`.
fn parse_name(no: usize, expr: &str) -> Result<(String, Vec<ArraySize>), ParseError> {
  let bad = || syntax(no, format!("bad field name expression `{}`", expr));
  match expr.find('[') {
    None => Ok((expr.to_string(), vec![])),
    Some(p) => {
      let name = expr[..p].trim();
      if name.is_empty() {
        return Err(bad());
      }
      let mut sizes = vec![];
      let mut rest = &expr[p..];
      while !rest.is_empty() {
        let inner = rest
          .strip_prefix('[')
          .and_then(|r| r.split_once(']'))
          .ok_or_else(bad)?;
        sizes.push(ArraySize::from_token(inner.0.trim()).ok_or_else(bad)?);
        rest = inner.1;
      }
      if sizes.len() > 2 {
        return Err(syntax(no, format!("field `{}` has more than two dimensions", name)));
      }
      Ok((name.to_string(), sizes))
    }
  }
}
