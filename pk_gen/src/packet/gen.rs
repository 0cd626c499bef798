//! Per-field code fragments and the per-variant codec emitters: hash, key
//! equality, delta send and receive, plus the packet-level send helpers.

use super::{Field, InfoKind, Packet, Variant, WireKind};
use crate::{gen::CodeGen, GenConfig};
use itertools::Itertools;

/// Indents every non-empty line of a fragment by `by` levels.
fn indent(code: &str, by: usize) -> String {
  let pad = "  ".repeat(by);
  code
    .split('\n')
    .map(|l| if l.is_empty() { String::new() } else { format!("{}{}", pad, l) })
    .join("\n")
}

impl Field {
  /// The declaration of this field inside the packet struct.
  pub(super) fn declaration(&self) -> String {
    match self.sizes.len() {
      2 => format!(
        "{} {}[{}][{}]",
        self.ty.storage, self.name, self.sizes[0].declared, self.sizes[1].declared
      ),
      1 => format!("{} {}[{}]", self.ty.storage, self.name, self.sizes[0].declared),
      _ => format!("{} {}", self.ty.storage, self.name),
    }
  }

  /// The parameter type used in handler prototypes and dsend arguments. Ends
  /// in a space or a `*` so the parameter name can follow directly.
  pub(super) fn handle_arg_type(&self) -> String {
    if self.ty.wire.is_text() {
      return "const char *".into();
    }
    if self.ty.wire == WireKind::Worklist {
      return format!("const {} *", self.ty.storage);
    }
    if self.is_array() {
      return format!("const {} *", self.ty.storage);
    }
    format!("{} ", self.ty.storage)
  }

  /// Copies a dsend argument into the stack-local packet.
  pub(super) fn fill_code(&self) -> String {
    let n = &self.name;
    if self.ty.wire == WireKind::Worklist {
      return format!("worklist_copy(&real_packet->{n}, {n});");
    }
    if !self.is_array() {
      return format!("real_packet->{n} = {n};");
    }
    if self.ty.wire.is_text() {
      return format!("sz_strlcpy(real_packet->{n}, {n});");
    }
    if self.rank() == 1 {
      let used = &self.sizes[0].used;
      return format!(
"{{
  int i;

  for (i = 0; i < {used}; i++) {{
    real_packet->{n}[i] = {n}[i];
  }}
}}"
      );
    }
    let u1 = &self.sizes[0].used;
    let u2 = &self.sizes[1].used;
    format!(
"{{
  int i, j;

  for (i = 0; i < {u1}; i++) {{
    for (j = 0; j < {u2}; j++) {{
      real_packet->{n}[i][j] = {n}[i][j];
    }}
  }}
}}"
    )
  }

  /// Sets `differ` by comparing the cached and the current value.
  pub(super) fn cmp_code(&self) -> String {
    let n = &self.name;
    if self.ty.wire == WireKind::Memory {
      return format!(
        "differ = (memcmp(old->{n}, real_packet->{n}, {}) != 0);",
        self.sizes[0].declared
      );
    }
    if self.ty.wire == WireKind::Bitvector {
      return format!("differ = !BV_ARE_EQUAL(old->{n}, real_packet->{n});");
    }
    if self.ty.wire.is_text() && self.rank() == 1 {
      return format!("differ = (strcmp(old->{n}, real_packet->{n}) != 0);");
    }
    if self.ty.wire == WireKind::CmParameter {
      // Address identity, so two live packet objects always differ and the
      // field is retransmitted on every delta. See DESIGN.md before
      // changing this.
      return format!("differ = (&old->{n} != &real_packet->{n});");
    }
    if self.ty.is_struct() && !self.is_array() {
      let kind = self.ty.wire.name();
      return format!("differ = !are_{kind}s_equal(&old->{n}, &real_packet->{n});");
    }
    if !self.is_array() {
      return format!("differ = (old->{n} != real_packet->{n});");
    }
    self.cmp_array()
  }

  fn cmp_array(&self) -> String {
    let n = &self.name;
    let kind = self.ty.wire.name();

    if self.ty.wire.is_text() {
      // An array of strings: compare element strings over the first
      // dimension.
      let s = &self.sizes[0];
      let init = if s.is_fixed() {
        "false".to_string()
      } else {
        format!("({} != {})", s.old, s.used)
      };
      let used = &s.used;
      return format!(
"{{
  differ = {init};
  if (!differ) {{
    int i;

    for (i = 0; i < {used}; i++) {{
      if (strcmp(old->{n}[i], real_packet->{n}[i]) != 0) {{
        differ = true;
        break;
      }}
    }}
  }}
}}"
      );
    }

    if self.rank() == 2 {
      let mut parts = vec![];
      for s in &self.sizes {
        if !s.is_fixed() {
          parts.push(format!("({} != {})", s.old, s.used));
        }
      }
      let init = if parts.is_empty() { "false".to_string() } else { parts.join(" || ") };
      let cond = if self.ty.is_struct() {
        format!("!are_{kind}s_equal(&old->{n}[i][j], &real_packet->{n}[i][j])")
      } else {
        format!("old->{n}[i][j] != real_packet->{n}[i][j]")
      };
      let u1 = &self.sizes[0].used;
      let u2 = &self.sizes[1].used;
      return format!(
"{{
  differ = {init};
  if (!differ) {{
    int i, j;

    for (i = 0; i < {u1}; i++) {{
      for (j = 0; j < {u2}; j++) {{
        if ({cond}) {{
          differ = true;
          break;
        }}
      }}
      if (differ) {{
        break;
      }}
    }}
  }}
}}"
      );
    }

    let s = &self.sizes[0];
    let init = if s.is_fixed() {
      "false".to_string()
    } else {
      format!("({} != {})", s.old, s.used)
    };
    let cond = if self.ty.is_struct() {
      format!("!are_{kind}s_equal(&old->{n}[i], &real_packet->{n}[i])")
    } else {
      format!("old->{n}[i] != real_packet->{n}[i]")
    };
    let used = &s.used;
    format!(
"{{
  differ = {init};
  if (!differ) {{
    int i;

    for (i = 0; i < {used}; i++) {{
      if ({cond}) {{
        differ = true;
        break;
      }}
    }}
  }}
}}"
    )
  }

  /// Updates this field's bit in the `fields` bitvector. The bit normally
  /// means "content differs"; for folded bools it carries the value itself.
  pub(super) fn cmp_wrapper(&self, i: usize, ctx: &GenConfig) -> String {
    let cmp = self.cmp_code();
    if ctx.fold_bool_into_header && self.ty.is_bool() && !self.is_array() {
      let n = &self.name;
      format!(
"{cmp}
if (differ) {{
  different++;
}}
if (real_packet->{n}) {{
  BV_SET(fields, {i});
}}
"
      )
    } else {
      format!(
"{cmp}
if (differ) {{
  different++;
  BV_SET(fields, {i});
}}
"
      )
    }
  }

  /// Serializes this field.
  pub(super) fn put_code(&self, delta_fragment: bool) -> String {
    let n = &self.name;
    let kind = self.ty.wire.name();
    if self.ty.wire == WireKind::Bitvector {
      return format!("DIO_BV_PUT(&dout, &field_addr, real_packet->{n});");
    }
    if self.ty.is_float() && !self.is_array() {
      let factor = self.ty.float_factor.unwrap_or(1);
      return format!("DIO_PUT({kind}, &dout, &field_addr, real_packet->{n}, {factor});");
    }
    if matches!(self.ty.wire, WireKind::Worklist | WireKind::CmParameter) {
      return format!("DIO_PUT({kind}, &dout, &field_addr, &real_packet->{n});");
    }
    if self.ty.wire == WireKind::Memory {
      let used = &self.sizes[0].used;
      return format!("DIO_PUT(memory, &dout, &field_addr, &real_packet->{n}, {used});");
    }

    let text_like =
      matches!(self.ty.wire, WireKind::String | WireKind::EString | WireKind::CityMap);
    if (text_like && self.rank() == 1) || (!text_like && !self.is_array()) {
      return format!("DIO_PUT({kind}, &dout, &field_addr, real_packet->{n});");
    }

    let elem = if self.ty.is_struct() {
      let idx = if self.rank() == 2 { "[i][j]" } else { "[i]" };
      format!("DIO_PUT({kind}, &dout, &field_addr, &real_packet->{n}{idx});")
    } else if self.ty.wire.is_text() {
      format!("DIO_PUT({kind}, &dout, &field_addr, real_packet->{n}[i]);")
    } else if self.ty.is_float() {
      let factor = self.ty.float_factor.unwrap_or(1);
      let idx = if self.rank() == 2 { "[i][j]" } else { "[i]" };
      format!("DIO_PUT({kind}, &dout, &field_addr, real_packet->{n}{idx}, {factor});")
    } else {
      let idx = if self.rank() == 2 { "[i][j]" } else { "[i]" };
      format!("DIO_PUT({kind}, &dout, &field_addr, real_packet->{n}{idx});")
    };

    if delta_fragment && self.diff && self.rank() == 1 {
      let used = &self.sizes[0].used;
      return format!(
"{{
  int i;

  fc_assert({used} < 255);

  for (i = 0; i < {used}; i++) {{
    if (old->{n}[i] != real_packet->{n}[i]) {{
      DIO_PUT(uint8, &dout, &field_addr, i);
      {elem}
    }}
  }}
  DIO_PUT(uint8, &dout, &field_addr, 255);
}}"
      );
    }
    if self.rank() == 2 && !self.ty.wire.is_text() {
      let u1 = &self.sizes[0].used;
      let u2 = &self.sizes[1].used;
      return format!(
"{{
  int i, j;

  for (i = 0; i < {u1}; i++) {{
    for (j = 0; j < {u2}; j++) {{
      {elem}
    }}
  }}
}}"
      );
    }
    let used = &self.sizes[0].used;
    format!(
"{{
  int i;

  for (i = 0; i < {used}; i++) {{
    {elem}
  }}
}}"
    )
  }

  /// Serializes this field if its bit is set. Folded bools have no payload.
  pub(super) fn put_wrapper(&self, i: usize, variant_name: &str, ctx: &GenConfig) -> String {
    if ctx.fold_bool_into_header && self.ty.is_bool() && !self.is_array() {
      return format!("/* field {i} is folded into the header */");
    }
    let mut out = format!("if (BV_ISSET(fields, {i})) {{\n");
    if ctx.generate_logs {
      out.push_str(&format!("  {}(\"  field '{}' has changed\");\n", ctx.log_macro, self.name));
    }
    if ctx.generate_stats {
      out.push_str(&format!("  stats_{variant_name}_counters[{i}]++;\n"));
    }
    out.push_str(&indent(&self.put_code(true), 1));
    out.push_str("\n}");
    out
  }

  /// Deserializes this field. Failures abort with the field-error marker.
  pub(super) fn get_code(&self, delta_fragment: bool) -> String {
    let n = &self.name;
    let kind = self.ty.wire.name();
    let err = format!("RECEIVE_PACKET_FIELD_ERROR({n});");
    if self.ty.is_float() && !self.is_array() {
      let factor = self.ty.float_factor.unwrap_or(1);
      return format!(
"if (!DIO_GET({kind}, &din, &field_addr, &real_packet->{n}, {factor})) {{
  {err}
}}"
      );
    }
    if self.ty.wire == WireKind::Bitvector {
      return format!(
"if (!DIO_BV_GET(&din, &field_addr, real_packet->{n})) {{
  {err}
}}"
      );
    }
    let text_like =
      matches!(self.ty.wire, WireKind::String | WireKind::EString | WireKind::CityMap);
    if text_like && self.rank() != 2 {
      return format!(
"if (!DIO_GET({kind}, &din, &field_addr, real_packet->{n}, sizeof(real_packet->{n}))) {{
  {err}
}}"
      );
    }
    if self.ty.is_struct() && !self.is_array() {
      return format!(
"if (!DIO_GET({kind}, &din, &field_addr, &real_packet->{n})) {{
  {err}
}}"
      );
    }
    if !self.is_array() {
      if self.ty.reads_direct() {
        return format!(
"if (!DIO_GET({kind}, &din, &field_addr, &real_packet->{n})) {{
  {err}
}}"
        );
      }
      return format!(
"{{
  int readin;

  if (!DIO_GET({kind}, &din, &field_addr, &readin)) {{
    {err}
  }}
  real_packet->{n} = static_cast<decltype(real_packet->{n})>(readin);
}}"
      );
    }

    let elem = if self.ty.is_struct() {
      let idx = if self.rank() == 2 { "[i][j]" } else { "[i]" };
      format!(
"if (!DIO_GET({kind}, &din, &field_addr, &real_packet->{n}{idx})) {{
  {err}
}}"
      )
    } else if self.ty.wire.is_text() {
      format!(
"if (!DIO_GET({kind}, &din, &field_addr, real_packet->{n}[i], sizeof(real_packet->{n}[i]))) {{
  {err}
}}"
      )
    } else if self.ty.is_float() {
      let factor = self.ty.float_factor.unwrap_or(1);
      let idx = if self.rank() == 2 { "[i][j]" } else { "[i]" };
      format!(
"if (!DIO_GET({kind}, &din, &field_addr, &real_packet->{n}{idx}, {factor})) {{
  {err}
}}"
      )
    } else if self.ty.reads_direct() {
      let idx = if self.rank() == 2 { "[i][j]" } else { "[i]" };
      format!(
"if (!DIO_GET({kind}, &din, &field_addr, &real_packet->{n}{idx})) {{
  {err}
}}"
      )
    } else {
      let idx = if self.rank() == 2 { "[i][j]" } else { "[i]" };
      format!(
"{{
  int readin;

  if (!DIO_GET({kind}, &din, &field_addr, &readin)) {{
    {err}
  }}
  real_packet->{n}{idx} = readin;
}}"
      )
    };

    let s1 = &self.sizes[0];
    if !self.diff || self.ty.wire == WireKind::Memory {
      let extra = if !s1.is_fixed() {
        format!(
"if ({used} > {declared}) {{
  RECEIVE_PACKET_FIELD_ERROR({n}, \": truncation array\");
}}
",
          used = s1.used,
          declared = s1.declared
        )
      } else {
        String::new()
      };
      if self.ty.wire == WireKind::Memory {
        let used = &s1.used;
        return format!(
"{extra}if (!DIO_GET(memory, &din, &field_addr, real_packet->{n}, {used})) {{
  {err}
}}"
        );
      }
      if self.rank() == 2 && !self.ty.wire.is_text() {
        let u1 = &self.sizes[0].used;
        let u2 = &self.sizes[1].used;
        let extra = indent(&extra, 1);
        let elem = indent(&elem, 3);
        return format!(
"{{
  int i, j;

{extra}  for (i = 0; i < {u1}; i++) {{
    for (j = 0; j < {u2}; j++) {{
{elem}
    }}
  }}
}}"
        );
      }
      let used = &s1.used;
      let extra = indent(&extra, 1);
      let elem = indent(&elem, 2);
      return format!(
"{{
  int i;

{extra}  for (i = 0; i < {used}; i++) {{
{elem}
  }}
}}"
      );
    }
    if delta_fragment && self.diff && self.rank() == 1 {
      let used = &s1.used;
      let elem = indent(&elem, 3);
      return format!(
"{{
  int count;

  for (count = 0;; count++) {{
    int i;

    if (!DIO_GET(uint8, &din, &field_addr, &i)) {{
      {err}
    }}
    if (i == 255) {{
      break;
    }}
    if (i >= {used}) {{
      RECEIVE_PACKET_FIELD_ERROR({n},
                                 \": unexpected value %d \"
                                 \"(> {used}) in array diff\",
                                 i);
    }} else {{
{elem}
    }}
  }}
}}"
      );
    }
    let used = &s1.used;
    let elem = indent(&elem, 2);
    format!(
"{{
  int i;

  for (i = 0; i < {used}; i++) {{
{elem}
  }}
}}"
    )
  }

  /// Deserializes this field if its bit is set; folded bools copy the bit.
  pub(super) fn get_wrapper(&self, i: usize, ctx: &GenConfig) -> String {
    if ctx.fold_bool_into_header && self.ty.is_bool() && !self.is_array() {
      return format!("real_packet->{} = BV_ISSET(fields, {i});", self.name);
    }
    let mut out = format!("if (BV_ISSET(fields, {i})) {{\n");
    if ctx.generate_logs {
      out.push_str(&format!("  {}(\"  got field '{}'\");\n", ctx.log_macro, self.name));
    }
    out.push_str(&indent(&self.get_code(true), 1));
    out.push_str("\n}");
    out
  }
}

impl Variant {
  fn keys_format(&self) -> String { self.key_fields.iter().map(|_| "%d").join(", ") }
  fn keys_arg(&self) -> String {
    if self.key_fields.is_empty() {
      return String::new();
    }
    format!(
      ",\n    {}",
      self.key_fields.iter().map(|f| format!("real_packet->{}", f.name)).join(", ")
    )
  }
}

fn free_scratch() -> &'static str {
  "if (real_packet != packet) {\n  delete (decltype(real_packet)) real_packet;\n}"
}

/// The extra formal parameters of a send function, after the connection.
fn send_args(packet_name: &str, no_packet: bool, want_force: bool) -> String {
  let mut args = String::new();
  if !no_packet {
    args.push_str(&format!(", const struct {} *packet", packet_name));
  }
  if want_force {
    args.push_str(", bool force_to_send");
  }
  args
}

/// The matching actual arguments when forwarding to another send function.
fn send_call_args(no_packet: bool, want_force: bool) -> String {
  let mut args = String::new();
  if !no_packet {
    args.push_str(", packet");
  }
  if want_force {
    args.push_str(", force_to_send");
  }
  args
}

/// The positional dsend parameters: one per field, plus the force flag.
pub(super) fn handle_args(p: &Packet) -> String {
  let mut args =
    p.fields.iter().map(|f| format!("{}{}", f.handle_arg_type(), f.name)).join(", ");
  if !args.is_empty() {
    args = format!(", {}", args);
  }
  if p.want_force {
    args.push_str(", bool force_to_send");
  }
  args
}

pub(super) fn send_prototype(p: &Packet) -> String {
  format!(
    "int send_{}(struct connection *pc{})",
    p.name,
    send_args(&p.name, p.no_packet, p.want_force)
  )
}
pub(super) fn lsend_prototype(p: &Packet) -> String {
  format!(
    "void lsend_{}(struct conn_list *dest{})",
    p.name,
    send_args(&p.name, p.no_packet, p.want_force)
  )
}
pub(super) fn dsend_prototype(p: &Packet) -> String {
  format!("int dsend_{}(struct connection *pc{})", p.name, handle_args(p))
}
pub(super) fn dlsend_prototype(p: &Packet) -> String {
  format!("void dlsend_{}(struct conn_list *dest{})", p.name, handle_args(p))
}

/// The struct definition for the packet. Key fields come first; an empty
/// packet gets a dummy member so the struct has a size.
pub(super) fn write_struct(cg: &mut CodeGen, p: &Packet) {
  cg.write_line(&format!("struct {} {{", p.name));
  cg.add_indent();
  let mut any = false;
  for f in p.key_fields().chain(p.other_fields()) {
    cg.write_line(&format!("{};", f.declaration()));
    any = true;
  }
  if !any {
    cg.write_line("char __dummy;\t\t\t/* to avoid malloc(0); */");
  }
  cg.remove_indent();
  cg.write_line("};");
  cg.write_line("");
}

pub(super) fn write_prototypes(cg: &mut CodeGen, p: &Packet) {
  cg.write_line(&format!("{};", send_prototype(p)));
  if p.want_lsend {
    cg.write_line(&format!("{};", lsend_prototype(p)));
  }
  if p.want_dsend {
    cg.write_line(&format!("{};", dsend_prototype(p)));
    if p.want_lsend {
      cg.write_line(&format!("{};", dlsend_prototype(p)));
    }
  }
  cg.write_line("");
}

pub(super) fn write_hash(cg: &mut CodeGen, p: &Packet, v: &Variant) {
  if v.key_fields.is_empty() {
    cg.write_line(&format!("#define hash_{} hash_const", v.name));
    cg.write_line("");
    return;
  }
  cg.write_func(&format!("static genhash_val_t hash_{}(const void *vkey)", v.name), |cg| {
    cg.write_line(&format!("const struct {0} *key = (const struct {0} *) vkey;", p.name));
    cg.write_line("");
    let expr = match v.key_fields.len() {
      1 => format!("key->{}", v.key_fields[0].name),
      2 => format!("(key->{} << 8) ^ key->{}", v.key_fields[0].name, v.key_fields[1].name),
      _ => unreachable!("more than two key fields"),
    };
    cg.write_line(&format!("return {};", expr));
  });
}

pub(super) fn write_key_cmp(cg: &mut CodeGen, p: &Packet, v: &Variant) {
  if v.key_fields.is_empty() {
    cg.write_line(&format!("#define cmp_{} cmp_const", v.name));
    cg.write_line("");
    return;
  }
  let sig = format!("static bool cmp_{}(const void *vkey1, const void *vkey2)", v.name);
  cg.write_func(&sig, |cg| {
    cg.write_line(&format!("const struct {0} *key1 = (const struct {0} *) vkey1;", p.name));
    cg.write_line(&format!("const struct {0} *key2 = (const struct {0} *) vkey2;", p.name));
    cg.write_line("");
    let cmp =
      v.key_fields.iter().map(|f| format!("key1->{0} == key2->{0}", f.name)).join(" && ");
    cg.write_line(&format!("return {};", cmp));
  });
}

pub(super) fn write_bitvector(cg: &mut CodeGen, v: &Variant) {
  cg.write_line(&format!("BV_DEFINE({}_fields, {});", v.name, v.bits()));
  cg.write_line("");
}

/// Statistics counters for one variant; only emitted under generate-stats.
pub(super) fn write_stats_decl(cg: &mut CodeGen, v: &Variant) {
  cg.write_line(&format!("static int stats_{}_sent;", v.name));
  cg.write_line(&format!("static int stats_{}_discarded;", v.name));
  if v.delta && v.bits() > 0 {
    cg.write_line(&format!("static int stats_{}_counters[{}];", v.name, v.bits()));
    let names = v.other_fields.iter().map(|f| format!("\"{}\"", f.name)).join(", ");
    cg.write_line(&format!("static char *stats_{}_names[] = {{{}}};", v.name, names));
  }
  cg.write_line("");
}

pub(super) fn write_send(cg: &mut CodeGen, p: &Packet, v: &Variant, ctx: &GenConfig) {
  let sig = format!(
    "static int send_{}(struct connection *pc{})",
    v.name,
    send_args(&p.name, v.no_packet, p.want_force)
  );
  let delta = v.delta && !v.no_packet;
  cg.write_func(&sig, |cg| {
    if !v.no_packet {
      cg.write_line(&format!("const struct {} *real_packet = packet;", p.name));
    }
    if delta {
      cg.write_line(&format!("{}_fields fields;", v.name));
      cg.write_line(&format!("struct {} *old;", p.name));
      cg.write_line("bool differ;");
      cg.write_line(&format!("struct genhash **hash = pc->phs.sent + {};", p.tag));
      let init = if p.want_force { "force_to_send" } else { "0" };
      cg.write_line(&format!("int different = {};", init));
    }
    cg.write_line(&format!("SEND_PACKET_START({});", p.tag));
    if ctx.generate_logs {
      cg.write_line("");
      cg.write_lines(&format!(
        "{}(\"{}: sending info about ({})\"{});",
        ctx.log_macro,
        v.name,
        v.keys_format(),
        v.keys_arg()
      ));
    }
    if ctx.generate_stats {
      cg.write_line("");
      cg.write_line("stats_total_sent++;");
      cg.write_line(&format!("stats_{}_sent++;", v.name));
    }
    if p.want_pre_send {
      cg.write_line("");
      cg.write_block(|cg| {
        cg.write_line(&format!("auto tmp = new {};", p.name));
        cg.write_line("");
        cg.write_line("*tmp = *packet;");
        cg.write_line(&format!("pre_send_{}(pc, tmp);", p.name));
        cg.write_line("real_packet = tmp;");
      });
    }
    if delta {
      write_delta_send_body(cg, p, v, ctx);
    } else if !v.no_packet {
      cg.write_line("");
      for f in &v.fields {
        cg.write_lines(&f.put_code(false));
      }
      cg.write_line("");
    }
    if p.want_pre_send {
      cg.write_lines(free_scratch());
    }
    if p.want_post_send {
      let arg = if v.no_packet { "NULL" } else { "real_packet" };
      cg.write_line(&format!("post_send_{}(pc, {});", p.name, arg));
    }
    cg.write_line(&format!("SEND_PACKET_END({});", p.tag));
  });
}

fn write_delta_send_body(cg: &mut CodeGen, p: &Packet, v: &Variant, ctx: &GenConfig) {
  cg.write_line("");
  cg.write("if (NULL == *hash) ");
  cg.write_block(|cg| {
    cg.write_line(&format!(
      "*hash = genhash_new_full(hash_{0}, cmp_{0}, NULL, NULL, NULL, free);",
      v.name
    ));
  });
  cg.write_line("BV_CLR_ALL(fields);");
  cg.write_line("");
  cg.write("if (!genhash_lookup(*hash, real_packet, (void **) &old)) ");
  cg.write_block(|cg| {
    cg.write_line(&format!("old = new {};", p.name));
    cg.write_line("*old = *real_packet;");
    cg.write_line("genhash_insert(*hash, old, old);");
    cg.write_line("memset(old, 0, sizeof(*old));");
    cg.write_line("different = 1;      /* Force to send. */");
  });
  cg.write_line("");
  for (i, f) in v.other_fields.iter().enumerate() {
    cg.write_lines(&f.cmp_wrapper(i, ctx));
  }
  if p.info != InfoKind::Normal {
    cg.write("if (different == 0) ");
    cg.write_block(|cg| {
      if ctx.generate_logs {
        cg.write_line(&format!("{}(\"  no change -> discard\");", ctx.log_macro));
      }
      if ctx.generate_stats {
        cg.write_line(&format!("stats_{}_discarded++;", v.name));
      }
      if p.want_pre_send {
        cg.write_lines(free_scratch());
      }
      cg.write_line("return 0;");
    });
    cg.write_line("");
  }
  cg.write_line("DIO_BV_PUT(&dout, &field_addr, fields);");
  for f in &v.key_fields {
    cg.write_lines(&f.put_code(true));
  }
  cg.write_line("");
  for (i, f) in v.other_fields.iter().enumerate() {
    cg.write_lines(&f.put_wrapper(i, &v.name, ctx));
    cg.write_line("");
  }
  cg.write_line("*old = *real_packet;");
  for tag in &p.cancel {
    cg.write_line("");
    cg.write_line(&format!("hash = pc->phs.sent + {};", tag));
    cg.write("if (NULL != *hash) ");
    cg.write_block(|cg| {
      cg.write_line("genhash_remove(*hash, real_packet);");
    });
  }
  cg.write_line("");
}

pub(super) fn write_receive(cg: &mut CodeGen, p: &Packet, v: &Variant, ctx: &GenConfig) {
  let sig = format!("static struct {} *receive_{}(struct connection *pc)", p.name, v.name);
  cg.write_func(&sig, |cg| {
    if v.delta {
      cg.write_line(&format!("{}_fields fields;", v.name));
      cg.write_line(&format!("struct {} *old;", p.name));
      cg.write_line(&format!("struct genhash **hash = pc->phs.received + {};", p.tag));
    }
    cg.write_line(&format!("RECEIVE_PACKET_START({}, real_packet);", p.name));
    let log = |cg: &mut CodeGen| {
      if ctx.generate_logs {
        cg.write_lines(&format!(
          "{}(\"{}: got info about ({})\"{});",
          ctx.log_macro,
          v.name,
          v.keys_format(),
          v.keys_arg()
        ));
      }
    };
    if v.delta {
      cg.write_line("");
      cg.write_line("DIO_BV_GET(&din, &field_addr, fields);");
      for f in &v.key_fields {
        cg.write_lines(&f.get_code(true));
      }
      log(cg);
      write_delta_receive_body(cg, p, v, ctx);
    } else {
      cg.write_line("");
      if v.fields.is_empty() {
        cg.write_line("real_packet->__dummy = 0xff;");
      } else {
        for f in &v.fields {
          cg.write_lines(&f.get_code(false));
        }
      }
      cg.write_line("");
      log(cg);
    }
    if p.want_post_recv {
      cg.write_line(&format!("post_receive_{}(pc, real_packet);", p.name));
    }
    cg.write_line("RECEIVE_PACKET_END(real_packet);");
  });
}

fn write_delta_receive_body(cg: &mut CodeGen, p: &Packet, v: &Variant, ctx: &GenConfig) {
  cg.write_line("");
  cg.write("if (NULL == *hash) ");
  cg.write_block(|cg| {
    cg.write_line(&format!(
      "*hash = genhash_new_full(hash_{0}, cmp_{0}, NULL, NULL, NULL, free);",
      v.name
    ));
  });
  cg.write_line("");
  cg.write_line("if (genhash_lookup(*hash, real_packet, (void **) &old)) {");
  cg.add_indent();
  cg.write_line("*real_packet = *old;");
  cg.remove_indent();
  cg.write("} else ");
  cg.write_block(|cg| {
    for f in &v.key_fields {
      cg.write_line(&format!("{} {1} = real_packet->{1};", f.ty.storage, f.name));
    }
    if !v.key_fields.is_empty() {
      cg.write_line("");
    }
    if ctx.generate_logs {
      cg.write_line(&format!("{}(\"  no old info\");", ctx.log_macro));
    }
    cg.write_line("memset(real_packet, 0, sizeof(*real_packet));");
    for f in &v.key_fields {
      cg.write_line(&format!("real_packet->{0} = {0};", f.name));
    }
  });
  cg.write_line("");
  for (i, f) in v.other_fields.iter().enumerate() {
    cg.write_lines(&f.get_wrapper(i, ctx));
  }
  cg.write_line("");
  cg.write_line("if (NULL == old) {");
  cg.add_indent();
  cg.write_line(&format!("old = new {};", p.name));
  cg.write_line("*old = *real_packet;");
  cg.write_line("genhash_insert(*hash, old, old);");
  cg.remove_indent();
  cg.write("} else ");
  cg.write_block(|cg| {
    cg.write_line("*old = *real_packet;");
  });
  for tag in &p.cancel {
    cg.write_line("");
    cg.write_line(&format!("hash = pc->phs.received + {};", tag));
    cg.write("if (NULL != *hash) ");
    cg.write_block(|cg| {
      cg.write_line("genhash_remove(*hash, real_packet);");
    });
  }
}

/// The public send function: validates the connection, asserts that a
/// handler was installed, and forwards to the function-pointer slot.
pub(super) fn write_packet_send(cg: &mut CodeGen, p: &Packet) {
  let (func, args) = if p.no_packet {
    ("no_packet", "")
  } else if p.want_force {
    ("force_to_send", ", packet, force_to_send")
  } else {
    ("packet", ", packet")
  };
  cg.write_func(&send_prototype(p), |cg| {
    cg.write("if (!pc->used) ");
    cg.write_block(|cg| {
      cg.write_line("qCritical(\"WARNING: trying to send data to the closed connection %s\",");
      cg.write_line("          conn_description(pc));");
      cg.write_line("return -1;");
    });
    cg.write_line(&format!(
      "fc_assert_ret_val_msg(pc->phs.handlers->send[{}].{} != NULL, -1,",
      p.tag, func
    ));
    cg.write_line(&format!("                      \"Handler for {} not installed\");", p.tag));
    cg.write_line(&format!("return pc->phs.handlers->send[{}].{}(pc{});", p.tag, func, args));
  });
}

pub(super) fn write_lsend(cg: &mut CodeGen, p: &Packet) {
  if !p.want_lsend {
    return;
  }
  cg.write_func(&lsend_prototype(p), |cg| {
    cg.write_line("conn_list_iterate(dest, pconn) {");
    cg.add_indent();
    cg.write_line(&format!(
      "send_{}(pconn{});",
      p.name,
      send_call_args(p.no_packet, p.want_force)
    ));
    cg.remove_indent();
    cg.write_line("} conn_list_iterate_end;");
  });
}

pub(super) fn write_dsend(cg: &mut CodeGen, p: &Packet) {
  if !p.want_dsend {
    return;
  }
  let force = if p.want_force { ", force_to_send" } else { "" };
  cg.write_func(&dsend_prototype(p), |cg| {
    cg.write_line(&format!("struct {} packet, *real_packet = &packet;", p.name));
    cg.write_line("");
    for f in &p.fields {
      cg.write_lines(&f.fill_code());
    }
    cg.write_line("");
    cg.write_line(&format!("return send_{}(pc, real_packet{});", p.name, force));
  });
}

pub(super) fn write_dlsend(cg: &mut CodeGen, p: &Packet) {
  if !(p.want_dsend && p.want_lsend) {
    return;
  }
  let force = if p.want_force { ", force_to_send" } else { "" };
  cg.write_func(&dlsend_prototype(p), |cg| {
    cg.write_line(&format!("struct {} packet, *real_packet = &packet;", p.name));
    cg.write_line("");
    for f in &p.fields {
      cg.write_lines(&f.fill_code());
    }
    cg.write_line("");
    cg.write_line(&format!("lsend_{}(dest, real_packet{});", p.name, force));
  });
}

/// Hash, key equality, bitvector, receive, and send for every variant.
pub(super) fn write_variants(cg: &mut CodeGen, p: &Packet, ctx: &GenConfig) {
  for v in &p.variants {
    if v.delta {
      write_hash(cg, p, v);
      write_key_cmp(cg, p, v);
      write_bitvector(cg, v);
    }
    write_receive(cg, p, v, ctx);
    write_send(cg, p, v, ctx);
  }
}
