//! Emitters for everything that is keyed by packet type rather than by
//! packet: the type enum, the name and flag tables, the handler installers,
//! and the delta statistics plumbing.

use super::{variant::caps_of, InfoKind, Packet, Variant};
use crate::{gen::CodeGen, GenConfig};

/// Packets sorted by type number. Numbers are unique (the parser rejects
/// duplicates), so this is a total order.
fn by_number(packets: &[Packet]) -> Vec<&Packet> {
  let mut sorted: Vec<&Packet> = packets.iter().collect();
  sorted.sort_by_key(|p| p.number);
  sorted
}

/// The sorted set of capabilities referenced anywhere in the file.
pub(super) fn all_caps(packets: &[Packet]) -> Vec<String> {
  packets
    .iter()
    .flat_map(|p| caps_of(&p.fields))
    .collect::<std::collections::BTreeSet<_>>()
    .into_iter()
    .collect()
}

/// The packet type enum. Tag numbers are indices, so gaps stay unassigned
/// and `PACKET_LAST` terminates the range.
pub(super) fn write_enum(cg: &mut CodeGen, packets: &[Packet]) {
  cg.write_line("enum packet_type {");
  cg.add_indent();
  let mut last: i32 = -1;
  for p in by_number(packets) {
    let n = i32::from(p.number);
    let line = if n != last + 1 {
      format!("{} = {},", p.tag, n)
    } else {
      format!("{},", p.tag)
    };
    if n % 10 == 0 {
      cg.write_line(&format!("{:<38} /* {} */", line, n));
    } else {
      cg.write_line(&line);
    }
    last = n;
  }
  cg.write_line("");
  cg.write_line("PACKET_LAST  /* leave this last */");
  cg.remove_indent();
  cg.write_line("};");
  cg.write_line("");
}

pub(super) fn write_packet_name(cg: &mut CodeGen, packets: &[Packet]) {
  cg.write_func("const char *packet_name(enum packet_type type)", |cg| {
    cg.write_line("static const char *const names[PACKET_LAST] = {");
    cg.add_indent();
    let mut last: i32 = -1;
    for p in by_number(packets) {
      let n = i32::from(p.number);
      for _ in last + 1..n {
        cg.write_line("\"unknown\",");
      }
      cg.write_line(&format!("\"{}\",", p.tag));
      last = n;
    }
    cg.remove_indent();
    cg.write_line("};");
    cg.write_line("");
    cg.write_line("return (type < PACKET_LAST ? names[type] : \"unknown\");");
  });
}

pub(super) fn write_has_game_info_flag(cg: &mut CodeGen, packets: &[Packet]) {
  cg.write_func("bool packet_has_game_info_flag(enum packet_type type)", |cg| {
    cg.write_line("static const bool flag[PACKET_LAST] = {");
    cg.add_indent();
    let mut last: i32 = -1;
    for p in by_number(packets) {
      let n = i32::from(p.number);
      for _ in last + 1..n {
        cg.write_line("false,");
      }
      let value = if p.info == InfoKind::GameInfo { "true" } else { "false" };
      cg.write_line(&format!("{}, /* {} */", value, p.tag));
      last = n;
    }
    cg.remove_indent();
    cg.write_line("};");
    cg.write_line("");
    cg.write_line("return (type < PACKET_LAST ? flag[type] : false);");
  });
}

/// The capability string the two peers compare at connect time: every
/// capability any field refers to, space separated.
pub(super) fn write_functional_capability(cg: &mut CodeGen, packets: &[Packet]) {
  cg.write_line("");
  cg.write_line(&format!(
    "extern \"C\" const char *const packet_functional_capability = \"{}\";",
    all_caps(packets).join(" ")
  ));
  cg.write_line("");
}

/// Hash and compare helpers for variants without key fields.
pub(super) fn write_const_helpers(cg: &mut CodeGen) {
  cg.write_func("static genhash_val_t hash_const(const void *vkey)", |cg| {
    cg.write_line("return 0;");
  });
  cg.write_func("static bool cmp_const(const void *vkey1, const void *vkey2)", |cg| {
    cg.write_line("return true;");
  });
}

pub(super) fn write_stats_report(cg: &mut CodeGen, packets: &[Packet], ctx: &GenConfig) {
  if !ctx.generate_stats {
    cg.write_line("void delta_stats_report() {}");
    cg.write_line("");
    return;
  }
  cg.write_func("void delta_stats_report()", |cg| {
    cg.write_line("int i;");
    for p in packets {
      for v in &p.variants {
        cg.write_line("");
        cg.write_line(&format!("if (stats_{0}_sent > 0", v.name));
        cg.write_line(&format!("    && stats_{0}_discarded != stats_{0}_sent) {{", v.name));
        cg.add_indent();
        cg.write_line(&format!("log_test(\"{} %d out of %d got discarded\",", v.name));
        cg.write_line(&format!("  stats_{0}_discarded, stats_{0}_sent);", v.name));
        if v.delta && v.bits() > 0 {
          cg.write_line(&format!("for (i = 0; i < {}; i++) {{", v.bits()));
          cg.add_indent();
          cg.write_line(&format!("if (stats_{}_counters[i] > 0) {{", v.name));
          cg.add_indent();
          cg.write_line("log_test(\"  %4d / %4d: %2d = %s\",");
          cg.write_line(&format!("  stats_{}_counters[i],", v.name));
          cg.write_line(&format!("  (stats_{0}_sent - stats_{0}_discarded),", v.name));
          cg.write_line(&format!("  i, stats_{}_names[i]);", v.name));
          cg.remove_indent();
          cg.write_line("}");
          cg.remove_indent();
          cg.write_line("}");
        }
        cg.remove_indent();
        cg.write_line("}");
      }
    }
  });
}

pub(super) fn write_stats_reset(cg: &mut CodeGen, packets: &[Packet], ctx: &GenConfig) {
  if !ctx.generate_stats {
    cg.write_line("void delta_stats_reset() {}");
    cg.write_line("");
    return;
  }
  cg.write_func("void delta_stats_reset()", |cg| {
    for p in packets {
      for v in &p.variants {
        cg.write_line(&format!("stats_{}_sent = 0;", v.name));
        cg.write_line(&format!("stats_{}_discarded = 0;", v.name));
        if v.delta && v.bits() > 0 {
          cg.write_line(&format!(
            "memset(stats_{0}_counters, 0, sizeof(stats_{0}_counters));",
            v.name
          ));
        }
      }
    }
  });
}

fn send_handler(p: &Packet, v: &Variant) -> String {
  if v.no_packet {
    format!(
      "phandlers->send[{}].no_packet = (int(*)(struct connection *)) send_{};",
      p.tag, v.name
    )
  } else if p.want_force {
    format!(
      "phandlers->send[{}].force_to_send = (int(*)(struct connection *, const void *, bool)) send_{};",
      p.tag, v.name
    )
  } else {
    format!(
      "phandlers->send[{}].packet = (int(*)(struct connection *, const void *)) send_{};",
      p.tag, v.name
    )
  }
}

fn receive_handler(p: &Packet, v: &Variant) -> String {
  format!("phandlers->receive[{}] = (void *(*)(struct connection *)) receive_{};", p.tag, v.name)
}

/// Installs handlers for every packet with exactly one variant. Packets with
/// more variants stay uninstalled until the capability string is known.
pub(super) fn write_fill_initial(cg: &mut CodeGen, packets: &[Packet]) {
  cg.write_func("void packet_handlers_fill_initial(struct packet_handlers *phandlers)", |cg| {
    for cap in all_caps(packets) {
      cg.write_line(&format!("fc_assert_msg(has_capability(\"{}\", our_capability),", cap));
      cg.write_line(&format!(
        "              \"Packets have support for unknown '{}' capability!\");",
        cap
      ));
    }

    let single: Vec<&Packet> = packets.iter().filter(|p| p.variants.len() == 1).collect();
    for p in single.iter().filter(|p| p.dirs.unrestricted()) {
      cg.write_line(&send_handler(p, &p.variants[0]));
      cg.write_line(&receive_handler(p, &p.variants[0]));
    }
    cg.write_line("if (is_server()) {");
    cg.add_indent();
    for p in single.iter().filter(|p| p.dirs.sc_only()) {
      cg.write_line(&send_handler(p, &p.variants[0]));
    }
    for p in single.iter().filter(|p| p.dirs.cs_only()) {
      cg.write_line(&receive_handler(p, &p.variants[0]));
    }
    cg.remove_indent();
    cg.write("} else ");
    cg.write_block(|cg| {
      for p in single.iter().filter(|p| p.dirs.cs_only()) {
        cg.write_line(&send_handler(p, &p.variants[0]));
      }
      for p in single.iter().filter(|p| p.dirs.sc_only()) {
        cg.write_line(&receive_handler(p, &p.variants[0]));
      }
    });
  });
}

/// One `if`/`else if` chain over the variants of a packet, installing the
/// requested handler slots, with a critical log when nothing matched.
fn write_variant_chain(cg: &mut CodeGen, p: &Packet, send: bool, recv: bool, ctx: &GenConfig) {
  for v in &p.variants {
    cg.write_line(&format!("if ({}) {{", v.condition));
    cg.add_indent();
    if ctx.generate_logs {
      cg.write_line(&format!(
        "{}(\"{}: using variant={} cap=%s\", capability);",
        ctx.log_macro, p.tag, v.no
      ));
    }
    if send {
      cg.write_line(&send_handler(p, v));
    }
    if recv {
      cg.write_line(&receive_handler(p, v));
    }
    cg.remove_indent();
    cg.write("} else ");
  }
  cg.write_block(|cg| {
    cg.write_line(&format!("qCritical(\"Unknown {} variant for cap %s\", capability);", p.tag));
  });
}

/// Chooses among the variants of every multi-variant packet by evaluating
/// the activation predicates against the negotiated capability string.
pub(super) fn write_fill_capability(cg: &mut CodeGen, packets: &[Packet], ctx: &GenConfig) {
  cg.write_line("void packet_handlers_fill_capability(struct packet_handlers *phandlers,");
  cg.write_func("                                     const char *capability)", |cg| {
    let multi: Vec<&Packet> = packets.iter().filter(|p| p.variants.len() > 1).collect();
    for p in multi.iter().filter(|p| p.dirs.unrestricted()) {
      write_variant_chain(cg, p, true, true, ctx);
    }
    let sc: Vec<&Packet> = multi.iter().copied().filter(|p| p.dirs.sc_only()).collect();
    let cs: Vec<&Packet> = multi.iter().copied().filter(|p| p.dirs.cs_only()).collect();
    if !sc.is_empty() || !cs.is_empty() {
      cg.write_line("if (is_server()) {");
      cg.add_indent();
      for p in &sc {
        write_variant_chain(cg, p, true, false, ctx);
      }
      for p in &cs {
        write_variant_chain(cg, p, false, true, ctx);
      }
      cg.remove_indent();
      cg.write("} else ");
      cg.write_block(|cg| {
        for p in &cs {
          write_variant_chain(cg, p, true, false, ctx);
        }
        for p in &sc {
          write_variant_chain(cg, p, false, true, ctx);
        }
      });
    }
  });
}
