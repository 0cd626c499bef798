//! Assembles the generated files: one header/source pair per mode.

use super::{dispatch, gen, Packet};
use crate::{gen::CodeGen, GenConfig};
use itertools::Itertools;

fn write_disclaimer(cg: &mut CodeGen, input: &str) {
  cg.write_line("");
  cg.write_line(&format!(" /{}", "*".repeat(76)));
  cg.write_line(&format!(" * {:^74}*", "THIS FILE WAS GENERATED"));
  cg.write_line(&format!(" * {:<74}*", "Script: pk_cli"));
  cg.write_line(&format!(" * {:<74}*", format!("Input:  {}", input)));
  cg.write_line(&format!(" * {:^74}*", "DO NOT CHANGE THIS FILE"));
  cg.write_line(&format!(" {}/", "*".repeat(76)));
}

/// packets_gen.h: structs, the type enum, and the send prototypes.
pub(crate) fn common_header(packets: &[Packet], _ctx: &GenConfig, input: &str) -> String {
  let mut cg = CodeGen::new();
  write_disclaimer(&mut cg, input);
  cg.write_line("");
  cg.write_line("#pragma once");
  cg.write_line("");
  cg.write_line("// common");
  cg.write_line("#include \"actions.h\"");
  cg.write_line("#include \"disaster.h\"");
  cg.write_line("#include \"unit.h\"");
  cg.write_line("");
  cg.write_line("// common/aicore");
  cg.write_line("#include \"cm.h\"");
  cg.write_line("");

  for p in packets {
    gen::write_struct(&mut cg, p);
  }
  dispatch::write_enum(&mut cg, packets);
  for p in packets {
    gen::write_prototypes(&mut cg, p);
  }
  cg.write_line("void delta_stats_report();");
  cg.write_line("void delta_stats_reset();");
  cg.into_output()
}

/// packets_gen.cpp: every codec, helper, and installer.
pub(crate) fn common_source(packets: &[Packet], ctx: &GenConfig, input: &str) -> String {
  let mut cg = CodeGen::new();
  write_disclaimer(&mut cg, input);
  cg.write_line("");
  cg.write_line("#include \"packets.h\"");
  cg.write_line("");
  cg.write_line("// utility");
  cg.write_line("#include \"bitvector.h\"");
  cg.write_line("#include \"capability.h\"");
  cg.write_line("#include \"fc_config.h\"");
  cg.write_line("#include \"genhash.h\"");
  cg.write_line("#include \"log.h\"");
  cg.write_line("#include \"support.h\"");
  cg.write_line("");
  cg.write_line("// common");
  cg.write_line("#include \"capstr.h\"");
  cg.write_line("#include \"connection.h\"");
  cg.write_line("#include \"dataio.h\"");
  cg.write_line("#include \"game.h\"");
  cg.write_line("");
  cg.write_line("#include <string.h>");

  dispatch::write_functional_capability(&mut cg, packets);
  dispatch::write_const_helpers(&mut cg);

  if ctx.generate_stats {
    cg.write_line("static int stats_total_sent;");
    cg.write_line("");
    for p in packets {
      for v in &p.variants {
        gen::write_stats_decl(&mut cg, v);
      }
    }
  }
  dispatch::write_stats_report(&mut cg, packets, ctx);
  dispatch::write_stats_reset(&mut cg, packets, ctx);

  dispatch::write_packet_name(&mut cg, packets);
  dispatch::write_has_game_info_flag(&mut cg, packets);

  for p in packets {
    gen::write_variants(&mut cg, p, ctx);
    gen::write_packet_send(&mut cg, p);
    gen::write_lsend(&mut cg, p);
    gen::write_dsend(&mut cg, p);
    gen::write_dlsend(&mut cg, p);
  }

  dispatch::write_fill_initial(&mut cg, packets);
  dispatch::write_fill_capability(&mut cg, packets, ctx);
  cg.into_output()
}

/// packhand_gen.h: handler prototypes for every server-to-client packet.
pub(crate) fn client_header(packets: &[Packet], _ctx: &GenConfig, input: &str) -> String {
  let mut cg = CodeGen::new();
  write_disclaimer(&mut cg, input);
  cg.write_line("");
  cg.write_line("#pragma once");
  cg.write_line("");
  cg.write_line("// utility");
  cg.write_line("#include \"shared.h\"");
  cg.write_line("");
  cg.write_line("// common");
  cg.write_line("#include \"packets.h\"");
  cg.write_line("");
  cg.write_line("bool client_handle_packet(enum packet_type type, const void *packet);");
  cg.write_line("");
  for p in packets.iter().filter(|p| p.dirs.sc) {
    if p.handle_via_packet {
      cg.write_line(&format!("struct {};", p.name));
      cg.write_line(&format!(
        "void handle_{}(const {} *packet);",
        p.short_name(),
        p.name
      ));
    } else {
      let args =
        p.fields.iter().map(|f| format!("{}{}", f.handle_arg_type(), f.name)).join(", ");
      cg.write_line(&format!("void handle_{}({});", p.short_name(), args));
    }
  }
  cg.into_output()
}

/// packhand_gen.cpp: the switch routing sc packets to their handlers.
pub(crate) fn client_source(packets: &[Packet], _ctx: &GenConfig, input: &str) -> String {
  let mut cg = CodeGen::new();
  write_disclaimer(&mut cg, input);
  cg.write_line("");
  cg.write_line("#include \"packhand_gen.h\"");
  cg.write_line("");
  cg.write_line("// utility");
  cg.write_line("#include \"fc_config.h\"");
  cg.write_line("");
  cg.write_line("// common");
  cg.write_line("#include \"packets.h\"");
  cg.write_line("");
  cg.write_func("bool client_handle_packet(enum packet_type type, const void *packet)", |cg| {
    cg.write_line("switch (type) {");
    for p in packets.iter().filter(|p| p.dirs.sc && !p.no_handle) {
      let cast = format!("static_cast<const {} *>(packet)", p.name);
      let args = if p.handle_via_packet {
        cast
      } else if p.fields.is_empty() {
        String::new()
      } else {
        format!(
          "\n  {}",
          p.fields.iter().map(|f| format!("{}->{}", cast, f.name)).join(",\n  ")
        )
      };
      cg.write_line(&format!("case {}:", p.tag));
      cg.add_indent();
      cg.write_lines(&format!("handle_{}({});", p.short_name(), args));
      cg.write_line("return true;");
      cg.remove_indent();
      cg.write_line("");
    }
    cg.write_line("default:");
    cg.add_indent();
    cg.write_line("return false;");
    cg.remove_indent();
    cg.write_line("}");
  });
  cg.into_output()
}

/// hand_gen.h: handler prototypes for every client-to-server packet.
pub(crate) fn server_header(packets: &[Packet], _ctx: &GenConfig, input: &str) -> String {
  let mut cg = CodeGen::new();
  write_disclaimer(&mut cg, input);
  cg.write_line("");
  cg.write_line("#pragma once");
  cg.write_line("");
  cg.write_line("// utility");
  cg.write_line("#include \"shared.h\"");
  cg.write_line("");
  cg.write_line("// common");
  cg.write_line("#include \"fc_types.h\"");
  cg.write_line("#include \"packets.h\"");
  cg.write_line("");
  cg.write_line("struct connection;");
  cg.write_line("");
  cg.write_line("bool server_handle_packet(enum packet_type type, const void *packet,");
  cg.write_line("                          struct player *pplayer, struct connection *pconn);");
  cg.write_line("");
  for p in packets.iter().filter(|p| p.dirs.cs && !p.no_handle) {
    let short = p.short_name();
    if p.handle_via_packet {
      cg.write_line(&format!("struct {};", p.name));
      let first = if p.handle_per_conn { "connection *pc" } else { "player *pc" };
      cg.write_line(&format!("void handle_{}({}, const {} *packet);", short, first, p.name));
    } else {
      let mut args =
        p.fields.iter().map(|f| format!("{}{}", f.handle_arg_type(), f.name)).join(", ");
      if !args.is_empty() {
        args = format!(", {}", args);
      }
      if p.handle_per_conn {
        cg.write_line(&format!("void handle_{}(connection *pc{});", short, args));
      } else {
        cg.write_line(&format!("void handle_{}(player *pplayer{});", short, args));
      }
    }
  }
  cg.into_output()
}

/// hand_gen.cpp: the switch routing cs packets to their handlers.
pub(crate) fn server_source(packets: &[Packet], _ctx: &GenConfig, input: &str) -> String {
  let mut cg = CodeGen::new();
  write_disclaimer(&mut cg, input);
  cg.write_line("");
  cg.write_line("#include \"hand_gen.h\"");
  cg.write_line("");
  cg.write_line("// utility");
  cg.write_line("#include \"fc_config.h\"");
  cg.write_line("");
  cg.write_line("// common");
  cg.write_line("#include \"packets.h\"");
  cg.write_line("");
  cg.write_line("bool server_handle_packet(enum packet_type type, const void *packet,");
  cg.write_func("                          struct player *pplayer, struct connection *pconn)", |cg| {
    cg.write_line("switch (type) {");
    for p in packets.iter().filter(|p| p.dirs.cs && !p.no_handle) {
      let conn = if p.handle_per_conn { "pconn" } else { "pplayer" };
      let args = if p.handle_via_packet {
        format!("{}, (static_cast<const struct {} *>(packet))", conn, p.name)
      } else {
        let fields = p
          .fields
          .iter()
          .map(|f| {
            let access = format!("((const struct {} *)packet)->{}", p.name, f.name);
            if f.ty.wire == super::WireKind::Worklist {
              format!("&{}", access)
            } else {
              access
            }
          })
          .join(",\n  ");
        if fields.is_empty() {
          conn.to_string()
        } else {
          format!("{},\n  {}", conn, fields)
        }
      };
      cg.write_line(&format!("case {}:", p.tag));
      cg.add_indent();
      cg.write_lines(&format!("handle_{}({});", p.short_name(), args));
      cg.write_line("return true;");
      cg.remove_indent();
      cg.write_line("");
    }
    cg.write_line("default:");
    cg.add_indent();
    cg.write_line("return false;");
    cg.remove_indent();
    cg.write_line("}");
  });
  cg.into_output()
}
