use super::{gen, parse, CapGate, InfoKind, Packet, ParseError, WireKind};
use crate::{gen::CodeGen, GenConfig};
use pretty_assertions::assert_eq;

const TYPES: &str = "type UINT8 = uint8(int)\n\
                     type UINT16 = uint16(int)\n\
                     type BOOL = bool(bool)\n\
                     type STRING = string(char)\n";

fn parse_one(body: &str) -> Packet {
  let input = format!("{}{}", TYPES, body);
  let mut packets = parse(&input).unwrap();
  assert_eq!(packets.len(), 1);
  packets.remove(0)
}

fn parse_err(body: &str) -> ParseError {
  let input = format!("{}{}", TYPES, body);
  parse(&input).unwrap_err()
}

/// Switches with the generated log calls off, so the emitted text under test
/// stays small.
fn quiet() -> GenConfig { GenConfig { generate_logs: false, ..GenConfig::default() } }

fn send_code(p: &Packet, ctx: &GenConfig) -> String {
  let mut cg = CodeGen::new();
  gen::write_send(&mut cg, p, &p.variants[0], ctx);
  cg.into_output()
}

fn receive_code(p: &Packet, ctx: &GenConfig) -> String {
  let mut cg = CodeGen::new();
  gen::write_receive(&mut cg, p, &p.variants[0], ctx);
  cg.into_output()
}

#[test]
fn aliases_resolve_transitively() {
  let p = parse_one(
    "type COORD = XYVAL\n\
     type XYVAL = sint16(int)\n\
     PACKET_MOVE = 10; cs\n\
       COORD x, y; key\n\
     end\n",
  );
  assert_eq!(p.fields.len(), 2);
  assert_eq!(p.fields[0].ty.wire, WireKind::Plain("sint16".into()));
  assert_eq!(p.fields[0].ty.storage, "int");
  assert!(p.fields[0].is_key && p.fields[1].is_key);
}

#[test]
fn sizes_expand_declared_and_used() {
  let p = parse_one(
    "PACKET_FOO = 10; sc\n\
       UINT8(int) count;\n\
       UINT8(int) items[MAX_ITEMS:count]; diff\n\
       UINT8(int) grid[GRID_W][GRID_H];\n\
     end\n",
  );
  let items = &p.fields[1];
  assert_eq!(items.sizes[0].declared, "MAX_ITEMS");
  assert_eq!(items.sizes[0].used, "real_packet->count");
  assert_eq!(items.sizes[0].old, "old->count");
  assert!(items.diff);
  let grid = &p.fields[2];
  assert_eq!(grid.rank(), 2);
  assert_eq!(grid.sizes[1].declared, "GRID_H");
  assert_eq!(grid.sizes[1].used, "GRID_H");
}

#[test]
fn float_factor_comes_from_the_wire_kind() {
  let p = parse_one(
    "PACKET_FOO = 10; sc\n\
       ufloat10000(float) output;\n\
     end\n",
  );
  assert_eq!(p.fields[0].ty.wire, WireKind::Plain("ufloat".into()));
  assert_eq!(p.fields[0].ty.float_factor, Some(10000));
  let send = send_code(&p, &quiet());
  assert!(send.contains("DIO_PUT(ufloat, &dout, &field_addr, real_packet->output, 10000);"));
  let recv = receive_code(&p, &quiet());
  assert!(recv.contains("DIO_GET(ufloat, &din, &field_addr, &real_packet->output, 10000)"));
}

#[test]
fn missing_end_is_an_error() {
  assert_eq!(
    parse_err("PACKET_FOO = 1; sc\n  UINT8(int) a;\n"),
    ParseError::MissingEnd
  );
}

#[test]
fn unknown_flags_are_errors() {
  assert!(matches!(
    parse_err("PACKET_FOO = 1; sc, frobnicate\nend\n"),
    ParseError::UnknownFlag { flag, .. } if flag == "frobnicate"
  ));
  assert!(matches!(
    parse_err("PACKET_FOO = 1; sc\n  UINT8(int) a; shiny\nend\n"),
    ParseError::UnknownFlag { flag, .. } if flag == "shiny"
  ));
}

#[test]
fn duplicate_tag_numbers_are_errors() {
  let err = parse_err(
    "PACKET_A = 3; sc\nend\n\
     PACKET_B = 3; sc\nend\n",
  );
  assert_eq!(
    err,
    ParseError::DuplicateNumber { number: 3, first: "PACKET_A".into(), second: "PACKET_B".into() }
  );
}

#[test]
fn field_line_needs_a_semicolon() {
  assert!(matches!(
    parse_err("PACKET_FOO = 1; sc\n  UINT8(int) a\nend\n"),
    ParseError::Syntax { .. }
  ));
}

#[test]
fn both_cap_flags_on_one_field_is_an_error() {
  assert!(matches!(
    parse_err("PACKET_FOO = 1; sc\n  UINT8(int) a; add-cap(X), remove-cap(Y)\nend\n"),
    ParseError::Syntax { .. }
  ));
}

#[test]
fn three_key_fields_are_refused() {
  assert!(matches!(
    parse_err("PACKET_FOO = 1; sc\n  UINT8(int) a, b, c; key\nend\n"),
    ParseError::Syntax { .. }
  ));
}

#[test]
fn alias_cycles_are_errors() {
  assert!(matches!(
    parse_err("type A = B\ntype B = A\nPACKET_FOO = 1; sc\n  A x;\nend\n"),
    ParseError::AliasCycle { .. }
  ));
}

#[test]
fn unresolved_types_must_match_wire_storage() {
  assert!(matches!(
    parse_err("PACKET_FOO = 1; sc\n  notatype a;\nend\n"),
    ParseError::Syntax { .. }
  ));
}

#[test]
fn empty_packet_forces_no_packet_and_no_delta() {
  let p = parse_one("PACKET_PING = 8; sc\nend\n");
  assert!(p.no_packet);
  assert!(!p.delta);
  assert_eq!(p.variants.len(), 1);
  assert!(p.variants[0].no_packet);

  let mut cg = CodeGen::new();
  gen::write_struct(&mut cg, &p);
  let out = cg.into_output();
  assert!(out.contains("char __dummy;"));

  // No packet argument anywhere.
  let send = send_code(&p, &quiet());
  assert!(send.contains("static int send_packet_ping_100(struct connection *pc)\n"));
}

#[test]
fn dsend_for_an_empty_packet_is_an_error() {
  assert!(matches!(
    parse_err("PACKET_PING = 8; sc, dsend\nend\n"),
    ParseError::Syntax { .. }
  ));
}

#[test]
fn big_and_ruleset_packets_handle_via_packet() {
  let p = parse_one(
    "PACKET_FOO = 1; sc\n\
       UINT8(int) a, b, c, d, e, f;\n\
     end\n",
  );
  assert!(p.handle_via_packet);

  let p = parse_one("PACKET_RULESET_UNIT = 2; sc\n  UINT8(int) a;\nend\n");
  assert!(p.handle_via_packet);

  let p = parse_one("PACKET_FOO = 3; sc\n  UINT8(int) a;\nend\n");
  assert!(!p.handle_via_packet);
}

#[test]
fn capability_subsets_expand_in_sorted_bitmask_order() {
  let p = parse_one(
    "PACKET_FOO = 2; sc\n\
       UINT8(int) a; add-cap(X)\n\
       UINT8(int) b;\n\
     end\n",
  );
  assert_eq!(p.variants.len(), 2);
  let v0 = &p.variants[0];
  let v1 = &p.variants[1];
  assert_eq!(v0.no, 100);
  assert_eq!(v0.condition, "!has_capability(\"X\", capability)");
  assert_eq!(v0.fields.iter().map(|f| &f.name).collect::<Vec<_>>(), ["b"]);
  assert_eq!(v1.no, 101);
  assert_eq!(v1.condition, "has_capability(\"X\", capability)");
  assert_eq!(v1.fields.iter().map(|f| &f.name).collect::<Vec<_>>(), ["a", "b"]);
}

#[test]
fn two_capabilities_give_four_variants() {
  let p = parse_one(
    "PACKET_FOO = 2; sc\n\
       UINT8(int) a; add-cap(zulu)\n\
       UINT8(int) b; remove-cap(alpha)\n\
       UINT8(int) c;\n\
     end\n",
  );
  assert_eq!(p.variants.len(), 4);
  // Sorted cap order is [alpha, zulu]; bit 0 is alpha, bit 1 is zulu.
  let names: Vec<Vec<&String>> =
    p.variants.iter().map(|v| v.fields.iter().map(|f| &f.name).collect()).collect();
  assert_eq!(names[0], vec!["b", "c"]); // neither negotiated
  assert_eq!(names[1], vec!["c"]); // alpha only
  assert_eq!(names[2], vec!["a", "b", "c"]); // zulu only
  assert_eq!(names[3], vec!["a", "c"]); // both
  assert_eq!(
    p.variants[2].condition,
    "has_capability(\"zulu\", capability) && !has_capability(\"alpha\", capability)"
  );
  for (i, v) in p.variants.iter().enumerate() {
    assert_eq!(v.no, 100 + i);
    let pos: std::collections::BTreeSet<_> = v.poscaps.iter().collect();
    let neg: std::collections::BTreeSet<_> = v.negcaps.iter().collect();
    assert!(pos.is_disjoint(&neg));
  }
}

#[test]
fn hash_covers_zero_one_and_two_keys() {
  let none = parse_one("PACKET_FOO = 1; sc\n  UINT8(int) a;\nend\n");
  let mut cg = CodeGen::new();
  gen::write_hash(&mut cg, &none, &none.variants[0]);
  assert_eq!(cg.into_output(), "#define hash_packet_foo_100 hash_const\n\n");

  let one = parse_one("PACKET_FOO = 1; sc\n  UINT8(int) x; key\n  UINT8(int) z;\nend\n");
  let mut cg = CodeGen::new();
  gen::write_hash(&mut cg, &one, &one.variants[0]);
  assert!(cg.into_output().contains("return key->x;"));

  let two = parse_one(
    "PACKET_FOO = 3; sc\n\
       UINT8(int) x; key\n\
       UINT8(int) y; key\n\
       UINT8(int) z;\n\
     end\n",
  );
  let mut cg = CodeGen::new();
  gen::write_hash(&mut cg, &two, &two.variants[0]);
  let expected = concat!(
    "static genhash_val_t hash_packet_foo_100(const void *vkey)\n",
    "{\n",
    "  const struct packet_foo *key = (const struct packet_foo *) vkey;\n",
    "\n",
    "  return (key->x << 8) ^ key->y;\n",
    "}\n",
    "\n",
  );
  assert_eq!(cg.into_output(), expected);
}

#[test]
fn key_equality_compares_every_key() {
  let p = parse_one(
    "PACKET_FOO = 3; sc\n\
       UINT8(int) x; key\n\
       UINT8(int) y; key\n\
       UINT8(int) z;\n\
     end\n",
  );
  let mut cg = CodeGen::new();
  gen::write_key_cmp(&mut cg, &p, &p.variants[0]);
  assert!(cg.into_output().contains("return key1->x == key2->x && key1->y == key2->y;"));
}

#[test]
fn bools_fold_into_the_header() {
  let p = parse_one("PACKET_FOO = 4; sc\n  BOOL alive;\nend\n");
  let ctx = quiet();
  let send = send_code(&p, &ctx);
  assert!(send.contains("if (real_packet->alive) {"));
  assert!(send.contains("BV_SET(fields, 0);"));
  assert!(send.contains("/* field 0 is folded into the header */"));
  assert!(!send.contains("DIO_PUT(bool, &dout, &field_addr, real_packet->alive)"));

  let recv = receive_code(&p, &ctx);
  assert!(recv.contains("real_packet->alive = BV_ISSET(fields, 0);"));
  assert!(!recv.contains("DIO_GET(bool"));

  // With the switch off, the bool is an ordinary delta field.
  let ctx = GenConfig { fold_bool_into_header: false, ..quiet() };
  let send = send_code(&p, &ctx);
  assert!(send.contains("DIO_PUT(bool, &dout, &field_addr, real_packet->alive);"));
}

#[test]
fn bitvector_width_matches_the_non_key_fields() {
  let p = parse_one(
    "PACKET_FOO = 4; sc\n\
       UINT8(int) id; key\n\
       UINT8(int) a, b, c;\n\
     end\n",
  );
  assert_eq!(p.variants[0].bits(), 3);
  let mut cg = CodeGen::new();
  gen::write_bitvector(&mut cg, &p.variants[0]);
  assert_eq!(cg.into_output(), "BV_DEFINE(packet_foo_100_fields, 3);\n\n");

  // Bit i belongs to other_fields[i] on both sides.
  let send = send_code(&p, &quiet());
  let b_cmp = send.find("differ = (old->b != real_packet->b);").unwrap();
  let b_bit = send.find("BV_SET(fields, 1);").unwrap();
  assert!(b_cmp < b_bit);
  let recv = receive_code(&p, &quiet());
  assert!(recv.contains("if (BV_ISSET(fields, 1)) {"));
}

#[test]
fn diff_arrays_use_the_sentinel_stream() {
  let p = parse_one("PACKET_FOO = 5; sc\n  UINT8(int) a[10]; diff\nend\n");
  let send = send_code(&p, &quiet());
  assert!(send.contains("fc_assert(10 < 255);"));
  assert!(send.contains("if (old->a[i] != real_packet->a[i]) {"));
  assert!(send.contains("DIO_PUT(uint8, &dout, &field_addr, i);"));
  assert!(send.contains("DIO_PUT(uint8, &dout, &field_addr, 255);"));

  let recv = receive_code(&p, &quiet());
  assert!(recv.contains("if (i == 255) {"));
  assert!(recv.contains("if (i >= 10) {"));
  assert!(recv.contains("\"(> 10) in array diff\""));
}

#[test]
fn non_diff_arrays_check_for_truncation() {
  let p = parse_one(
    "PACKET_FOO = 5; sc\n\
       UINT8(int) len;\n\
       UINT8(int) a[MAX:len];\n\
     end\n",
  );
  let recv = receive_code(&p, &quiet());
  assert!(recv.contains("if (real_packet->len > MAX) {"));
  assert!(recv.contains("RECEIVE_PACKET_FIELD_ERROR(a, \": truncation array\");"));
}

#[test]
fn cancel_set_evicts_both_snapshot_tables() {
  let p = parse_one(
    "PACKET_FOO = 6; sc, is-info, cancel(PACKET_BAR)\n\
       UINT8(int) id; key\n\
       UINT8(int) x;\n\
     end\n",
  );
  let send = send_code(&p, &quiet());
  assert!(send.contains("hash = pc->phs.sent + PACKET_BAR;"));
  assert!(send.contains("genhash_remove(*hash, real_packet);"));
  let recv = receive_code(&p, &quiet());
  assert!(recv.contains("hash = pc->phs.received + PACKET_BAR;"));
  assert!(recv.contains("genhash_remove(*hash, real_packet);"));
}

#[test]
fn info_packets_discard_unchanged_sends() {
  let p = parse_one(
    "PACKET_FOO = 7; sc, is-info, pre-send\n\
       UINT8(int) id; key\n\
       UINT8(int) x;\n\
     end\n",
  );
  assert_eq!(p.info, InfoKind::Info);
  let send = send_code(&p, &quiet());
  assert!(send.contains("if (different == 0) {"));
  // The pre-send scratch is freed on the discard path too.
  let discard = send.find("if (different == 0) {").unwrap();
  let free = send[discard..].find("delete (decltype(real_packet)) real_packet;").unwrap();
  let ret = send[discard..].find("return 0;").unwrap();
  assert!(free < ret);
  assert!(send.contains("pre_send_packet_foo(pc, tmp);"));

  // A normal packet keeps sending even without changes.
  let p = parse_one("PACKET_FOO = 7; sc\n  UINT8(int) x;\nend\n");
  assert!(!send_code(&p, &quiet()).contains("if (different == 0) {"));
}

#[test]
fn force_send_seeds_the_difference_counter() {
  let p = parse_one("PACKET_FOO = 7; sc, is-info, force\n  UINT8(int) x;\nend\n");
  let send = send_code(&p, &quiet());
  assert!(send.contains("int different = force_to_send;"));
  assert!(send.contains(", bool force_to_send)"));
}

#[test]
fn dsend_fills_every_field_kind() {
  let p = parse_one(
    "PACKET_FOO = 9; sc, dsend\n\
       UINT8(int) id;\n\
       STRING name[LEN];\n\
       worklist(struct worklist) wl;\n\
       UINT8(int) items[N];\n\
     end\n",
  );
  let mut cg = CodeGen::new();
  gen::write_dsend(&mut cg, &p);
  let out = cg.into_output();
  assert!(out.contains("int dsend_packet_foo(struct connection *pc, int id, const char *name, const struct worklist *wl, const int *items)"));
  assert!(out.contains("real_packet->id = id;"));
  assert!(out.contains("sz_strlcpy(real_packet->name, name);"));
  assert!(out.contains("worklist_copy(&real_packet->wl, wl);"));
  assert!(out.contains("real_packet->items[i] = items[i];"));
  assert!(out.contains("return send_packet_foo(pc, real_packet);"));
}

#[test]
fn send_dispatcher_guards_the_connection() {
  let p = parse_one("PACKET_FOO = 9; sc\n  UINT8(int) id;\nend\n");
  let mut cg = CodeGen::new();
  gen::write_packet_send(&mut cg, &p);
  let out = cg.into_output();
  assert!(out.contains("if (!pc->used) {"));
  assert!(out.contains("return -1;"));
  assert!(out.contains("fc_assert_ret_val_msg(pc->phs.handlers->send[PACKET_FOO].packet != NULL, -1,"));
  assert!(out.contains("return pc->phs.handlers->send[PACKET_FOO].packet(pc, packet);"));
}

#[test]
fn enum_and_tables_fill_the_gaps() {
  let input = "PACKET_A = 0; sc\nend\nPACKET_B = 1; sc\nend\nPACKET_C = 3; sc, is-game-info\n  UINT8(int) x;\nend\n";
  let packets = parse(input).unwrap();

  let mut cg = CodeGen::new();
  super::dispatch::write_enum(&mut cg, &packets);
  let e = cg.into_output();
  assert!(e.contains("PACKET_A,"));
  assert!(e.contains("/* 0 */"));
  assert!(e.contains("PACKET_C = 3,"));
  assert!(e.contains("PACKET_LAST  /* leave this last */"));

  let mut cg = CodeGen::new();
  super::dispatch::write_packet_name(&mut cg, &packets);
  let names = cg.into_output();
  assert!(names.contains("\"PACKET_B\",\n    \"unknown\",\n    \"PACKET_C\","));

  let mut cg = CodeGen::new();
  super::dispatch::write_has_game_info_flag(&mut cg, &packets);
  let flags = cg.into_output();
  assert!(flags.contains("false, /* PACKET_B */"));
  assert!(flags.contains("true, /* PACKET_C */"));
}

#[test]
fn capability_installer_tries_every_variant() {
  let input = "PACKET_FOO = 2; sc\n  uint8(int) a; add-cap(X)\n  uint8(int) b;\nend\n";
  let packets = parse(input).unwrap();
  let mut cg = CodeGen::new();
  super::dispatch::write_fill_capability(&mut cg, &packets, &GenConfig::default());
  let out = cg.into_output();
  assert!(out.contains("if (!has_capability(\"X\", capability)) {"));
  assert!(out.contains("} else if (has_capability(\"X\", capability)) {"));
  assert!(out.contains("log_packet_detailed(\"PACKET_FOO: using variant=100 cap=%s\", capability);"));
  assert!(out.contains("qCritical(\"Unknown PACKET_FOO variant for cap %s\", capability);"));
  // sc-only packets install their send handler on the server side.
  assert!(out.contains("if (is_server()) {"));
  assert!(out.contains("phandlers->send[PACKET_FOO]"));
  assert!(out.contains("phandlers->receive[PACKET_FOO] = (void *(*)(struct connection *)) receive_packet_foo_100;"));
}

#[test]
fn initial_installer_splits_by_role() {
  let input = "PACKET_BOTH = 0; sc, cs\n  uint8(int) a;\nend\n\
               PACKET_DOWN = 1; sc\n  uint8(int) a;\nend\n\
               PACKET_UP = 2; cs\n  uint8(int) a;\nend\n";
  let packets = parse(input).unwrap();
  let mut cg = CodeGen::new();
  super::dispatch::write_fill_initial(&mut cg, &packets);
  let out = cg.into_output();
  let server = out.find("if (is_server()) {").unwrap();
  let both_send = out.find("phandlers->send[PACKET_BOTH]").unwrap();
  assert!(both_send < server);
  assert!(out[server..].contains("phandlers->send[PACKET_DOWN]"));
  assert!(out[server..].contains("phandlers->receive[PACKET_UP]"));
  let else_part = out.find("} else {").unwrap();
  assert!(out[else_part..].contains("phandlers->send[PACKET_UP]"));
  assert!(out[else_part..].contains("phandlers->receive[PACKET_DOWN]"));
}

#[test]
fn client_and_server_switches_skip_no_handle() {
  let input = "PACKET_SHOWN = 0; sc, cs\n  uint8(int) a;\nend\n\
               PACKET_HIDDEN = 1; sc, cs, no-handle\n  uint8(int) a;\nend\n";
  let packets = parse(input).unwrap();
  let ctx = GenConfig::default();
  let client = super::client_source(&packets, &ctx, "test.def");
  assert!(client.contains("case PACKET_SHOWN:"));
  assert!(client.contains("handle_shown("));
  assert!(!client.contains("case PACKET_HIDDEN:"));
  let server = super::server_source(&packets, &ctx, "test.def");
  assert!(server.contains("case PACKET_SHOWN:"));
  assert!(!server.contains("case PACKET_HIDDEN:"));
}

#[test]
fn per_conn_handlers_take_the_connection() {
  let input = "PACKET_FOO = 0; cs, handle-per-conn\n  uint8(int) a;\nend\n\
               PACKET_BAR = 1; cs\n  uint8(int) a;\nend\n";
  let packets = parse(input).unwrap();
  let ctx = GenConfig::default();
  let header = super::server_header(&packets, &ctx, "test.def");
  assert!(header.contains("void handle_foo(connection *pc, int a);"));
  assert!(header.contains("void handle_bar(player *pplayer, int a);"));
  let source = super::server_source(&packets, &ctx, "test.def");
  assert!(source.contains("handle_foo(pconn,"));
  assert!(source.contains("handle_bar(pplayer,"));
}

#[test]
fn worklist_handler_arguments_pass_the_address() {
  let input = "PACKET_FOO = 0; cs\n  worklist(struct worklist) wl;\nend\n";
  let packets = parse(input).unwrap();
  let source = super::server_source(&packets, &GenConfig::default(), "test.def");
  assert!(source.contains("&((const struct packet_foo *)packet)->wl"));
}

#[test]
fn functional_capability_is_sorted_and_spaced() {
  let input = "PACKET_FOO = 0; sc\n  uint8(int) a; add-cap(zulu)\n  uint8(int) b; remove-cap(alpha)\nend\n";
  let packets = parse(input).unwrap();
  let out = super::common_source(&packets, &GenConfig::default(), "test.def");
  assert!(out
    .contains("extern \"C\" const char *const packet_functional_capability = \"alpha zulu\";"));
}

#[test]
fn output_is_deterministic() {
  let input = format!(
    "{}PACKET_FOO = 2; sc\n  UINT8(int) a; add-cap(X)\n  UINT8(int) b; remove-cap(Y)\nend\n\
     PACKET_BAR = 5; cs, dsend, lsend\n  UINT8(int) id; key\n  STRING name[LEN];\nend\n",
    TYPES
  );
  let ctx = GenConfig::default();
  let a = super::common_source(&parse(&input).unwrap(), &ctx, "test.def");
  let b = super::common_source(&parse(&input).unwrap(), &ctx, "test.def");
  assert_eq!(a, b);
}

#[test]
fn cap_gates_survive_into_the_model() {
  let p = parse_one(
    "PACKET_FOO = 2; sc\n\
       UINT8(int) a; add-cap(X)\n\
       UINT8(int) b; remove-cap(X)\n\
     end\n",
  );
  assert_eq!(p.fields[0].cap, Some(CapGate::Add("X".into())));
  assert_eq!(p.fields[1].cap, Some(CapGate::Remove("X".into())));
  // One cap still means two variants; a and b are complementary.
  assert_eq!(p.variants.len(), 2);
  assert_eq!(p.variants[0].fields[0].name, "b");
  assert_eq!(p.variants[1].fields[0].name, "a");
}

#[test]
fn stats_emission_is_optional_and_per_variant() {
  let input = "PACKET_FOO = 0; sc, is-info\n  uint8(int) id; key\n  uint8(int) x;\nend\n";
  let packets = parse(input).unwrap();
  let off = super::common_source(&packets, &GenConfig::default(), "test.def");
  assert!(off.contains("void delta_stats_report() {}"));
  assert!(!off.contains("stats_packet_foo_100_sent"));

  let ctx = GenConfig { generate_stats: true, ..GenConfig::default() };
  let on = super::common_source(&packets, &ctx, "test.def");
  assert!(on.contains("static int stats_packet_foo_100_sent;"));
  assert!(on.contains("static int stats_packet_foo_100_counters[1];"));
  assert!(on.contains("static char *stats_packet_foo_100_names[] = {\"x\"};"));
  assert!(on.contains("stats_packet_foo_100_discarded++;"));
  assert!(on.contains("stats_packet_foo_100_counters[0]++;"));
  assert!(on.contains("memset(stats_packet_foo_100_counters, 0, sizeof(stats_packet_foo_100_counters));"));
}

#[test]
fn cm_parameter_compares_by_address() {
  let p = parse_one(
    "PACKET_FOO = 0; sc\n\
       cm_parameter(struct cm_parameter) param;\n\
     end\n",
  );
  let send = send_code(&p, &quiet());
  assert!(send.contains("differ = (&old->param != &real_packet->param);"));
}

#[test]
fn string_arrays_compare_with_strcmp() {
  let p = parse_one(
    "PACKET_FOO = 0; sc\n\
       STRING name[LEN];\n\
       STRING lines[N][LEN];\n\
     end\n",
  );
  let send = send_code(&p, &quiet());
  assert!(send.contains("differ = (strcmp(old->name, real_packet->name) != 0);"));
  assert!(send.contains("if (strcmp(old->lines[i], real_packet->lines[i]) != 0) {"));
  // Rank-2 string arrays loop the first dimension only.
  assert!(send.contains("DIO_PUT(string, &dout, &field_addr, real_packet->lines[i]);"));
}

#[test]
fn two_dimensional_arrays_loop_both_axes() {
  let p = parse_one("PACKET_FOO = 0; sc\n  UINT8(int) grid[W][H];\nend\n");
  let send = send_code(&p, &quiet());
  assert!(send.contains("for (i = 0; i < W; i++) {"));
  assert!(send.contains("for (j = 0; j < H; j++) {"));
  assert!(send.contains("DIO_PUT(uint8, &dout, &field_addr, real_packet->grid[i][j]);"));
  let recv = receive_code(&p, &quiet());
  assert!(recv.contains("DIO_GET(uint8, &din, &field_addr, &real_packet->grid[i][j])"));
}

#[test]
fn common_header_declares_structs_and_prototypes() {
  let input = "PACKET_FOO = 0; sc, lsend, dsend\n  uint8(int) id; key\n  uint8(int) x;\nend\n";
  let packets = parse(input).unwrap();
  let header = super::common_header(&packets, &GenConfig::default(), "test.def");
  assert!(header.contains("struct packet_foo {"));
  assert!(header.contains("int id;"));
  assert!(header.contains("enum packet_type {"));
  assert!(header.contains("int send_packet_foo(struct connection *pc, const struct packet_foo *packet);"));
  assert!(header.contains("void lsend_packet_foo(struct conn_list *dest, const struct packet_foo *packet);"));
  assert!(header.contains("int dsend_packet_foo(struct connection *pc, int id, int x);"));
  assert!(header.contains("void dlsend_packet_foo(struct conn_list *dest, int id, int x);"));
  assert!(header.contains("void delta_stats_report();"));
  assert!(header.contains("THIS FILE WAS GENERATED"));
}
