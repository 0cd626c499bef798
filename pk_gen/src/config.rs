use serde::Deserialize;
use std::{fs, io, path::Path};

/// The generator switches: the transient emission context, kept apart from
/// the parsed packet model. Loaded from a TOML file so a build can flip them
/// without touching the generator.
///
/// `fold-bool-into-header` CHANGES the wire protocol. You have been warned.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GenConfig {
  /// Non-array bool fields ride in the header bitvector: their bit carries
  /// the value itself and no payload is emitted for them.
  pub fold_bool_into_header: bool,
  /// Emit log calls into the generated code to debug the delta machinery.
  pub generate_logs:         bool,
  /// The log macro those calls go through.
  pub log_macro:             String,
  /// Emit counters and real bodies for delta_stats_report()/_reset().
  pub generate_stats:        bool,
}

impl Default for GenConfig {
  fn default() -> Self {
    GenConfig {
      fold_bool_into_header: true,
      generate_logs:         true,
      log_macro:             "log_packet_detailed".into(),
      generate_stats:        false,
    }
  }
}

impl GenConfig {
  /// Loads the switches from the given file. Without an explicit path,
  /// `gen-config.toml` is used when it exists, and the defaults otherwise.
  pub fn load(path: Option<&Path>) -> io::Result<GenConfig> {
    let text = match path {
      Some(p) => fs::read_to_string(p)?,
      None => {
        if Path::new("gen-config.toml").exists() {
          fs::read_to_string("gen-config.toml")?
        } else {
          return Ok(GenConfig::default());
        }
      }
    };
    toml::from_str(&text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
  }
}
