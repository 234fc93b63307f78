//! Configuration-file grammar and the test-backend options struct.
//!
//! The plugin/driver/option grammar here mirrors
//! `original_source/src/libltfs/config_file.c`'s line-oriented parser: it is
//! simple enough that reaching for an external grammar crate would be
//! overkill, just as the original reaches for hand-rolled `strtok` parsing
//! rather than a generic config library.

use crate::error::{Result, RustLtfsError};
use std::collections::HashMap;
use std::path::Path;

/// Recognized plugin categories.
const PLUGIN_TYPES: &[&str] = &["iosched", "driver", "kmi", "dcache", "changer", "crepos"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEntry {
    pub plugin_type: String,
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub plugins: Vec<PluginEntry>,
    pub defaults: HashMap<String, String>,
    pub options: HashMap<String, Vec<String>>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut cfg = ConfigFile::default();
        cfg.parse_into(&text, path.parent())?;
        Ok(cfg)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut cfg = ConfigFile::default();
        cfg.parse_into(text, None)?;
        Ok(cfg)
    }

    fn parse_into(&mut self, text: &str, base_dir: Option<&Path>) -> Result<()> {
        for raw_line in text.lines() {
            let line = strip_comment_and_trailing_ws(raw_line);
            if line.is_empty() {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let directive = tokens.next().unwrap_or_default();
            let rest: Vec<&str> = tokens.collect();

            match directive {
                "plugin" => self.handle_plugin(&rest)?,
                "-plugin" => self.handle_unplugin(&rest)?,
                "default" => self.handle_default(&rest)?,
                "-default" => self.handle_undefault(&rest)?,
                "option" => self.handle_option(&rest)?,
                "include" => self.handle_include(&rest, base_dir, false)?,
                "include_noerror" => self.handle_include(&rest, base_dir, true)?,
                other => {
                    return Err(RustLtfsError::parse(format!(
                        "unknown config directive: {other}"
                    )))
                }
            }
        }
        Ok(())
    }

    fn handle_plugin(&mut self, rest: &[&str]) -> Result<()> {
        let [plugin_type, name, path] = rest else {
            return Err(RustLtfsError::parse(
                "plugin directive requires TYPE NAME PATH",
            ));
        };
        validate_plugin_type(plugin_type)?;
        self.plugins.push(PluginEntry {
            plugin_type: plugin_type.to_string(),
            name: name.to_string(),
            path: path.to_string(),
        });
        Ok(())
    }

    fn handle_unplugin(&mut self, rest: &[&str]) -> Result<()> {
        let [plugin_type, name] = rest else {
            return Err(RustLtfsError::parse("-plugin directive requires TYPE NAME"));
        };
        self.plugins
            .retain(|p| !(p.plugin_type == *plugin_type && p.name == *name));
        Ok(())
    }

    fn handle_default(&mut self, rest: &[&str]) -> Result<()> {
        let [plugin_type, name] = rest else {
            return Err(RustLtfsError::parse("default directive requires TYPE NAME"));
        };
        if *name != "none"
            && !self
                .plugins
                .iter()
                .any(|p| p.plugin_type == *plugin_type && p.name == *name)
        {
            return Err(RustLtfsError::parse(format!(
                "default plugin '{name}' of type '{plugin_type}' was never declared"
            )));
        }
        self.defaults
            .insert(plugin_type.to_string(), name.to_string());
        Ok(())
    }

    fn handle_undefault(&mut self, rest: &[&str]) -> Result<()> {
        let [plugin_type] = rest else {
            return Err(RustLtfsError::parse("-default directive requires TYPE"));
        };
        self.defaults.remove(*plugin_type);
        Ok(())
    }

    fn handle_option(&mut self, rest: &[&str]) -> Result<()> {
        let Some((plugin_type, opt_tokens)) = rest.split_first() else {
            return Err(RustLtfsError::parse("option directive requires TYPE OPT"));
        };
        if opt_tokens.is_empty() {
            return Err(RustLtfsError::parse("option directive requires an option value"));
        }
        let mut opt = opt_tokens.join(" ");
        if !PLUGIN_TYPES.contains(&*plugin_type) && !opt.starts_with("-o") {
            opt = format!("-o{opt}");
        }
        self.options
            .entry((*plugin_type).to_string())
            .or_default()
            .push(opt);
        Ok(())
    }

    fn handle_include(
        &mut self,
        rest: &[&str],
        base_dir: Option<&Path>,
        ignore_errors: bool,
    ) -> Result<()> {
        let [rel_path] = rest else {
            return Err(RustLtfsError::parse("include directive requires PATH"));
        };
        let full_path = match base_dir {
            Some(dir) => dir.join(rel_path),
            None => Path::new(rel_path).to_path_buf(),
        };
        match std::fs::read_to_string(&full_path) {
            Ok(text) => self.parse_into(&text, full_path.parent()),
            Err(e) if ignore_errors => {
                tracing::debug!("include_noerror: skipping unreadable {full_path:?}: {e}");
                Ok(())
            }
            Err(e) => Err(RustLtfsError::Io(e)),
        }
    }

    pub fn default_plugin(&self, plugin_type: &str) -> Option<&str> {
        self.defaults.get(plugin_type).map(|s| s.as_str())
    }

    pub fn plugin_path(&self, plugin_type: &str, name: &str) -> Option<&str> {
        self.plugins
            .iter()
            .find(|p| p.plugin_type == plugin_type && p.name == name)
            .map(|p| p.path.as_str())
    }
}

fn validate_plugin_type(plugin_type: &str) -> Result<()> {
    if PLUGIN_TYPES.contains(&plugin_type) {
        Ok(())
    } else {
        Err(RustLtfsError::parse(format!(
            "unknown plugin type: {plugin_type}"
        )))
    }
}

fn strip_comment_and_trailing_ws(line: &str) -> &str {
    let without_comment = match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    };
    without_comment.trim_end()
}

/// Delay-emulation strategy for the test backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelayMode {
    #[default]
    None,
    Calculate,
    Emulate,
}

/// Explicit options struct backing the test/simulated tape backend. Passed
/// around by value rather than read from ambient global state.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub capacity_bytes: u64,
    pub emulate_readonly: bool,
    pub dummy_io: bool,
    pub delay_mode: DelayMode,
    pub wraps: u32,
    pub change_direction_us: u64,
    pub change_track_us: u64,
    pub threading_sec: u64,
    pub eot_to_bot_sec: u64,
    pub cart_type: String,
    pub density_code: u8,
    pub strict_drive: bool,
    pub disable_auto_dump: bool,
    pub crc_checking: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            capacity_bytes: 2_500_000_000_000, // LTO-8 class capacity
            emulate_readonly: false,
            dummy_io: false,
            delay_mode: DelayMode::None,
            wraps: 1,
            change_direction_us: 0,
            change_track_us: 0,
            threading_sec: 0,
            eot_to_bot_sec: 0,
            cart_type: "LTO8".to_string(),
            density_code: 0x5e,
            strict_drive: false,
            disable_auto_dump: false,
            crc_checking: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plugin_and_default() {
        let text = "\
# a comment\n\
plugin driver generic /usr/lib/ltfs/driver.so  \n\
default driver generic\n\
option driver -o foo=bar\n\
";
        let cfg = ConfigFile::parse(text).unwrap();
        assert_eq!(cfg.plugins.len(), 1);
        assert_eq!(cfg.default_plugin("driver"), Some("generic"));
        assert_eq!(
            cfg.options.get("driver").unwrap(),
            &vec!["-o foo=bar".to_string()]
        );
    }

    #[test]
    fn rejects_default_without_declared_plugin() {
        let err = ConfigFile::parse("default driver missing\n").unwrap_err();
        assert!(matches!(err, RustLtfsError::Parse(_)));
    }

    #[test]
    fn default_none_is_always_allowed() {
        let cfg = ConfigFile::parse("default driver none\n").unwrap();
        assert_eq!(cfg.default_plugin("driver"), Some("none"));
    }

    #[test]
    fn non_reserved_option_gets_dash_o_prefix() {
        let cfg = ConfigFile::parse("option custom somevalue\n").unwrap();
        assert_eq!(
            cfg.options.get("custom").unwrap(),
            &vec!["-osomevalue".to_string()]
        );
    }

    #[test]
    fn minus_plugin_removes_entry() {
        let text = "\
plugin driver generic /lib/a.so\n\
-plugin driver generic\n\
";
        let cfg = ConfigFile::parse(text).unwrap();
        assert!(cfg.plugins.is_empty());
    }
}
