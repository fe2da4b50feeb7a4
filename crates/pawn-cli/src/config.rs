//! JIT configuration, read from a small `key = value` file or
//! overridden from CLI flags.
//!
//! A hand-rolled, dependency-free scan over the file text rather than
//! a `serde`-backed format, since the surface here is four booleans
//! and one bitmask. `pawn-jit` itself never reads this file - these
//! four keys are host-side knobs the plugin shell owns.

use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy)]
pub struct JitConfig {
    /// Emit an assembly listing of every opcode lowered (`trace`-level
    /// log lines from `pawn_jit::translator`; this just raises the
    /// `env_logger` filter far enough to see them).
    pub jit_log: bool,
    /// Resolve `SYSREQ.C` natives to their address and rewrite them to
    /// `SYSREQ.D` before compiling, when every referenced native is
    /// registered - skips the host callback on each call.
    pub jit_sysreq_d: bool,
    /// Reserved for sleep/resume support; not implemented by the
    /// translator (no AMX module here uses `SLEEP`), kept as a
    /// recognized key so a config file naming it doesn't silently get
    /// ignored.
    pub jit_sleep: bool,
    /// Bit flags: bit 0 enables verbose per-instruction logging (same
    /// effect as `jit_log`), bit 1 embeds `int3` at `BREAK` opcodes.
    pub jit_debug: u32,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            jit_log: false,
            jit_sysreq_d: false,
            jit_sleep: false,
            jit_debug: 0,
        }
    }
}

impl JitConfig {
    /// Read `path` if it exists; any key it doesn't name keeps its
    /// default. A missing file is not an error - the defaults apply.
    pub fn load(path: &Path) -> Self {
        let mut cfg = Self::default();
        let Ok(text) = fs::read_to_string(path) else {
            return cfg;
        };
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            match key {
                "jit_log" => cfg.jit_log = parse_bool(value),
                "jit_sysreq_d" => cfg.jit_sysreq_d = parse_bool(value),
                "jit_sleep" => cfg.jit_sleep = parse_bool(value),
                "jit_debug" => cfg.jit_debug = parse_uint(value),
                _ => {}
            }
        }
        cfg
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "true" | "1" | "yes" | "on")
}

fn parse_uint(value: &str) -> u32 {
    if let Some(hex) = value.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).unwrap_or(0)
    } else {
        value.parse().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = JitConfig::load(Path::new("/nonexistent/pawn-jit.toml"));
        assert!(!cfg.jit_log);
        assert!(!cfg.jit_sysreq_d);
        assert_eq!(cfg.jit_debug, 0);
    }

    #[test]
    fn parses_keys_and_ignores_comments() {
        let mut file = tempfile();
        writeln!(file.1, "# comment\njit_log = true\njit_sysreq_d=1\njit_debug = 0x3\n").unwrap();
        let cfg = JitConfig::load(&file.0);
        assert!(cfg.jit_log);
        assert!(cfg.jit_sysreq_d);
        assert_eq!(cfg.jit_debug, 3);
    }

    fn tempfile() -> (std::path::PathBuf, fs::File) {
        let path = std::env::temp_dir().join(format!(
            "pawn-jit-config-test-{}.toml",
            std::process::id()
        ));
        let file = fs::File::create(&path).unwrap();
        (path, file)
    }
}
