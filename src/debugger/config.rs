//! Session configuration.
//!
//! Every key is listed in [`CONFIG_SET`] with a one-line description so the
//! REPL `config` command can render the whole table.

use crate::debugger::error::Error;
use regex::Regex;
use std::path::PathBuf;
use strum_macros::{Display, EnumString, IntoStaticStr};

#[derive(Copy, Clone, PartialEq, Debug, EnumString, Display, IntoStaticStr)]
pub enum OpenFrontend {
    #[strum(serialize = "chrome")]
    Chrome,
    #[strum(serialize = "vscode")]
    Vscode,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Enable postmortem debugging on uncaught exceptions.
    pub postmortem: bool,
    /// Skip stepping into locations matching these patterns.
    pub skip_path: Vec<Regex>,
    /// Skip stepping into locations without source files.
    pub skip_nosrc: bool,
    /// Number of frames rendered on suspend.
    pub show_frames: usize,
    /// Number of source lines rendered on suspend.
    pub show_src_lines: usize,
    /// Disable colorized rendering.
    pub no_color: bool,
    /// TCP listen host.
    pub host: Option<String>,
    /// TCP listen port.
    pub port: Option<u16>,
    /// Unix domain socket path.
    pub sock_path: Option<PathBuf>,
    /// Unix domain socket directory.
    pub sock_dir: Option<PathBuf>,
    /// Frontend to print attach instructions for.
    pub open_frontend: Option<OpenFrontend>,
    /// Connection cookie checked against the REPL greeting.
    pub cookie: Option<String>,
    /// Do not stop at the beginning of the program.
    pub nonstop: bool,
    /// Path of the debuggee entry script.
    pub entry_script: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            postmortem: false,
            skip_path: Vec::new(),
            skip_nosrc: false,
            show_frames: 2,
            show_src_lines: 10,
            no_color: false,
            host: None,
            port: None,
            sock_path: None,
            sock_dir: None,
            open_frontend: None,
            cookie: None,
            nonstop: false,
            entry_script: None,
        }
    }
}

/// Key/description table rendered by the `config` command.
pub const CONFIG_SET: &[(&str, &str)] = &[
    ("postmortem", "Enable postmortem debugging"),
    ("skip_path", "Skip showing/tracing locations that match patterns"),
    ("skip_nosrc", "Skip on no source code lines"),
    ("show_frames", "Number of frames on suspend"),
    ("show_src_lines", "Number of source lines on suspend"),
    ("no_color", "Disable colorized output"),
    ("host", "Listening TCP/IP host"),
    ("port", "Listening TCP/IP port"),
    ("sock_path", "UNIX domain socket path"),
    ("sock_dir", "UNIX domain socket directory"),
    ("open_frontend", "Frontend to open ('chrome' or 'vscode')"),
    ("cookie", "Secret cookie for the remote connection"),
    ("nonstop", "Do not stop at the beginning of the program"),
];

fn parse_bool(key: &'static str, val: &str) -> Result<bool, Error> {
    match val {
        "true" | "on" | "1" => Ok(true),
        "false" | "off" | "0" => Ok(false),
        _ => Err(Error::ConfigValue(key, val.to_string())),
    }
}

impl Config {
    pub fn set(&mut self, key: &str, val: &str) -> Result<(), Error> {
        match key {
            "postmortem" => self.postmortem = parse_bool("postmortem", val)?,
            "skip_path" => {
                self.skip_path = vec![Regex::new(val)?];
            }
            "skip_nosrc" => self.skip_nosrc = parse_bool("skip_nosrc", val)?,
            "show_frames" => {
                self.show_frames = val
                    .parse()
                    .map_err(|_| Error::ConfigValue("show_frames", val.to_string()))?
            }
            "show_src_lines" => {
                self.show_src_lines = val
                    .parse()
                    .map_err(|_| Error::ConfigValue("show_src_lines", val.to_string()))?
            }
            "no_color" => self.no_color = parse_bool("no_color", val)?,
            "host" => self.host = Some(val.to_string()),
            "port" => {
                self.port = Some(
                    val.parse()
                        .map_err(|_| Error::ConfigValue("port", val.to_string()))?,
                )
            }
            "sock_path" => self.sock_path = Some(PathBuf::from(val)),
            "sock_dir" => self.sock_dir = Some(PathBuf::from(val)),
            "open_frontend" => {
                self.open_frontend = Some(
                    val.parse()
                        .map_err(|_| Error::ConfigValue("open_frontend", val.to_string()))?,
                )
            }
            "cookie" => self.cookie = Some(val.to_string()),
            "nonstop" => self.nonstop = parse_bool("nonstop", val)?,
            _ => return Err(Error::UnknownConfigKey(key.to_string())),
        }
        Ok(())
    }

    /// Append to an array-valued key (`config skip_path << pat`).
    pub fn append(&mut self, key: &str, val: &str) -> Result<(), Error> {
        match key {
            "skip_path" => {
                self.skip_path.push(Regex::new(val)?);
                Ok(())
            }
            _ => self.set(key, val),
        }
    }

    pub fn unset(&mut self, key: &str) -> Result<(), Error> {
        let default = Config::default();
        match key {
            "postmortem" => self.postmortem = default.postmortem,
            "skip_path" => self.skip_path = default.skip_path,
            "skip_nosrc" => self.skip_nosrc = default.skip_nosrc,
            "show_frames" => self.show_frames = default.show_frames,
            "show_src_lines" => self.show_src_lines = default.show_src_lines,
            "no_color" => self.no_color = default.no_color,
            "host" => self.host = default.host,
            "port" => self.port = default.port,
            "sock_path" => self.sock_path = default.sock_path,
            "sock_dir" => self.sock_dir = default.sock_dir,
            "open_frontend" => self.open_frontend = default.open_frontend,
            "cookie" => self.cookie = default.cookie,
            "nonstop" => self.nonstop = default.nonstop,
            _ => return Err(Error::UnknownConfigKey(key.to_string())),
        }
        Ok(())
    }

    /// Render `key = value` for a known key.
    pub fn show(&self, key: &str) -> Option<String> {
        let value = match key {
            "postmortem" => self.postmortem.to_string(),
            "skip_path" => format!(
                "[{}]",
                self.skip_path
                    .iter()
                    .map(|r| r.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            "skip_nosrc" => self.skip_nosrc.to_string(),
            "show_frames" => self.show_frames.to_string(),
            "show_src_lines" => self.show_src_lines.to_string(),
            "no_color" => self.no_color.to_string(),
            "host" => self.host.clone().unwrap_or_else(|| "(default)".to_string()),
            "port" => self
                .port
                .map(|p| p.to_string())
                .unwrap_or_else(|| "(default)".to_string()),
            "sock_path" => self
                .sock_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(default)".to_string()),
            "sock_dir" => self
                .sock_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(default)".to_string()),
            "open_frontend" => self
                .open_frontend
                .map(|f| f.to_string())
                .unwrap_or_else(|| "(default)".to_string()),
            "cookie" => self
                .cookie
                .clone()
                .unwrap_or_else(|| "(default)".to_string()),
            "nonstop" => self.nonstop.to_string(),
            _ => return None,
        };
        let desc = CONFIG_SET
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, d)| *d)
            .unwrap_or_default();
        Some(format!("{key} = {value:<30} # {desc}"))
    }

    /// True if `path` matches one of the `skip_path` patterns.
    pub fn skip_path_matches(&self, path: &str) -> bool {
        self.skip_path.iter().any(|pat| pat.is_match(path))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_set_and_show() {
        let mut config = Config::default();
        config.set("show_frames", "5").unwrap();
        assert_eq!(config.show_frames, 5);
        assert!(config.show("show_frames").unwrap().starts_with("show_frames = 5"));

        config.set("open_frontend", "chrome").unwrap();
        assert_eq!(config.open_frontend, Some(OpenFrontend::Chrome));

        assert!(matches!(
            config.set("postmortem", "maybe"),
            Err(Error::ConfigValue("postmortem", _))
        ));
        assert!(matches!(
            config.set("nope", "1"),
            Err(Error::UnknownConfigKey(_))
        ));
    }

    #[test]
    fn test_skip_path_append() {
        let mut config = Config::default();
        config.append("skip_path", "/gems/").unwrap();
        config.append("skip_path", "internal").unwrap();
        assert!(config.skip_path_matches("/app/gems/foo.src"));
        assert!(config.skip_path_matches("<internal:trace>"));
        assert!(!config.skip_path_matches("/app/main.src"));

        config.unset("skip_path").unwrap();
        assert!(!config.skip_path_matches("/app/gems/foo.src"));
    }
}
