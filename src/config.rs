//! Service configuration, read once at startup from flags or the environment.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};

use clap::Parser;

use crate::extract::{AttrPolicy, ExtractOptions};

/// Seeds volumes with the contents of uploaded tar archives.
#[derive(Clone, Parser)]
#[command(name = "volinit", version, about)]
pub struct Config {
    /// Directory holding one subdirectory per volume.
    #[arg(long, env = "INIT_VOLUME_PATH")]
    pub volume_path: PathBuf,

    /// Name given to the file of a volume that ends up holding a single
    /// regular file.
    #[arg(long, env = "INIT_VOLUME_FILENAME", value_parser = parse_file_name)]
    pub volume_filename: String,

    /// Shared secret every upload must present as its `cookie` query
    /// parameter.
    #[arg(long, env = "INIT_VOLUME_COOKIE", hide_env_values = true)]
    pub cookie: String,

    /// Socket address to listen on.
    #[arg(long, env = "INIT_VOLUME_LISTEN", default_value = "0.0.0.0:80")]
    pub listen: SocketAddr,

    /// Do not treat a `.` entry specially and never rename a lone file.
    #[arg(long, env = "INIT_VOLUME_NO_ROOT_MARKER")]
    pub no_root_marker: bool,

    /// Only warn when an extended attribute cannot be set.
    #[arg(long, env = "INIT_VOLUME_LENIENT_XATTRS")]
    pub lenient_xattrs: bool,

    /// Only warn when ownership cannot be changed.
    #[arg(long, env = "INIT_VOLUME_LENIENT_OWNERSHIP")]
    pub lenient_ownership: bool,

    /// Restore modification times of unpacked files.
    #[arg(long, env = "INIT_VOLUME_PRESERVE_MTIME")]
    pub preserve_mtime: bool,
}

impl Config {
    /// Creates a configuration with the default listen address and strict
    /// extraction settings.
    pub fn new(
        volume_path: impl Into<PathBuf>,
        volume_filename: impl Into<String>,
        cookie: impl Into<String>,
    ) -> Config {
        Config {
            volume_path: volume_path.into(),
            volume_filename: volume_filename.into(),
            cookie: cookie.into(),
            listen: SocketAddr::from(([0, 0, 0, 0], 80)),
            no_root_marker: false,
            lenient_xattrs: false,
            lenient_ownership: false,
            preserve_mtime: false,
        }
    }

    /// The extraction settings every upload is processed with.
    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            single_file_name: self.volume_filename.clone(),
            root_marker_aware: !self.no_root_marker,
            ownership: policy(self.lenient_ownership),
            xattrs: policy(self.lenient_xattrs),
            preserve_mtime: self.preserve_mtime,
        }
    }

    /// Maps a volume name from a request onto its directory.
    ///
    /// Returns `None` unless `name` is exactly one normal path component, so
    /// a request can never address the volume root or anything above it.
    /// Whether the directory exists is not checked.
    pub fn volume_dir(&self, name: &str) -> Option<PathBuf> {
        single_component(name).then(|| self.volume_path.join(name))
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("volume_path", &self.volume_path)
            .field("volume_filename", &self.volume_filename)
            .field("cookie", &"<redacted>")
            .field("listen", &self.listen)
            .field("no_root_marker", &self.no_root_marker)
            .field("lenient_xattrs", &self.lenient_xattrs)
            .field("lenient_ownership", &self.lenient_ownership)
            .field("preserve_mtime", &self.preserve_mtime)
            .finish()
    }
}

fn policy(lenient: bool) -> AttrPolicy {
    if lenient {
        AttrPolicy::Warn
    } else {
        AttrPolicy::Fatal
    }
}

fn single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part == name
    )
}

fn parse_file_name(name: &str) -> Result<String, String> {
    if single_component(name) {
        Ok(name.to_string())
    } else {
        Err(format!("`{name}` is not a plain file name"))
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn volume_names() {
        let config = Config::new("/volumes", "disk.img", "secret");
        assert_eq!(config.volume_dir("vol1"), Some(PathBuf::from("/volumes/vol1")));
        assert_eq!(config.volume_dir(""), None);
        assert_eq!(config.volume_dir("."), None);
        assert_eq!(config.volume_dir(".."), None);
        assert_eq!(config.volume_dir("a/b"), None);
        assert_eq!(config.volume_dir("/etc"), None);
        assert_eq!(config.volume_dir("vol1/"), None);
    }

    #[test]
    fn flags_map_onto_options() {
        let config = Config::try_parse_from([
            "volinit",
            "--volume-path",
            "/volumes",
            "--volume-filename",
            "disk.img",
            "--cookie",
            "secret",
            "--no-root-marker",
            "--lenient-xattrs",
        ])
        .unwrap();
        assert_eq!(config.listen, SocketAddr::from(([0, 0, 0, 0], 80)));

        let options = config.extract_options();
        assert_eq!(options.single_file_name, "disk.img");
        assert!(!options.root_marker_aware);
        assert_eq!(options.xattrs, AttrPolicy::Warn);
        assert_eq!(options.ownership, AttrPolicy::Fatal);
        assert!(!options.preserve_mtime);
    }

    #[test]
    fn rejects_nested_file_name() {
        let res = Config::try_parse_from([
            "volinit",
            "--volume-path",
            "/volumes",
            "--volume-filename",
            "a/disk.img",
            "--cookie",
            "secret",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn cookie_is_not_printed() {
        let config = Config::new("/volumes", "disk.img", "hunter2");
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
