//! Where configuration files live.
//!
//! Files are read in increasing precedence:
//!
//! | Layer | Location |
//! |-------|----------|
//! | user | `~/.config/palisade/config.toml` (platform config dir) |
//! | project | `<project>/palisade.toml` |
//! | local | `<project>/palisade.local.toml`, kept out of version control |

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::ConfigError;

const USER_FILE: &str = "config.toml";
const PROJECT_FILE: &str = "palisade.toml";
const LOCAL_FILE: &str = "palisade.local.toml";

/// One configuration file in the layering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    User,
    Project,
    Local,
}

impl Layer {
    pub fn name(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Project => "project",
            Self::Local => "local",
        }
    }
}

/// Resolves configuration file locations for one project directory.
#[derive(Debug, Clone)]
pub struct Paths {
    project_dir: PathBuf,
    user_dir: Option<PathBuf>,
}

impl Paths {
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
            user_dir: ProjectDirs::from("dev", "Palisade", "palisade")
                .map(|dirs| dirs.config_dir().to_path_buf()),
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        self.user_dir
            .as_ref()
            .map(|dir| dir.join(USER_FILE))
            .ok_or(ConfigError::NoUserDirectory)
    }

    pub fn file(&self, layer: Layer) -> Option<PathBuf> {
        match layer {
            Layer::User => self.user_config_file().ok(),
            Layer::Project => Some(self.project_dir.join(PROJECT_FILE)),
            Layer::Local => Some(self.project_dir.join(LOCAL_FILE)),
        }
    }

    /// Files that exist, lowest precedence first.
    pub fn existing(&self, layers: &[Layer]) -> Vec<(Layer, PathBuf)> {
        layers
            .iter()
            .filter_map(|&layer| self.file(layer).map(|path| (layer, path)))
            .filter(|(_, path)| path.is_file())
            .collect()
    }
}
