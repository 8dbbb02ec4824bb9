//! Command-line entry points.

use clap::Args;

use crate::{config::BatchConfig, prelude::*};

pub mod build;
pub mod poll;
pub mod process;
pub mod schema;
pub mod submit;

/// Common options for locating the output and logs directories.
#[derive(Args, Clone, Debug)]
pub struct DirOpts {
    /// Directory where processed outputs are written.
    #[clap(long, value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Directory for request artifacts, job ID markers and error logs.
    /// Defaults to `{output_dir}/logs`.
    #[clap(long, value_name = "DIR")]
    pub logs_dir: Option<PathBuf>,
}

impl DirOpts {
    /// The effective logs directory.
    pub fn logs_dir(&self) -> PathBuf {
        self.logs_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("logs"))
    }
}

/// Common options for loading the non-secret configuration file.
#[derive(Args, Clone, Debug)]
pub struct ConfigOpts {
    /// Path to the TOML configuration file.
    #[clap(long, default_value = "config.toml", value_name = "PATH")]
    pub config: PathBuf,
}

impl ConfigOpts {
    /// Load the configuration this run will use.
    pub async fn load(&self) -> Result<BatchConfig> {
        BatchConfig::load(&self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_dir_defaults_under_the_output_dir() {
        let opts = DirOpts {
            output_dir: PathBuf::from("out"),
            logs_dir: None,
        };
        assert_eq!(opts.logs_dir(), PathBuf::from("out/logs"));

        let opts = DirOpts {
            output_dir: PathBuf::from("out"),
            logs_dir: Some(PathBuf::from("elsewhere")),
        };
        assert_eq!(opts.logs_dir(), PathBuf::from("elsewhere"));
    }
}
