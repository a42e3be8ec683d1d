//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

/// ko-operator - build and publish ko images from KoBuilder resources
#[derive(Parser, Debug)]
#[command(name = "ko-operator")]
#[command(version)]
#[command(about = "Kubernetes operator that runs ko builds declared as KoBuilder resources")]
#[command(
    long_about = "ko-operator watches KoBuilder resources and converges each one onto a ConfigMap holding its build parameters and a Job that runs the ko builder image."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the controller against the current cluster
    Run {
        /// Operator config file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Only watch this namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Print the KoBuilder CustomResourceDefinition as YAML
    Crd,

    /// Print the ConfigMap and Job the operator would create for a manifest
    Render {
        /// KoBuilder manifest (YAML)
        #[arg(short, long)]
        file: PathBuf,

        /// Operator config file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

impl Commands {
    /// Config file named on the command line, if any.
    pub fn config_path(&self) -> Option<&Path> {
        match self {
            Self::Run { config, .. } | Self::Render { config, .. } => config.as_deref(),
            Self::Crd => None,
        }
    }
}
