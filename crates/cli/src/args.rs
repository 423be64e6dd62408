use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use fastvlm_config::{
    CommonInferenceArgs, CommonModelArgs, CommonRuntimeArgs, ConfigOverrides,
    build_config_overrides,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "FastVLM inference over ONNX Runtime", long_about = None)]
pub struct Cli {
    /// Configuration file; created with defaults when missing.
    #[arg(long, value_name = "PATH", global = true, help_heading = "Application")]
    pub config: Option<PathBuf>,

    /// Only print the generated text; logs are limited to errors.
    #[arg(short, long, global = true, help_heading = "Application")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Describe an image and print the response.
    Run(RunArgs),
    /// Load the three sessions and print their declared inputs and outputs.
    Inspect(InspectArgs),
}

#[derive(ClapArgs, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub model: CommonModelArgs,

    #[command(flatten)]
    pub runtime: CommonRuntimeArgs,

    #[command(flatten)]
    pub inference: CommonInferenceArgs,

    /// Image file spliced in at the `<image>` token; requests without one are rejected.
    #[arg(long, value_name = "PATH")]
    pub image: Option<PathBuf>,

    /// User prompt.
    #[arg(long)]
    pub prompt: String,
}

#[derive(ClapArgs, Debug)]
pub struct InspectArgs {
    #[command(flatten)]
    pub model: CommonModelArgs,

    #[command(flatten)]
    pub runtime: CommonRuntimeArgs,
}

impl RunArgs {
    pub fn overrides(&self, config: Option<PathBuf>) -> ConfigOverrides {
        build_config_overrides(config, &self.model, &self.runtime, &self.inference)
    }
}

impl InspectArgs {
    pub fn overrides(&self, config: Option<PathBuf>) -> ConfigOverrides {
        build_config_overrides(
            config,
            &self.model,
            &self.runtime,
            &CommonInferenceArgs::default(),
        )
    }
}
