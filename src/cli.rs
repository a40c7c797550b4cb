use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stargazers")]
#[command(about = "Lists the stargazers of a GitHub repository, page by page")]
#[command(version)]
pub struct Cli {
    /// Settings file
    #[arg(long, env = "STARGAZERS_SETTINGS", default_value = "stargazers.json")]
    pub settings: PathBuf,

    /// Stargazers URL template; [owner] and [repo] are substituted
    #[arg(long)]
    pub url: Option<String>,

    /// Repository owner
    #[arg(long)]
    pub owner: Option<String>,

    /// Repository name
    #[arg(long)]
    pub repo: Option<String>,

    /// GitHub personal access token (40 characters)
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Follow pages until the list is exhausted
    #[arg(long)]
    pub load_all: Option<bool>,

    /// Seconds to wait after each page response
    #[arg(long)]
    pub load_delay: Option<f64>,

    /// Seconds to wait after each avatar response
    #[arg(long)]
    pub avatar_delay: Option<f64>,

    /// Seconds before the loading indicator appears
    #[arg(long)]
    pub spinner_delay: Option<f64>,

    /// Visible rows; sets the page size outside load-all mode
    #[arg(long, default_value_t = 20)]
    pub rows: usize,

    /// Extra pages to request after the first one
    #[arg(long, default_value_t = 0)]
    pub pages: usize,

    /// Avatar edge length in pixels
    #[arg(long, default_value_t = 32)]
    pub avatar_size: u32,

    /// Check the source with a one-item request even if it did not change
    #[arg(long)]
    pub verify: bool,

    /// Write the effective settings back to the settings file
    #[arg(long)]
    pub save: bool,

    /// Save even when the check request fails
    #[arg(long)]
    pub force: bool,
}
