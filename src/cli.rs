use clap::Parser;

#[derive(Parser, Debug, Default)]
#[command(about = concat!(env!("CARGO_CRATE_NAME"), " - realtime social feed in the terminal"))]
pub struct Flags {
    /// display name to act as
    #[arg(long)]
    pub name: Option<String>,

    /// number of posts seeded into the demo store
    #[arg(long)]
    pub seed: Option<usize>,

    /// posts fetched per feed page
    #[arg(long)]
    pub page_size: Option<usize>,

    /// turn off the background activity simulator
    #[arg(long)]
    pub no_simulate: bool,
}

impl Flags {
    /// Parse from `std::env::args_os()`, exit on error.
    // Wraps `clap::Parser` logic without direct trait imports
    pub fn from_args() -> Self {
        Self::parse()
    }
}
