//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "mmrag",
    version,
    author = "neur0map",
    about = "Multimodal question answering over PDF documents",
    long_about = "mmrag ingests PDFs into text chunks and images, indexes the text for semantic \
                  search, and answers questions with a vision-capable language model using the \
                  retrieved text and the images it references."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/mmrag/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile to apply on top of the config (e.g., "precise", "visual")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest one or more PDF documents
    Ingest {
        /// PDF files to process
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Ask a question about the ingested documents
    Query {
        /// Question to ask
        question: String,

        /// Maximum number of images sent to the model
        #[arg(short, long)]
        max_images: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Semantic search over ingested text without calling the model
    Search {
        /// Search query text
        query: String,

        /// Number of results to return
        #[arg(short, default_value = "5")]
        k: usize,
    },

    /// Drop all indexed text and images and delete the snapshot
    Clear,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_query() {
        let cli = Cli::try_parse_from(["mmrag", "-v", "query", "what is shown?", "-m", "3", "--json"])
            .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Query {
                question,
                max_images,
                json,
            } => {
                assert_eq!(question, "what is shown?");
                assert_eq!(max_images, Some(3));
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_ingest_requires_files() {
        assert!(Cli::try_parse_from(["mmrag", "ingest"]).is_err());
        let cli = Cli::try_parse_from(["mmrag", "ingest", "a.pdf", "b.pdf"]).unwrap();
        assert!(matches!(cli.command, Commands::Ingest { files } if files.len() == 2));
    }
}
