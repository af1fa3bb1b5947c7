use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "spectra",
    bin_name = "spectra",
    version,
    disable_help_subcommand = true
)]
#[command(about = "Inspect and maintain a spectra metadata store", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database file (defaults to the configured `database`)
    #[arg(long, global = true, value_name = "PATH", help_heading = "Options")]
    pub db: Option<PathBuf>,

    /// Verbose output (debug logging on stderr)
    #[arg(short, long, global = true, help_heading = "Options")]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List attribute definitions
    #[command(display_order = 1)]
    Attributes {
        /// Only attributes in this category
        #[arg(long)]
        category: Option<String>,
    },

    /// List campaigns
    #[command(alias = "ls", display_order = 2)]
    Campaigns,

    /// Create a campaign
    #[command(display_order = 3)]
    CreateCampaign {
        name: String,

        /// Filesystem path the campaign's data was imported from
        #[arg(long)]
        path: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Create (or find) a hierarchy path such as `Site/Plot/Leaf`
    #[command(display_order = 4)]
    Mkpath { campaign: i64, path: String },

    /// Show a campaign's hierarchy and records
    #[command(display_order = 5)]
    Tree { campaign: i64 },

    /// Run a JSON query
    #[command(display_order = 10)]
    Query {
        /// Query document, e.g. '{"predicate": {"and": []}}'
        json: String,

        /// Print the number of matches instead of the ids
        #[arg(long)]
        count: bool,
    },

    /// Report where records agree or conflict
    #[command(display_order = 11)]
    Conflicts {
        /// Record ids
        #[arg(long, required = true, value_delimiter = ',')]
        records: Vec<i64>,

        /// Fields to compare (all attributes when omitted)
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },

    /// Delete a hierarchy node with everything below it
    #[command(display_order = 20)]
    DeleteNode {
        id: i64,

        /// Ignore visibility restrictions
        #[arg(long)]
        privileged: bool,
    },

    /// Delete a campaign with its whole hierarchy
    #[command(display_order = 21)]
    DeleteCampaign {
        id: i64,

        /// Ignore visibility restrictions
        #[arg(long)]
        privileged: bool,
    },

    /// Show the resolved configuration
    #[command(display_order = 30)]
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["spectra"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = parse(&["campaigns", "--db", "x.db", "-v"]);
        assert!(matches!(cli.command, Commands::Campaigns));
        assert_eq!(cli.db, Some(PathBuf::from("x.db")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_conflicts_lists_are_comma_separated() {
        let cli = parse(&["conflicts", "--records", "1,2,3", "--fields", "species,height"]);
        match cli.command {
            Commands::Conflicts { records, fields } => {
                assert_eq!(records, vec![1, 2, 3]);
                assert_eq!(fields, vec!["species", "height"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_conflicts_requires_records() {
        assert!(Cli::try_parse_from(["spectra", "conflicts"]).is_err());
    }

    #[test]
    fn test_delete_flags() {
        let cli = parse(&["delete-node", "7", "--privileged"]);
        assert!(matches!(
            cli.command,
            Commands::DeleteNode {
                id: 7,
                privileged: true
            }
        ));
    }
}
