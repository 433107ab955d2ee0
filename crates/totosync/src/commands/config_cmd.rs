//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", config::effective_path(global).display());
            Ok(())
        }
        ConfigCommand::Show => {
            let resolved = config::resolve(global)?;
            println!("# profile: {}", resolved.name);
            println!("# token: {}", resolved.token_source);
            print!("{}", resolved.profile.to_toml_redacted()?);
            Ok(())
        }
    }
}
