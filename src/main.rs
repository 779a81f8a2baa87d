use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use fieldsync::{config, migrate, observability, registry::Registry, revision::MemoryStore, run};

#[derive(Parser)]
#[command(name = "fieldsync", about = "fieldsync - offline-first record synchronization service")]
struct Cli {
	/// Extra JSON config file layered over the system and user config
	#[arg(long, short, global = true, env = "FWS_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Run the sync API (default)
	Serve,
	/// Apply the revision log schema to the configured database
	Migrate,
	/// Print the source type registry
	Registry,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	let settings = config::load(cli.config.as_deref())?;

	match cli.command.unwrap_or(Commands::Serve) {
		Commands::Serve => {
			let obs = observability::init_observability(settings.log_level)?;
			run(settings, obs.metrics).await
		}
		Commands::Migrate => {
			observability::init_logging(settings.log_level)?;
			migrate(&settings).await
		}
		Commands::Registry => {
			print_registry(&Registry::standard(Arc::new(MemoryStore::new())));
			Ok(())
		}
	}
}

fn print_registry(registry: &Registry) {
	println!(
		"{:<14} {:<10} {:<16} {:<10} {}",
		"NAME", "KIND", "REQUIRED SCOPE", "READ-ONLY", "PRIORITY"
	);
	for d in registry.iter() {
		let mut scope = Vec::new();
		if d.required_scope.project {
			scope.push("project");
		}
		if d.required_scope.profile {
			scope.push("profile");
		}
		println!(
			"{:<14} {:<10} {:<16} {:<10} {}",
			d.name,
			format!("{:?}", d.kind).to_lowercase(),
			if scope.is_empty() { "-".to_string() } else { scope.join(",") },
			d.read_only,
			d.priority
		);
	}
}
