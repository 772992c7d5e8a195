use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use namedql::mapping::MappingBuilder;
use namedql::querier::{BuilderContext, BuilderRegistry};
use namedql::statement::normalize_positional;
use namedql::{QuerierResolver, QueryParameter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "namedql")]
#[command(about = "Named query mappings: validate, list and dry-run render", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load descriptors and report every mapping problem
    Validate {
        /// Descriptor files (.toml or .json)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List the versioned names of all queries
    List {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Build a querier and print its statement and bound values
    Render {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Versioned query name (name or name:version)
        #[arg(short, long)]
        query: String,

        /// Criteria as a JSON object
        #[arg(short, long, default_value = "{}")]
        param: String,

        /// Context as a JSON object
        #[arg(long, default_value = "null")]
        context: String,
    },
}

fn load(files: &[PathBuf]) -> MappingBuilder {
    let mut builder = MappingBuilder::new();
    for file in files {
        builder.load_file(file);
    }
    builder
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "namedql=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match args.command {
        Command::Validate { files } => {
            let builder = load(&files);
            let problems = builder.validate();
            if problems.is_empty() {
                println!("{} queries OK", builder.len());
                return Ok(());
            }
            for problem in &problems {
                println!("{}", problem);
            }
            anyhow::bail!("{} mapping problems found", problems.len());
        }
        Command::List { files } => {
            let mappings = load(&files).build()?;
            for query in mappings.get_queries() {
                println!(
                    "{}\t{}\t{} fetch queries",
                    query.versioned_name(),
                    query.script().kind(),
                    query.fetch_queries().len()
                );
            }
        }
        Command::Render {
            files,
            query,
            param,
            context,
        } => {
            let mappings = load(&files).build()?;
            let criteria: serde_json::Value = serde_json::from_str(&param)?;
            let context: serde_json::Value = serde_json::from_str(&context)?;

            let resolver = QuerierResolver::new(
                Arc::new(mappings),
                BuilderRegistry::default(),
                BuilderContext::default(),
            );
            resolver.init();
            let querier = resolver.resolve(&query, QueryParameter::new(criteria).with_context(context))?;
            let normalized = normalize_positional(querier.script(), querier.script_parameter())?;
            resolver.shutdown();

            let output = serde_json::json!({
                "query": querier.name(),
                "statement": normalized.statement,
                "args": normalized.args,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
