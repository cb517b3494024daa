use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use s3_angular::{
    assembly::{self, Assembly, TemplateFormat},
    deploy,
    logger,
    lookup::{self, ContextProvider, HostedZoneQuery},
    resources::{S3AngularStack, ASSET_DIR, DEFAULT_STACK_NAME},
    variables::{self, Context, Environment, StackConfig},
};

#[derive(Parser)]
#[command(name = "s3_angular")]
#[command(about = "S3 + CloudFront static site stack", long_about = None)]
struct Cli {
    /// context value, eg: `-c subDomain=www`. overrides the context file
    #[arg(short, long = "context", value_name = "KEY=VALUE", global = true)]
    context: Vec<String>,

    #[arg(long, default_value = DEFAULT_STACK_NAME, global = true)]
    stack_name: String,

    /// defaults to the closest cdk.json
    #[arg(long, global = true)]
    context_file: Option<PathBuf>,

    /// variables in here never override ones already set
    #[arg(long, default_value = ".env", global = true)]
    env_file: PathBuf,

    #[arg(long, default_value = ASSET_DIR, global = true)]
    asset_dir: PathBuf,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the cloud assembly without deploying
    Synth {
        #[arg(long, default_value = assembly::DEFAULT_OUT_DIR)]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = TemplateFormat::Json)]
        format: TemplateFormat,
    },
    /// Resolve the hosted zone through Route53 and cache it in cdk.context.json
    Lookup,
    /// Synthesize, then create or update every stack and upload the site
    Deploy {
        #[arg(long, default_value = assembly::DEFAULT_OUT_DIR)]
        out: PathBuf,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<StackConfig> {
    let dot_env = if cli.env_file.is_file() {
        variables::load_dot_env(&cli.env_file)?
    } else {
        HashMap::new()
    };
    let env = Environment::from_env(&dot_env);

    let currdir = std::env::current_dir().context("Failed to get current directory")?;
    let context_file = match &cli.context_file {
        Some(path) => Some(path.clone()),
        None => variables::find_closest_file(currdir, variables::CONTEXT_FILE),
    };
    let mut context = match &context_file {
        Some(path) => Context::from_file(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => Context::new(),
    };
    context.apply_overrides(&cli.context[..])?;
    Ok(StackConfig::from_context(&context, env)?)
}

fn synth(cli: &Cli, config: &StackConfig, out: &Path, format: TemplateFormat) -> anyhow::Result<assembly::Manifest> {
    let zones = ContextProvider::load(Path::new(lookup::CONTEXT_CACHE_FILE))?;
    let stack = S3AngularStack::synthesize(&cli.stack_name, config, &cli.asset_dir, &zones)?;
    let assembly = Assembly::from_stack(&stack)?;
    let manifest = assembly.write(out, format)?;
    for artifact in &manifest.stacks {
        println!("{} ({}) -> {}", artifact.stack_name, artifact.region, out.join(&artifact.template_file).display());
    }
    Ok(manifest)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init_cli_logger(cli.verbose);
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Synth { out, format } => {
            synth(&cli, &config, out, *format)?;
        }
        Commands::Lookup => {
            let query = HostedZoneQuery::new(&cli.stack_name, &config.env, &config.domain_name)?;
            let zone = lookup::lookup_route53(&query).await?;
            let mut cache = ContextProvider::load(Path::new(lookup::CONTEXT_CACHE_FILE))?;
            cache.insert(&query, &zone);
            cache.save()?;
            println!("{} -> {} (saved to {})", zone.name, zone.id, cache.path().display());
        }
        Commands::Deploy { out } => {
            let manifest = synth(&cli, &config, out, TemplateFormat::Json)?;
            let outputs = deploy::deploy_assembly(out, &manifest).await?;
            for artifact in &manifest.stacks {
                if artifact.outputs.is_empty() {
                    continue;
                }
                println!("\nOutputs of {}:", artifact.stack_name);
                let stack_outputs = outputs.get(&artifact.stack_name);
                for name in &artifact.outputs {
                    let value = stack_outputs.and_then(|o| o.get(name)).map(String::as_str).unwrap_or("<missing>");
                    println!("{}.{name} = {value}", artifact.stack_name);
                }
            }
        }
    }
    Ok(())
}
