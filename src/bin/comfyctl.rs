use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use comfyui_job_gateway::comfyui::{Engine, FileType, HistoryOutcome, OutputFile};
use comfyui_job_gateway::output::OutputPayload;
use comfyui_job_gateway::service::GenerateRequest;
use comfyui_job_gateway::utils::prompt_ops::{parse_set_pairs, parse_value};
use comfyui_job_gateway::{ComfyUIClient, Config, Gateway, TemplateStore};
use serde_json::{json, Map, Value};

#[derive(Parser, Debug)]
#[command(name = "comfyctl", about = "CLI for the ComfyUI job gateway", version)]
struct Cli {
    /// Override COMFYUI_URL
    #[arg(global = true, long)]
    comfyui_url: Option<String>,

    /// Override WORKFLOWS_DIR
    #[arg(global = true, long, value_name = "DIR")]
    workflows_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Workflow template inspection
    Templates {
        #[command(subcommand)]
        cmd: TemplatesCmd,
    },
    /// Submit a template with overrides
    Generate {
        /// Template name under WORKFLOWS_DIR
        #[arg(long)]
        template: String,
        /// Node overrides as NODE.FIELD=VALUE (repeatable), e.g. `3.seed=42`
        #[arg(long = "set", value_name = "NODE.FIELD=VALUE")]
        sets: Vec<String>,
        /// Named parameters as NAME=VALUE (repeatable), e.g. `width=512`
        #[arg(long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
        /// Block until the job finishes
        #[arg(long)]
        wait: bool,
        /// Directory to write outputs into (implies --wait)
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
        /// Print the submitted overrides before sending
        #[arg(short, long)]
        verbose: bool,
    },
    /// Check an engine prompt once
    Status {
        prompt_id: String,
    },
    /// Download a file from the engine
    Fetch {
        #[arg(long)]
        filename: String,
        #[arg(long, default_value = "")]
        subfolder: String,
        #[arg(long = "type", default_value = "output")]
        file_type: String,
        /// Output path (defaults to ./<filename>)
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum TemplatesCmd {
    /// List template names
    List,
    /// Show a template's nodes and their inputs
    Show {
        name: String,
        /// Output raw JSON instead of pretty lines
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load env and parse CLI
    Config::dotenv_load();
    let cli = Cli::parse();

    let mut conf = Config::new()?;
    if let Some(url) = cli.comfyui_url {
        conf.comfyui_url = url;
    }
    if let Some(dir) = cli.workflows_dir {
        conf.workflows_dir = dir;
    }

    match cli.command {
        Commands::Templates { cmd } => {
            let store = TemplateStore::new(conf.workflows_dir.clone());
            match cmd {
                TemplatesCmd::List => {
                    for name in store.list().await? {
                        println!("{}", name);
                    }
                }
                TemplatesCmd::Show { name, json } => {
                    let info = store.load(&name).await?.node_info();
                    if json {
                        println!("{}", serde_json::to_string_pretty(&info)?);
                    } else {
                        for (id, node) in info {
                            let title = node.title.map(|t| format!(" \"{}\"", t)).unwrap_or_default();
                            println!("{:>4}  {}{}  [{}]", id, node.class_type, title, node.inputs.join(", "));
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::Generate { template, sets, params, wait, out, verbose } => {
            let node_updates = parse_set_pairs(&sets)?;
            let mut named = Map::new();
            for pair in &params {
                let Some((k, v)) = pair.split_once('=') else {
                    eprintln!("Invalid --param '{}', expected NAME=VALUE", pair);
                    std::process::exit(2);
                };
                named.insert(k.to_string(), parse_value(v));
            }
            if verbose {
                eprintln!("[verbose] node_updates: {}", serde_json::to_string_pretty(&node_updates)?);
            }
            let request = GenerateRequest {
                template: Some(template),
                node_updates,
                params: named,
                ..GenerateRequest::default()
            };

            let gateway = Arc::new(Gateway::from_config(&conf)?);
            let submitted = match gateway.submit(request).await {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    if let Value::Object(body) = e.to_body() {
                        if let Some(details) = body.get("details") {
                            eprintln!("{}", serde_json::to_string_pretty(details)?);
                        }
                    }
                    std::process::exit(1);
                }
            };
            println!("{}", json!({"job_id": submitted.job.id(), "prompt_id": submitted.job.prompt_id()}));
            if !wait && out.is_none() {
                return Ok(());
            }

            let done = gateway.run_to_completion(submitted.job.id()).await?;
            println!("{}", serde_json::to_string_pretty(&done.job)?);
            if let Some(dir) = out {
                tokio::fs::create_dir_all(&dir).await?;
                for output in done.outputs {
                    match output.payload {
                        OutputPayload::Inline(bytes) => {
                            let path = dir.join(&output.filename);
                            tokio::fs::write(&path, &bytes).await?;
                            println!("Saved {} ({} bytes)", path.display(), bytes.len());
                        }
                        OutputPayload::Url(url) => println!("Stored {} at {}", output.filename, url),
                    }
                }
            }
            if let Some(delivery) = done.webhook {
                if !delivery.await.unwrap_or(false) {
                    eprintln!("Warning: webhook was not delivered");
                }
            }
            if !done.job.status().is_terminal() || done.job.error().is_some() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Status { prompt_id } => {
            let client = ComfyUIClient::new(&conf.comfyui_url, conf.request_timeout)?;
            match client.history(&prompt_id).await? {
                None => println!("pending (no history record for {})", prompt_id),
                Some(entry) => match entry.outcome() {
                    HistoryOutcome::Pending => println!("pending"),
                    HistoryOutcome::Failed(message) => println!("failed: {}", message),
                    HistoryOutcome::Completed(files) => {
                        println!("completed");
                        for f in files {
                            println!("  {}  {}", f.filename, client.view_url(&f));
                        }
                    }
                },
            }
            Ok(())
        }
        Commands::Fetch { filename, subfolder, file_type, out } => {
            let client = ComfyUIClient::new(&conf.comfyui_url, conf.request_timeout)?;
            let file = OutputFile::new(filename.clone(), subfolder, FileType::parse(&file_type)?);
            let bytes = client.view(&file).await.map_err(|e| {
                eprintln!("Error: {}", e);
                e
            })?;
            let path = out.unwrap_or_else(|| PathBuf::from(&filename));
            tokio::fs::write(&path, &bytes).await?;
            println!("Saved {} ({} bytes)", path.display(), bytes.len());
            Ok(())
        }
    }
}
