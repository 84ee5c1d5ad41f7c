use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "geoproxy-cli")]
#[command(about = "Command line client for a running geoservice-proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the output formats a WFS offers for a feature type
    OutputFormats {
        /// Configured service name
        service: String,
        /// Feature type name, e.g. myapp:roads
        type_name: String,
    },
    /// Reproject and simplify a WKT geometry
    Geometry {
        /// WKT text
        wkt: String,
        #[arg(long)]
        source_crs: Option<String>,
        #[arg(long)]
        target_crs: Option<String>,
        #[arg(long)]
        simplify: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::OutputFormats { service, type_name } => {
            let res = client
                .get(format!("{}/api/proxy/{}/output-formats", cli.url, service))
                .query(&[("typeName", type_name)])
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Geometry {
            wkt,
            source_crs,
            target_crs,
            simplify,
        } => {
            let res = client
                .post(format!("{}/api/geometry", cli.url))
                .json(&json!({
                    "geometry": wkt,
                    "sourceCrs": source_crs,
                    "targetCrs": target_crs,
                    "simplify": simplify,
                }))
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: proxy returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
