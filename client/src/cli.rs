use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{MessageResponse, SubmitResponse, TaskStatusView, API_KEY_HEADER};
use reqwest::{header, Client, Response};
use std::{env, path::PathBuf};

/// Igual que en el worker:
/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "CLI simple para subir hojas de reservas al master")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Sube un CSV de reservas y devuelve el id de la tarea
    Submit {
        #[arg(value_name = "ARCHIVO_CSV")]
        file: PathBuf,
    },
    /// Consulta el estado de una tarea
    Status {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },
    /// Descarga el reporte de errores de una tarea
    Report {
        #[arg(value_name = "TASK_ID")]
        id: String,

        /// Ruta de salida (por defecto el nombre que sugiere el master)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// Nombre de archivo del header `Content-Disposition`, si viene.
fn attachment_name(resp: &Response) -> Option<String> {
    let value = resp
        .headers()
        .get(header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;
    parse_attachment_name(value)
}

fn parse_attachment_name(value: &str) -> Option<String> {
    value
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

async fn fail_with_body(resp: Response) -> Result<()> {
    let status = resp.status();
    let message = match resp.json::<MessageResponse>().await {
        Ok(body) => body.message,
        Err(_) => String::new(),
    };
    bail!("el master respondió {}: {}", status, message)
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = master_base_url();
    let api_key = env::var("API_KEY").context("falta la variable de entorno API_KEY")?;

    match cli.command {
        Commands::Submit { file } => {
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("no se pudo leer {}", file.display()))?;

            let url = format!("{}/api/v1/tasks/upload", base_url);
            let resp = client
                .post(&url)
                .header(API_KEY_HEADER, &api_key)
                .header(header::CONTENT_TYPE, "text/csv")
                .body(content)
                .send()
                .await?;

            if !resp.status().is_success() {
                return fail_with_body(resp).await;
            }
            let SubmitResponse { task_id } = resp.json().await?;
            println!("Tarea creada:");
            println!("  id: {}", task_id);
        }

        Commands::Status { id } => {
            let url = format!("{}/api/v1/tasks/status/{}", base_url, id);
            let resp = client
                .get(&url)
                .header(API_KEY_HEADER, &api_key)
                .send()
                .await?;

            if !resp.status().is_success() {
                return fail_with_body(resp).await;
            }
            let task: TaskStatusView = resp.json().await?;
            println!("Tarea:");
            println!("  id: {}", task.task_id);
            println!("  estado: {:?}", task.status);
            println!("  creada: {}", task.created_at);
            if let Some(started) = task.started_at {
                println!("  iniciada: {}", started);
            }
            if let Some(finished) = task.finished_at {
                println!("  finalizada: {}", finished);
            }
            println!("  filas procesadas: {}", task.processed_rows);
            println!("  errores: {}", task.errors.len());
            for e in task.errors.iter().take(10) {
                match e.row {
                    Some(row) => println!("    - fila {}: {}", row, e.error),
                    None => println!("    - {}", e.error),
                }
            }
            if task.errors.len() > 10 {
                println!("    ... (ver el reporte completo)");
            }
        }

        Commands::Report { id, out } => {
            let url = format!("{}/api/v1/tasks/report/{}", base_url, id);
            let resp = client
                .get(&url)
                .header(API_KEY_HEADER, &api_key)
                .send()
                .await?;

            if !resp.status().is_success() {
                return fail_with_body(resp).await;
            }

            match attachment_name(&resp) {
                // Sin adjunto: el master responde con un mensaje
                None => {
                    let MessageResponse { message } = resp.json().await?;
                    println!("{}", message);
                }
                Some(name) => {
                    let path = out.unwrap_or_else(|| PathBuf::from(name));
                    let bytes = resp.bytes().await?;
                    tokio::fs::write(&path, &bytes)
                        .await
                        .with_context(|| format!("no se pudo escribir {}", path.display()))?;
                    println!("Reporte guardado en {}", path.display());
                }
            }
        }
    }

    Ok(())
}
