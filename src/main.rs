use std::{path::PathBuf, sync::Arc};

use agentdesk::{
    client::auth::expiry,
    core::{Credentials, Registration, SessionHandler},
    ApiClient, Config,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use reqwest::Method;
use serde_json::Value;
use tracing::info;

#[derive(Parser)]
#[command(name = "agentdesk", version, about = "Talk to the agent dashboard API")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the token pair
    Login { email: String, password: String },
    /// Create an account and store the token pair
    Register {
        email: String,
        password: String,
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        business_name: Option<String>,
    },
    /// Show the logged in user
    Me,
    /// Forget the stored tokens
    Logout,
    /// Show whether a token is stored and when it expires
    Status,
    /// GET an API path and print the JSON answer
    Get {
        path: String,
        /// Query parameters as key=value
        #[arg(long = "query", short = 'q', value_parser = parse_key_value)]
        query: Vec<(String, String)>,
    },
    /// POST a JSON body (default `{}`) to an API path
    Post { path: String, body: Option<String> },
    /// PATCH an API path with a JSON body
    Patch { path: String, body: Option<String> },
    /// PUT a JSON body to an API path
    Put { path: String, body: Option<String> },
    /// DELETE an API path
    Delete { path: String },
}

struct CliSessionHandler;

impl SessionHandler for CliSessionHandler {
    fn session_expired(&self, _login_route: &str) {
        eprintln!("Session expired. Run `agentdesk login <email> <password>` again.");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if config.token_file.is_none() {
        config.token_file = default_token_file();
    }
    info!(message = "Using API", api_root = %config.api_root());

    let client = ApiClient::builder(config)
        .open_token_file()
        .await
        .session_handler(Arc::new(CliSessionHandler))
        .build()?;

    let output: Value = match cli.command {
        Command::Login { email, password } => {
            client.login(&Credentials { email, password }).await?;
            Value::String("logged in".into())
        }
        Command::Register {
            email,
            password,
            full_name,
            business_name,
        } => {
            let registration = Registration {
                email,
                password,
                full_name,
                business_name,
            };
            client.register(&registration).await?;
            Value::String("registered".into())
        }
        Command::Me => serde_json::to_value(client.me().await?)?,
        Command::Logout => {
            client.logout().await?;
            Value::String("logged out".into())
        }
        Command::Status => {
            let token = client.tokens().access_token().await;
            let threshold = client.config().refresh_threshold.unwrap_or_default();
            serde_json::json!({
                "authenticated": token.is_some(),
                "expires_at": token.as_deref().and_then(expiry::expires_at),
                "expiring_soon": client.is_token_expiring_soon(threshold).await,
            })
        }
        Command::Get { path, query } => {
            if query.is_empty() {
                client.get(&path).await?
            } else {
                client.get_query(&path, &query).await?
            }
        }
        Command::Post { path, body } => send(&client, Method::POST, &path, body).await?,
        Command::Patch { path, body } => send(&client, Method::PATCH, &path, body).await?,
        Command::Put { path, body } => send(&client, Method::PUT, &path, body).await?,
        Command::Delete { path } => client.delete(&path).await?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn send(
    client: &ApiClient,
    method: Method,
    path: &str,
    body: Option<String>,
) -> anyhow::Result<Value> {
    let body = match body {
        Some(body) => serde_json::from_str(&body).context("body is not valid JSON")?,
        None => Value::Object(Default::default()),
    };
    let value = client
        .request(method, path, Some(body), Default::default())
        .await?;
    Ok(value)
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))
}

fn default_token_file() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".agentdesk").join("tokens.json"))
}
