use actix_cors::Cors;
use actix_web::middleware::{self, Condition};
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use ingredient_lens::clarifai::ClarifaiClient;
use ingredient_lens::gateway::Gateway;
use ingredient_lens::server;
use ingredient_lens::settings::Settings;
use ingredient_lens::telemetry;
use std::path::PathBuf;
use std::sync::Arc;
use std::{env, process};
use tracing::info;

const USAGE: &str = "usage: ./ingredient-lens [config file]";

fn get_args() -> Option<PathBuf> {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => None,
        2 if args[1] != "-h" && args[1] != "--help" => Some(PathBuf::from(&args[1])),
        _ => {
            println!("{USAGE}");
            process::exit(1);
        }
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    let config_file = get_args();

    let settings = Settings::load(config_file.as_deref())?;
    telemetry::init(&settings.log.filter);
    info!("loaded settings: {settings:?}");

    let client = ClarifaiClient::new(&settings.clarifai).context("failed to build http client")?;
    info!("recognizing with {}", client.url());
    let gateway = web::Data::new(Gateway::new(Arc::new(client)));

    let cors_permissive = settings.server.cors_permissive;
    let addr = settings.bind_addr();
    info!("listening on {addr}");

    // Start the HTTP server
    HttpServer::new(move || {
        App::new()
            .app_data(gateway.clone())
            .wrap(Condition::new(cors_permissive, Cors::permissive()))
            .wrap(middleware::Logger::default())
            .configure(server::configure)
    })
    .bind(&addr)
    .with_context(|| format!("failed to bind {addr}"))?
    .run()
    .await?;

    Ok(())
}
