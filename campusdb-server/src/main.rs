use actix_web::{web, App, HttpServer};
use campusdb::{seed, CampusConfig, Store};
use std::path::PathBuf;

mod handlers;

/// Shared application state
pub struct AppState {
    pub store: Store,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();
    log::info!("Starting campusdb server");

    let db_path = std::env::var("CAMPUSDB_DB_PATH").unwrap_or_else(|_| "campusdb.sqlite".to_string());
    let host = std::env::var("CAMPUSDB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("CAMPUSDB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    let store = open_store(&db_path).map_err(|e| {
        log::error!("Failed to open store at {db_path}: {e}");
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;
    let state = web::Data::new(AppState { store });

    log::info!("Listening on {host}:{port}");
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}

/// Open the database, create any missing tables and make sure an admin exists.
fn open_store(db_path: &str) -> campusdb::Result<Store> {
    let config = match std::env::var("CAMPUSDB_CONFIG") {
        Ok(path) => CampusConfig::load(&PathBuf::from(path))?,
        Err(_) => CampusConfig::default(),
    };
    log::info!("Opening store at: {db_path}");
    let store = Store::open(&PathBuf::from(db_path), config)?;
    let created = store.ensure_tables()?;
    if !created.is_empty() {
        log::info!("Created tables: {}", created.join(", "));
    }
    seed::bootstrap_admin(&store)?;
    Ok(store)
}
