use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use sophrosyne::app::App;
use sophrosyne::grpc_services::GatewayGrpc;
use sophrosyne::{app, handlers, healthcheck};
use sophrosyne_core::config::AppConfig;
use sophrosyne_transport::{
    build_http_router, serve, standard_services, AuthState, HttpFrontConfig, RpcAppState,
};

#[derive(Parser)]
#[command(name = "sophrosyne", version, about = "Policy-driven content-scanning gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config profile to load (`sophrosyne-{profile}.yaml`).
    #[arg(long, global = true, default_value = "local")]
    profile: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/gRPC transport front (default).
    Serve,
    /// Dial the health endpoint and exit with a status-mapped code.
    Healthcheck {
        /// Host:port to dial. Defaults to `server.port` on localhost.
        #[arg(long)]
        addr: Option<String>,
    },
    /// Print a freshly minted raw token without touching the store.
    GenToken,
}

fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("no other crypto provider installed yet");

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    let exit_code = runtime.block_on(run(cli));
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> i32 {
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::GenToken => {
            let raw = sophrosyne_core::token::generate_raw_token();
            use base64::engine::general_purpose::STANDARD;
            use base64::Engine;
            println!("{}", STANDARD.encode(raw));
            0
        }
        Commands::Healthcheck { addr } => {
            let addr = match addr {
                Some(a) => a,
                None => match load_config(&cli.profile) {
                    Ok(config) => format!("127.0.0.1:{}", config.server.port),
                    Err(e) => {
                        eprintln!("{}", format!("Error loading config: {e}").red());
                        return 1;
                    }
                },
            };
            healthcheck::run(&addr).await
        }
        Commands::Serve => serve_command(&cli.profile).await,
    }
}

fn load_config(profile: &str) -> Result<AppConfig, String> {
    sophrosyne_core::config::load(profile).map_err(|e| e.to_string())
}

async fn serve_command(profile: &str) -> i32 {
    let config = match load_config(profile) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", format!("Error loading config: {e}").red());
            return 1;
        }
    };

    sophrosyne_core::init_tracing(&config.tracing.level);

    let (app, root_token) = match App::build(config).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{}", format!("Error building app: {e}").red());
            return 1;
        }
    };

    if let Some(token) = root_token {
        println!("root token (save this, it is shown only once): {token}");
    }

    let mut rpc_router: sophrosyne_rpc::Router<app::AppCtx> = sophrosyne_rpc::Router::new();
    handlers::register(&mut rpc_router);

    let rpc_app_state = Arc::new(RpcAppState {
        router: Arc::new(rpc_router),
        ctx_builder: app.ctx_builder(),
    });

    let auth_state = Arc::new(AuthState {
        store: app.users.clone(),
        site_key: app.site_key.as_ref().clone(),
        salt: app.salt.as_ref().clone(),
        bypass_prefixes: vec!["/healthz".to_string()],
    });

    let http_router = build_http_router(
        rpc_app_state,
        auth_state,
        app.health.clone(),
        app.panic_counter.clone(),
        HttpFrontConfig {
            body_limit_bytes: 2 * 1024 * 1024,
            request_timeout: std::time::Duration::from_secs(30),
        },
    );

    let (health_reporter, health_service, reflection_service) = standard_services();
    health_reporter
        .set_service_status("", tonic_health::ServingStatus::Serving)
        .await;

    let gateway_grpc = Arc::new(GatewayGrpc {
        store: app.users.clone(),
        site_key: app.site_key.clone(),
        salt: app.salt.clone(),
        ctx_builder: app.ctx_builder(),
    });

    let grpc_router = tonic::transport::Server::builder()
        .add_service(health_service)
        .add_service(reflection_service)
        .add_service(
            sophrosyne_gatewayproto::user_service_server::UserServiceServer::from_arc(gateway_grpc.clone()),
        )
        .add_service(
            sophrosyne_gatewayproto::profile_service_server::ProfileServiceServer::from_arc(
                gateway_grpc.clone(),
            ),
        )
        .add_service(
            sophrosyne_gatewayproto::check_service_server::CheckServiceServer::from_arc(gateway_grpc.clone()),
        )
        .add_service(sophrosyne_gatewayproto::scan_service_server::ScanServiceServer::from_arc(gateway_grpc))
        .into_service();

    let tls_config = match build_tls(&app.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}", format!("Error configuring TLS: {e}").red());
            return 1;
        }
    };

    let listen_addr: SocketAddr = match format!("0.0.0.0:{}", app.config.server.port).parse() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{}", format!("Error parsing listen address: {e}").red());
            return 1;
        }
    };

    match serve(listen_addr, tls_config, grpc_router, http_router).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", format!("Server error: {e}").red());
            1
        }
    }
}

fn build_tls(config: &AppConfig) -> Result<Arc<rustls::ServerConfig>, String> {
    use sophrosyne_transport::{generate_dev_cert, load_cert_from_disk, DevKeyType};

    let tls = &config.security.tls;
    let (cert_chain, key) = match (&tls.certificate_path, &tls.key_path) {
        (Some(cert_path), Some(key_path)) => load_cert_from_disk(cert_path, key_path)?,
        _ => {
            tracing::warn!("no TLS certificate configured, generating a self-signed development certificate");
            let (cert, key) = generate_dev_cert(DevKeyType::parse(&tls.key_type), &["localhost".to_string()])?;
            (vec![cert], key)
        }
    };

    sophrosyne_transport::build_server_config(cert_chain, key)
}
