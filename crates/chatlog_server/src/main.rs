#![forbid(unsafe_code)]

mod config;
mod server;
mod util;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::server::control::{HealthState, spawn_control_server};
use crate::server::store::SqlxMessageStore;
use crate::server::supervisor::{StatusBroadcastRx, Supervisor};
use crate::server::worker::WorkerConfig;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: chatlog_server [--config path]\n\
\n\
Options:\n\
\t--config  Config file (default: ~/.chatlog/config.toml)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Option<PathBuf> {
	let mut config_path = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" | "-c" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	config_path
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chatlog_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("chatlog_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

async fn wait_for_shutdown_signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{SignalKind, signal};

		match signal(SignalKind::terminate()) {
			Ok(mut term) => {
				tokio::select! {
					_ = tokio::signal::ctrl_c() => info!("received ctrl-c"),
					_ = term.recv() => info!("received SIGTERM"),
				}
				return;
			}
			Err(e) => warn!(error = %e, "failed to install SIGTERM handler; waiting for ctrl-c only"),
		}
	}

	if let Err(e) = tokio::signal::ctrl_c().await {
		warn!(error = %e, "failed to listen for ctrl-c");
	}
}

fn spawn_status_logger(mut status_rx: StatusBroadcastRx) {
	tokio::spawn(async move {
		loop {
			match status_rx.recv().await {
				Ok(st) => match st.last_error.as_deref() {
					Some(err) => warn!(room = %st.room, state = %st.state, at = %st.time, error = %err, "{}", st.detail),
					None => debug!(room = %st.room, state = %st.state, at = %st.time, "{}", st.detail),
				},
				Err(RecvError::Lagged(n)) => warn!(skipped = n, "worker status logger lagged"),
				Err(RecvError::Closed) => break,
			}
		}
	});
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let config_path = match parse_args() {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let database_url = server_cfg.require_database_url()?;
	let store = SqlxMessageStore::connect(database_url.expose(), server_cfg.persistence.run_migrations).await?;
	info!(backend = store.backend_name(), "message store connected");

	let supervisor = Supervisor::new(WorkerConfig::from(&server_cfg.irc), Arc::new(store.clone()));
	spawn_status_logger(supervisor.subscribe_status());

	let health = HealthState::new();
	let control_shutdown = CancellationToken::new();
	let control_bind: SocketAddr = server_cfg
		.server
		.control_bind
		.parse()
		.with_context(|| format!("invalid server.control_bind {:?}", server_cfg.server.control_bind))?;
	let (control_addr, control_task) =
		spawn_control_server(control_bind, supervisor.clone(), health.clone(), control_shutdown.clone())
			.await
			.context("bind control server")?;
	info!(addr = %control_addr, "control server listening");

	for room in &server_cfg.rooms {
		if let Err(e) = supervisor.start(room.clone()).await {
			warn!(room = %room, error = %e, "failed to start configured room");
		}
	}
	info!(rooms = server_cfg.rooms.len(), endpoint = %server_cfg.irc.endpoint, "chatlog_server: ready");
	health.mark_ready();

	wait_for_shutdown_signal().await;

	health.mark_not_ready();
	supervisor.shutdown().await;
	control_shutdown.cancel();
	if let Err(e) = control_task.await {
		warn!(error = %e, "control server task failed");
	}
	store.close().await;

	info!("chatlog_server: stopped");
	Ok(())
}
