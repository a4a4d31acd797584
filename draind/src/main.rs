//! Entrypoint: load config, build every collaborator, wire sources into the
//! Dispatcher/Handler, and serve `/metrics` + `/healthz`.
//!
//! CLI parsing is hand-rolled (`std::env::args`) rather than reaching for
//! `clap`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use draind_cloud::{ImdsClient, LifecycleHttpClient, SqsLikeQueueClient};
use draind_config::EngineConfig;
use draind_engine::{Dispatcher, Handler, HandlerConfig};
use draind_metrics::Metrics;
use draind_node::KubeNodeClient;
use draind_sources::{QueueSource, RebalanceRecommendationSource, ScheduledEventSource, SpotInterruptionSource, TargetLifecycleStateSource};
use draind_store::{Store, StoreConfig};
use draind_types::{CancelEvent, EventSource, InterruptionEvent, NodeClient};
use draind_webhook::{Notifier, WebhookNotifier};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "draind exited with an error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = load_config()?;
    tracing::info!(workers = config.workers, cordon_only = config.cordon_only, "starting draind");

    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(Store::new(StoreConfig {
        node_termination_grace_period: std::time::Duration::from_secs(config.node_termination_grace_period),
        ..StoreConfig::default()
    }));
    for event_id in &config.ignored_events {
        store.ignore(event_id).await?;
    }

    let node_client: Arc<dyn NodeClient> = Arc::new(KubeNodeClient::try_new("draind").await.map_err(|e| e.to_string())?);
    let imds = Arc::new(ImdsClient::with_base_url(config.imds_base_url.clone()));

    let node_name = std::env::var("DRAIND_NODE_NAME").unwrap_or_else(|_| imds_node_name_fallback());

    let stop = CancellationToken::new();
    let (interrupt_tx, interrupt_rx) = mpsc::channel::<InterruptionEvent>(256);
    let (cancel_tx, cancel_rx) = mpsc::channel::<CancelEvent>(256);

    let mut source_handles = Vec::new();
    let mut sources: Vec<Arc<dyn EventSource>> = Vec::new();

    if config.enable_spot_interruption_draining {
        sources.push(Arc::new(SpotInterruptionSource::new(imds.clone(), node_name.clone())));
    }
    if config.enable_scheduled_event_draining {
        sources.push(Arc::new(ScheduledEventSource::new(imds.clone(), node_name.clone())));
    }
    if config.enable_rebalance_monitoring {
        sources.push(Arc::new(RebalanceRecommendationSource::new(imds.clone(), node_name.clone())));
    }
    if config.enable_asg_lifecycle_draining && config.queue_base_url.is_empty() {
        sources.push(Arc::new(TargetLifecycleStateSource::new(imds.clone(), node_name.clone())));
    }

    let enable_queue_processing = config.enable_sqs_termination_draining || config.enable_asg_lifecycle_draining;
    let queue_client: Option<Arc<dyn draind_cloud::QueueClient>> = if enable_queue_processing {
        Some(Arc::new(SqsLikeQueueClient::new(config.queue_base_url.clone())))
    } else {
        None
    };
    if let Some(queue_client) = &queue_client {
        sources.push(Arc::new(QueueSource::new(queue_client.clone(), node_client.clone(), config.use_provider_id, config.delete_sqs_msg_if_node_not_found)));
    }

    let lifecycle_client: Option<Arc<dyn draind_cloud::LifecycleClient>> = if config.enable_asg_lifecycle_draining {
        Some(Arc::new(LifecycleHttpClient::new(config.lifecycle_base_url.clone())))
    } else {
        None
    };

    for source in sources {
        let interrupt_tx = interrupt_tx.clone();
        let cancel_tx = cancel_tx.clone();
        let stop = stop.clone();
        let metrics = metrics.clone();
        source_handles.push(tokio::spawn(async move {
            let name = source.name().to_string();
            if let Err(e) = source.run(interrupt_tx, cancel_tx, stop).await {
                metrics.source_errors_total.with_label_values(&[&name]).inc();
                tracing::error!(source = %name, error = %e, "event source exited with an error");
            }
        }));
    }
    drop(interrupt_tx);
    drop(cancel_tx);

    let notifier: Option<Arc<dyn Notifier>> = if config.webhook_url.is_empty() {
        None
    } else {
        Some(Arc::new(WebhookNotifier::new(config.webhook_url.clone(), Vec::new(), DEFAULT_WEBHOOK_TEMPLATE)))
    };

    let gate = Arc::new(Notify::new());
    let dispatcher = Dispatcher::new(store.clone(), node_client.clone(), gate.clone());
    let dispatcher_stop = stop.clone();
    let dispatcher_handle = tokio::spawn(async move { dispatcher.run(interrupt_rx, cancel_rx, dispatcher_stop).await });

    let handler_config = HandlerConfig {
        cordon_only: config.cordon_only,
        enable_rebalance_draining: config.enable_rebalance_draining,
        enable_rebalance_monitoring: config.enable_rebalance_monitoring,
        enable_queue_processing,
        delete_sqs_msg_if_node_not_found: config.delete_sqs_msg_if_node_not_found,
        enable_out_of_service_taint: config.enable_out_of_service_taint,
        workers: config.workers,
        pod_termination_grace_period: config.pod_termination_grace_period,
        node_termination_grace_period: config.node_termination_grace_period,
        heartbeat_interval_secs: config.heartbeat_interval_secs,
        heartbeat_until_secs: config.heartbeat_until_secs,
    };
    let handler = Handler::new(store.clone(), node_client.clone(), queue_client, lifecycle_client, notifier, metrics.clone(), handler_config, gate);
    let handler_stop = stop.clone();
    let handler_handle = tokio::spawn(async move { handler.run(handler_stop).await });

    let http_stop = stop.clone();
    let http_handle = tokio::spawn(serve_http(config.metrics_bind_addr.clone(), metrics, http_stop));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }
    stop.cancel();

    let _ = dispatcher_handle.await;
    let _ = handler_handle.await;
    let _ = http_handle.await;
    for handle in source_handles {
        let _ = handle.await;
    }
    Ok(())
}

const DEFAULT_WEBHOOK_TEMPLATE: &str = r#"{"event_id":"{{event_id}}","kind":"{{kind}}","node_name":"{{node_name}}","description":"{{description}}","start_time":"{{start_time}}"}"#;

fn imds_node_name_fallback() -> String {
    tracing::warn!("DRAIND_NODE_NAME unset; instance-metadata sources will report an empty node name until the cluster join label is observed");
    String::new()
}

fn load_config() -> Result<EngineConfig, Box<dyn std::error::Error + Send + Sync>> {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--config" => {
                config_path = Some(args.next().ok_or("missing value for --config")?);
            }
            other => return Err(format!("unknown flag: {other}").into()),
        }
    }

    let config = match config_path {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::from_env()?,
    };
    Ok(config)
}

async fn serve_http(bind_addr: String, metrics: Arc<Metrics>, stop: CancellationToken) {
    let addr: SocketAddr = match bind_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(bind_addr, error = %e, "invalid metrics_bind_addr, HTTP server disabled");
            return;
        }
    };

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle_request(req, metrics.clone()))) }
    });

    let server = Server::bind(&addr).serve(make_svc);
    let graceful = server.with_graceful_shutdown(async move { stop.cancelled().await });
    if let Err(e) = graceful.await {
        tracing::error!(error = %e, "metrics server exited with an error");
    }
}

async fn handle_request(req: Request<Body>, metrics: Arc<Metrics>) -> Result<Response<Body>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => Response::new(Body::from(metrics.render())),
        "/healthz" => Response::new(Body::from("ok")),
        _ => Response::builder().status(404).body(Body::from("not found")).unwrap(),
    };
    Ok(response)
}
