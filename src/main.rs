use anyhow::Context;
use clap::{Parser, Subcommand};
use fleet_sdk::k8s::cache::{FleetResourceCache, FleetWatcher, WatchResource};
use fleet_sdk::k8s::clusters::list_fleet_cluster_names;
use fleet_sdk::k8s::fleet_config::FleetConfigService;
use fleet_sdk::k8s::hub::HubClient;
use fleet_sdk::k8s::search::{SearchFilter, fleet_search};
use fleet_sdk::k8s::request::{FetchClient, HttpTransport, ReqwestTransport};
use fleet_sdk::k8s::selector::LabelSelector;
use fleet_sdk::k8s::session::{LogNavigator, LogoutSequence};
use fleet_sdk::k8s::watch::{PageLocation, TungsteniteTransport, WatchSocketFactory};
use fleet_sdk::k8s::client;
use fleet_sdk::{AccessReviewKey, AccessReviewer, FleetClient, FleetRequest, FleetSdkConfig, ResourceModel};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect fleet resources through the cluster proxy", long_about = None)]
struct Args {
    /// Bearer token for the console and the hub
    #[arg(long, env = "FLEET_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct ResourceArgs {
    /// Plural resource name, e.g. `pods`
    plural: String,

    /// Resource kind, e.g. `Pod`
    #[arg(long)]
    kind: String,

    #[arg(long, default_value = "v1")]
    api_version: String,

    #[arg(long)]
    group: Option<String>,

    #[arg(short, long)]
    namespace: Option<String>,

    /// Target cluster; the hub when omitted
    #[arg(short, long)]
    cluster: Option<String>,

    #[arg(long)]
    cluster_scoped: bool,
}

impl ResourceArgs {
    fn model(&self) -> ResourceModel {
        let model = ResourceModel::new(&self.api_version, &self.kind, &self.plural, !self.cluster_scoped);
        match &self.group {
            Some(group) => model.with_group(group),
            None => model,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Get one resource, or list the collection when no name is given
    Get {
        #[command(flatten)]
        resource: ResourceArgs,
        name: Option<String>,
    },
    /// Print every change of a watched resource until interrupted
    Watch {
        #[command(flatten)]
        resource: ResourceArgs,
        #[arg(long)]
        name: Option<String>,
        /// Label selector as `key=value`, repeatable
        #[arg(short = 'l', long = "selector")]
        labels: Vec<String>,
    },
    /// Ask whether the current user may perform an action
    CanI {
        verb: String,
        resource: String,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        subresource: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long)]
        namespace: Option<String>,
        #[arg(short, long)]
        cluster: Option<String>,
    },
    /// Search the fleet through the search API
    Search {
        #[command(flatten)]
        resource: ResourceArgs,
        #[arg(long)]
        name: Option<String>,
        /// Extra filter as `property=value[,value]`, repeatable
        #[arg(short, long = "filter")]
        filters: Vec<String>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// List clusters reachable through the cluster proxy
    Clusters {
        /// Include clusters without an available proxy
        #[arg(long)]
        all: bool,
    },
}

struct Fleet {
    client: FleetClient,
    watcher: FleetWatcher,
    fleet_config: Arc<FleetConfigService>,
}

async fn connect(config: &FleetSdkConfig) -> anyhow::Result<Fleet> {
    let transport: Arc<dyn HttpTransport> = Arc::new(
        ReqwestTransport::new(&config.console_origin, &config.user_agent)?.with_bearer_token(config.bearer_token.clone()),
    );
    let logout = LogoutSequence::new(Arc::clone(&transport), Arc::new(LogNavigator), &config.backend_path);
    let fetch = FetchClient::new(transport)
        .with_session_notifier(Arc::new(logout))
        .with_default_retries(config.request_retries)
        .with_default_delay(config.request_delay);

    let fleet_config = Arc::new(
        FleetConfigService::new(fetch.clone(), &config.backend_path).with_hub_override(config.hub_cluster.clone()),
    );
    let hub: Arc<dyn HubClient> = Arc::new(
        client::hub_client(Some(config.user_agent.as_str()))
            .await
            .context("could not create the hub client")?,
    );

    let sockets = WatchSocketFactory::new(
        Arc::new(TungsteniteTransport::new(&config.user_agent).with_bearer_token(config.bearer_token.clone())),
        PageLocation::from_url(&config.console_origin)?,
        &config.backend_path,
    )
    .with_hub(config.hub_cluster.clone());

    let cache = Arc::new(FleetResourceCache::new(config.cache));
    let watcher = FleetWatcher::new(
        cache,
        fetch.clone(),
        sockets,
        Arc::clone(&hub),
        Arc::clone(&fleet_config),
        &config.backend_path,
    );
    let client = FleetClient::new(fetch, hub, Arc::clone(&fleet_config), &config.backend_path);

    Ok(Fleet {
        client,
        watcher,
        fleet_config,
    })
}

fn label_selector(labels: &[String]) -> anyhow::Result<Option<LabelSelector>> {
    if labels.is_empty() {
        return Ok(None);
    }
    let pairs = labels
        .iter()
        .map(|label| {
            label
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("selector {label:?} is not key=value"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Some(LabelSelector::from_labels(pairs)))
}

fn search_filters(filters: &[String]) -> anyhow::Result<Vec<SearchFilter>> {
    filters
        .iter()
        .map(|filter| {
            let (property, values) = filter
                .split_once('=')
                .with_context(|| format!("filter {filter:?} is not property=value"))?;
            Ok(SearchFilter::new(property, values.split(',')))
        })
        .collect()
}

fn watch_target(resource: &ResourceArgs, name: Option<&str>) -> WatchResource {
    let mut target = match name {
        Some(name) => WatchResource::single(resource.model(), name),
        None => WatchResource::list(resource.model()),
    };
    if let Some(ns) = &resource.namespace {
        target = target.namespace(ns);
    }
    if let Some(cluster) = &resource.cluster {
        target = target.cluster(cluster);
    }
    target
}

async fn run(fleet: Fleet, command: Command, config: &FleetSdkConfig) -> anyhow::Result<()> {
    match command {
        Command::Get { resource, name } => {
            let mut request = FleetRequest::new(resource.model());
            request.ns = resource.namespace.clone();
            request.cluster = resource.cluster.clone();
            request.name = name;
            let value = fleet.client.fleet_get(&request).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Watch { resource, name, labels } => {
            let _poll = fleet.fleet_config.poll_until_loaded(config.hub_poll_interval);

            let mut target = watch_target(&resource, name.as_deref());
            if let Some(selector) = label_selector(&labels)? {
                target = target.selector(selector);
            }

            let mut handle = fleet.watcher.watch(Some(target)).await;
            loop {
                let state = handle.state();
                if let Some(e) = &state.load_error {
                    anyhow::bail!("watch failed: {e}");
                }
                if state.loaded {
                    info!("👁️ {} object(s)", state.data.len());
                    println!("{}", serde_json::to_string(&state.data.to_value())?);
                }
                tokio::select! {
                    changed = handle.changed() => {
                        if !changed {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            debug!("🛑 Watch stopped");
        }
        Command::CanI {
            verb,
            resource,
            group,
            subresource,
            name,
            namespace,
            cluster,
        } => {
            let key = AccessReviewKey {
                group,
                resource,
                subresource,
                verb,
                name,
                namespace,
                cluster,
            };
            let check = AccessReviewer::new(fleet.client).check(&key).await;
            println!("{}", if check.is_allowed { "yes" } else { "no" });
        }
        Command::Search {
            resource,
            name,
            filters,
            limit,
        } => {
            let target = watch_target(&resource, name.as_deref());
            let filters = search_filters(&filters)?;
            if let Some(found) = fleet_search(&fleet.client, Some(&target), &filters, limit).await? {
                info!("🔎 {} result(s)", found.len());
                println!("{}", serde_json::to_string_pretty(&found.to_value())?);
            }
        }
        Command::Clusters { all } => {
            for name in list_fleet_cluster_names(&fleet.client, all).await? {
                println!("{name}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let args = Args::parse();
    let config = FleetSdkConfig::from_env()?.with_bearer_token(args.token);
    let fleet = connect(&config).await?;
    run(fleet, args.command, &config).await
}
