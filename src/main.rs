//! ONTAP NAS Admin
//!
//! Command line front end: clone refresh of a replication destination,
//! volume configuration, directory service integration and S3 endpoints.
//! Reports are printed to stdout as JSON; logs go to stderr.

use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ontap_nas_admin::domain::ports::{
    NasServicesPortRef, NasSettings, ObjectStorePortRef, ReplicationPortRef, SecurityStyle,
    UnixPermissions, VolumePortRef,
};
use ontap_nas_admin::{
    AppConfig, CloneRefreshConfig, CloneRefreshWorkflow, DirectoryServiceConfigurator, Error,
    ObjectStoreProvisioner, OntapClient, ResyncPolicy, Result, SimulatedCluster,
    VolumeCreateOptions, VolumeManager,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// ONTAP NAS Admin - mirror-break-and-clone refresh and NAS provisioning
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cluster management endpoint
    #[arg(long, env = "ONTAP_HOST")]
    host: Option<String>,

    /// Management user
    #[arg(long, env = "ONTAP_USER")]
    user: Option<String>,

    /// Management password
    #[arg(long, env = "ONTAP_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// YAML configuration file
    #[arg(long, env = "ONTAP_ADMIN_CONFIG")]
    config: Option<PathBuf>,

    /// Verify the endpoint's TLS certificate
    #[arg(long)]
    verify_tls: bool,

    /// Run against an in-memory demo cluster instead of a real endpoint
    #[arg(long)]
    simulate: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Break the mirror of a destination volume and recreate its clone
    CloneRefresh(CloneRefreshArgs),

    /// Volume configuration
    Volume {
        /// SVM owning the volumes
        #[arg(long, env = "ONTAP_SVM")]
        svm: String,

        #[command(subcommand)]
        action: VolumeCommand,
    },

    /// Directory service integration
    Directory {
        #[command(subcommand)]
        action: DirectoryCommand,
    },

    /// S3 object storage endpoints
    S3 {
        #[command(subcommand)]
        action: S3Command,
    },
}

#[derive(ClapArgs, Debug)]
struct CloneRefreshArgs {
    /// SVM owning the destination volume
    #[arg(long)]
    svm: Option<String>,

    /// Destination volume of the mirror
    #[arg(long)]
    volume: Option<String>,

    /// Name of the clone to (re)create
    #[arg(long)]
    clone_name: Option<String>,

    /// Junction path of the clone
    #[arg(long)]
    junction_path: Option<String>,

    /// Clone a broken-off destination as is instead of resynchronising it
    #[arg(long)]
    skip_resync: bool,

    /// Seconds between relationship reads while waiting for a transfer
    #[arg(long)]
    sync_interval_secs: Option<u64>,

    /// Relationship reads before the wait gives up
    #[arg(long)]
    sync_max_attempts: Option<u32>,

    /// Wall-clock limit of the wait in seconds
    #[arg(long)]
    sync_deadline_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum VolumeCommand {
    /// Create a volume
    Create {
        #[arg(long)]
        name: String,

        #[arg(long)]
        aggregate: String,

        /// Size in MiB
        #[arg(long)]
        size_mb: u64,

        /// Defaults to /<name>
        #[arg(long)]
        junction_path: Option<String>,

        #[arg(long, default_value = "unix")]
        security_style: SecurityStyle,

        /// Octal (755) or symbolic (rwxr-xr-x)
        #[arg(long, default_value = "755")]
        unix_permissions: UnixPermissions,

        #[arg(long, default_value_t = 0)]
        uid: u32,

        #[arg(long, default_value_t = 0)]
        gid: u32,

        #[arg(long, default_value = "default")]
        export_policy: String,

        #[arg(long, default_value = "default")]
        snapshot_policy: String,
    },

    /// Change NAS settings of a volume
    Update {
        #[arg(long)]
        name: String,

        #[arg(long)]
        junction_path: Option<String>,

        #[arg(long)]
        security_style: Option<SecurityStyle>,

        #[arg(long)]
        unix_permissions: Option<UnixPermissions>,

        #[arg(long)]
        uid: Option<u32>,

        #[arg(long)]
        gid: Option<u32>,

        #[arg(long)]
        export_policy: Option<String>,
    },

    /// Show one volume
    Info {
        #[arg(long)]
        name: String,
    },

    /// List the volumes of the SVM
    List,
}

#[derive(Subcommand, Debug)]
enum DirectoryCommand {
    /// Apply the `directory` section of the configuration file
    Configure,
}

#[derive(Subcommand, Debug)]
enum S3Command {
    /// Show SVMs and their object servers
    Status {
        #[arg(long)]
        svm: Option<String>,
    },

    /// Create the object server of an SVM
    Enable {
        #[arg(long)]
        svm: String,

        #[arg(long)]
        server_name: String,

        /// Common name of the server certificate
        #[arg(long)]
        common_name: String,
    },

    /// Expose a volume as a NAS bucket
    Bucket {
        #[arg(long)]
        svm: String,

        #[arg(long)]
        volume: String,

        #[arg(long)]
        bucket: String,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    if let Err(e) = run(args).await {
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    info!("ONTAP NAS Admin v{}", ontap_nas_admin::VERSION);
    let cluster = connect(&args, &config)?;

    match args.command {
        Command::CloneRefresh(refresh) => {
            let workflow_config = clone_refresh_config(refresh, &config)?;
            let workflow = CloneRefreshWorkflow::new(
                workflow_config,
                cluster.replication.clone(),
                cluster.volumes.clone(),
            );
            let report = workflow.run().await?;
            for warning in &report.warnings {
                warn!("{}", warning);
            }
            print_json(&report)
        }
        Command::Volume { svm, action } => {
            run_volume(VolumeManager::new(cluster.volumes.clone(), svm), action).await
        }
        Command::Directory {
            action: DirectoryCommand::Configure,
        } => {
            let directory = config.directory.clone().ok_or_else(|| {
                Error::Configuration(
                    "directory configure needs a `directory` section in --config".into(),
                )
            })?;
            let report = DirectoryServiceConfigurator::new(cluster.nas.clone(), directory)
                .run()
                .await?;
            print_json(&report)?;

            let failed = report.failures().count();
            if failed > 0 {
                return Err(Error::Internal(format!(
                    "{} directory step(s) failed on {}",
                    failed, report.svm
                )));
            }
            Ok(())
        }
        Command::S3 { action } => {
            let provisioner =
                ObjectStoreProvisioner::new(cluster.objects.clone(), cluster.volumes.clone());
            run_s3(provisioner, action).await
        }
    }
}

// =============================================================================
// Cluster Connection
// =============================================================================

/// Port handles of the selected cluster backend
struct Cluster {
    replication: ReplicationPortRef,
    volumes: VolumePortRef,
    nas: NasServicesPortRef,
    objects: ObjectStorePortRef,
}

fn connect(args: &Args, config: &AppConfig) -> Result<Cluster> {
    if args.simulate {
        info!("Using the simulated demo cluster");
        let cluster = Arc::new(SimulatedCluster::demo());
        return Ok(Cluster {
            replication: cluster.clone(),
            volumes: cluster.clone(),
            nas: cluster.clone(),
            objects: cluster,
        });
    }

    let mut client_config = config.cluster.to_client_config();
    if let Some(host) = &args.host {
        client_config.endpoint = host.clone();
    }
    if let Some(user) = &args.user {
        client_config.username = user.clone();
    }
    if let Some(password) = &args.password {
        client_config.password = password.clone();
    }
    if args.verify_tls {
        client_config.verify_tls = true;
    }
    if client_config.password.is_empty() {
        warn!("No management password given (--password / ONTAP_PASSWORD)");
    }

    let client = Arc::new(OntapClient::new(client_config)?);
    Ok(Cluster {
        replication: client.clone(),
        volumes: client.clone(),
        nas: client.clone(),
        objects: client,
    })
}

fn clone_refresh_config(args: CloneRefreshArgs, config: &AppConfig) -> Result<CloneRefreshConfig> {
    let base = config
        .clone_refresh
        .as_ref()
        .map(|section| section.to_workflow_config());

    let required = |flag: Option<String>, from_file: Option<&String>, name: &str| {
        flag.or_else(|| from_file.cloned()).ok_or_else(|| {
            Error::Configuration(format!(
                "--{} is required (or clone_refresh.{} in --config)",
                name.replace('_', "-"),
                name
            ))
        })
    };

    let mut workflow_config = CloneRefreshConfig::new(
        required(args.svm, base.as_ref().map(|b| &b.svm_name), "svm")?,
        required(args.volume, base.as_ref().map(|b| &b.volume_name), "volume")?,
        required(
            args.clone_name,
            base.as_ref().map(|b| &b.clone_name),
            "clone_name",
        )?,
    );

    if let Some(base) = base {
        workflow_config.junction_path = base.junction_path;
        workflow_config.resync = base.resync;
        workflow_config.sync = base.sync;
    }
    if args.junction_path.is_some() {
        workflow_config.junction_path = args.junction_path;
    }
    if args.skip_resync {
        workflow_config.resync = ResyncPolicy::Never;
    }
    if let Some(secs) = args.sync_interval_secs {
        workflow_config.sync.interval = Duration::from_secs(secs);
    }
    if let Some(attempts) = args.sync_max_attempts {
        workflow_config.sync.max_attempts = attempts;
    }
    if let Some(secs) = args.sync_deadline_secs {
        workflow_config.sync.deadline = Some(Duration::from_secs(secs));
    }

    Ok(workflow_config)
}

// =============================================================================
// Subcommands
// =============================================================================

async fn run_volume(manager: VolumeManager, action: VolumeCommand) -> Result<()> {
    match action {
        VolumeCommand::Create {
            name,
            aggregate,
            size_mb,
            junction_path,
            security_style,
            unix_permissions,
            uid,
            gid,
            export_policy,
            snapshot_policy,
        } => {
            let mut options = VolumeCreateOptions::new(name, aggregate, size_mb);
            options.junction_path = junction_path;
            options.security_style = security_style;
            options.unix_permissions = unix_permissions;
            options.uid = uid;
            options.gid = gid;
            options.export_policy = export_policy;
            options.snapshot_policy = snapshot_policy;

            let (outcome, volume) = manager.create(options).await?;
            print_json(&json!({ "outcome": outcome, "volume": volume }))
        }
        VolumeCommand::Update {
            name,
            junction_path,
            security_style,
            unix_permissions,
            uid,
            gid,
            export_policy,
        } => {
            let update = NasSettings {
                path: junction_path,
                security_style,
                unix_permissions,
                uid,
                gid,
                export_policy,
            };
            let outcome = manager.update(&name, &update).await?;
            print_json(&json!({ "volume": name, "outcome": outcome }))
        }
        VolumeCommand::Info { name } => print_json(&manager.info(&name).await?),
        VolumeCommand::List => print_json(&manager.list().await?),
    }
}

async fn run_s3(provisioner: ObjectStoreProvisioner, action: S3Command) -> Result<()> {
    match action {
        S3Command::Status { svm } => print_json(&provisioner.status(svm.as_deref()).await?),
        S3Command::Enable {
            svm,
            server_name,
            common_name,
        } => {
            let (outcome, server) = provisioner
                .enable(&svm, &server_name, &common_name)
                .await?;
            print_json(&json!({ "outcome": outcome, "object_server": server }))
        }
        S3Command::Bucket {
            svm,
            volume,
            bucket,
        } => {
            let (outcome, bucket) = provisioner.create_bucket(&svm, &volume, &bucket).await?;
            print_json(&json!({ "outcome": outcome, "bucket": bucket }))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
