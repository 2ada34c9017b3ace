use auth_rebac::{
    AccessRequest, CaveatValue, CreateResourceRequest, GatewayConfig, GroupAccessRequest,
    Permission, PermissionCheckRequest, RebacError, RebacServices, Relation, ResourceRef,
};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// ReBAC gateway command-line client
#[derive(Parser, Debug)]
#[command(name = "rebac")]
#[command(about = "Manage relationships and query permissions through the ReBAC gateway")]
struct Args {
    /// Configuration file path (defaults to ./rebac.{toml,yaml,json} if present)
    #[arg(short, long, env = "REBAC_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a resource owned by the requester, optionally under a parent
    CreateResource {
        /// Resource as `type:id`
        #[arg(value_parser = parse_resource)]
        resource: ResourceRef,
        #[arg(long)]
        requester: String,
        /// Parent resource as `type:id`
        #[arg(long, value_parser = parse_resource)]
        parent: Option<ResourceRef>,
    },
    /// Check a permission
    Check {
        #[arg(value_parser = parse_resource)]
        resource: ResourceRef,
        permission: Permission,
        #[arg(long)]
        requester: String,
        #[command(flatten)]
        caveat: CaveatArgs,
    },
    /// Grant a relation on a resource to another tenant
    Grant {
        #[arg(value_parser = parse_resource)]
        resource: ResourceRef,
        relation: Relation,
        #[arg(long)]
        requester: String,
        #[arg(long)]
        target: String,
        #[command(flatten)]
        caveat: CaveatArgs,
        /// Expire the grant after this many days
        #[arg(long)]
        days: Option<u32>,
    },
    /// Revoke a relation on a resource from another tenant
    Revoke {
        #[arg(value_parser = parse_resource)]
        resource: ResourceRef,
        relation: Relation,
        #[arg(long)]
        requester: String,
        #[arg(long)]
        target: String,
    },
    /// Delete a resource and all of its relationships
    Delete {
        #[arg(value_parser = parse_resource)]
        resource: ResourceRef,
        #[arg(long)]
        requester: String,
    },
    /// Show readable ancestors and descendants of a resource
    Hierarchy {
        #[arg(value_parser = parse_resource)]
        resource: ResourceRef,
        #[arg(long)]
        requester: String,
    },
    /// Group management
    #[command(subcommand)]
    Group(GroupCommand),
}

#[derive(Subcommand, Debug)]
enum GroupCommand {
    Create {
        group: String,
        #[arg(long)]
        requester: String,
    },
    AddMember {
        group: String,
        member: String,
        #[arg(long)]
        requester: String,
    },
    RemoveMember {
        group: String,
        member: String,
        #[arg(long)]
        requester: String,
    },
    /// Grant a relation on a resource to all members of the group
    Grant {
        group: String,
        #[arg(value_parser = parse_resource)]
        resource: ResourceRef,
        relation: Relation,
        #[arg(long)]
        requester: String,
        #[command(flatten)]
        caveat: CaveatArgs,
        #[arg(long)]
        days: Option<u32>,
    },
    Revoke {
        group: String,
        #[arg(value_parser = parse_resource)]
        resource: ResourceRef,
        relation: Relation,
        #[arg(long)]
        requester: String,
    },
    Delete {
        group: String,
        #[arg(long)]
        requester: String,
    },
    TransferOwnership {
        group: String,
        new_owner: String,
        #[arg(long)]
        requester: String,
    },
    Members {
        group: String,
        #[arg(long)]
        requester: String,
    },
}

#[derive(ClapArgs, Debug, Clone)]
struct CaveatArgs {
    /// Caveat name, e.g. `password_match`
    #[arg(long, requires = "value")]
    caveat: Option<String>,
    /// Value stored with a grant, or presented on a check
    #[arg(long, requires = "caveat")]
    value: Option<String>,
}

impl CaveatArgs {
    fn into_value(self) -> Option<CaveatValue> {
        match (self.caveat, self.value) {
            (Some(caveat), Some(value)) => Some(CaveatValue::new(caveat, value)),
            _ => None,
        }
    }
}

fn parse_resource(raw: &str) -> Result<ResourceRef, RebacError> {
    let (resource_type, id) = raw.split_once(':').ok_or_else(|| {
        RebacError::InvalidRequest(format!("expected `type:id`, got '{}'", raw))
    })?;
    let resource = ResourceRef::new(resource_type.parse()?, id);
    resource.validate()?;
    Ok(resource)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    init_tracing(args.verbose, args.json_logs)?;

    let config = GatewayConfig::load(args.config.as_deref())?;
    let services = RebacServices::connect(&config)?;

    match run(&services, args.command).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(err) => {
            let kind = err.kind();
            error!("{}", err);
            eprintln!(
                "{}",
                json!({"error": format!("{:?}", kind), "status": kind.status_code(), "message": err.to_string()})
            );
            std::process::exit(exit_code(&err));
        }
    }
}

fn exit_code(err: &RebacError) -> i32 {
    match err {
        RebacError::Forbidden(_) => 3,
        RebacError::InvalidRequest(_) => 2,
        RebacError::EngineUnavailable(_) => 4,
        RebacError::LimitExceeded(_) => 5,
        RebacError::Config(_) => 6,
    }
}

async fn run(services: &RebacServices, command: Command) -> Result<Value, RebacError> {
    let resources = &services.resources;
    let groups = &services.groups;

    match command {
        Command::CreateResource {
            resource,
            requester,
            parent,
        } => {
            resources
                .create_resource(&CreateResourceRequest {
                    resource_type: resource.resource_type,
                    resource_id: resource.id.clone(),
                    requester_id: requester,
                    parent_resource_type: parent.as_ref().map(|p| p.resource_type),
                    parent_resource_id: parent.map(|p| p.id),
                })
                .await?;
            Ok(json!({"created": resource}))
        }
        Command::Check {
            resource,
            permission,
            requester,
            caveat,
        } => {
            let allowed = resources
                .check_permission(&PermissionCheckRequest {
                    resource_type: resource.resource_type,
                    resource_id: resource.id,
                    permission,
                    requester_id: requester,
                    context: caveat.into_value(),
                })
                .await?;
            Ok(json!({"allowed": allowed}))
        }
        Command::Grant {
            resource,
            relation,
            requester,
            target,
            caveat,
            days,
        } => {
            resources
                .grant_permission(&AccessRequest {
                    resource_type: resource.resource_type,
                    resource_id: resource.id,
                    relation,
                    requester_id: requester,
                    target_subject_id: target,
                    context: caveat.into_value(),
                    days_from_now: days,
                })
                .await?;
            Ok(json!({"status": "granted"}))
        }
        Command::Revoke {
            resource,
            relation,
            requester,
            target,
        } => {
            resources
                .revoke_permission(&AccessRequest {
                    resource_type: resource.resource_type,
                    resource_id: resource.id,
                    relation,
                    requester_id: requester,
                    target_subject_id: target,
                    context: None,
                    days_from_now: None,
                })
                .await?;
            Ok(json!({"status": "revoked"}))
        }
        Command::Delete {
            resource,
            requester,
        } => {
            resources.delete_resource(&resource, &requester).await?;
            Ok(json!({"deleted": resource}))
        }
        Command::Hierarchy {
            resource,
            requester,
        } => {
            let hierarchy = resources.hierarchy(&resource, &requester).await?;
            Ok(json!(hierarchy))
        }
        Command::Group(command) => run_group(groups, command).await,
    }
}

async fn run_group(
    groups: &auth_rebac::GroupService,
    command: GroupCommand,
) -> Result<Value, RebacError> {
    match command {
        GroupCommand::Create { group, requester } => {
            groups.create_group(&group, &requester).await?;
            Ok(json!({"created": group}))
        }
        GroupCommand::AddMember {
            group,
            member,
            requester,
        } => {
            groups.add_member(&group, &member, &requester).await?;
            Ok(json!({"status": "added"}))
        }
        GroupCommand::RemoveMember {
            group,
            member,
            requester,
        } => {
            groups.remove_member(&group, &member, &requester).await?;
            Ok(json!({"status": "removed"}))
        }
        GroupCommand::Grant {
            group,
            resource,
            relation,
            requester,
            caveat,
            days,
        } => {
            groups
                .grant_group_access(&GroupAccessRequest {
                    group_id: group,
                    resource_type: resource.resource_type,
                    resource_id: resource.id,
                    relation,
                    requester_id: requester,
                    context: caveat.into_value(),
                    days_from_now: days,
                })
                .await?;
            Ok(json!({"status": "granted"}))
        }
        GroupCommand::Revoke {
            group,
            resource,
            relation,
            requester,
        } => {
            groups
                .revoke_group_access(&GroupAccessRequest {
                    group_id: group,
                    resource_type: resource.resource_type,
                    resource_id: resource.id,
                    relation,
                    requester_id: requester,
                    context: None,
                    days_from_now: None,
                })
                .await?;
            Ok(json!({"status": "revoked"}))
        }
        GroupCommand::Delete { group, requester } => {
            groups.delete_group(&group, &requester).await?;
            Ok(json!({"deleted": group}))
        }
        GroupCommand::TransferOwnership {
            group,
            new_owner,
            requester,
        } => {
            groups.transfer_ownership(&group, &new_owner, &requester).await?;
            Ok(json!({"owner": new_owner}))
        }
        GroupCommand::Members { group, requester } => {
            let members = groups.list_members(&group, &requester).await?;
            Ok(json!({"group": group, "members": members}))
        }
    }
}

fn init_tracing(verbose: bool, json_logs: bool) -> anyhow::Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rebac={},auth_rebac={},reqwest=warn", level, level).into());

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    info!("rebac {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
