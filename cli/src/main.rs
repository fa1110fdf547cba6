//! Operator CLI for audit-relay
//!
//! Archival and lifecycle operations against the configured Postgres
//! backend. Every command runs as an explicit caller identity and is
//! gated by the access guard before any engine call; retrievals and
//! deletions are scoped to the caller's organization. Exit codes: 0
//! success, 1 operational failure, 2 misconfiguration (missing database
//! URL).

use audit_relay_access_control::{AccessDecision, AccessGuard, Role, UserContext};
use audit_relay_archival::{ArchivalEngine, DateRange, DeleteCriteria, RetrievalRequest};
use audit_relay_config::AppConfig;
use audit_relay_contracts::{DataClassification, ResourceScope, SystemClock};
use audit_relay_database::{
    DatabaseClient, DatabaseConfig, DatabaseConfigError, PgArchiveStore, PgAuditLogStore,
    PgRetentionPolicyStore,
};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

const EXIT_OK: i32 = 0;
const EXIT_OPERATIONAL: i32 = 1;
const EXIT_MISCONFIGURED: i32 = 2;

/// Caller role, mirrored into the access-control context
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum RoleArg {
    Viewer,
    Operator,
    Admin,
    Owner,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Viewer => Role::Viewer,
            RoleArg::Operator => Role::Operator,
            RoleArg::Admin => Role::Admin,
            RoleArg::Owner => Role::Owner,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "audit-relay")]
#[command(about = "Audit event archival and lifecycle operations")]
pub struct Cli {
    /// Organization the caller acts for; every operation is scoped to it
    #[arg(long, help = "Organization id of the caller")]
    pub organization_id: String,

    /// Role used for permission checks
    #[arg(long, value_enum, default_value = "admin", help = "Caller role")]
    pub role: RoleArg,

    /// Caller identity recorded in logs and audit trails
    #[arg(long, default_value = "cli-operator", help = "User id of the caller")]
    pub user_id: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run retention-policy archival over the live audit log
    Archive {
        /// Report what would be archived without mutating anything
        #[arg(long)]
        dry_run: bool,

        /// Run only the named retention policy
        #[arg(long, help = "Name of a single active retention policy to run")]
        policy: Option<String>,
    },

    /// Securely delete live audit records matching the criteria
    Delete {
        #[arg(long, help = "Only records for this principal")]
        principal_id: Option<String>,

        /// Organization filter; must match the caller's organization
        #[arg(long, help = "Organization whose records to delete")]
        record_organization: Option<String>,

        /// Inclusive range as two RFC 3339 timestamps: start,end
        #[arg(long, value_parser = parse_date_range)]
        date_range: Option<DateRange>,

        #[arg(long, value_delimiter = ',', help = "Classifications, comma-separated")]
        classification: Option<Vec<DataClassification>>,

        #[arg(long = "policy", value_delimiter = ',', help = "Retention policies, comma-separated")]
        policies: Option<Vec<String>>,

        /// Re-query deleted ids afterwards and report leftovers
        #[arg(long)]
        verify: bool,

        /// Report the would-delete count without mutating anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Retrieve archived records for compliance review
    Retrieve {
        #[arg(long, help = "A specific archive id")]
        archive_id: Option<String>,

        #[arg(long, help = "Only records for this principal")]
        principal_id: Option<String>,

        #[arg(long, value_delimiter = ',', help = "Actions, comma-separated")]
        actions: Option<Vec<String>>,

        #[arg(long, value_delimiter = ',', help = "Classifications, comma-separated")]
        classification: Option<Vec<DataClassification>>,

        /// Inclusive range as two RFC 3339 timestamps: start,end
        #[arg(long, value_parser = parse_date_range)]
        date_range: Option<DateRange>,

        #[arg(long, help = "Maximum archives to scan")]
        limit: Option<usize>,

        #[arg(long, help = "Archives to skip before scanning")]
        offset: Option<usize>,

        #[arg(long, help = "Write the full result JSON to this path")]
        output: Option<std::path::PathBuf>,
    },

    /// Print aggregate archive statistics
    Stats,

    /// Recompute checksums for every stored archive
    Validate,

    /// Delete archives older than their policy's delete window
    Cleanup {
        /// Report what would be deleted without mutating anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            if err.downcast_ref::<DatabaseConfigError>().is_some()
                || err.downcast_ref::<audit_relay_config::ConfigError>().is_some()
            {
                EXIT_MISCONFIGURED
            } else {
                EXIT_OPERATIONAL
            }
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let app_config = AppConfig::from_env()?;
    let db_config = DatabaseConfig::from_env()?;
    let client = DatabaseClient::connect(db_config).await?;
    client.migrate().await?;

    let pool = client.pool().clone();
    let engine = ArchivalEngine::new(
        Arc::new(PgArchiveStore::new(pool.clone())),
        Arc::new(PgAuditLogStore::new(pool.clone())),
        Arc::new(PgRetentionPolicyStore::new(pool)),
        app_config.archival.clone(),
        Arc::new(SystemClock),
    );

    let guard = AccessGuard::new();
    let ctx = UserContext::new(
        cli.user_id.clone(),
        cli.organization_id.clone(),
        cli.role.into(),
    );

    match cli.command {
        Commands::Archive { dry_run, policy } => {
            authorize(&guard, &ctx, "manage_archives")?;
            if dry_run {
                let mut previews = engine.preview_retention().await?;
                if let Some(name) = &policy {
                    previews.retain(|p| &p.policy_name == name);
                }
                print_json(&previews)?;
            } else if let Some(name) = policy {
                match engine.archive_policy_by_name(&name).await? {
                    Some(report) => print_json(&report)?,
                    None => anyhow::bail!("no active retention policy named '{name}'"),
                }
            } else {
                let reports = engine.archive_by_retention_policies().await?;
                print_json(&reports)?;
            }
        }
        Commands::Delete {
            principal_id,
            record_organization,
            date_range,
            classification,
            policies,
            verify,
            dry_run,
        } => {
            authorize(&guard, &ctx, "purge_audit_records")?;
            if let Some(target_org) = &record_organization {
                guard.ensure_same_organization(&ctx, target_org)?;
            }
            // Deletion never reaches outside the caller's organization.
            let criteria = DeleteCriteria {
                principal_id,
                organization_id: Some(ctx.organization_id.clone()),
                date_range,
                data_classifications: classification,
                retention_policies: policies,
                verify_deletion: verify,
            };
            if dry_run {
                let count = engine.count_matching_records(&criteria).await?;
                print_json(&serde_json::json!({ "would_delete": count }))?;
            } else {
                let result = engine.secure_delete(&criteria).await?;
                print_json(&result)?;
            }
        }
        Commands::Retrieve {
            archive_id,
            principal_id,
            actions,
            classification,
            date_range,
            limit,
            offset,
            output,
        } => {
            authorize(&guard, &ctx, "view_archives")?;
            // Retrieval only yields records of the caller's organization.
            let request = RetrievalRequest {
                archive_id,
                organization_id: Some(ctx.organization_id.clone()),
                date_range,
                data_classifications: classification,
                retention_policies: None,
                principal_id,
                actions,
                limit,
                offset,
            };
            let result = engine.retrieve(&request).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, serde_json::to_vec_pretty(&result)?)?;
                    print_json(&serde_json::json!({
                        "request_id": result.request_id,
                        "record_count": result.record_count,
                        "archives": result.archives.len(),
                        "written_to": path,
                    }))?;
                }
                None => print_json(&result)?,
            }
        }
        Commands::Stats => {
            authorize(&guard, &ctx, "view_archives")?;
            let stats = engine.stats().await?;
            print_json(&stats)?;
        }
        Commands::Validate => {
            authorize(&guard, &ctx, "manage_archives")?;
            let report = engine.validate_all_archives().await?;
            print_json(&report)?;
            if report.corrupted > 0 {
                return Ok(EXIT_OPERATIONAL);
            }
        }
        Commands::Cleanup { dry_run } => {
            authorize(&guard, &ctx, "manage_archives")?;
            let report = if dry_run {
                engine.preview_cleanup().await?
            } else {
                engine.cleanup_old_archives().await?
            };
            print_json(&report)?;
        }
    }
    Ok(EXIT_OK)
}

/// Permission gate run before every engine call. Denials surface the
/// guard's reason and never reach storage.
fn authorize(guard: &AccessGuard, ctx: &UserContext, operation: &str) -> anyhow::Result<()> {
    let scope = ResourceScope::organization(ctx.organization_id.clone());
    match guard.validate_operation(ctx, operation, Some(&scope)) {
        AccessDecision::Allow => Ok(()),
        AccessDecision::Deny { reason } => {
            anyhow::bail!("operation '{operation}' denied: {reason}")
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_date_range(s: &str) -> Result<DateRange, String> {
    let (start, end) = s
        .split_once(',')
        .ok_or_else(|| "expected start,end".to_string())?;
    let start = DateTime::parse_from_rfc3339(start.trim())
        .map_err(|e| format!("invalid start timestamp: {e}"))?
        .with_timezone(&chrono::Utc);
    let end = DateTime::parse_from_rfc3339(end.trim())
        .map_err(|e| format!("invalid end timestamp: {e}"))?
        .with_timezone(&chrono::Utc);
    if end < start {
        return Err("range end precedes start".to_string());
    }
    Ok(DateRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_range_parses_and_rejects_inversions() {
        let range = parse_date_range("2025-01-01T00:00:00Z,2025-06-30T23:59:59Z").unwrap();
        assert!(range.start < range.end);
        assert!(parse_date_range("2025-06-30T00:00:00Z,2025-01-01T00:00:00Z").is_err());
        assert!(parse_date_range("not-a-range").is_err());
    }

    #[test]
    fn cli_parses_every_subcommand() {
        Cli::try_parse_from([
            "audit-relay",
            "--organization-id",
            "org-A",
            "archive",
            "--dry-run",
            "--policy",
            "phi",
        ])
        .unwrap();
        Cli::try_parse_from([
            "audit-relay",
            "--organization-id",
            "org-A",
            "--role",
            "owner",
            "delete",
            "--principal-id",
            "u1",
            "--classification",
            "PHI,CONFIDENTIAL",
            "--verify",
        ])
        .unwrap();
        Cli::try_parse_from([
            "audit-relay",
            "--organization-id",
            "org-A",
            "--role",
            "viewer",
            "retrieve",
            "--archive-id",
            "archive-1700000000000-abc123xyz",
            "--limit",
            "50",
        ])
        .unwrap();
        Cli::try_parse_from(["audit-relay", "--organization-id", "org-A", "stats"]).unwrap();
        Cli::try_parse_from(["audit-relay", "--organization-id", "org-A", "validate"]).unwrap();
        Cli::try_parse_from([
            "audit-relay",
            "--organization-id",
            "org-A",
            "cleanup",
            "--dry-run",
        ])
        .unwrap();
    }

    #[test]
    fn caller_identity_is_required() {
        assert!(Cli::try_parse_from(["audit-relay", "stats"]).is_err());
    }

    #[test]
    fn authorize_denies_below_required_tier_and_unknown_operations() {
        let guard = AccessGuard::new();

        let viewer = UserContext::new("u1", "org-A", Role::Viewer);
        assert!(authorize(&guard, &viewer, "view_archives").is_ok());
        let err = authorize(&guard, &viewer, "manage_archives").unwrap_err();
        assert!(err.to_string().contains("Insufficient permissions"));
        let err = authorize(&guard, &viewer, "not_an_operation").unwrap_err();
        assert!(err.to_string().contains("Invalid operation"));

        let admin = UserContext::new("u2", "org-A", Role::Admin);
        assert!(authorize(&guard, &admin, "manage_archives").is_ok());
        assert!(authorize(&guard, &admin, "purge_audit_records").is_ok());
    }

    #[test]
    fn cross_org_delete_target_is_refused() {
        let guard = AccessGuard::new();
        let ctx = UserContext::new("u1", "org-A", Role::Admin);
        assert!(guard.ensure_same_organization(&ctx, "org-A").is_ok());
        assert!(guard.ensure_same_organization(&ctx, "org-B").is_err());
    }
}
