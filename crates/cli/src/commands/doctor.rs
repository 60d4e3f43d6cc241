use serde::Serialize;
use stockflow_core::attestation::AttestationMode;
use stockflow_core::config::{AppConfig, LoadOptions};
use stockflow_core::domain::actor::Role;
use stockflow_db::connection::ping;
use stockflow_db::repositories::{SqlUserDirectory, UserDirectory};
use stockflow_db::{connect_with_settings, DbPool};

use crate::commands::CommandResult;

const REQUIRED_TABLES: [&str; 4] =
    ["app_user", "department_request", "approval_stage", "attestation_log"];
const APPROVER_ROLES: [Role; 3] =
    [Role::StoresReviewer, Role::ProcurementReviewer, Role::CfoReviewer];
const DATABASE_CHECKS: [&str; 3] = ["database_connectivity", "schema", "approver_directory"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.extend(check_database(&config));
            checks.push(check_attestation(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in DATABASE_CHECKS {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
            checks.push(DoctorCheck::skipped(
                "attestation_readiness",
                "configuration did not load",
            ));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::fail(
                    "database_connectivity",
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped("schema", "the database was not reachable"),
                DoctorCheck::skipped("approver_directory", "the database was not reachable"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("schema", "the database was not reachable"),
                    DoctorCheck::skipped("approver_directory", "the database was not reachable"),
                ];
            }
        };

        let mut checks = Vec::new();
        match ping(&pool).await {
            Ok(()) => checks.push(DoctorCheck::pass(
                "database_connectivity",
                format!("connected using `{}`", config.database.url),
            )),
            Err(error) => {
                checks.push(DoctorCheck::fail(
                    "database_connectivity",
                    format!("database did not answer a probe query: {error}"),
                ));
                checks.push(DoctorCheck::skipped("schema", "the database was not reachable"));
                checks.push(DoctorCheck::skipped(
                    "approver_directory",
                    "the database was not reachable",
                ));
                pool.close().await;
                return checks;
            }
        }

        let schema = check_schema(&pool).await;
        let schema_ready = schema.status == CheckStatus::Pass;
        checks.push(schema);
        if schema_ready {
            checks.push(check_approver_directory(&pool).await);
        } else {
            checks.push(DoctorCheck::skipped(
                "approver_directory",
                "the schema is incomplete (run `stockflow migrate`)",
            ));
        }

        pool.close().await;
        checks
    })
}

async fn check_schema(pool: &DbPool) -> DoctorCheck {
    let mut missing = Vec::new();
    for table in REQUIRED_TABLES {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(pool)
        .await;

        match found {
            Ok(count) if count > 0 => {}
            Ok(_) => missing.push(table),
            Err(error) => {
                return DoctorCheck::fail("schema", format!("schema lookup failed: {error}"))
            }
        }
    }

    if missing.is_empty() {
        DoctorCheck::pass("schema", format!("{} workflow tables present", REQUIRED_TABLES.len()))
    } else {
        DoctorCheck::fail(
            "schema",
            format!("missing tables: {} (run `stockflow migrate`)", missing.join(", ")),
        )
    }
}

async fn check_approver_directory(pool: &DbPool) -> DoctorCheck {
    let directory = SqlUserDirectory::new(pool.clone());
    let mut assigned = Vec::new();
    let mut unassigned = Vec::new();

    for role in APPROVER_ROLES {
        match directory.first_user_with_role(role).await {
            Ok(Some(user)) => assigned.push(format!("{}={}", role.as_str(), user.id)),
            Ok(None) => unassigned.push(role.as_str()),
            Err(error) => {
                return DoctorCheck::fail(
                    "approver_directory",
                    format!("directory lookup failed: {error}"),
                )
            }
        }
    }

    if unassigned.is_empty() {
        DoctorCheck::pass("approver_directory", assigned.join(", "))
    } else {
        DoctorCheck::fail(
            "approver_directory",
            format!(
                "no user holds {}; approval chains would be incomplete (run `stockflow seed`)",
                unassigned.join(", ")
            ),
        )
    }
}

fn check_attestation(config: &AppConfig) -> DoctorCheck {
    let attestation = &config.attestation;
    match attestation.mode {
        AttestationMode::Simulation => DoctorCheck::pass(
            "attestation_readiness",
            "simulation mode; transaction ids are generated locally",
        ),
        AttestationMode::Gateway => DoctorCheck::pass(
            "attestation_readiness",
            format!(
                "gateway mode via `{}` ({} retries, {}s per attempt)",
                attestation.gateway_url.as_deref().unwrap_or("<unset>"),
                attestation.max_retries,
                attestation.timeout_secs
            ),
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
