use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use stockflow_core::attestation::{
    AttestationClient, AttestationError, AttestationMode, SimulatedAttestationClient,
};
use stockflow_core::audit::{InMemoryAuditSink, NoopAuditSink};
use stockflow_core::domain::actor::{Actor, Role, User, UserId};
use stockflow_core::domain::approval::{
    AggregateStatus, ApprovalStage, Stage, StageAction, StageStatus,
};
use stockflow_core::domain::attestation::{
    AttestationEvent, AttestationEventType, TransactionId,
};
use stockflow_core::domain::request::{
    NewRequest, Priority, Request, RequestAmendment, RequestId, RequestStatus, StoresDecision,
};
use stockflow_db::{connect_with_settings, migrations, DbPool, DemoDirectory};
use stockflow_workflow::{AttestationOutcome, Repositories, WorkflowServices};

const SECOND_PROCUREMENT: &str = "user-procurement-02";

fn demo_users() -> Vec<User> {
    [
        (DemoDirectory::STORES, Role::StoresReviewer),
        (DemoDirectory::PROCUREMENT, Role::ProcurementReviewer),
        (DemoDirectory::CFO, Role::CfoReviewer),
        (DemoDirectory::REQUESTER, Role::Requester),
        (DemoDirectory::ADMIN, Role::Admin),
        (SECOND_PROCUREMENT, Role::ProcurementReviewer),
    ]
    .into_iter()
    .enumerate()
    .map(|(offset, (id, role))| User {
        id: UserId(id.into()),
        username: id.into(),
        role,
        attestation_address: None,
        created_at: Utc
            .with_ymd_and_hms(2026, 1, 5, 8, u32::try_from(offset).unwrap_or(0), 0)
            .single()
            .expect("valid timestamp"),
    })
    .collect()
}

fn actor(id: &str, role: Role) -> Actor {
    Actor::new(id, role)
}

fn stores() -> Actor {
    actor(DemoDirectory::STORES, Role::StoresReviewer)
}

fn procurement() -> Actor {
    actor(DemoDirectory::PROCUREMENT, Role::ProcurementReviewer)
}

fn cfo() -> Actor {
    actor(DemoDirectory::CFO, Role::CfoReviewer)
}

fn requester() -> Actor {
    actor(DemoDirectory::REQUESTER, Role::Requester)
}

fn admin() -> Actor {
    actor(DemoDirectory::ADMIN, Role::Admin)
}

fn toner(quantity: i64) -> NewRequest {
    NewRequest {
        item_id: "item-toner-85a".into(),
        quantity,
        priority: Priority::High,
        reason: "Registry printer is out of toner".into(),
    }
}

fn in_memory_with(client: Arc<dyn AttestationClient>, deadline: Duration) -> WorkflowServices {
    WorkflowServices::new(
        Repositories::in_memory(demo_users()),
        client,
        Arc::new(NoopAuditSink),
        deadline,
    )
}

fn in_memory() -> WorkflowServices {
    in_memory_with(Arc::new(SimulatedAttestationClient::new("test-key")), Duration::from_secs(5))
}

async fn sqlite(dir: &TempDir) -> (WorkflowServices, DbPool) {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("workflow.db").display());
    let pool = connect_with_settings(&url, 8, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    DemoDirectory::load(&pool).await.expect("seed directory");

    let services = WorkflowServices::new(
        Repositories::sql(pool.clone()),
        Arc::new(SimulatedAttestationClient::new("test-key")),
        Arc::new(NoopAuditSink),
        Duration::from_secs(5),
    );
    (services, pool)
}

/// Creates a request and approves it at the stores level, returning its chain.
async fn approved_chain(services: &WorkflowServices) -> (Request, Vec<ApprovalStage>) {
    let request = services.requests.create(&requester(), toner(5)).await.expect("create");
    let outcome = services
        .requests
        .decide_stores_stage(&stores(), &request.id, StoresDecision::Approve, "In budget")
        .await
        .expect("stores approval");
    let chain = outcome.chain.expect("chain built with the decision");
    (outcome.request, chain.stages)
}

fn stage_of(stages: &[ApprovalStage], stage: Stage) -> ApprovalStage {
    stages.iter().find(|candidate| candidate.stage == stage).cloned().expect("stage present")
}

async fn run_scenario(services: &WorkflowServices) {
    let (request, stages) = approved_chain(services).await;
    assert_eq!(request.status, RequestStatus::Approved);
    assert_eq!(request.quantity, 5);

    let order: Vec<Stage> = stages.iter().map(|stage| stage.stage).collect();
    assert_eq!(order, vec![Stage::Stores, Stage::Procurement, Stage::Cfo]);
    assert_eq!(stages[0].status, StageStatus::Approved);
    assert_eq!(stages[1].status, StageStatus::Pending);
    assert_eq!(stages[2].status, StageStatus::Pending);

    let procurement_stage = stage_of(&stages, Stage::Procurement);
    let approved = services
        .stages
        .decide(&procurement(), &procurement_stage.id, StageAction::Approve, "Supplier confirmed")
        .await
        .expect("procurement approval");
    assert_eq!(approved.stage.status, StageStatus::Approved);
    assert!(matches!(approved.attestation, AttestationOutcome::Recorded { simulated: true, .. }));

    let cfo_stage = stage_of(&stages, Stage::Cfo);
    let rejected = services
        .stages
        .decide(&cfo(), &cfo_stage.id, StageAction::Reject, "Over quarterly budget")
        .await
        .expect("cfo rejection");
    assert_eq!(rejected.stage.status, StageStatus::Rejected);
    assert_eq!(rejected.stage.comment, "Over quarterly budget");

    let summary =
        services.stages.chain_summary(&requester(), &request.id).await.expect("summary");
    assert_eq!(summary.aggregate, AggregateStatus::Blocked);
    assert!(summary.is_complete);

    let again = services
        .stages
        .decide(&cfo(), &cfo_stage.id, StageAction::Approve, "Changed my mind")
        .await
        .expect_err("stage is terminal");
    assert_eq!(again.kind(), "already_decided");

    let records =
        services.recorder().records_for_request(&request.id).await.expect("attestation records");
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn scenario_runs_against_in_memory_storage() {
    run_scenario(&in_memory()).await;
}

#[tokio::test]
async fn scenario_runs_against_sqlite_storage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (services, _pool) = sqlite(&dir).await;
    run_scenario(&services).await;
}

async fn race_on_procurement_stage(services: &WorkflowServices) {
    let (_, stages) = approved_chain(services).await;
    let target = stage_of(&stages, Stage::Procurement);

    let mut handles = Vec::new();
    for attempt in 0..8 {
        let services = services.clone();
        let stage_id = target.id.clone();
        let action = if attempt % 2 == 0 { StageAction::Approve } else { StageAction::Reject };
        handles.push(tokio::spawn(async move {
            services
                .stages
                .decide(&procurement(), &stage_id, action, &format!("attempt {attempt}"))
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.expect("task completes") {
            Ok(_) => winners += 1,
            Err(error) => assert_eq!(error.kind(), "already_decided"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn concurrent_decisions_have_one_winner_in_memory() {
    race_on_procurement_stage(&in_memory()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decisions_have_one_winner_on_sqlite() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (services, _pool) = sqlite(&dir).await;
    race_on_procurement_stage(&services).await;
}

#[tokio::test]
async fn repeated_chain_builds_keep_three_stages() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (services, _pool) = sqlite(&dir).await;
    let (request, stages) = approved_chain(&services).await;

    for _ in 0..2 {
        let rebuilt = services.chains.build(&request).await.expect("rebuild");
        assert!(!rebuilt.created);
        assert_eq!(rebuilt.stages, stages);
    }
    let summary = services.stages.chain_summary(&admin(), &request.id).await.expect("summary");
    assert_eq!(summary.stages.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_chain_builds_write_one_chain() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (services, pool) = sqlite(&dir).await;

    let mut request =
        Request::open(RequestId("r-race".into()), &requester(), toner(3), Utc::now())
            .expect("valid request");
    request.status = RequestStatus::Approved;
    request.stores_reviewer = Some(UserId(DemoDirectory::STORES.into()));
    Repositories::sql(pool).requests.insert(request.clone()).await.expect("insert");

    let mut handles = Vec::new();
    for _ in 0..6 {
        let services = services.clone();
        let request = request.clone();
        handles.push(tokio::spawn(async move { services.chains.build(&request).await }));
    }

    let mut created = 0;
    for handle in handles {
        let build = handle.await.expect("task completes").expect("build succeeds");
        assert_eq!(build.stages.len(), 3);
        if build.created {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let summary =
        services.stages.chain_summary(&admin(), &request.id).await.expect("summary");
    assert_eq!(summary.stages.len(), 3);
    assert_eq!(summary.aggregate, AggregateStatus::InProgress);
}

#[tokio::test]
async fn stage_decisions_require_assignee_and_matching_role() {
    let services = in_memory();
    let (_, stages) = approved_chain(&services).await;
    let procurement_stage = stage_of(&stages, Stage::Procurement);
    let cfo_stage = stage_of(&stages, Stage::Cfo);

    let refusals = [
        (procurement(), cfo_stage.clone()),
        (cfo(), procurement_stage.clone()),
        (actor(SECOND_PROCUREMENT, Role::ProcurementReviewer), procurement_stage.clone()),
        (admin(), procurement_stage.clone()),
        (admin(), cfo_stage.clone()),
        (requester(), procurement_stage.clone()),
    ];
    for (who, stage) in refusals {
        let error = services
            .stages
            .decide(&who, &stage.id, StageAction::Approve, "")
            .await
            .expect_err("refused");
        assert_eq!(error.kind(), "unauthorized", "{} on {}", who.id, stage.stage);
    }

    let untouched = services.stages.list_pending(&procurement()).await.expect("pending");
    assert_eq!(untouched.len(), 1);
}

#[tokio::test]
async fn stores_stage_is_born_approved_and_closed_to_other_roles() {
    let services = in_memory();
    let (_, stages) = approved_chain(&services).await;
    let stores_stage = stage_of(&stages, Stage::Stores);
    assert_eq!(stores_stage.status, StageStatus::Approved);
    assert_eq!(stores_stage.approver, UserId(DemoDirectory::STORES.into()));

    for who in [procurement(), cfo()] {
        let error = services
            .stages
            .decide(&who, &stores_stage.id, StageAction::Reject, "")
            .await
            .expect_err("wrong stage");
        assert_eq!(error.kind(), "unauthorized");
    }

    let error = services
        .stages
        .decide(&stores(), &stores_stage.id, StageAction::Reject, "")
        .await
        .expect_err("already approved");
    assert_eq!(error.kind(), "already_decided");
}

struct DownClient;

#[async_trait]
impl AttestationClient for DownClient {
    fn mode(&self) -> AttestationMode {
        AttestationMode::Gateway
    }

    async fn submit(&self, _event: &AttestationEvent) -> Result<TransactionId, AttestationError> {
        Err(AttestationError::Unavailable("connection refused".into()))
    }
}

struct StalledClient;

#[async_trait]
impl AttestationClient for StalledClient {
    fn mode(&self) -> AttestationMode {
        AttestationMode::Gateway
    }

    async fn submit(&self, _event: &AttestationEvent) -> Result<TransactionId, AttestationError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(TransactionId("0xlate".into()))
    }
}

#[tokio::test]
async fn attestation_failures_never_undo_a_decision() {
    let clients: [Arc<dyn AttestationClient>; 2] = [Arc::new(DownClient), Arc::new(StalledClient)];

    for client in clients {
        let services = in_memory_with(client, Duration::from_millis(50));
        let (request, stages) = approved_chain(&services).await;
        let procurement_stage = stage_of(&stages, Stage::Procurement);

        let decision = services
            .stages
            .decide(&procurement(), &procurement_stage.id, StageAction::Approve, "ok")
            .await
            .expect("decision succeeds without attestation");
        assert!(matches!(decision.attestation, AttestationOutcome::Unavailable { .. }));

        let summary =
            services.stages.chain_summary(&admin(), &request.id).await.expect("summary");
        assert_eq!(stage_of(&summary.stages, Stage::Procurement).status, StageStatus::Approved);
        assert!(services
            .recorder()
            .records_for_request(&request.id)
            .await
            .expect("records")
            .is_empty());
    }
}

#[tokio::test]
async fn degraded_chain_is_never_fully_approved() {
    let users: Vec<User> = demo_users()
        .into_iter()
        .filter(|user| user.role != Role::ProcurementReviewer)
        .collect();
    let services = WorkflowServices::new(
        Repositories::in_memory(users),
        Arc::new(SimulatedAttestationClient::new("test-key")),
        Arc::new(NoopAuditSink),
        Duration::from_secs(5),
    );

    let request = services.requests.create(&requester(), toner(3)).await.expect("create");
    let outcome = services
        .requests
        .decide_stores_stage(&stores(), &request.id, StoresDecision::Approve, "In budget")
        .await
        .expect("stores approval");
    let chain = outcome.chain.expect("chain built with the decision");
    assert_eq!(chain.missing_stages, vec![Stage::Procurement]);
    assert_eq!(chain.stages.len(), 2);

    let cfo_stage = stage_of(&chain.stages, Stage::Cfo);
    services
        .stages
        .decide(&cfo(), &cfo_stage.id, StageAction::Approve, "Approved")
        .await
        .expect("cfo approval");

    let summary = services.stages.chain_summary(&admin(), &request.id).await.expect("summary");
    assert!(summary.stages.iter().all(|stage| stage.status == StageStatus::Approved));
    assert!(!summary.is_complete);
    assert_eq!(summary.aggregate, AggregateStatus::InProgress);
    assert_eq!(
        services.stages.aggregate_status(&request.id).await.expect("aggregate"),
        AggregateStatus::InProgress
    );
}

#[tokio::test]
async fn resubmission_keeps_stage_open() {
    let audit = InMemoryAuditSink::default();
    let services = WorkflowServices::new(
        Repositories::in_memory(demo_users()),
        Arc::new(SimulatedAttestationClient::new("test-key")),
        Arc::new(audit.clone()),
        Duration::from_secs(5),
    );
    let (_, stages) = approved_chain(&services).await;
    let cfo_stage = stage_of(&stages, Stage::Cfo);

    let annotated = services
        .stages
        .decide(&cfo(), &cfo_stage.id, StageAction::RequestResubmission, "Split into two orders")
        .await
        .expect("resubmission");
    assert_eq!(annotated.stage.status, StageStatus::Pending);
    assert_eq!(annotated.stage.comment, "Split into two orders");
    assert_eq!(annotated.attestation, AttestationOutcome::Skipped);

    let approved = services
        .stages
        .decide(&cfo(), &cfo_stage.id, StageAction::Approve, "Fine as one order")
        .await
        .expect("still decidable");
    assert_eq!(approved.stage.status, StageStatus::Approved);

    assert_eq!(audit.events_of_type("stage.annotated").len(), 1);
    assert_eq!(audit.events_of_type("stage.decided").len(), 1);
}

#[tokio::test]
async fn stores_decision_rules() {
    let audit = InMemoryAuditSink::default();
    let services = WorkflowServices::new(
        Repositories::in_memory(demo_users()),
        Arc::new(SimulatedAttestationClient::new("test-key")),
        Arc::new(audit.clone()),
        Duration::from_secs(5),
    );
    let request = services.requests.create(&requester(), toner(2)).await.expect("create");

    let error = services
        .requests
        .decide_stores_stage(&procurement(), &request.id, StoresDecision::Approve, "")
        .await
        .expect_err("procurement cannot decide requests");
    assert_eq!(error.kind(), "unauthorized");

    let error = services
        .requests
        .decide_stores_stage(&stores(), &RequestId("missing".into()), StoresDecision::Approve, "")
        .await
        .expect_err("unknown request");
    assert_eq!(error.kind(), "not_found");

    let outcome = services
        .requests
        .decide_stores_stage(&admin(), &request.id, StoresDecision::Reject, "Duplicate order")
        .await
        .expect("admin rejects");
    assert_eq!(outcome.request.status, RequestStatus::Rejected);
    assert_eq!(outcome.request.stores_comment, "Duplicate order");
    assert!(outcome.chain.is_none());
    assert!(services.stages.chain_summary(&admin(), &request.id).await.expect("summary").stages.is_empty());

    let error = services
        .requests
        .decide_stores_stage(&stores(), &request.id, StoresDecision::Approve, "")
        .await
        .expect_err("terminal request");
    assert_eq!(error.kind(), "already_decided");

    assert_eq!(audit.events_of_type("request.decided").len(), 1);
    assert_eq!(audit.events_of_type("request.decision_rejected").len(), 2);
}

#[tokio::test]
async fn create_validates_quantity_and_role() {
    let services = in_memory();

    for quantity in [0, -4] {
        let error = services.requests.create(&requester(), toner(quantity)).await.expect_err("bad qty");
        assert_eq!(error.kind(), "invalid_quantity");
    }
    let error = services.requests.create(&stores(), toner(1)).await.expect_err("not a requester");
    assert_eq!(error.kind(), "unauthorized");
}

#[tokio::test]
async fn visibility_follows_roles() {
    let services = in_memory();
    let mine = services.requests.create(&requester(), toner(1)).await.expect("create");
    let other_requester = actor("user-requester-02", Role::Requester);

    assert_eq!(services.requests.list_visible(&requester()).await.expect("own").len(), 1);
    assert!(services.requests.list_visible(&other_requester).await.expect("other").is_empty());
    assert_eq!(services.requests.list_visible(&cfo()).await.expect("cfo").len(), 1);
    assert_eq!(services.requests.list_pending(&stores()).await.expect("stores").len(), 1);
    assert!(services.requests.list_pending(&procurement()).await.expect("proc").is_empty());

    let error = services.requests.get(&other_requester, &mine.id).await.expect_err("hidden");
    assert_eq!(error.kind(), "not_found");
    assert_eq!(services.requests.get(&requester(), &mine.id).await.expect("own").id, mine.id);

    services
        .requests
        .decide_stores_stage(&stores(), &mine.id, StoresDecision::Approve, "ok")
        .await
        .expect("approve");
    assert_eq!(services.stages.list_visible(&procurement()).await.expect("proc").len(), 1);
    assert_eq!(services.stages.list_visible(&admin()).await.expect("admin").len(), 3);
    assert!(services.stages.list_visible(&requester()).await.expect("requester").is_empty());
    assert!(services
        .stages
        .list_visible(&actor(SECOND_PROCUREMENT, Role::ProcurementReviewer))
        .await
        .expect("second procurement")
        .is_empty());
}

#[tokio::test]
async fn amend_only_while_pending() {
    let services = in_memory();
    let request = services.requests.create(&requester(), toner(1)).await.expect("create");
    let change = RequestAmendment { quantity: Some(4), ..RequestAmendment::default() };

    let error = services
        .requests
        .amend(&stores(), &request.id, change.clone())
        .await
        .expect_err("not the owner");
    assert_eq!(error.kind(), "unauthorized");

    let amended =
        services.requests.amend(&requester(), &request.id, change.clone()).await.expect("amend");
    assert_eq!(amended.quantity, 4);

    services
        .requests
        .decide_stores_stage(&stores(), &request.id, StoresDecision::Approve, "")
        .await
        .expect("approve");
    let error =
        services.requests.amend(&requester(), &request.id, change).await.expect_err("decided");
    assert_eq!(error.kind(), "already_decided");
}

#[tokio::test]
async fn unknown_actors_are_refused() {
    let services = in_memory();
    let resolved =
        services.resolve_actor(&UserId(DemoDirectory::CFO.into())).await.expect("known actor");
    assert_eq!(resolved.role, Role::CfoReviewer);

    let error = services.resolve_actor(&UserId("ghost".into())).await.expect_err("unknown");
    assert_eq!(error.kind(), "unauthorized");
}

#[tokio::test]
async fn inventory_events_are_attested_for_stores_staff() {
    let services = in_memory();
    let (request, _) = approved_chain(&services).await;

    let outcome = services
        .attest_inventory_event(
            &stores(),
            AttestationEvent::Delivery {
                request_id: request.id.clone(),
                tracking_reference: "DN-2291".into(),
            },
        )
        .await
        .expect("delivery attested");
    assert!(matches!(outcome, AttestationOutcome::Recorded { simulated: true, .. }));

    let records = services.recorder().records_for_request(&request.id).await.expect("records");
    assert!(records.iter().any(|record| record.event_type == AttestationEventType::Delivery));

    let error = services
        .attest_inventory_event(
            &admin(),
            AttestationEvent::Approval {
                request_id: request.id.clone(),
                stage: Stage::Cfo,
                decision: StageStatus::Approved,
                comment: String::new(),
            },
        )
        .await
        .expect_err("approvals only come from stage decisions");
    assert_eq!(error.kind(), "invalid_input");

    let error = services
        .attest_inventory_event(
            &cfo(),
            AttestationEvent::Delivery {
                request_id: request.id.clone(),
                tracking_reference: "DN-2292".into(),
            },
        )
        .await
        .expect_err("cfo cannot report deliveries");
    assert_eq!(error.kind(), "unauthorized");
}
