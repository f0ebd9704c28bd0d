use er_protocol::*;

#[test]
fn test_stage_definitions_deserialization_from_yaml() {
    let yaml_str = r#"
- id: 1
  label: "Data Collection"
  job: "ecl_data_collection"
- id: 2
  label: "Data Cleansing"
"#;

    let definitions: Vec<StageDefinition> =
        serde_yaml::from_str(yaml_str).expect("Failed to deserialize stage definitions");

    assert_eq!(definitions.len(), 2);
    assert_eq!(definitions[0].job.as_deref(), Some("ecl_data_collection"));
    assert_eq!(definitions[1].job, None);

    let stage = Stage::from(&definitions[0]);
    assert_eq!(stage.status, StageStatus::Pending);
    assert!(stage.confirmed);
}

#[test]
fn test_stage_status_wire_format() {
    let json = serde_json::to_string(&StageStatus::Processing).expect("serialize");
    assert_eq!(json, "\"processing\"");

    // Upper-case variants sent by some backends are accepted.
    let status: StageStatus = serde_json::from_str("\"COMPLETED\"").expect("deserialize");
    assert_eq!(status, StageStatus::Completed);

    assert!(serde_json::from_str::<StageStatus>("\"exploded\"").is_err());
}

#[test]
fn test_stage_status_transitions() {
    assert!(StageStatus::Pending.can_transition_to(StageStatus::Processing));
    assert!(StageStatus::Processing.can_transition_to(StageStatus::Completed));
    assert!(StageStatus::Processing.can_transition_to(StageStatus::Failed));
    assert!(StageStatus::Failed.can_transition_to(StageStatus::Pending));

    assert!(!StageStatus::Pending.can_transition_to(StageStatus::Completed));
    assert!(!StageStatus::Completed.can_transition_to(StageStatus::Pending));
    assert!(!StageStatus::Failed.can_transition_to(StageStatus::Processing));
}

#[test]
fn test_log_line_serialization() {
    let line = LogLine {
        stage_id: Some(3),
        timestamp: "10:15:00".to_string(),
        level: LogLevel::Success,
        message: "Raw ingestion complete.".to_string(),
    };

    let json = serde_json::to_value(&line).expect("serialize");
    assert_eq!(json["level"], "SUCCESS");
    assert_eq!(json["stage_id"], 3);

    let without_stage: LogLine = serde_json::from_str(
        r#"{"timestamp":"10:15:00","level":"WARN","message":"late partition"}"#,
    )
    .expect("deserialize");
    assert_eq!(without_stage.stage_id, None);
    assert_eq!(without_stage.level, LogLevel::Warn);
}

#[test]
fn test_start_run_request_body() {
    let config = RunConfiguration {
        source_system: "Snowflake_Prod_DW".to_string(),
        snapshot_date: "2024-03-31".to_string(),
        methodology: Some(Methodology::Stress),
        scope: vec![PortfolioScope::SmeCommercial, PortfolioScope::LargeCorporate],
    };

    let body = StartRunRequest::new(&config, ExecutionMode::Manual);
    let json = serde_json::to_value(&body).expect("serialize");

    assert_eq!(json["source_system"], "Snowflake_Prod_DW");
    assert_eq!(json["methodology"], "stress");
    assert_eq!(json["execution_mode"], "manual");
    assert_eq!(
        json["scope"],
        serde_json::json!(["SME / Commercial", "Large Corporate"])
    );
}

#[test]
fn test_start_run_response_shapes() {
    let bare: ApiEnvelope<StartRunResponse> =
        serde_json::from_str(r#"{"run_id":"RUN-1"}"#).expect("bare");
    assert_eq!(bare.into_inner().run_id, "RUN-1");

    let wrapped: ApiEnvelope<StartRunResponse> =
        serde_json::from_str(r#"{"data":{"run_exe_id":"RUN-2","created":true}}"#)
            .expect("wrapped");
    assert_eq!(wrapped.into_inner().run_id, "RUN-2");
}

#[test]
fn test_execution_details_deserialization() {
    let json = r#"{
        "data": {
            "steps": [
                {"step_id": 1, "step_name": "Data Collection", "status": "pending", "dag_id": "dag_a"},
                {"step_id": 2, "step_name": "Data Cleansing"}
            ]
        }
    }"#;

    let details: ApiEnvelope<ExecutionDetails> = serde_json::from_str(json).expect("details");
    let details = details.into_inner();

    assert_eq!(details.steps.len(), 2);
    assert_eq!(details.steps[0].dag_id.as_deref(), Some("dag_a"));
    assert_eq!(details.steps[1].status, StageStatus::Pending);
}

#[test]
fn test_op_serialization() {
    let op = Op::StartRun {
        config: RunConfiguration::default(),
        mode: ExecutionMode::Automated,
    };

    let json = serde_json::to_string(&op).expect("Failed to serialize Op");
    assert!(json.contains("\"type\":\"startRun\""));
    assert!(json.contains("\"payload\""));
    assert!(json.contains("Retail Banking"));

    let deserialized: Op = serde_json::from_str(&json).expect("Failed to deserialize Op");
    assert!(matches!(
        deserialized,
        Op::StartRun {
            mode: ExecutionMode::Automated,
            ..
        }
    ));

    let confirm = serde_json::to_string(&Op::Confirm).expect("serialize");
    assert_eq!(confirm, r#"{"type":"confirm"}"#);
}

#[test]
fn test_event_serialization() {
    let event = Event::StageStatusUpdate {
        run_id: "RUN-1".to_string(),
        stage_id: 5,
        status: StageStatus::Failed,
    };

    let json = serde_json::to_string(&event).expect("Failed to serialize Event");
    assert!(json.contains("\"type\":\"stageStatusUpdate\""));
    assert!(json.contains("\"status\":\"failed\""));

    let deserialized: Event = serde_json::from_str(&json).expect("Failed to deserialize Event");
    assert!(matches!(
        deserialized,
        Event::StageStatusUpdate { stage_id: 5, .. }
    ));
}

#[test]
fn test_global_config_partial_toml_uses_defaults() {
    // Only the sections present in the file override defaults.
    let json = r#"{"default-job": "random_stage_and_message_dag", "stream": {"idle-timeout-secs": 0}}"#;
    let config: GlobalConfig = serde_json::from_str(json).expect("deserialize");

    assert_eq!(config.default_job.as_deref(), Some("random_stage_and_message_dag"));
    assert_eq!(config.stream.idle_timeout_secs, 0);
    assert_eq!(config.api.base_url, "http://localhost:5000/api/v1");
    assert_eq!(config.persistence.max_attempts, 3);
    assert_eq!(config.sources.len(), 3);
}

#[test]
fn test_portfolio_scope_parsing() {
    assert_eq!("retail".parse::<PortfolioScope>(), Ok(PortfolioScope::RetailBanking));
    assert_eq!("Large Corporate".parse::<PortfolioScope>(), Ok(PortfolioScope::LargeCorporate));
    assert_eq!("SME".parse::<PortfolioScope>(), Ok(PortfolioScope::SmeCommercial));
    assert!("mortgages".parse::<PortfolioScope>().is_err());

    let config = RunConfiguration::default();
    assert!(config.is_retail_only());
}
